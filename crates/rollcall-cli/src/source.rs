use rollcall_core::FrameSource;
use rollcall_hw::{CameraError, CameraStream};

/// Adapts a V4L2 capture stream to the pipeline's frame source.
pub struct CameraSource<'a> {
    stream: CameraStream<'a>,
}

impl<'a> CameraSource<'a> {
    pub fn new(stream: CameraStream<'a>) -> Self {
        Self { stream }
    }
}

impl FrameSource for CameraSource<'_> {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<image::RgbImage>, CameraError> {
        let frame = self.stream.next_frame()?;
        let sequence = frame.sequence;
        frame.into_image().map(Some).ok_or_else(|| {
            CameraError::Capture(format!("frame {sequence} has a short RGB buffer"))
        })
    }
}
