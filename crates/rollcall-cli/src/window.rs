//! Live preview window.

use image::RgbImage;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use rollcall_core::overlay::draw_annotations;
use rollcall_core::{Annotation, Renderer};
use thiserror::Error;

pub const WINDOW_TITLE: &str = "Face Recognition";

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("window: {0}")]
    Minifb(#[from] minifb::Error),
}

/// Shows annotated frames; `Esc` or closing the window requests quit.
pub struct PreviewWindow {
    window: Window,
    buffer: Vec<u32>,
}

impl PreviewWindow {
    pub fn open(width: u32, height: u32) -> Result<Self, WindowError> {
        let window = Window::new(
            WINDOW_TITLE,
            width as usize,
            height as usize,
            WindowOptions::default(),
        )?;
        tracing::debug!(width, height, "preview window opened");
        Ok(Self {
            window,
            buffer: Vec::new(),
        })
    }
}

impl Renderer for PreviewWindow {
    type Error = WindowError;

    fn render(&mut self, frame: &RgbImage, annotations: &[Annotation]) -> Result<(), WindowError> {
        let mut canvas = frame.clone();
        draw_annotations(&mut canvas, annotations);
        pack_rgb(&canvas, &mut self.buffer);
        self.window.update_with_buffer(
            &self.buffer,
            canvas.width() as usize,
            canvas.height() as usize,
        )?;
        Ok(())
    }

    fn cancel_requested(&mut self) -> bool {
        // Pressed since the last update, so a tap during a slow frame still counts.
        let escape = self.window.is_key_pressed(Key::Escape, KeyRepeat::No);
        quit_requested(self.window.is_open(), escape)
    }
}

fn quit_requested(open: bool, escape_pressed: bool) -> bool {
    !open || escape_pressed
}

/// Repack RGB8 pixels into minifb's `0RGB` u32 layout.
fn pack_rgb(image: &RgbImage, out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        image
            .pixels()
            .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2])),
    );
}
