//! Box and label drawing onto RGB frames.

use crate::types::Annotation;
use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyle, PrimitiveStyleBuilder, Rectangle, StrokeAlignment},
    text::{Baseline, Text},
};
use image::{Rgb, RgbImage};
use std::convert::Infallible;

const BOX_COLOR: Rgb888 = Rgb888::GREEN;
const LABEL_COLOR: Rgb888 = Rgb888::YELLOW;
const BOX_STROKE: u32 = 2;
const LABEL_OFFSET: (i32, i32) = (5, -10);

/// Draw target over an [`RgbImage`]; pixels outside the image are dropped.
struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (w, h) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 && (point.x as u32) < w && (point.y as u32) < h {
                self.0
                    .put_pixel(point.x as u32, point.y as u32, Rgb([color.r(), color.g(), color.b()]));
            }
        }
        Ok(())
    }
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(v) => v,
        Err(never) => match never {},
    }
}

/// Draw a green rectangle and a yellow name above-left of each face.
pub fn draw_annotations(frame: &mut RgbImage, annotations: &[Annotation]) {
    let mut canvas = Canvas(frame);
    let box_style: PrimitiveStyle<Rgb888> = PrimitiveStyleBuilder::new()
        .stroke_color(BOX_COLOR)
        .stroke_width(BOX_STROKE)
        .stroke_alignment(StrokeAlignment::Inside)
        .build();
    let text_style = MonoTextStyle::new(&FONT_10X20, LABEL_COLOR);

    for Annotation { bbox, label } in annotations {
        let top_left = Point::new(bbox.left().round() as i32, bbox.top().round() as i32);
        let bottom_right = Point::new(bbox.right().round() as i32, bbox.bottom().round() as i32);

        infallible(
            Rectangle::with_corners(top_left, bottom_right)
                .into_styled(box_style)
                .draw(&mut canvas),
        );

        let anchor = top_left + Point::new(LABEL_OFFSET.0, LABEL_OFFSET.1);
        infallible(Text::with_baseline(label, anchor, text_style, Baseline::Bottom).draw(&mut canvas));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn annotation(x: f32, y: f32, w: f32, h: f32, label: &str) -> Annotation {
        Annotation {
            bbox: BoundingBox {
                x, y, width: w, height: h, confidence: 1.0, landmarks: None,
            },
            label: label.to_string(),
        }
    }

    #[test]
    fn test_box_edges_are_green_interior_untouched() {
        let mut frame = RgbImage::new(100, 100);
        draw_annotations(&mut frame, &[annotation(20.0, 40.0, 40.0, 30.0, "")]);

        assert_eq!(frame.get_pixel(20, 55), &Rgb([0, 255, 0]));
        assert_eq!(frame.get_pixel(40, 40), &Rgb([0, 255, 0]));
        assert_eq!(frame.get_pixel(40, 55), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_drawn_in_yellow_above_box() {
        let mut frame = RgbImage::new(200, 120);
        draw_annotations(&mut frame, &[annotation(20.0, 60.0, 50.0, 40.0, "Alice")]);

        let yellow = Rgb([255, 255, 0]);
        let label_pixels = (25..80)
            .flat_map(|x| (25..50).map(move |y| (x, y)))
            .filter(|&(x, y)| frame.get_pixel(x, y) == &yellow)
            .count();
        assert!(label_pixels > 0, "no label pixels above the box");
    }

    #[test]
    fn test_out_of_frame_box_is_clipped() {
        let mut frame = RgbImage::new(32, 32);
        draw_annotations(&mut frame, &[annotation(-10.0, -10.0, 100.0, 100.0, "Bob")]);
        assert_eq!(frame.get_pixel(16, 16), &Rgb([0, 0, 0]));
    }
}
