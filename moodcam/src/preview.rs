//! Annotated frames for the live view.
use std::sync::Arc;

use facenet::FaceDetection;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut},
    rect::Rect,
};
use tokio::sync::watch;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 200, 0]);

/// Latest annotated frame, shared with the stream endpoint.
#[derive(Clone)]
pub struct Preview {
    tx: Arc<watch::Sender<Option<Arc<RgbImage>>>>,
}

impl Preview {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a frame with the detection drawn on top.
    pub fn publish(&self, frame: &RgbImage, detection: Option<&FaceDetection>) {
        // Nobody is watching, skip the copy
        if self.tx.receiver_count() == 0 {
            return;
        }

        let mut frame = frame.clone();
        if let Some(detection) = detection {
            draw_detection(&mut frame, detection);
        }
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RgbImage>>> {
        self.tx.subscribe()
    }
}

impl Default for Preview {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw the face box and landmarks on the frame.
pub fn draw_detection(frame: &mut RgbImage, detection: &FaceDetection) {
    let (width, height) = (frame.width() as f32, frame.height() as f32);
    let bbox = detection.bbox;

    // Coordinate frame basis is on the top left corner
    let (x_tl, y_tl) = (bbox[0] * width, bbox[1] * height);
    let (x_br, y_br) = (bbox[2] * width, bbox[3] * height);
    let rect_width = (x_br - x_tl).max(1.0);
    let rect_height = (y_br - y_tl).max(1.0);

    let face_rect =
        Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width as u32, rect_height as u32);
    draw_hollow_rect_mut(frame, face_rect, BOX_COLOR);

    if let Some(landmarks) = &detection.landmarks {
        for (x, y) in landmarks.points.iter() {
            draw_filled_circle_mut(frame, (*x as i32, *y as i32), 1, LANDMARK_COLOR);
        }
    }
}
