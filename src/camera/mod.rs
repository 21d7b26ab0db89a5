use std::{
    path::{Path, PathBuf},
    sync::mpsc::Sender,
};

use anyhow::{anyhow, Result};
use log::info;
use slint::{Rgba8Pixel, SharedPixelBuffer};

#[cfg(target_os = "android")]
use self::android::AndroidCamera;
#[cfg(not(target_os = "android"))]
use self::desktop::DesktopCamera;
pub use self::frame::{Frame, FrameSlot};
use crate::photo;

#[cfg(target_os = "android")]
mod android;
#[cfg(not(target_os = "android"))]
mod desktop;
pub mod frame;

pub struct Camera {
    #[cfg(target_os = "android")]
    camera: AndroidCamera,
    #[cfg(not(target_os = "android"))]
    camera: DesktopCamera,
    slot: FrameSlot,
}

impl Camera {
    pub fn new(preview_sender: Sender<SharedPixelBuffer<Rgba8Pixel>>) -> Result<Self> {
        let slot = FrameSlot::new();
        Ok(Camera {
            #[cfg(target_os = "android")]
            camera: AndroidCamera::new(preview_sender, slot.clone()),
            #[cfg(not(target_os = "android"))]
            camera: DesktopCamera::new(preview_sender, slot.clone()),
            slot,
        })
    }

    pub fn start_preview(&mut self, camera_index: usize, width: u32, height: u32) -> Result<()> {
        #[cfg(target_os = "android")]
        {
            self.camera.open(camera_index)?;
            self.camera.start_preview(width, height)?;
        }
        #[cfg(not(target_os = "android"))]
        self.camera.start_preview(camera_index, width, height)?;
        Ok(())
    }

    pub fn stop_preview(&mut self) -> Result<()> {
        #[cfg(target_os = "android")]
        self.camera.close();
        #[cfg(not(target_os = "android"))]
        self.camera.stop_preview();
        self.slot.clear();
        Ok(())
    }

    /// Saves the newest preview frame as a still photo in `dir`.
    pub fn take_picture(&self, dir: &Path) -> Result<PathBuf> {
        take_picture_from(&self.slot, dir)
    }
}

/// `ACAMERA_LENS_FACING_BACK`.
pub const LENS_FACING_BACK: u8 = 1;

/// Picks the first back-facing lens, else `fallback` when it names an existing camera.
pub fn select_camera(lens_facings: &[u8], fallback: usize) -> Option<usize> {
    lens_facings
        .iter()
        .position(|facing| *facing == LENS_FACING_BACK)
        .or_else(|| (fallback < lens_facings.len()).then_some(fallback))
}

pub fn take_picture_from(slot: &FrameSlot, dir: &Path) -> Result<PathBuf> {
    let frame = slot
        .latest()
        .ok_or_else(|| anyhow!("no frame available"))?;
    info!(
        "capturing {}x{} frame, {}ms old",
        frame.image.width(),
        frame.image.height(),
        frame.captured_at.elapsed().as_millis()
    );
    photo::save_photo(&frame.image, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn test_take_picture_without_frame() {
        let dir = tempfile::tempdir().unwrap();
        let err = take_picture_from(&FrameSlot::new(), dir.path()).unwrap_err();
        assert!(err.to_string().contains("no frame available"));
    }

    #[test]
    fn test_take_picture_writes_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FrameSlot::new();
        slot.put(Frame::new(RgbaImage::new(16, 9)));
        let path = take_picture_from(&slot, dir.path()).unwrap();
        assert!(path.exists());
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (16, 9));
    }

    #[test]
    fn test_select_camera_prefers_back_lens() {
        // front, back, external
        assert_eq!(select_camera(&[0, 1, 2], 0), Some(1));
        assert_eq!(select_camera(&[1, 1], 1), Some(0));
    }

    #[test]
    fn test_select_camera_falls_back_to_index() {
        assert_eq!(select_camera(&[0, 2], 1), Some(1));
        assert_eq!(select_camera(&[0], 3), None);
        assert_eq!(select_camera(&[], 0), None);
    }

    #[cfg(not(target_os = "android"))]
    #[test]
    fn test_new_camera_has_no_frame() {
        let (sender, _receiver) = std::sync::mpsc::channel();
        let camera = Camera::new(sender).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(camera.take_picture(dir.path()).is_err());
    }
}
