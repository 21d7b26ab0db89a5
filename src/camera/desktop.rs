use std::{
    sync::{mpsc::Sender, Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use image::RgbaImage;
use kamera::Camera as KCamera;
use log::{info, warn};
use slint::{Rgba8Pixel, SharedPixelBuffer};

use super::frame::{bgra_to_rgba, Frame, FrameSlot};

/// Webcam preview on a worker thread. Frames go to the UI channel and the capture slot.
pub struct DesktopCamera {
    running: Option<Arc<Mutex<bool>>>,
    task: Option<std::thread::JoinHandle<Result<()>>>,
    preview_sender: Sender<SharedPixelBuffer<Rgba8Pixel>>,
    slot: FrameSlot,
}

impl DesktopCamera {
    pub fn new(preview_sender: Sender<SharedPixelBuffer<Rgba8Pixel>>, slot: FrameSlot) -> Self {
        Self {
            running: None,
            task: None,
            preview_sender,
            slot,
        }
    }

    pub fn start_preview(&mut self, index: usize, _width: u32, _height: u32) -> Result<()> {
        self.stop_preview();
        let running = Arc::new(Mutex::new(true));
        self.running = Some(running.clone());
        let sender = self.preview_sender.clone();
        let slot = self.slot.clone();
        self.task = Some(std::thread::spawn(move || {
            let camera = KCamera::new_device(index)
                .ok_or_else(|| anyhow!("camera {index} does not exist"))?;
            camera.start();
            let mut frames = 0;
            let mut timer = Instant::now();
            loop {
                if !running.lock().map(|r| *r).unwrap_or(false) {
                    break;
                }

                let frame = match camera.wait_for_frame() {
                    Some(f) => f,
                    None => {
                        warn!("no frame from camera {index}");
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };

                let (width, height) = frame.size_u32();
                let mut pixels = frame.data().data_u8().to_vec();
                bgra_to_rgba(&mut pixels);

                let buf = SharedPixelBuffer::clone_from_slice(&pixels, width, height);
                let image = RgbaImage::from_raw(width, height, pixels)
                    .ok_or_else(|| anyhow!("frame size mismatch {width}x{height}"))?;
                slot.put(Frame::new(image));
                // the UI side hung up: the window is gone
                if sender.send(buf).is_err() {
                    break;
                }

                frames += 1;
                if timer.elapsed().as_millis() > 1000 {
                    info!("preview FPS:{frames} {width}x{height}");
                    frames = 0;
                    timer = Instant::now();
                }
            }
            camera.stop();
            Ok(())
        }));
        Ok(())
    }

    pub fn stop_preview(&mut self) {
        if let Some(running) = self.running.take() {
            if let Ok(mut running) = running.lock() {
                *running = false;
            }
        }
        if let Some(task) = self.task.take() {
            let res = task.join();
            info!("preview stopped: {:?}", res);
        }
    }
}

impl Drop for DesktopCamera {
    fn drop(&mut self) {
        self.stop_preview();
    }
}
