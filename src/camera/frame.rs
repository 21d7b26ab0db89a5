use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{anyhow, Result};
use image::{
    imageops::{rotate180, rotate270, rotate90},
    RgbaImage,
};

/// One decoded preview frame, upright.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }
}

/// Holds the newest frame a camera backend has produced. Older frames are dropped.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, frame: Frame) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(frame);
        }
    }

    pub fn latest(&self) -> Option<Frame> {
        self.inner.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }
}

/// Bytes of an NV21 buffer. Odd sizes round the chroma grid up, one VU pair per 2x2 block.
pub fn nv21_len(width: usize, height: usize) -> usize {
    width * height + 2 * width.div_ceil(2) * height.div_ceil(2)
}

/// Packs separate Y/U/V planes (any chroma pixel stride) into a contiguous NV21 buffer.
#[allow(clippy::too_many_arguments)]
pub fn pack_nv21(
    y_plane: &[u8],
    y_stride: usize,
    u_plane: &[u8],
    v_plane: &[u8],
    uv_stride: usize,
    uv_pixel_stride: usize,
    width: usize,
    height: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(nv21_len(width, height));
    for row in 0..height {
        let start = row * y_stride;
        let line = y_plane
            .get(start..start + width)
            .ok_or_else(|| anyhow!("y plane too short at row {row}"))?;
        out.extend_from_slice(line);
    }
    for row in 0..height.div_ceil(2) {
        for col in 0..width.div_ceil(2) {
            let idx = row * uv_stride + col * uv_pixel_stride;
            let (v, u) = match (v_plane.get(idx), u_plane.get(idx)) {
                (Some(v), Some(u)) => (*v, *u),
                _ => return Err(anyhow!("chroma plane too short at row {row}")),
            };
            out.push(v);
            out.push(u);
        }
    }
    Ok(out)
}

/// NV21 (YUV420SP, VU interleaved) to RGBA using the BT.601 integer approximation.
pub fn nv21_to_rgba(data: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    let frame_size = width * height;
    let needed = nv21_len(width, height);
    if data.len() < needed {
        return Err(anyhow!(
            "nv21 buffer holds {} bytes, {}x{} needs {}",
            data.len(),
            width,
            height,
            needed
        ));
    }
    let chroma_row = 2 * width.div_ceil(2);
    let mut rgba = Vec::with_capacity(frame_size * 4);
    for j in 0..height {
        let mut uvp = frame_size + (j >> 1) * chroma_row;
        let (mut u, mut v) = (0i32, 0i32);
        for i in 0..width {
            let y = (data[j * width + i] as i32 - 16).max(0);
            if i & 1 == 0 {
                v = data[uvp] as i32 - 128;
                u = data[uvp + 1] as i32 - 128;
                uvp += 2;
            }
            let y1192 = 1192 * y;
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);
            rgba.extend_from_slice(&[(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8, 255]);
        }
    }
    Ok(rgba)
}

/// Swaps blue and red in place. Desktop capture APIs hand out BGRA.
pub fn bgra_to_rgba(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// Rotates a sensor image clockwise so it is upright on screen.
pub fn rotate_upright(image: RgbaImage, degrees: i32) -> RgbaImage {
    match degrees.rem_euclid(360) {
        90 => rotate90(&image),
        180 => rotate180(&image),
        270 => rotate270(&image),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_nv21_black_and_white() {
        // 2x2 luma: black, white, black, white; neutral chroma
        let data = [16, 255, 16, 255, 128, 128];
        let rgba = nv21_to_rgba(&data, 2, 2).unwrap();
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_nv21_rejects_short_buffer() {
        assert!(nv21_to_rgba(&[0; 5], 2, 2).is_err());
    }

    #[test]
    fn test_nv21_odd_width() {
        // 3x2: two chroma pairs per row, the last one covers a single column
        assert_eq!(nv21_len(3, 2), 10);
        assert!(nv21_to_rgba(&[128; 9], 3, 2).is_err());

        let data = [16, 16, 255, 16, 16, 255, 128, 128, 128, 128];
        let rgba = nv21_to_rgba(&data, 3, 2).unwrap();
        assert_eq!(rgba.len(), 3 * 2 * 4);
        assert_eq!(&rgba[8..12], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_nv21_odd_height() {
        assert_eq!(nv21_len(2, 3), 10);
        assert!(nv21_to_rgba(&[128; 9], 2, 3).is_err());
        assert_eq!(nv21_to_rgba(&[128; 10], 2, 3).unwrap().len(), 2 * 3 * 4);
    }

    #[test]
    fn test_pack_nv21_odd_width_matches_decoder() {
        let y = [1, 2, 3, 4, 5, 6];
        let u = [50, 51];
        let v = [60, 61];
        let packed = pack_nv21(&y, 3, &u, &v, 2, 1, 3, 2).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6, 60, 50, 61, 51]);
        assert_eq!(packed.len(), nv21_len(3, 2));
        assert!(nv21_to_rgba(&packed, 3, 2).is_ok());
    }

    #[test]
    fn test_pack_nv21_strided_planes() {
        // 2x2 image, luma rows padded to 4 bytes, chroma pixel stride 2
        let y = [1, 2, 0, 0, 3, 4, 0, 0];
        let u = [50, 0];
        let v = [60, 0];
        let packed = pack_nv21(&y, 4, &u, &v, 4, 2, 2, 2).unwrap();
        assert_eq!(packed, vec![1, 2, 3, 4, 60, 50]);
    }

    #[test]
    fn test_bgra_swap() {
        let mut px = [1, 2, 3, 4, 5, 6, 7, 8];
        bgra_to_rgba(&mut px);
        assert_eq!(px, [3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_rotate_swaps_dimensions() {
        let mut img = RgbaImage::new(4, 2);
        img.put_pixel(0, 0, Rgba([9, 9, 9, 255]));
        let rotated = rotate_upright(img.clone(), 90);
        assert_eq!(rotated.dimensions(), (2, 4));
        // top-left moves to top-right on a clockwise turn
        assert_eq!(rotated.get_pixel(1, 0), &Rgba([9, 9, 9, 255]));
        assert_eq!(rotate_upright(img.clone(), 180).dimensions(), (4, 2));
        assert_eq!(rotate_upright(img, -90).dimensions(), (2, 4));
    }

    #[test]
    fn test_slot_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        slot.put(Frame::new(RgbaImage::new(1, 1)));
        slot.put(Frame::new(RgbaImage::new(2, 2)));
        assert_eq!(slot.latest().unwrap().image.dimensions(), (2, 2));
        slot.clear();
        assert!(slot.latest().is_none());
    }
}
