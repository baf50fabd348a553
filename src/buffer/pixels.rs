//! Pixel copying and post-processing
//!
//! Pixels are 32-bit `0xAARRGGBB` words. Copies run either as a bulk row copy
//! or per pixel with, in order: alpha premultiplication, color-key
//! punch-through and clip masking.

use super::HostBitmap;
use crate::geometry::{Rect, Region};

/// Post-processing applied to copied pixels
#[derive(Debug, Clone, Default)]
pub struct PixelOps<'a> {
    /// Destination carries alpha; premultiply and write real alpha.
    pub premultiply: bool,
    /// Constant alpha applied on top of any per-pixel alpha
    pub window_alpha: u8,
    /// Source colors (RGB, alpha ignored) that become fully transparent
    pub color_key: Option<u32>,
    /// Pixels outside this region become fully transparent
    pub clip: Option<&'a Region>,
}

impl PixelOps<'_> {
    pub fn is_passthrough(&self) -> bool {
        !self.premultiply && self.color_key.is_none() && self.clip.is_none()
    }
}

/// Premultiplies one pixel. Without per-pixel alpha the pixel is treated as
/// opaque before the window alpha is applied.
#[inline]
pub fn premultiply(pixel: u32, per_pixel_alpha: bool, window_alpha: u8) -> u32 {
    let source_alpha = if per_pixel_alpha { pixel >> 24 } else { 0xff };
    let alpha = mul_div_255(source_alpha, window_alpha as u32);
    if alpha == 0xff {
        return pixel | 0xff00_0000;
    }
    if alpha == 0 {
        return 0;
    }

    let r = mul_div_255((pixel >> 16) & 0xff, alpha);
    let g = mul_div_255((pixel >> 8) & 0xff, alpha);
    let b = mul_div_255(pixel & 0xff, alpha);
    (alpha << 24) | (r << 16) | (g << 8) | b
}

#[inline]
fn mul_div_255(a: u32, b: u32) -> u32 {
    // Exact rounding of a * b / 255 for a, b <= 255
    let t = a * b + 0x80;
    (t + (t >> 8)) >> 8
}

/// Copies `rect` (in buffer coordinates, equal to bitmap coordinates) from
/// `src` into `dst`, a buffer `dst_width` pixels wide.
///
/// Returns `true` if the bulk path was taken.
pub fn copy_rect(src: &HostBitmap<'_>, dst: &mut [u32], dst_width: u32, rect: &Rect, ops: &PixelOps<'_>) -> bool {
    let Some(rect) = rect.intersection(&Rect::from_size(src.width.min(dst_width), src.height)) else {
        return false;
    };
    let dst_width = dst_width as usize;
    let x0 = rect.x as usize;
    let y0 = rect.y as usize;
    let w = rect.width as usize;
    let h = rect.height as usize;

    if ops.is_passthrough() && rect.x == 0 && w == dst_width {
        if src.stride == dst_width {
            let start = y0 * dst_width;
            let len = h * dst_width;
            dst[start..start + len].copy_from_slice(&src.pixels[start..start + len]);
        } else {
            for row in y0..y0 + h {
                let s = row * src.stride;
                let d = row * dst_width;
                dst[d..d + w].copy_from_slice(&src.pixels[s..s + w]);
            }
        }
        return true;
    }

    for row in y0..y0 + h {
        let src_row = &src.pixels[row * src.stride + x0..row * src.stride + x0 + w];
        let dst_row = &mut dst[row * dst_width + x0..row * dst_width + x0 + w];
        if ops.is_passthrough() {
            dst_row.copy_from_slice(src_row);
            continue;
        }

        for (i, (out, &pixel)) in dst_row.iter_mut().zip(src_row).enumerate() {
            let mut value = if ops.premultiply {
                premultiply(pixel, src.per_pixel_alpha, ops.window_alpha)
            } else {
                pixel
            };
            if ops.color_key.is_some_and(|key| pixel & 0x00ff_ffff == key & 0x00ff_ffff) {
                value = 0;
            }
            if let Some(clip) = ops.clip {
                if !clip.contains_point((x0 + i) as i32, row as i32) {
                    value = 0;
                }
            }
            *out = value;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(pixels: &[u32], width: u32, height: u32) -> HostBitmap<'_> {
        HostBitmap::new(pixels, width as usize, width, height, false).unwrap()
    }

    #[test]
    fn test_premultiply() {
        assert_eq!(premultiply(0x00ff_ffff, false, 255), 0xffff_ffff);
        assert_eq!(premultiply(0x80ff_0000, true, 255), 0x8080_0000);
        assert_eq!(premultiply(0xffff_ffff, true, 0), 0);
        assert_eq!(premultiply(0x0012_3456, false, 128), 0x8009_1a2b);
    }

    #[test]
    fn test_passthrough_full_width_is_bulk() {
        let src: Vec<u32> = (0..16).collect();
        let mut dst = vec![0u32; 16];
        let ops = PixelOps::default();
        assert!(copy_rect(&bitmap(&src, 4, 4), &mut dst, 4, &Rect::new(0, 1, 4, 2), &ops));
        assert_eq!(&dst[4..12], &src[4..12]);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[12], 0);
    }

    #[test]
    fn test_partial_width_is_not_bulk() {
        let src: Vec<u32> = (0..16).collect();
        let mut dst = vec![0u32; 16];
        let ops = PixelOps::default();
        assert!(!copy_rect(&bitmap(&src, 4, 4), &mut dst, 4, &Rect::new(1, 0, 2, 1), &ops));
        assert_eq!(&dst[..4], &[0, 1, 2, 0]);
    }

    #[test]
    fn test_color_key_disables_bulk_and_punches_only_matches() {
        const KEY: u32 = 0x00ff_00ff;
        // One row in ten is the key color
        let width = 10;
        let src: Vec<u32> = (0..100u32)
            .map(|i| if i % 10 == 3 { 0xff00_0000 | KEY } else { 0xff00_0000 | i })
            .collect();
        let mut dst = vec![0xdead_beef; 100];
        let ops = PixelOps {
            color_key: Some(KEY),
            ..PixelOps::default()
        };

        let bulk = copy_rect(&bitmap(&src, width, 10), &mut dst, width, &Rect::new(0, 0, 10, 10), &ops);
        assert!(!bulk);
        for (i, (&out, &inp)) in dst.iter().zip(&src).enumerate() {
            if i % 10 == 3 {
                assert_eq!(out, 0, "pixel {} should be transparent", i);
            } else {
                assert_eq!(out, inp);
            }
        }
    }

    #[test]
    fn test_clip_masks_outside_pixels() {
        let src = vec![0xff11_2233u32; 16];
        let mut dst = vec![0u32; 16];
        let clip = Region::from_rect(Rect::new(1, 1, 2, 2));
        let ops = PixelOps {
            premultiply: true,
            window_alpha: 255,
            clip: Some(&clip),
            ..PixelOps::default()
        };
        copy_rect(&bitmap(&src, 4, 4), &mut dst, 4, &Rect::from_size(4, 4), &ops);
        assert_eq!(dst[5], 0xff11_2233);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[15], 0);
    }

    #[test]
    fn test_rect_is_clamped_to_bitmap() {
        let src = vec![7u32; 4];
        let mut dst = vec![0u32; 16];
        let ops = PixelOps::default();
        copy_rect(&bitmap(&src, 2, 2), &mut dst, 4, &Rect::from_size(4, 4), &ops);
        assert_eq!(dst.iter().filter(|&&p| p == 7).count(), 4);
    }
}
