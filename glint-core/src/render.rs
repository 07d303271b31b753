//! Software pixel transfer into CPU-mapped buffers.
//!
//! The transfer step copies from the active pixel source — the raw
//! remote framebuffer or a decoded video sub-frame — into a pooled
//! buffer, restricted to the buffer's accumulated damage region,
//! converting between the supported 32-bit formats and scaling with
//! nearest-neighbor sampling when the source and buffer spaces differ.
//!
//! GPU-handle buffers are skipped here: their transfer is the
//! presentation collaborator's job, while the pipeline still performs
//! the damage bookkeeping.

use crate::buffer::Buffer;
use crate::error::GlintError;
use crate::geometry::{PixelFormat, Rect};
use crate::region::Region;

// ── SourceFrame ──────────────────────────────────────────────────

/// A borrowed view of the remote source framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct SourceFrame<'a> {
    /// Raw pixel data, `height` rows of `stride` bytes.
    pub pixels: &'a [u8],
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
}

impl SourceFrame<'_> {
    fn validate(&self) -> Result<(), GlintError> {
        let needed = self.stride as usize * self.height as usize;
        if self.pixels.len() < needed {
            return Err(GlintError::SourceTooShort {
                len: self.pixels.len(),
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A decoded video sub-frame delivered alongside (or instead of) raw
/// pixel damage. Owns its pixels; `rect` is in source coordinates.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Placement within the source coordinate space.
    pub rect: Rect,
    /// Decoded pixel data, `rect.height` rows of `stride` bytes.
    pub pixels: Vec<u8>,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
}

// ── SourceTransform ──────────────────────────────────────────────

/// Affine mapping from source space into buffer space: an
/// aspect-preserving fit with centering offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceTransform {
    /// Uniform scale factor.
    pub scale: f64,
    /// Horizontal centering offset in buffer pixels.
    pub x_offset: f64,
    /// Vertical centering offset in buffer pixels.
    pub y_offset: f64,
}

impl SourceTransform {
    /// The 1:1 mapping.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        x_offset: 0.0,
        y_offset: 0.0,
    };

    /// Fit a `src_width × src_height` source into a
    /// `dst_width × dst_height` buffer, preserving aspect ratio and
    /// centering the result.
    ///
    /// Near-equal ratios (within ±0.01) take the destination extents
    /// as-is instead of letterboxing.
    pub fn aspect_fit(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let src_w = src_width as f64;
        let src_h = src_height as f64;
        let dst_w = dst_width as f64;
        let dst_h = dst_height as f64;

        let hratio = dst_w / src_w;
        let vratio = dst_h / src_h;
        let scale = hratio.min(vratio);

        let (fit_w, fit_h) = if (hratio - vratio).abs() < 0.01 {
            (dst_w, dst_h)
        } else if hratio < vratio {
            (dst_w, src_h * scale)
        } else {
            (src_w * scale, dst_h)
        };

        Self {
            scale,
            x_offset: (dst_w - fit_w) / 2.0,
            y_offset: (dst_h - fit_h) / 2.0,
        }
    }

    /// Map a source-space region into buffer space.
    pub fn apply(&self, region: &Region) -> Region {
        region.transform(self.scale, self.x_offset, self.y_offset)
    }

    /// Map a single source-space rectangle into buffer space,
    /// expanded to whole pixels.
    pub fn apply_rect(&self, rect: Rect) -> Rect {
        let x1 = (rect.x as f64 * self.scale + self.x_offset).floor() as i32;
        let y1 = (rect.y as f64 * self.scale + self.y_offset).floor() as i32;
        let x2 = (rect.right() as f64 * self.scale + self.x_offset).ceil() as i32;
        let y2 = (rect.bottom() as f64 * self.scale + self.y_offset).ceil() as i32;
        Rect::new(x1, y1, (x2 - x1).max(0) as u32, (y2 - y1).max(0) as u32)
    }

    /// Whether this transform is a pure 1:1 copy.
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.x_offset == 0.0 && self.y_offset == 0.0
    }
}

// ── Transfer ─────────────────────────────────────────────────────

/// Copy the source framebuffer into `buffer`, restricted to the
/// rectangles of `clip` (the buffer's accumulated damage, in buffer
/// space). GPU-handle buffers are left untouched.
pub fn transfer_image(
    buffer: &mut Buffer,
    source: &SourceFrame<'_>,
    transform: &SourceTransform,
    clip: &Region,
) -> Result<(), GlintError> {
    source.validate()?;

    let geometry = *buffer.geometry();
    let buffer_rect = geometry.full_rect();
    let dst_format = geometry.format;
    let dst_stride = geometry.stride as usize;
    let same_format = dst_format == source.format;
    let rects: Vec<Rect> = clip.rects().to_vec();

    let Some(pixels) = buffer.pixels_mut() else {
        return Ok(());
    };

    for rect in rects {
        let Some(rect) = rect.intersect(&buffer_rect) else {
            continue;
        };

        if transform.is_identity() && same_format {
            copy_rows(pixels, dst_stride, source, &rect);
        } else {
            sample_rect(pixels, dst_stride, dst_format, source, transform, &rect);
        }
    }

    Ok(())
}

/// Copy one decoded video sub-frame into `buffer` at its transformed
/// position. GPU-handle buffers are left untouched.
pub fn transfer_video_frame(
    buffer: &mut Buffer,
    frame: &VideoFrame,
    transform: &SourceTransform,
) -> Result<(), GlintError> {
    let needed = frame.stride as usize * frame.rect.height as usize;
    if frame.pixels.len() < needed {
        return Err(GlintError::SourceTooShort {
            len: frame.pixels.len(),
            width: frame.rect.width,
            height: frame.rect.height,
        });
    }

    let geometry = *buffer.geometry();
    let buffer_rect = geometry.full_rect();
    let dst_format = geometry.format;
    let dst_stride = geometry.stride as usize;

    let Some(dst_rect) = transform.apply_rect(frame.rect).intersect(&buffer_rect) else {
        return Ok(());
    };

    let Some(pixels) = buffer.pixels_mut() else {
        return Ok(());
    };
    let src_bpp = frame.format.bytes_per_pixel();
    let dst_bpp = dst_format.bytes_per_pixel();

    for dy in dst_rect.y..dst_rect.bottom() {
        // Inverse-map back into the sub-frame.
        let sy = ((dy as f64 + 0.5 - transform.y_offset) / transform.scale) as i32 - frame.rect.y;
        let sy = sy.clamp(0, frame.rect.height as i32 - 1) as usize;
        let src_row = sy * frame.stride as usize;
        let dst_row = dy as usize * dst_stride;

        for dx in dst_rect.x..dst_rect.right() {
            let sx =
                ((dx as f64 + 0.5 - transform.x_offset) / transform.scale) as i32 - frame.rect.x;
            let sx = sx.clamp(0, frame.rect.width as i32 - 1) as usize;

            let src_off = src_row + sx * src_bpp;
            let dst_off = dst_row + dx as usize * dst_bpp;
            let rgba = read_rgba(frame.format, &frame.pixels[src_off..src_off + src_bpp]);
            pixels[dst_off..dst_off + dst_bpp].copy_from_slice(&write_pixel(dst_format, rgba));
        }
    }

    Ok(())
}

// ── Internal ─────────────────────────────────────────────────────

/// 1:1 same-format row copy, clamped to the source extents.
fn copy_rows(pixels: &mut [u8], dst_stride: usize, source: &SourceFrame<'_>, rect: &Rect) {
    let bpp = source.format.bytes_per_pixel();
    let source_rect = Rect::new(0, 0, source.width, source.height);
    let Some(rect) = rect.intersect(&source_rect) else {
        return;
    };

    let row_bytes = rect.width as usize * bpp;
    for y in rect.y..rect.bottom() {
        let src_start = y as usize * source.stride as usize + rect.x as usize * bpp;
        let dst_start = y as usize * dst_stride + rect.x as usize * bpp;
        pixels[dst_start..dst_start + row_bytes]
            .copy_from_slice(&source.pixels[src_start..src_start + row_bytes]);
    }
}

/// Nearest-neighbor sampling with format conversion.
fn sample_rect(
    pixels: &mut [u8],
    dst_stride: usize,
    dst_format: PixelFormat,
    source: &SourceFrame<'_>,
    transform: &SourceTransform,
    rect: &Rect,
) {
    let src_bpp = source.format.bytes_per_pixel();
    let dst_bpp = dst_format.bytes_per_pixel();

    for dy in rect.y..rect.bottom() {
        let sy = ((dy as f64 + 0.5 - transform.y_offset) / transform.scale) as i32;
        if sy < 0 || sy >= source.height as i32 {
            continue;
        }
        let src_row = sy as usize * source.stride as usize;
        let dst_row = dy as usize * dst_stride;

        for dx in rect.x..rect.right() {
            let sx = ((dx as f64 + 0.5 - transform.x_offset) / transform.scale) as i32;
            if sx < 0 || sx >= source.width as i32 {
                continue;
            }

            let src_off = src_row + sx as usize * src_bpp;
            let dst_off = dst_row + dx as usize * dst_bpp;
            let rgba = read_rgba(source.format, &source.pixels[src_off..src_off + src_bpp]);
            pixels[dst_off..dst_off + dst_bpp].copy_from_slice(&write_pixel(dst_format, rgba));
        }
    }
}

/// Decode one pixel into `[r, g, b, a]`.
fn read_rgba(format: PixelFormat, bytes: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8 => [bytes[0], bytes[1], bytes[2], bytes[3]],
        PixelFormat::Bgra8 => [bytes[2], bytes[1], bytes[0], bytes[3]],
        // Memory order b, g, r, x; alpha forced opaque.
        PixelFormat::Xrgb8 => [bytes[2], bytes[1], bytes[0], 0xff],
    }
}

/// Encode `[r, g, b, a]` into one pixel of the given format.
fn write_pixel(format: PixelFormat, rgba: [u8; 4]) -> [u8; 4] {
    let [r, g, b, a] = rgba;
    match format {
        PixelFormat::Rgba8 => [r, g, b, a],
        PixelFormat::Bgra8 => [b, g, r, a],
        PixelFormat::Xrgb8 => [b, g, r, 0xff],
    }
}

// ── Tests ────────────────────────────────────────────────────────
