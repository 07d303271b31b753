//! Shared geometry types for the presentation pipeline.
//!
//! These describe pixel layouts, rectangles and the 5-tuple geometry
//! that the buffer pool targets. Coordinates are signed so that
//! transformed rectangles can be clamped rather than wrapped.

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for buffers and source framebuffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 4 bytes per pixel: padding, Red, Green, Blue (alpha ignored).
    Xrgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 | PixelFormat::Xrgb8 => 4,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: i32,
    /// Top edge in pixels.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Construct a rectangle from origin and extent.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub const fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    /// A rectangle with zero area covers nothing.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Area in pixels.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The overlapping portion of two rectangles, if any.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x1 < x2 && y1 < y2 {
            Some(Rect::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32))
        } else {
            None
        }
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Smallest rectangle covering both.
    pub fn union_bounds(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32)
    }
}

// ── BufferGeometry ───────────────────────────────────────────────

/// The full geometry a buffer is created with.
///
/// Two buffers are interchangeable for presentation purposes exactly
/// when their geometries compare equal; the pool uses this to decide
/// whether a returning buffer may be recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Integer output scale factor.
    pub scale: u32,
}

impl BufferGeometry {
    /// Geometry with a tightly packed stride for the given format.
    pub fn packed(width: u32, height: u32, format: PixelFormat, scale: u32) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            scale,
        }
    }

    /// Total byte size a CPU-mapped buffer of this geometry occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// The rectangle covering the whole buffer.
    pub fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

// ── Tests ────────────────────────────────────────────────────────
