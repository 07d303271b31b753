//! Damage-region algebra.
//!
//! A [`Region`] is a set of axis-aligned rectangles kept normalized:
//! no two stored rectangles overlap, and adjacent rectangles that tile
//! an exact larger rectangle are merged. The pipeline and the buffer
//! pool use regions to accumulate damage across presentation cycles
//! and to carry it between coordinate spaces.

use crate::geometry::Rect;

// ── Region ───────────────────────────────────────────────────────

/// A normalized set of non-overlapping rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// The empty region.
    pub const fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// A region covering a single rectangle.
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    /// Whether the region covers no area.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of stored rectangles.
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    /// The stored rectangles.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Remove all coverage.
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Union a single rectangle into the region.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        // Split the incoming rectangle against every stored one so the
        // non-overlap invariant holds, then keep whatever area is new.
        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(pieces.len());
            for piece in pieces {
                subtract(&piece, existing, &mut next);
            }
            pieces = next;
            if pieces.is_empty() {
                return;
            }
        }

        self.rects.extend(pieces);
        self.coalesce();
    }

    /// Union another region into this one.
    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Whether any part of `rect` is covered.
    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersect(rect).is_some())
    }

    /// Whether `rect` is covered completely.
    pub fn covers(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return true;
        }
        let mut remainder = vec![*rect];
        for existing in &self.rects {
            let mut next = Vec::with_capacity(remainder.len());
            for piece in remainder {
                subtract(&piece, existing, &mut next);
            }
            remainder = next;
            if remainder.is_empty() {
                return true;
            }
        }
        remainder.is_empty()
    }

    /// Total covered area in pixels.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Smallest rectangle covering the whole region, if non-empty.
    pub fn bounds(&self) -> Option<Rect> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| acc.union_bounds(r)))
    }

    /// Affine scale+translate into another coordinate space.
    ///
    /// Each rectangle is mapped and expanded outward to whole-pixel
    /// boundaries, so the result never undercovers the original area.
    pub fn transform(&self, scale: f64, dx: f64, dy: f64) -> Region {
        let mut out = Region::new();
        for r in &self.rects {
            let x1 = (r.x as f64 * scale + dx).floor() as i32;
            let y1 = (r.y as f64 * scale + dy).floor() as i32;
            let x2 = (r.right() as f64 * scale + dx).ceil() as i32;
            let y2 = (r.bottom() as f64 * scale + dy).ceil() as i32;
            if x2 > x1 && y2 > y1 {
                out.add(Rect::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32));
            }
        }
        out
    }

    /// Restrict the region to `clip`, dropping everything outside.
    pub fn clip(&mut self, clip: &Rect) {
        let mut clipped = Vec::with_capacity(self.rects.len());
        for r in &self.rects {
            if let Some(i) = r.intersect(clip) {
                clipped.push(i);
            }
        }
        self.rects = clipped;
    }

    // ── Internal ─────────────────────────────────────────────────

    /// Merge pairs of rectangles that tile an exact larger rectangle.
    fn coalesce(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for i in 0..self.rects.len() {
                for j in (i + 1)..self.rects.len() {
                    if let Some(m) = merge_pair(&self.rects[i], &self.rects[j]) {
                        self.rects[i] = m;
                        self.rects.swap_remove(j);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
    }
}

/// Append `a − b` (up to four disjoint pieces) to `out`.
fn subtract(a: &Rect, b: &Rect, out: &mut Vec<Rect>) {
    let Some(overlap) = a.intersect(b) else {
        out.push(*a);
        return;
    };

    // Band above the overlap.
    if overlap.y > a.y {
        out.push(Rect::new(a.x, a.y, a.width, (overlap.y - a.y) as u32));
    }
    // Band below the overlap.
    if overlap.bottom() < a.bottom() {
        out.push(Rect::new(
            a.x,
            overlap.bottom(),
            a.width,
            (a.bottom() - overlap.bottom()) as u32,
        ));
    }
    // Left of the overlap, within its vertical span.
    if overlap.x > a.x {
        out.push(Rect::new(
            a.x,
            overlap.y,
            (overlap.x - a.x) as u32,
            overlap.height,
        ));
    }
    // Right of the overlap, within its vertical span.
    if overlap.right() < a.right() {
        out.push(Rect::new(
            overlap.right(),
            overlap.y,
            (a.right() - overlap.right()) as u32,
            overlap.height,
        ));
    }
}

/// If `a` and `b` tile an exact rectangle, return the merged rect.
fn merge_pair(a: &Rect, b: &Rect) -> Option<Rect> {
    // Horizontally adjacent with identical vertical span.
    if a.y == b.y && a.height == b.height {
        if a.right() == b.x {
            return Some(Rect::new(a.x, a.y, a.width + b.width, a.height));
        }
        if b.right() == a.x {
            return Some(Rect::new(b.x, b.y, a.width + b.width, b.height));
        }
    }
    // Vertically adjacent with identical horizontal span.
    if a.x == b.x && a.width == b.width {
        if a.bottom() == b.y {
            return Some(Rect::new(a.x, a.y, a.width, a.height + b.height));
        }
        if b.bottom() == a.y {
            return Some(Rect::new(b.x, b.y, b.width, a.height + b.height));
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────
