//! Pooled pixel-storage buffers.
//!
//! A [`Buffer`] is one reusable pixel-storage object. It carries two
//! independent counters:
//!
//! - **refs** — ownership. When it reaches zero the underlying storage
//!   is destroyed immediately.
//! - **holds** — active external use (e.g. the committed buffer still
//!   being scanned out). When it reaches zero the buffer's owner
//!   decides what happens next: a pooled buffer returns to its pool's
//!   free list, an orphaned one is unreffed.
//!
//! The counters are deliberately decoupled: a buffer can be alive
//! (refs > 0) while simultaneously on screen (holds > 0), and both
//! must be satisfied before it may be reused.
//!
//! Buffers live in the pool's arena and are addressed by [`BufferId`];
//! the lifecycle operations themselves are mediated by
//! [`BufferPool`](crate::pool::BufferPool), which owns the storage.

use crate::error::GlintError;
use crate::geometry::BufferGeometry;
use crate::region::Region;

// ── BufferId ─────────────────────────────────────────────────────

/// Arena handle for a buffer: slot index plus a serial that guards
/// against reuse of a stale handle after the slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub(crate) index: u32,
    pub(crate) serial: u32,
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.serial)
    }
}

// ── BufferKind ───────────────────────────────────────────────────

/// Storage backing for pooled buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// CPU-mapped memory the renderer writes into directly.
    CpuMapped,
    /// Opaque GPU handle; pixel transfer is delegated to the
    /// presentation collaborator.
    GpuHandle,
}

// ── PixelStorage ─────────────────────────────────────────────────

/// The actual pixel storage behind a buffer.
#[derive(Debug)]
pub enum PixelStorage {
    /// Owned CPU memory, `stride * height` bytes.
    CpuMapped(Vec<u8>),
    /// Opaque handle understood by the presentation collaborator.
    GpuHandle(u64),
}

// ── BufferOwner ──────────────────────────────────────────────────

/// Who decides a buffer's fate when its hold count drops to zero.
///
/// Replaces a raw release-callback-plus-userdata mechanism: the owner
/// is a tagged variant the pool inspects at release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// Owned by a pool; eligible for recycling while its generation
    /// stamp matches the pool's.
    Pooled,
    /// Cut loose from its pool (the pool was retargeted while the
    /// buffer was on loan); destroyed on final release.
    Orphaned,
}

// ── Buffer ───────────────────────────────────────────────────────

/// A single reusable pixel-storage object with a ref/hold lifecycle
/// and an attached damage region.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    kind: BufferKind,
    geometry: BufferGeometry,
    storage: PixelStorage,

    /// Damage accumulated in this buffer's own coordinate space.
    /// Starts empty; the pipeline fully damages a buffer the first
    /// time it is chosen for presentation.
    damage: Region,

    /// Ownership count. Zero destroys storage.
    refs: u32,
    /// Active external use count, independent of `refs`.
    holds: u32,
    /// Pool generation at creation; compared at release time.
    stamp: u64,
    owner: BufferOwner,
    /// Whether this buffer has ever been presented.
    presented: bool,
}

impl Buffer {
    /// Create a CPU-mapped buffer, zero-initialized.
    ///
    /// Fails only on allocation exhaustion.
    pub(crate) fn new_cpu(
        id: BufferId,
        geometry: BufferGeometry,
        stamp: u64,
    ) -> Result<Self, GlintError> {
        let bytes = geometry.byte_len();
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| GlintError::AllocationFailed { bytes })?;
        pixels.resize(bytes, 0);

        Ok(Self::with_storage(
            id,
            BufferKind::CpuMapped,
            geometry,
            PixelStorage::CpuMapped(pixels),
            stamp,
        ))
    }

    /// Create a buffer around an opaque GPU handle.
    pub(crate) fn new_gpu(id: BufferId, geometry: BufferGeometry, stamp: u64, handle: u64) -> Self {
        Self::with_storage(
            id,
            BufferKind::GpuHandle,
            geometry,
            PixelStorage::GpuHandle(handle),
            stamp,
        )
    }

    fn with_storage(
        id: BufferId,
        kind: BufferKind,
        geometry: BufferGeometry,
        storage: PixelStorage,
        stamp: u64,
    ) -> Self {
        Self {
            id,
            kind,
            geometry,
            storage,
            damage: Region::new(),
            refs: 1,
            holds: 0,
            stamp,
            owner: BufferOwner::Pooled,
            presented: false,
        }
    }

    /// This buffer's arena handle.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Storage backing type.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// The geometry this buffer was created with.
    pub fn geometry(&self) -> &BufferGeometry {
        &self.geometry
    }

    /// Damage accumulated in this buffer's own coordinate space.
    pub fn damage(&self) -> &Region {
        &self.damage
    }

    /// Mutable access to the damage region.
    pub fn damage_mut(&mut self) -> &mut Region {
        &mut self.damage
    }

    /// CPU pixel memory, if this is a CPU-mapped buffer.
    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.storage {
            PixelStorage::CpuMapped(p) => Some(p),
            PixelStorage::GpuHandle(_) => None,
        }
    }

    /// Mutable CPU pixel memory, if this is a CPU-mapped buffer.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            PixelStorage::CpuMapped(p) => Some(p),
            PixelStorage::GpuHandle(_) => None,
        }
    }

    /// The GPU handle, if this is a GPU-backed buffer.
    pub fn gpu_handle(&self) -> Option<u64> {
        match &self.storage {
            PixelStorage::CpuMapped(_) => None,
            PixelStorage::GpuHandle(h) => Some(*h),
        }
    }

    /// Current ownership count.
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Current hold count.
    pub fn holds(&self) -> u32 {
        self.holds
    }

    /// Whether this buffer has ever been presented.
    pub fn presented(&self) -> bool {
        self.presented
    }

    /// Pool generation stamped at creation.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Current owner tag.
    pub fn owner(&self) -> BufferOwner {
        self.owner
    }

    // ── Pool-internal lifecycle plumbing ─────────────────────────

    pub(crate) fn set_owner(&mut self, owner: BufferOwner) {
        self.owner = owner;
    }

    pub(crate) fn mark_presented(&mut self) {
        self.presented = true;
    }

    pub(crate) fn inc_ref(&mut self) {
        self.refs += 1;
    }

    /// Decrement refs; returns true when storage must be destroyed.
    pub(crate) fn dec_ref(&mut self) -> Result<bool, GlintError> {
        if self.refs == 0 {
            return Err(GlintError::LifecycleUnderflow("unref at zero refs"));
        }
        self.refs -= 1;
        Ok(self.refs == 0)
    }

    pub(crate) fn inc_hold(&mut self) {
        self.holds += 1;
    }

    /// Decrement holds; returns true when the release action fires.
    pub(crate) fn dec_hold(&mut self) -> Result<bool, GlintError> {
        if self.holds == 0 {
            return Err(GlintError::LifecycleUnderflow("release at zero holds"));
        }
        self.holds -= 1;
        Ok(self.holds == 0)
    }
}

// ── Tests ────────────────────────────────────────────────────────
