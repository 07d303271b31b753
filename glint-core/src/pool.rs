//! Buffer pool: bounded reuse of pixel-storage buffers.
//!
//! The pool owns every buffer it creates in an arena (the *registry*)
//! and keeps the idle subset in a FIFO *free queue*, so acquisition
//! favours the buffer that has been idle longest — giving display
//! pipelines the most time to finish with older memory.
//!
//! Geometry changes are resolved lazily: [`resize`](BufferPool::resize)
//! bumps a generation counter and destroys whatever is not currently
//! on loan; a buffer still held externally is orphaned and destroyed
//! on its normal hold-release path. The release action compares the
//! buffer's generation stamp against the pool's *current* generation,
//! which settles the race between "resize requested" and "buffer still
//! owned externally" without locks.

use std::collections::VecDeque;

use tracing::debug;

use crate::buffer::{Buffer, BufferId, BufferKind, BufferOwner};
use crate::error::GlintError;
use crate::geometry::BufferGeometry;
use crate::region::Region;

// ── BufferPool ───────────────────────────────────────────────────

/// Tracks all buffers it created and satisfies acquisition requests
/// by reuse or creation. Owns the target geometry.
#[derive(Debug)]
pub struct BufferPool {
    kind: BufferKind,
    target: BufferGeometry,
    /// Bumped on every target change; buffers are stamped at creation.
    generation: u64,

    /// Arena: every live buffer, pooled or orphaned.
    slots: Vec<Option<Buffer>>,
    /// Recyclable slot indices.
    vacant: Vec<u32>,
    /// Idle pooled buffers, oldest-released first.
    free: VecDeque<BufferId>,

    next_serial: u32,
    next_gpu_handle: u64,

    created: u64,
    destroyed: u64,
}

impl BufferPool {
    /// Create an empty pool targeting the given geometry.
    pub fn new(kind: BufferKind, target: BufferGeometry) -> Self {
        Self {
            kind,
            target,
            generation: 0,
            slots: Vec::new(),
            vacant: Vec::new(),
            free: VecDeque::new(),
            next_serial: 1,
            next_gpu_handle: 1,
            created: 0,
            destroyed: 0,
        }
    }

    /// The geometry new buffers are created with.
    pub fn target(&self) -> &BufferGeometry {
        &self.target
    }

    /// Storage backing for buffers created by this pool.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of pool-owned buffers (free or on loan).
    pub fn registry_len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|b| b.owner() == BufferOwner::Pooled)
            .count()
    }

    /// Number of idle buffers eligible for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Total buffers created over the pool's lifetime.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Total buffers destroyed over the pool's lifetime.
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Whether `id` refers to a live buffer in this pool's arena.
    pub fn contains(&self, id: BufferId) -> bool {
        self.get(id).is_some()
    }

    /// Look up a buffer by id.
    pub fn get(&self, id: BufferId) -> Option<&Buffer> {
        self.slots
            .get(id.index as usize)?
            .as_ref()
            .filter(|b| b.id() == id)
    }

    /// Look up a buffer by id, mutably.
    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.slots
            .get_mut(id.index as usize)?
            .as_mut()
            .filter(|b| b.id() == id)
    }

    // ── Acquisition ──────────────────────────────────────────────

    /// Acquire a buffer matching the target geometry.
    ///
    /// Reuses the oldest idle buffer when one exists, otherwise
    /// creates a new one. Allocation failure propagates; the caller
    /// must treat it as "skip this frame".
    pub fn acquire(&mut self) -> Result<BufferId, GlintError> {
        if let Some(id) = self.free.pop_front() {
            return Ok(id);
        }
        self.acquire_new()
    }

    fn acquire_new(&mut self) -> Result<BufferId, GlintError> {
        let from_vacant = self.vacant.last().is_some();
        let index = match self.vacant.last() {
            Some(&i) => i,
            None => self.slots.len() as u32,
        };
        let id = BufferId {
            index,
            serial: self.next_serial,
        };

        let buffer = match self.kind {
            BufferKind::CpuMapped => Buffer::new_cpu(id, self.target, self.generation)?,
            BufferKind::GpuHandle => {
                let handle = self.next_gpu_handle;
                self.next_gpu_handle += 1;
                Buffer::new_gpu(id, self.target, self.generation, handle)
            }
        };

        self.next_serial += 1;
        if from_vacant {
            self.vacant.pop();
            self.slots[index as usize] = Some(buffer);
        } else {
            self.slots.push(Some(buffer));
        }
        self.created += 1;

        debug!(buffer = %id, generation = self.generation, "created pooled buffer");
        Ok(id)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Take an additional ownership reference on a buffer.
    pub fn ref_buffer(&mut self, id: BufferId) -> Result<(), GlintError> {
        self.get_mut(id)
            .ok_or(GlintError::UnknownBuffer(id))?
            .inc_ref();
        Ok(())
    }

    /// Drop an ownership reference; at zero the storage is destroyed.
    pub fn unref(&mut self, id: BufferId) -> Result<(), GlintError> {
        let destroy = self
            .get_mut(id)
            .ok_or(GlintError::UnknownBuffer(id))?
            .dec_ref()?;
        if destroy {
            self.destroy_slot(id);
        }
        Ok(())
    }

    /// Mark a buffer as entering active external use.
    pub fn hold(&mut self, id: BufferId) -> Result<(), GlintError> {
        self.get_mut(id)
            .ok_or(GlintError::UnknownBuffer(id))?
            .inc_hold();
        Ok(())
    }

    /// Release one hold. When the last hold drops, the release action
    /// fires: a pooled buffer whose generation stamp matches the
    /// pool's current generation returns to the free queue; anything
    /// else is unreffed (and typically destroyed).
    pub fn release(&mut self, id: BufferId) -> Result<(), GlintError> {
        let generation = self.generation;
        let buffer = self.get_mut(id).ok_or(GlintError::UnknownBuffer(id))?;
        if !buffer.dec_hold()? {
            return Ok(());
        }

        let recycle = buffer.owner() == BufferOwner::Pooled && buffer.stamp() == generation;
        if recycle {
            self.free.push_back(id);
        } else {
            debug!(buffer = %id, "buffer outlived its geometry; destroying");
            self.unref(id)?;
        }
        Ok(())
    }

    // ── Geometry ─────────────────────────────────────────────────

    /// Adopt a new target geometry.
    ///
    /// Returns `false` without touching anything when the geometry is
    /// unchanged. Otherwise every buffer not currently held is freed
    /// synchronously, held buffers are orphaned for lazy destruction,
    /// and the free queue is cleared.
    pub fn resize(&mut self, target: BufferGeometry) -> bool {
        if target == self.target {
            return false;
        }

        self.target = target;
        self.generation += 1;
        self.free.clear();

        let ids: Vec<BufferId> = self
            .slots
            .iter()
            .flatten()
            .filter(|b| b.owner() == BufferOwner::Pooled)
            .map(|b| b.id())
            .collect();

        for id in ids {
            let held = self.get(id).is_some_and(|b| b.holds() > 0);
            if held {
                // Still on loan; the hold-release path finishes it.
                if let Some(buffer) = self.get_mut(id) {
                    buffer.set_owner(BufferOwner::Orphaned);
                }
            } else {
                // The pool owns the only reference; destroy now.
                let _ = self.unref(id);
            }
        }

        debug!(
            generation = self.generation,
            width = self.target.width,
            height = self.target.height,
            "pool retargeted"
        );
        true
    }

    // ── Damage ───────────────────────────────────────────────────

    /// Union `region` (pool-uniform buffer space) into every pooled
    /// registry member, so the change reaches every future
    /// presentation regardless of which buffer is chosen next.
    pub fn damage_all(&mut self, region: &Region) {
        for buffer in self.slots.iter_mut().flatten() {
            if buffer.owner() == BufferOwner::Pooled {
                buffer.damage_mut().union(region);
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn destroy_slot(&mut self, id: BufferId) {
        self.free.retain(|&f| f != id);
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.as_ref().is_some_and(|b| b.id() == id) {
                *slot = None;
                self.vacant.push(id.index);
                self.destroyed += 1;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PixelFormat, Rect};

    fn geo(w: u32, h: u32) -> BufferGeometry {
        BufferGeometry::packed(w, h, PixelFormat::Bgra8, 1)
    }

    fn pool_800x600() -> BufferPool {
        BufferPool::new(BufferKind::CpuMapped, geo(800, 600))
    }

    #[test]
    fn acquire_creates_then_reuses() {
        let mut pool = pool_800x600();

        let b1 = pool.acquire().unwrap();
        assert_eq!(pool.registry_len(), 1);
        assert_eq!(pool.free_len(), 0);

        pool.hold(b1).unwrap();
        pool.release(b1).unwrap();
        assert_eq!(pool.free_len(), 1);

        let again = pool.acquire().unwrap();
        assert_eq!(again, b1);
        assert_eq!(pool.registry_len(), 1);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn free_queue_is_fifo() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        let b2 = pool.acquire().unwrap();

        pool.hold(b1).unwrap();
        pool.hold(b2).unwrap();
        pool.release(b1).unwrap();
        pool.release(b2).unwrap();

        // Oldest-released first.
        assert_eq!(pool.acquire().unwrap(), b1);
        assert_eq!(pool.acquire().unwrap(), b2);
    }

    #[test]
    fn registry_never_exceeds_created_minus_destroyed() {
        let mut pool = pool_800x600();
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(pool.acquire().unwrap());
        }
        for &id in &ids {
            pool.hold(id).unwrap();
            pool.release(id).unwrap();
        }
        let _ = pool.acquire().unwrap();

        assert!(pool.registry_len() as u64 <= pool.created() - pool.destroyed());
    }

    #[test]
    fn resize_identical_is_noop() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        pool.hold(b1).unwrap();
        pool.release(b1).unwrap();

        assert!(!pool.resize(geo(800, 600)));
        assert_eq!(pool.registry_len(), 1);
        assert_eq!(pool.free_len(), 1);
    }

    #[test]
    fn resize_evicts_everything() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        pool.hold(b1).unwrap();
        pool.release(b1).unwrap();

        assert!(pool.resize(geo(1024, 768)));
        assert_eq!(pool.registry_len(), 0);
        assert_eq!(pool.free_len(), 0);
        assert!(!pool.contains(b1));
        assert_eq!(pool.destroyed(), 1);
    }

    #[test]
    fn held_buffer_survives_resize_until_release() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        pool.hold(b1).unwrap();

        assert!(pool.resize(geo(1024, 768)));
        // Still alive while held, but no longer pooled.
        assert!(pool.contains(b1));
        assert_eq!(pool.registry_len(), 0);
        assert_eq!(pool.get(b1).unwrap().owner(), BufferOwner::Orphaned);

        pool.release(b1).unwrap();
        assert!(!pool.contains(b1));
    }

    #[test]
    fn stale_generation_buffer_destroyed_on_release() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        pool.hold(b1).unwrap();

        // Resize away and back: the 5-tuple matches again but the
        // generation does not, so the loaned buffer is not recycled.
        assert!(pool.resize(geo(1024, 768)));
        assert!(pool.resize(geo(800, 600)));

        pool.release(b1).unwrap();
        assert!(!pool.contains(b1));
        assert_eq!(pool.free_len(), 0);
    }

    #[test]
    fn damage_all_spares_new_buffers() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        let b2 = pool.acquire().unwrap();

        let region = Region::from_rect(Rect::new(10, 10, 50, 50));
        pool.damage_all(&region);

        let b3 = pool.acquire().unwrap();

        assert!(pool.get(b1).unwrap().damage().covers(&Rect::new(10, 10, 50, 50)));
        assert!(pool.get(b2).unwrap().damage().covers(&Rect::new(10, 10, 50, 50)));
        assert!(pool.get(b3).unwrap().damage().is_empty());
    }

    #[test]
    fn acquired_buffer_matches_target() {
        let mut pool = pool_800x600();
        let b1 = pool.acquire().unwrap();
        let buffer = pool.get(b1).unwrap();
        assert_eq!(buffer.geometry(), pool.target());
        assert_eq!(buffer.pixels().unwrap().len(), pool.target().byte_len());
    }

    #[test]
    fn gpu_pool_hands_out_distinct_handles() {
        let mut pool = BufferPool::new(BufferKind::GpuHandle, geo(64, 64));
        let b1 = pool.acquire().unwrap();
        let b2 = pool.acquire().unwrap();
        let h1 = pool.get(b1).unwrap().gpu_handle().unwrap();
        let h2 = pool.get(b2).unwrap().gpu_handle().unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn end_to_end_lifecycle() {
        let mut pool = pool_800x600();

        let b1 = pool.acquire().unwrap();
        assert_eq!(pool.registry_len(), 1);
        assert_eq!(pool.free_len(), 0);

        pool.hold(b1).unwrap();
        pool.release(b1).unwrap();
        assert_eq!(pool.free_len(), 1);

        assert!(pool.resize(geo(1024, 768)));
        assert_eq!(pool.registry_len(), 0);
        assert_eq!(pool.free_len(), 0);
        assert!(!pool.contains(b1));
    }
}
