//! Frame pipeline: paces irregular remote updates against the
//! presentation surface's own cadence.
//!
//! The pipeline is a single state machine with one mutation entry
//! point per event kind (update framing, frame-done, output resize).
//! It guarantees at most one outstanding commit: an update that
//! completes while a commit is in flight is coalesced into a single
//! deferred region — never dropped, never queued deeper than one.
//!
//! ```text
//!  Idle ──begin──► Updating ──end──► (Ready) ──commit──► Committed ──frame-done──► Idle
//!                                                            │
//!                              begin/end while committed ────┘──► DeferredReady
//! ```
//!
//! The `Ready` step is transient: it scales the pending region from
//! source space into the acquired buffer's space, transfers pixels
//! restricted to that buffer's accumulated damage, and issues
//! attach + damage + commit to the presentation collaborator.

use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferId};
use crate::clock::ClockSync;
use crate::error::GlintError;
use crate::geometry::{BufferGeometry, Rect};
use crate::perf::PerfTracker;
use crate::pool::BufferPool;
use crate::region::Region;
use crate::render::{self, SourceFrame, SourceTransform, VideoFrame};

// ── PresentationSurface ──────────────────────────────────────────

/// Boundary with the windowing collaborator.
///
/// Implementations queue the requests; the pipeline drives exactly
/// one `attach` + zero-or-more `damage` + one `commit` per cycle.
pub trait PresentationSurface {
    /// Attach a buffer to the surface.
    fn attach(&mut self, buffer: &Buffer) -> Result<(), GlintError>;
    /// Mark a rectangle (buffer coordinates) as needing redraw.
    fn damage(&mut self, rect: Rect);
    /// Submit the attached buffer for display.
    fn commit(&mut self) -> Result<(), GlintError>;
}

// ── PipelineState ────────────────────────────────────────────────

/// Observable pacing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Nothing pending, nothing committed.
    #[default]
    Idle,
    /// An update is being accumulated; no commit outstanding.
    Updating,
    /// A commit is outstanding; the source is quiet.
    Committed,
    /// A commit is outstanding while the next update accumulates.
    CommittedUpdating,
    /// A commit is outstanding and a completed update is queued.
    DeferredReady,
    /// A commit is outstanding, an update is queued, and another
    /// accumulates on top of it.
    DeferredReadyUpdating,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Updating => "Updating",
            Self::Committed => "Committed",
            Self::CommittedUpdating => "CommittedUpdating",
            Self::DeferredReady => "DeferredReady",
            Self::DeferredReadyUpdating => "DeferredReadyUpdating",
        };
        write!(f, "{name}")
    }
}

// ── PendingUpdate ────────────────────────────────────────────────

/// Damage and payload accumulated for one coalesced update.
#[derive(Debug, Default)]
struct PendingUpdate {
    /// Raw pixel damage in source coordinates.
    damage: Region,
    /// Decoded video sub-frames, applied in arrival order.
    video: Vec<VideoFrame>,
    /// Remote presentation timestamp, if the source attached one.
    pts: Option<u32>,
}

impl PendingUpdate {
    fn is_empty(&self) -> bool {
        self.damage.is_empty() && self.video.is_empty()
    }

    /// Everything this update touches, in source coordinates.
    fn frame_damage(&self) -> Region {
        let mut damage = self.damage.clone();
        for frame in &self.video {
            damage.add(frame.rect);
        }
        damage
    }

    fn merge(&mut self, mut other: PendingUpdate) {
        self.damage.union(&other.damage);
        self.video.append(&mut other.video);
        if other.pts.is_some() {
            self.pts = other.pts;
        }
    }
}

// ── FramePipeline ────────────────────────────────────────────────

struct CommittedFrame {
    buffer: BufferId,
    pts: Option<u32>,
}

/// The frame-pacing state machine.
///
/// Owns the buffer pool and the performance tracker; the clock-sync
/// estimator stays with the caller and is borrowed at frame-done to
/// translate remote timestamps.
pub struct FramePipeline {
    state: PipelineState,
    pool: BufferPool,
    /// Update currently being accumulated.
    pending: PendingUpdate,
    /// Completed update waiting for the outstanding commit to drain
    /// (or for an allocation retry).
    deferred: Option<PendingUpdate>,
    committed: Option<CommittedFrame>,
    /// Cached source→buffer transform, keyed by source size + target.
    transform: Option<(u32, u32, BufferGeometry, SourceTransform)>,
    perf: PerfTracker,
}

impl FramePipeline {
    /// Create a pipeline around an existing pool.
    pub fn new(pool: BufferPool) -> Self {
        Self::with_perf(pool, PerfTracker::new())
    }

    /// Create a pipeline with an explicit performance tracker.
    pub fn with_perf(pool: BufferPool, perf: PerfTracker) -> Self {
        Self {
            state: PipelineState::Idle,
            pool,
            pending: PendingUpdate::default(),
            deferred: None,
            committed: None,
            transform: None,
            perf,
        }
    }

    /// Current pacing state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The underlying buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Mutable access to the pool (e.g. for backdrop `damage_all`).
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    /// The performance tracker.
    pub fn perf(&self) -> &PerfTracker {
        &self.perf
    }

    /// The buffer currently committed, if any.
    pub fn committed_buffer(&self) -> Option<BufferId> {
        self.committed.as_ref().map(|c| c.buffer)
    }

    // ── Update framing ───────────────────────────────────────────

    /// The remote source started an update.
    pub fn begin_update(&mut self) -> Result<(), GlintError> {
        self.state = match self.state {
            PipelineState::Idle => PipelineState::Updating,
            PipelineState::Committed => PipelineState::CommittedUpdating,
            PipelineState::DeferredReady => PipelineState::DeferredReadyUpdating,
            _ => return Err(GlintError::StateViolation("update already in progress")),
        };
        Ok(())
    }

    /// Accumulate one damage rectangle (source coordinates).
    pub fn add_damage(&mut self, rect: Rect) -> Result<(), GlintError> {
        self.require_updating("damage outside an update")?;
        self.pending.damage.add(rect);
        Ok(())
    }

    /// Accumulate one decoded video sub-frame.
    pub fn add_video_frame(&mut self, frame: VideoFrame) -> Result<(), GlintError> {
        self.require_updating("video frame outside an update")?;
        self.pending.video.push(frame);
        Ok(())
    }

    /// Attach the remote presentation timestamp to the current update.
    pub fn set_presentation_time(&mut self, pts: u32) -> Result<(), GlintError> {
        self.require_updating("presentation time outside an update")?;
        self.pending.pts = Some(pts);
        Ok(())
    }

    /// The remote source finished the update.
    ///
    /// Commits immediately when no commit is outstanding; otherwise
    /// the update is coalesced into the single deferred slot. Returns
    /// `true` when a commit was issued.
    pub fn end_update<S: PresentationSurface>(
        &mut self,
        source: &SourceFrame<'_>,
        surface: &mut S,
    ) -> Result<bool, GlintError> {
        match self.state {
            PipelineState::Updating => {
                let update = std::mem::take(&mut self.pending);
                if update.is_empty() && self.deferred.is_none() {
                    self.state = PipelineState::Idle;
                    return Ok(false);
                }
                self.defer(update);
                match self.try_present(source, surface)? {
                    true => {
                        self.state = PipelineState::Committed;
                        Ok(true)
                    }
                    false => {
                        // Allocation failed; damage stays deferred and
                        // is retried on the next cycle.
                        self.state = PipelineState::Idle;
                        Ok(false)
                    }
                }
            }
            PipelineState::CommittedUpdating | PipelineState::DeferredReadyUpdating => {
                let update = std::mem::take(&mut self.pending);
                if !update.is_empty() {
                    self.defer(update);
                }
                self.state = if self.deferred.is_some() {
                    PipelineState::DeferredReady
                } else {
                    PipelineState::Committed
                };
                Ok(false)
            }
            _ => Err(GlintError::StateViolation("end update without begin")),
        }
    }

    // ── Presentation events ──────────────────────────────────────

    /// The presentation collaborator acknowledged the committed frame.
    ///
    /// Releases the committed buffer's hold, records end-to-end
    /// latency when a remote timestamp and a trusted clock sample are
    /// available, and immediately starts the next cycle if an update
    /// was deferred. Returns `true` when a follow-up commit was issued.
    pub fn frame_done<S: PresentationSurface>(
        &mut self,
        now_us: u32,
        clock: &ClockSync,
        source: &SourceFrame<'_>,
        surface: &mut S,
    ) -> Result<bool, GlintError> {
        let done = self
            .committed
            .take()
            .ok_or(GlintError::StateViolation("frame done without commit"))?;

        self.pool.release(done.buffer)?;
        if let Some(pts) = done.pts {
            if let Some(local) = clock.translate(pts) {
                let latency_us = now_us.wrapping_sub(local) as i32 as f64;
                self.perf.record_frame_latency(latency_us);
            }
        }

        match self.state {
            PipelineState::Committed => {
                self.state = PipelineState::Idle;
                Ok(false)
            }
            PipelineState::CommittedUpdating => {
                self.state = PipelineState::Updating;
                Ok(false)
            }
            PipelineState::DeferredReady => match self.try_present(source, surface)? {
                true => {
                    self.state = PipelineState::Committed;
                    Ok(true)
                }
                false => {
                    self.state = PipelineState::Idle;
                    Ok(false)
                }
            },
            PipelineState::DeferredReadyUpdating => match self.try_present(source, surface)? {
                true => {
                    self.state = PipelineState::CommittedUpdating;
                    Ok(true)
                }
                false => {
                    self.state = PipelineState::Updating;
                    Ok(false)
                }
            },
            _ => Err(GlintError::StateViolation("frame done in idle state")),
        }
    }

    /// The output geometry changed.
    ///
    /// Retargets the pool and invalidates the cached transform. An
    /// outstanding commit is not interrupted; the committed buffer is
    /// destroyed on its normal release path.
    pub fn resize_output(&mut self, target: BufferGeometry) -> bool {
        let changed = self.pool.resize(target);
        if changed {
            self.transform = None;
        }
        changed
    }

    // ── Internal ─────────────────────────────────────────────────

    fn require_updating(&self, msg: &'static str) -> Result<(), GlintError> {
        match self.state {
            PipelineState::Updating
            | PipelineState::CommittedUpdating
            | PipelineState::DeferredReadyUpdating => Ok(()),
            _ => Err(GlintError::StateViolation(msg)),
        }
    }

    fn defer(&mut self, update: PendingUpdate) {
        match &mut self.deferred {
            Some(existing) => existing.merge(update),
            None => self.deferred = Some(update),
        }
    }

    fn transform_for(&mut self, source: &SourceFrame<'_>) -> SourceTransform {
        let target = *self.pool.target();
        if let Some((w, h, t, cached)) = &self.transform {
            if *w == source.width && *h == source.height && *t == target {
                return *cached;
            }
        }
        let transform =
            SourceTransform::aspect_fit(source.width, source.height, target.width, target.height);
        self.transform = Some((source.width, source.height, target, transform));
        transform
    }

    /// The `Ready` transition: acquire, transfer, commit.
    ///
    /// Returns `Ok(false)` when buffer acquisition failed; the update
    /// stays in the deferred slot for a later retry.
    fn try_present<S: PresentationSurface>(
        &mut self,
        source: &SourceFrame<'_>,
        surface: &mut S,
    ) -> Result<bool, GlintError> {
        if self.committed.is_some() {
            return Err(GlintError::StateViolation("commit already outstanding"));
        }
        let Some(update) = self.deferred.take() else {
            return Err(GlintError::StateViolation("nothing ready to present"));
        };

        let id = match self.pool.acquire() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "buffer acquisition failed; skipping frame");
                self.deferred = Some(update);
                return Ok(false);
            }
        };

        let transform = self.transform_for(source);
        if !update.damage.is_empty() && !update.video.is_empty() {
            warn!("update carries both raw damage and video sub-frames");
        }

        // Every pooled buffer must eventually redraw this area.
        let buffer_damage = transform.apply(&update.frame_damage());
        self.pool.damage_all(&buffer_damage);

        let target_rect = self.pool.target().full_rect();
        let buffer = self
            .pool
            .get_mut(id)
            .ok_or(GlintError::UnknownBuffer(id))?;

        // A buffer that has never been shown has no valid content at
        // all; damage it completely.
        if !buffer.presented() {
            buffer.damage_mut().add(target_rect);
        }
        buffer.damage_mut().clip(&target_rect);

        let to_transfer = buffer.damage().clone();
        render::transfer_image(buffer, source, &transform, &to_transfer)?;
        for frame in &update.video {
            render::transfer_video_frame(buffer, frame, &transform)?;
        }
        buffer.damage_mut().clear();
        buffer.mark_presented();

        let buffer = self.pool.get(id).ok_or(GlintError::UnknownBuffer(id))?;
        surface.attach(buffer)?;
        for rect in to_transfer.rects() {
            surface.damage(*rect);
        }
        surface.commit()?;

        self.pool.hold(id)?;
        self.committed = Some(CommittedFrame {
            buffer: id,
            pts: update.pts,
        });

        debug!(buffer = %id, rects = to_transfer.len(), "frame committed");
        Ok(true)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;
    use crate::geometry::PixelFormat;

    const SRC_W: u32 = 64;
    const SRC_H: u32 = 64;

    /// Records every attach/damage/commit the pipeline issues.
    #[derive(Default)]
    struct RecordingSurface {
        attached: Vec<BufferId>,
        commits: Vec<Vec<Rect>>,
        pending_damage: Vec<Rect>,
    }

    impl PresentationSurface for RecordingSurface {
        fn attach(&mut self, buffer: &Buffer) -> Result<(), GlintError> {
            self.attached.push(buffer.id());
            Ok(())
        }

        fn damage(&mut self, rect: Rect) {
            self.pending_damage.push(rect);
        }

        fn commit(&mut self) -> Result<(), GlintError> {
            self.commits.push(std::mem::take(&mut self.pending_damage));
            Ok(())
        }
    }

    fn geometry() -> BufferGeometry {
        BufferGeometry::packed(SRC_W, SRC_H, PixelFormat::Bgra8, 1)
    }

    fn pipeline() -> FramePipeline {
        FramePipeline::new(BufferPool::new(BufferKind::CpuMapped, geometry()))
    }

    fn source_pixels() -> Vec<u8> {
        vec![0xAB; (SRC_W * SRC_H * 4) as usize]
    }

    fn source(pixels: &[u8]) -> SourceFrame<'_> {
        SourceFrame {
            pixels,
            width: SRC_W,
            height: SRC_H,
            stride: SRC_W * 4,
            format: PixelFormat::Bgra8,
        }
    }

    fn full_rect() -> Rect {
        Rect::new(0, 0, SRC_W, SRC_H)
    }

    #[test]
    fn single_update_commits_immediately() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);

        p.begin_update().unwrap();
        assert_eq!(p.state(), PipelineState::Updating);
        p.add_damage(Rect::new(0, 0, 10, 10)).unwrap();
        assert!(p.end_update(&src, &mut surface).unwrap());

        assert_eq!(p.state(), PipelineState::Committed);
        assert_eq!(surface.commits.len(), 1);
        assert_eq!(surface.attached, vec![p.committed_buffer().unwrap()]);
        // First use of a fresh buffer: fully damaged.
        assert_eq!(surface.commits[0], vec![full_rect()]);
    }

    #[test]
    fn empty_update_commits_nothing() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);

        p.begin_update().unwrap();
        assert!(!p.end_update(&src, &mut surface).unwrap());
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(surface.commits.is_empty());
    }

    #[test]
    fn update_during_commit_is_deferred_then_flushed() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();

        // U1.
        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 10, 10)).unwrap();
        assert!(p.end_update(&src, &mut surface).unwrap());

        // U2 arrives while U1's commit is outstanding.
        p.begin_update().unwrap();
        assert_eq!(p.state(), PipelineState::CommittedUpdating);
        p.add_damage(Rect::new(20, 20, 8, 8)).unwrap();
        assert!(!p.end_update(&src, &mut surface).unwrap());
        assert_eq!(p.state(), PipelineState::DeferredReady);
        assert_eq!(surface.commits.len(), 1);

        // Frame-done drains the deferred update immediately.
        assert!(p.frame_done(0, &clock, &src, &mut surface).unwrap());
        assert_eq!(p.state(), PipelineState::Committed);
        assert_eq!(surface.commits.len(), 2);
        // Same buffer recycled: only U2's region needs transfer.
        assert_eq!(surface.commits[1], vec![Rect::new(20, 20, 8, 8)]);
    }

    #[test]
    fn deferred_updates_coalesce() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();

        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 4, 4)).unwrap();
        p.end_update(&src, &mut surface).unwrap();

        // Two more updates complete while the commit is outstanding.
        p.begin_update().unwrap();
        p.add_damage(Rect::new(10, 0, 4, 4)).unwrap();
        p.end_update(&src, &mut surface).unwrap();

        p.begin_update().unwrap();
        p.add_damage(Rect::new(20, 0, 4, 4)).unwrap();
        p.end_update(&src, &mut surface).unwrap();
        assert_eq!(p.state(), PipelineState::DeferredReady);

        p.frame_done(0, &clock, &src, &mut surface).unwrap();
        // One follow-up commit covering both deferred updates.
        assert_eq!(surface.commits.len(), 2);
        assert!(surface.commits[1].contains(&Rect::new(10, 0, 4, 4)));
        assert!(surface.commits[1].contains(&Rect::new(20, 0, 4, 4)));
        assert_eq!(surface.commits[1].len(), 2);
    }

    #[test]
    fn fresh_buffer_catches_up_completely() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();

        // U1 commits into b1.
        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 10, 10)).unwrap();
        p.end_update(&src, &mut surface).unwrap();
        let b1 = p.committed_buffer().unwrap();

        // External collaborator keeps an extra hold on b1.
        p.pool_mut().hold(b1).unwrap();

        // U2 deferred, then flushed after frame-done. b1 is still
        // held, so a fresh buffer is chosen and fully damaged.
        p.begin_update().unwrap();
        p.add_damage(Rect::new(20, 20, 8, 8)).unwrap();
        p.end_update(&src, &mut surface).unwrap();
        p.frame_done(0, &clock, &src, &mut surface).unwrap();

        let b2 = p.committed_buffer().unwrap();
        assert_ne!(b1, b2);
        assert_eq!(surface.commits[1], vec![full_rect()]);
    }

    #[test]
    fn quiet_frame_done_returns_to_idle() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();

        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 1, 1)).unwrap();
        p.end_update(&src, &mut surface).unwrap();

        assert!(!p.frame_done(0, &clock, &src, &mut surface).unwrap());
        assert_eq!(p.state(), PipelineState::Idle);
        // Committed buffer returned to the free queue.
        assert_eq!(p.pool().free_len(), 1);
    }

    #[test]
    fn nested_begin_is_a_violation() {
        let mut p = pipeline();
        p.begin_update().unwrap();
        assert!(matches!(
            p.begin_update(),
            Err(GlintError::StateViolation(_))
        ));
    }

    #[test]
    fn damage_outside_update_is_a_violation() {
        let mut p = pipeline();
        assert!(matches!(
            p.add_damage(Rect::new(0, 0, 1, 1)),
            Err(GlintError::StateViolation(_))
        ));
    }

    #[test]
    fn frame_done_without_commit_is_a_violation() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();
        assert!(matches!(
            p.frame_done(0, &clock, &src, &mut surface),
            Err(GlintError::StateViolation(_))
        ));
    }

    #[test]
    fn resize_does_not_interrupt_commit() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);
        let clock = ClockSync::new();

        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 10, 10)).unwrap();
        p.end_update(&src, &mut surface).unwrap();
        let b1 = p.committed_buffer().unwrap();

        let new_target = BufferGeometry::packed(128, 128, PixelFormat::Bgra8, 1);
        assert!(p.resize_output(new_target));
        assert_eq!(p.state(), PipelineState::Committed);
        // Committed buffer survives until its release.
        assert!(p.pool().contains(b1));

        p.frame_done(0, &clock, &src, &mut surface).unwrap();
        assert!(!p.pool().contains(b1));
    }

    #[test]
    fn video_frame_rect_counts_as_damage() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);

        p.begin_update().unwrap();
        p.add_video_frame(VideoFrame {
            rect: Rect::new(4, 4, 8, 8),
            pixels: vec![0x33; 8 * 8 * 4],
            stride: 8 * 4,
            format: PixelFormat::Bgra8,
        })
        .unwrap();
        assert!(p.end_update(&src, &mut surface).unwrap());
        assert_eq!(surface.commits.len(), 1);
    }

    #[test]
    fn pts_flows_into_latency_sampler() {
        let mut p = pipeline();
        let mut surface = RecordingSurface::default();
        let pixels = source_pixels();
        let src = source(&pixels);

        // Trusted clock: remote ahead by 100 µs, tight uncertainty.
        let mut clock = ClockSync::new();
        for _ in 0..3 {
            clock.process_pong(0, 102, 102, 4);
        }

        p.begin_update().unwrap();
        p.add_damage(Rect::new(0, 0, 2, 2)).unwrap();
        p.set_presentation_time(1_000).unwrap();
        p.end_update(&src, &mut surface).unwrap();

        // Remote pts 1000 → local 900; displayed at 1500 → 600 µs.
        p.frame_done(1_500, &clock, &src, &mut surface).unwrap();
        let stats = p.perf().frame_latency().stats().unwrap();
        assert_eq!(stats.average, 600.0);
    }
}
