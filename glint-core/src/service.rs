//! Async driver for the presentation core.
//!
//! [`DisplayService`] owns the frame pipeline and the clock-sync
//! estimator and multiplexes three inputs on a Tokio select loop:
//!
//! 1. Remote events (update framing, damage, pongs) from the
//!    transport task.
//! 2. Surface events (frame-done, resize) from the windowing task.
//! 3. Timers: the periodic clock-sync ping and the latency report.
//!
//! The service runs in a Tokio task and shuts down when its
//! [`ServiceHandle`] is dropped or [`ServiceHandle::stop`] is called.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{ClockSync, PingRequest};
use crate::config::CoreConfig;
use crate::error::GlintError;
use crate::geometry::{BufferGeometry, Rect};
use crate::perf::PerfTracker;
use crate::pipeline::{FramePipeline, PresentationSurface};
use crate::pool::BufferPool;
use crate::render::{SourceFrame, VideoFrame};

// ── Local clock ──────────────────────────────────────────────────

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic local time in microseconds, wrapping at 2³².
///
/// All pipeline and clock-sync timestamps share this epoch, fixed at
/// first use.
pub fn local_time_us() -> u32 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u32
}

// ── Events ───────────────────────────────────────────────────────

/// Events produced by the remote transport task.
#[derive(Debug)]
pub enum RemoteEvent {
    /// The source started a batched update.
    BeginUpdate,
    /// One damaged rectangle in source coordinates.
    Damage(Rect),
    /// One decoded video sub-frame.
    VideoFrame(VideoFrame),
    /// Remote presentation timestamp for the current update.
    PresentationTime(u32),
    /// The source finished the update.
    EndUpdate,
    /// Clock-sync pong. `t3` is sampled by the service on receipt.
    Pong { t0: u32, t1: u32, t2: u32 },
}

/// Events produced by the windowing task.
#[derive(Debug)]
pub enum SurfaceEvent {
    /// The previously committed frame was displayed.
    FrameDone,
    /// The output geometry changed.
    Resized(BufferGeometry),
}

// ── Collaborator traits ──────────────────────────────────────────

/// Sends clock-sync pings back to the remote source.
#[async_trait]
pub trait PingSender: Send {
    async fn send_ping(&mut self, ping: PingRequest) -> Result<(), GlintError>;
}

/// Provides the current remote framebuffer for pixel transfer.
pub trait FrameSource: Send {
    fn frame(&self) -> SourceFrame<'_>;
}

// ── ServiceHandle ────────────────────────────────────────────────

/// Event queue depth per input channel.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Cloneable handle feeding events into a running [`DisplayService`].
///
/// Dropping every handle closes the channels and ends the service
/// loop.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    remote: mpsc::Sender<RemoteEvent>,
    surface: mpsc::Sender<SurfaceEvent>,
    running: Arc<AtomicBool>,
}

impl ServiceHandle {
    /// Deliver a remote event.
    pub async fn send_remote(&self, event: RemoteEvent) -> Result<(), GlintError> {
        self.remote.send(event).await?;
        Ok(())
    }

    /// Deliver a surface event.
    pub async fn send_surface(&self, event: SurfaceEvent) -> Result<(), GlintError> {
        self.surface.send(event).await?;
        Ok(())
    }

    /// Signal the service loop to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ── DisplayService ───────────────────────────────────────────────

/// The presentation-core event loop.
pub struct DisplayService<S, P, G> {
    pipeline: FramePipeline,
    clock: ClockSync,
    source: S,
    surface: P,
    pinger: G,
    remote_rx: mpsc::Receiver<RemoteEvent>,
    surface_rx: mpsc::Receiver<SurfaceEvent>,
    running: Arc<AtomicBool>,
    ping_period: Duration,
    report_period: Duration,
}

impl<S, P, G> DisplayService<S, P, G>
where
    S: FrameSource,
    P: PresentationSurface + Send,
    G: PingSender,
{
    /// Build a service from configuration plus its collaborators.
    ///
    /// `target` is the initial output geometry; buffers are created
    /// lazily as frames are presented.
    pub fn new(
        config: &CoreConfig,
        target: BufferGeometry,
        source: S,
        surface: P,
        pinger: G,
    ) -> (Self, ServiceHandle) {
        let (remote_tx, remote_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (surface_tx, surface_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(false));

        let pool = BufferPool::new(config.pool.buffer_kind(), target);
        let perf = PerfTracker::with_capacity(config.perf.latency_samples.max(1));
        let pipeline = FramePipeline::with_perf(pool, perf);
        let clock = ClockSync::with_limits(
            config.clock.sample_capacity.max(1),
            config.clock.min_samples,
        );

        let service = Self {
            pipeline,
            clock,
            source,
            surface,
            pinger,
            remote_rx,
            surface_rx,
            running: Arc::clone(&running),
            ping_period: Duration::from_millis(config.clock.ping_period_ms.max(1)),
            report_period: Duration::from_secs(config.perf.report_period_secs.max(1)),
        };
        let handle = ServiceHandle {
            remote: remote_tx,
            surface: surface_tx,
            running,
        };
        (service, handle)
    }

    /// The pipeline (for inspection; the loop owns all mutation).
    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// The clock-sync estimator.
    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Run the event loop until every handle is dropped or
    /// [`ServiceHandle::stop`] is called.
    pub async fn run(&mut self) -> Result<(), GlintError> {
        self.running.store(true, Ordering::SeqCst);
        let mut ping_timer = tokio::time::interval(self.ping_period);
        let mut report_timer = tokio::time::interval(self.report_period);
        // The first tick of a tokio interval fires immediately; skip
        // the spurious report.
        report_timer.tick().await;

        info!(
            ping_period_ms = self.ping_period.as_millis() as u64,
            "display service started"
        );

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ping_timer.tick() => {
                    let ping = self.clock.make_ping(local_time_us());
                    self.pinger.send_ping(ping).await?;
                }
                _ = report_timer.tick() => {
                    self.pipeline.perf().log_latency_report();
                }
                event = self.remote_rx.recv() => match event {
                    Some(event) => self.handle_remote(event)?,
                    None => break,
                },
                event = self.surface_rx.recv() => match event {
                    Some(event) => self.handle_surface(event)?,
                    None => break,
                },
            }
        }

        info!("display service stopped");
        Ok(())
    }

    fn handle_remote(&mut self, event: RemoteEvent) -> Result<(), GlintError> {
        match event {
            RemoteEvent::BeginUpdate => self.pipeline.begin_update(),
            RemoteEvent::Damage(rect) => self.pipeline.add_damage(rect),
            RemoteEvent::VideoFrame(frame) => self.pipeline.add_video_frame(frame),
            RemoteEvent::PresentationTime(pts) => self.pipeline.set_presentation_time(pts),
            RemoteEvent::EndUpdate => {
                let frame = self.source.frame();
                let committed = self.pipeline.end_update(&frame, &mut self.surface)?;
                debug!(committed, "update ended");
                Ok(())
            }
            RemoteEvent::Pong { t0, t1, t2 } => {
                self.clock.process_pong(t0, t1, t2, local_time_us());
                Ok(())
            }
        }
    }

    fn handle_surface(&mut self, event: SurfaceEvent) -> Result<(), GlintError> {
        match event {
            SurfaceEvent::FrameDone => {
                let frame = self.source.frame();
                let committed = self.pipeline.frame_done(
                    local_time_us(),
                    &self.clock,
                    &frame,
                    &mut self.surface,
                )?;
                debug!(committed, "frame done");
                Ok(())
            }
            SurfaceEvent::Resized(target) => {
                if self.pipeline.resize_output(target) {
                    info!(
                        width = target.width,
                        height = target.height,
                        "output resized"
                    );
                } else {
                    warn!("resize to identical geometry ignored");
                }
                Ok(())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
