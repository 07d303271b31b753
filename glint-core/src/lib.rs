//! # glint-core
//!
//! Presentation core for a remote-display client: everything between
//! a decoded remote framebuffer and the windowing system's surface.
//!
//! This crate contains:
//! - **Geometry**: `Rect`, `BufferGeometry`, `PixelFormat`
//! - **Region**: normalized damage-region algebra
//! - **Buffer & pool**: ref/hold buffer lifecycle with generation
//!   stamps and resize-time orphaning
//! - **Pipeline**: the frame-pacing state machine guaranteeing at
//!   most one outstanding commit
//! - **Render**: software pixel transfer with aspect-fit scaling
//! - **Clock**: ping/pong offset estimation for remote timestamps
//! - **Perf**: rolling latency statistics
//! - **Service**: the Tokio event loop tying it all together
//! - **Error**: `GlintError` — typed, `thiserror`-based error
//!   hierarchy

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod perf;
pub mod pipeline;
pub mod pool;
pub mod region;
pub mod render;
pub mod service;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{Buffer, BufferId, BufferKind, BufferOwner, PixelStorage};
pub use clock::{ClockSample, ClockSync, PingRequest};
pub use config::CoreConfig;
pub use error::GlintError;
pub use geometry::{BufferGeometry, PixelFormat, Rect};
pub use perf::{PerfTracker, SampleBuffer, SampleStats};
pub use pipeline::{FramePipeline, PipelineState, PresentationSurface};
pub use pool::BufferPool;
pub use region::Region;
pub use render::{SourceFrame, SourceTransform, VideoFrame};
pub use service::{
    DisplayService, FrameSource, PingSender, RemoteEvent, ServiceHandle, SurfaceEvent,
    local_time_us,
};
