//! Duocast Render Engine
//!
//! Everything that turns source frames into an output stream:
//!
//! ```text
//! screen ──┐
//!          ├── Compositor ── CompositingSurface ──┐
//! camera ──┘    (layout)                          ├── StreamEncoder ── chunks
//!                                mixed audio ─────┘   (GStreamer, Matroska)
//!
//! recording ── RecordingPlayback ── ExportRenderer ── StreamEncoder ── new recording
//!                 (seek/wait)        (timeline walk)
//! ```
//!
//! The live compositor samples whatever each source currently holds and
//! never waits. The export renderer is the opposite: it seeks, waits for
//! the seek to land, and draws exactly one verified frame per step.

pub mod compositor;
pub mod encoder;
pub mod export;
pub mod memory;
pub mod pipeline;
pub mod playback;
pub mod surface;

pub use compositor::*;
pub use encoder::*;
pub use export::*;
pub use memory::{MemoryEncoder, MemoryPlayback, MemoryTape};
pub use pipeline::{init_gstreamer, media_runtime_available, GstChunkEncoder};
pub use playback::RecordingPlayback;
pub use surface::*;
