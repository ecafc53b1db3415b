//! Duocast Project Model
//!
//! Defines the core data contracts shared by recording and editing:
//! - **Layout:** How screen and camera are arranged on the output frame
//! - **Session:** A finished recording plus the metadata bundles carry
//! - **Store:** The record-store contract hosts plug persistence into
//! - **Timeline:** The non-destructive segment list of the editor
//!
//! Timeline times are integer nanoseconds internally so that edits never
//! accumulate floating-point error; seconds are exposed at the edges.

pub mod layout;
pub mod session;
pub mod store;
pub mod timeline;

pub use layout::*;
pub use session::*;
pub use store::*;
pub use timeline::*;
