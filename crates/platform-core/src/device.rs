//! Device acquisition contract.
//!
//! Permission prompts and device pickers live in the host. The core only
//! asks for handles and gets either a live source or a classified
//! [`DuocastError::Acquisition`](duocast_common::error::DuocastError).

use duocast_common::error::DuocastResult;
use serde::{Deserialize, Serialize};

use crate::audio::AudioSignal;
use crate::source::CaptureSource;

/// Which physical device to open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRef {
    /// Whatever the platform considers the default device.
    #[default]
    Default,
    /// A specific device identifier from the host's enumeration.
    Id(String),
}

impl DeviceRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }
}

/// A screen/window share, optionally carrying the shared content's audio.
pub struct AcquiredScreen {
    pub video: Box<dyn CaptureSource>,
    /// Present only when system audio was requested and the share has an
    /// audio track.
    pub audio: Option<Box<dyn AudioSignal>>,
}

/// Supplies capture handles on request.
#[async_trait::async_trait]
pub trait DeviceProvider: Send {
    /// Ask the user to pick a screen or window to share.
    async fn acquire_screen(
        &mut self,
        capture_system_audio: bool,
    ) -> DuocastResult<AcquiredScreen>;

    /// Open a camera.
    async fn acquire_camera(
        &mut self,
        device: &DeviceRef,
    ) -> DuocastResult<Box<dyn CaptureSource>>;

    /// Open a microphone.
    async fn acquire_microphone(
        &mut self,
        device: &DeviceRef,
    ) -> DuocastResult<Box<dyn AudioSignal>>;
}
