//! Contracts with the audio server
//!
//! The engine only decides what should happen. Moving streams, switching
//! ports and applying gain are carried out by a [`DeviceActions`] executor;
//! outbound signals go to a [`Notifier`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::entity::{Entity, EntityKind};

/// Volume in server units, where [`Volume::NORM`] is unity gain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Volume(u32);

impl Volume {
    pub const MUTED: Volume = Volume(0);
    pub const NORM: Volume = Volume(0x10000);

    /// Convert a percentage (clamped to 100) into volume units
    #[must_use]
    pub fn from_percent(percent: u32) -> Self {
        let percent = u64::from(percent.min(100));
        Self((percent * u64::from(Self::NORM.0) / 100) as u32)
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn percent(self) -> u32 {
        ((u64::from(self.0) * 100 + u64::from(Self::NORM.0) / 2) / u64::from(Self::NORM.0)) as u32
    }

    /// Gain factor relative to unity
    #[must_use]
    pub fn ratio(self) -> f64 {
        f64::from(self.0) / f64::from(Self::NORM.0)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::NORM
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Direction of a policy group's media traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    AudioPlayback,
    AudioRecording,
}

impl MediaKind {
    #[must_use]
    pub fn for_stream(kind: EntityKind) -> Self {
        if kind == EntityKind::SourceOutput {
            Self::AudioRecording
        } else {
            Self::AudioPlayback
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioPlayback => "audio_playback",
            Self::AudioRecording => "audio_recording",
        }
    }
}

/// Device availability reported to the policy manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Connected,
    Disconnected,
}

impl DeviceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Primitives the audio server executes on the engine's behalf
pub trait DeviceActions {
    /// Move a stream to a sink or source
    fn set_route(&mut self, stream: &Entity, target: &Entity) -> Result<()>;
    fn set_port(&mut self, device: &Entity, port: &str) -> Result<()>;
    fn set_volume_factor(&mut self, stream: &Entity, volume: Volume) -> Result<()>;
    fn set_mute(&mut self, stream: &Entity, muted: bool) -> Result<()>;
    fn cork(&mut self, stream: &Entity, corked: bool) -> Result<()>;
}

/// Fire-and-forget outbound signals
pub trait Notifier {
    fn media_status(&mut self, media: MediaKind, group: &str, active: bool);
    fn device_state(&mut self, state: DeviceState, labels: &[String]);
    /// An object's properties were changed by the engine
    fn object_changed(&mut self, kind: EntityKind, index: u32);
}

/// Executor that logs every decision and reports success.
///
/// Used by the daemon when the executing audio server sits on the other side
/// of the IPC socket.
#[derive(Debug, Default)]
pub struct TracingActions;

impl DeviceActions for TracingActions {
    fn set_route(&mut self, stream: &Entity, target: &Entity) -> Result<()> {
        info!(
            "Route {} #{} ({}) → {} '{}'",
            stream.kind, stream.index, stream.name, target.kind, target.name
        );
        Ok(())
    }

    fn set_port(&mut self, device: &Entity, port: &str) -> Result<()> {
        info!("Port {} '{}' → {}", device.kind, device.name, port);
        Ok(())
    }

    fn set_volume_factor(&mut self, stream: &Entity, volume: Volume) -> Result<()> {
        info!(
            "Volume {} #{} ({}) → {} (×{:.3})",
            stream.kind,
            stream.index,
            stream.name,
            volume,
            volume.ratio()
        );
        Ok(())
    }

    fn set_mute(&mut self, stream: &Entity, muted: bool) -> Result<()> {
        info!(
            "{} {} #{} ({})",
            if muted { "Mute" } else { "Unmute" },
            stream.kind,
            stream.index,
            stream.name
        );
        Ok(())
    }

    fn cork(&mut self, stream: &Entity, corked: bool) -> Result<()> {
        info!(
            "{} {} #{} ({})",
            if corked { "Cork" } else { "Uncork" },
            stream.kind,
            stream.index,
            stream.name
        );
        Ok(())
    }
}

/// Notifier that only logs
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn media_status(&mut self, media: MediaKind, group: &str, active: bool) {
        info!(
            "Media {} for group '{}': {}",
            media.as_str(),
            group,
            if active { "active" } else { "inactive" }
        );
    }

    fn device_state(&mut self, state: DeviceState, labels: &[String]) {
        info!("Device {}: {}", state.as_str(), labels.join(" "));
    }

    fn object_changed(&mut self, kind: EntityKind, index: u32) {
        info!("Changed {} #{}", kind, index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_from_percent() {
        assert_eq!(Volume::from_percent(100), Volume::NORM);
        assert_eq!(Volume::from_percent(0), Volume::MUTED);
        assert_eq!(Volume::from_percent(50).raw(), 0x8000);
        assert_eq!(Volume::from_percent(250), Volume::NORM);
    }

    #[test]
    fn test_volume_percent_round_trip_is_stable() {
        for percent in [0, 1, 33, 50, 99, 100] {
            assert_eq!(Volume::from_percent(percent).percent(), percent);
        }
    }

    #[test]
    fn test_volume_ratio() {
        assert!((Volume::from_percent(25).ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(Volume::NORM.to_string(), "100%");
    }

    #[test]
    fn test_media_kind_for_stream() {
        assert_eq!(
            MediaKind::for_stream(EntityKind::SourceOutput),
            MediaKind::AudioRecording
        );
        assert_eq!(
            MediaKind::for_stream(EntityKind::SinkInput),
            MediaKind::AudioPlayback
        );
    }
}
