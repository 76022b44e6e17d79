//! Recording collaborators
//!
//! [`RecordingActions`] and [`RecordingNotifier`] keep every call instead of
//! executing it, so engine decisions can be asserted on in unit and
//! integration tests. Built only for tests or with the `testing` feature.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use crate::actions::{DeviceActions, DeviceState, MediaKind, Notifier, Volume};
use crate::entity::{Entity, EntityKind};

/// One executor call, identified by entity names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Route { stream: String, target: String },
    Port { device: String, port: String },
    Volume { stream: String, volume: Volume },
    Mute { stream: String, muted: bool },
    Cork { stream: String, corked: bool },
}

/// One notifier call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Media { media: MediaKind, group: String, active: bool },
    Device { state: DeviceState, labels: Vec<String> },
    Changed { kind: EntityKind, index: u32 },
}

/// Executor that records calls into a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingActions {
    log: Arc<Mutex<Vec<Call>>>,
}

impl RecordingActions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far
    ///
    /// # Panics
    /// Panics if a recording thread panicked while holding the log.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().expect("call log poisoned").clone()
    }

    /// Drain the recorded calls
    ///
    /// # Panics
    /// Panics if a recording thread panicked while holding the log.
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.log.lock().expect("call log poisoned"))
    }

    fn record(&self, call: Call) {
        if let Ok(mut log) = self.log.lock() {
            log.push(call);
        }
    }
}

impl DeviceActions for RecordingActions {
    fn set_route(&mut self, stream: &Entity, target: &Entity) -> Result<()> {
        self.record(Call::Route {
            stream: stream.name.clone(),
            target: target.name.clone(),
        });
        Ok(())
    }

    fn set_port(&mut self, device: &Entity, port: &str) -> Result<()> {
        self.record(Call::Port {
            device: device.name.clone(),
            port: port.to_string(),
        });
        Ok(())
    }

    fn set_volume_factor(&mut self, stream: &Entity, volume: Volume) -> Result<()> {
        self.record(Call::Volume {
            stream: stream.name.clone(),
            volume,
        });
        Ok(())
    }

    fn set_mute(&mut self, stream: &Entity, muted: bool) -> Result<()> {
        self.record(Call::Mute {
            stream: stream.name.clone(),
            muted,
        });
        Ok(())
    }

    fn cork(&mut self, stream: &Entity, corked: bool) -> Result<()> {
        self.record(Call::Cork {
            stream: stream.name.clone(),
            corked,
        });
        Ok(())
    }
}

/// Notifier that records calls into a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices recorded so far
    ///
    /// # Panics
    /// Panics if a recording thread panicked while holding the log.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.log.lock().expect("notice log poisoned").clone()
    }

    /// Drain the recorded notices
    ///
    /// # Panics
    /// Panics if a recording thread panicked while holding the log.
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.log.lock().expect("notice log poisoned"))
    }

    fn record(&self, notice: Notice) {
        if let Ok(mut log) = self.log.lock() {
            log.push(notice);
        }
    }
}

impl Notifier for RecordingNotifier {
    fn media_status(&mut self, media: MediaKind, group: &str, active: bool) {
        self.record(Notice::Media {
            media,
            group: group.to_string(),
            active,
        });
    }

    fn device_state(&mut self, state: DeviceState, labels: &[String]) {
        self.record(Notice::Device {
            state,
            labels: labels.to_vec(),
        });
    }

    fn object_changed(&mut self, kind: EntityKind, index: u32) {
        self.record(Notice::Changed { kind, index });
    }
}
