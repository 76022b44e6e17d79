//! Desktop notifications
//!
//! Handles sending notifications via notify-rust and icon detection
//! using `FreeDesktop` standard icon names.

use color_eyre::eyre::{Context, Result};
use notify_rust::Notification;
use tracing::warn;

use crate::actions::{DeviceState, MediaKind, Notifier, TracingNotifier};
use crate::entity::EntityKind;

/// Send a desktop notification
///
/// # Errors
/// Returns an error if the notification cannot be sent (e.g., no notification daemon running).
pub fn send_notification(summary: &str, body: &str, icon: Option<&str>) -> Result<()> {
    let icon = icon.unwrap_or("audio-card");

    Notification::new()
        .summary(summary)
        .body(body)
        .appname("audio-policy")
        .icon(icon)
        .timeout(3000)
        .show()
        .context("Failed to show notification")?;

    Ok(())
}

/// Pick an icon for a set of device type labels
#[must_use]
pub fn get_device_icon(labels: &[String]) -> &'static str {
    let has = |needles: &[&str]| {
        labels.iter().any(|l| {
            let l = l.to_lowercase();
            needles.iter().any(|n| l.contains(n))
        })
    };

    if has(&["hdmi", "tv", "display"]) {
        "video-display"
    } else if has(&["headphone", "headset", "bluetooth", "bt"]) {
        "audio-headphones"
    } else if has(&["mic", "input"]) {
        "audio-input-microphone"
    } else {
        "audio-speakers"
    }
}

/// Logs every signal and additionally shows device changes on the desktop
#[derive(Debug, Default)]
pub struct DesktopNotifier {
    inner: TracingNotifier,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for DesktopNotifier {
    fn media_status(&mut self, media: MediaKind, group: &str, active: bool) {
        self.inner.media_status(media, group, active);
    }

    fn device_state(&mut self, state: DeviceState, labels: &[String]) {
        self.inner.device_state(state, labels);

        let summary = match state {
            DeviceState::Connected => "Audio device connected",
            DeviceState::Disconnected => "Audio device disconnected",
        };
        let icon = get_device_icon(labels);
        if let Err(e) = send_notification(summary, &labels.join(", "), Some(icon)) {
            warn!("Could not send device notification: {}", e);
        }
    }

    fn object_changed(&mut self, kind: EntityKind, index: u32) {
        self.inner.object_changed(kind, index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_device_icon_display() {
        assert_eq!(get_device_icon(&labels(&["hdmi"])), "video-display");
        assert_eq!(get_device_icon(&labels(&["ihf", "TV-out"])), "video-display");
    }

    #[test]
    fn test_device_icon_headphones() {
        assert_eq!(get_device_icon(&labels(&["headset"])), "audio-headphones");
        assert_eq!(get_device_icon(&labels(&["bluetooth-a2dp"])), "audio-headphones");
    }

    #[test]
    fn test_device_icon_fallback() {
        assert_eq!(get_device_icon(&labels(&["ihf"])), "audio-speakers");
        assert_eq!(get_device_icon(&[]), "audio-speakers");
        assert_eq!(get_device_icon(&labels(&["usb-mic"])), "audio-input-microphone");
    }
}
