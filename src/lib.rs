//! `audio-policy` - classification and policy-action engine for an audio server
//!
//! Tags devices and cards with type labels, sorts streams into policy groups
//! and drives routing, volume limits, corking and muting from group state and
//! context variables. Effects on the audio server go through the
//! [`actions::DeviceActions`] and [`actions::Notifier`] traits.
//!
//! # Features
//! - Ordered rule-based classification of sinks, sources, cards and streams
//! - Per-process group overrides registered at runtime
//! - Policy groups with routing, volume limit, cork and mute-by-route behavior
//! - Context variables that set or delete properties on matching objects
//! - Daemon with a JSON-over-Unix-socket control interface

pub mod actions;
pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod daemon;
pub mod engine;
pub mod entity;
pub mod error;
pub mod group;
pub mod ipc;
pub mod logging;
pub mod matcher;
pub mod notification;
pub mod style;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

// Re-export commonly used types for convenience
pub use cli::Args;
pub use config::Config;
pub use engine::Engine;
