//! Command-line interface definitions
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::classify::DeviceClass;
use crate::entity::EntityKind;

/// audio-policy - stream classification and policy daemon
///
/// Sorts audio streams into policy groups and applies routing, volume,
/// cork and mute policy driven by configuration and context variables.
#[derive(Parser)]
#[command(name = "audio-policy")]
#[command(version)]
#[command(about = "Classify audio streams and devices and apply group policy")]
#[command(after_help = "\
BEHAVIOR:
  - Devices and cards are tagged with type labels by ordered rules
  - Streams join a policy group: pid overrides first, then stream rules, then the default group
  - Groups route, limit, cork and mute their streams
  - Context variables trigger property changes on matching objects

DAEMON MANAGEMENT:
  audio-policy daemon              Run the daemon, logging to a file
  audio-policy daemon --foreground Run with logs to stderr
  audio-policy status              Query daemon status
  audio-policy shutdown            Gracefully stop the daemon

POLICY COMMANDS:
  audio-policy route ihf           Route all set_sink groups to the first 'ihf' sink
  audio-policy volume-limit 0 -g player
  audio-policy set-context active_profile car

LOCAL COMMANDS:
  audio-policy validate            Validate config file (no daemon needed)
  audio-policy classify sink alsa_output.0

IPC SOCKET:
  $XDG_RUNTIME_DIR/audio-policy.sock (or /tmp/audio-policy.sock)")]
pub struct Args {
    /// Use this config file instead of the XDG default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the policy daemon
    Daemon {
        /// Run in foreground with logs to stderr
        #[arg(short, long)]
        foreground: bool,
    },

    /// Query daemon status via IPC
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List policy groups and their state
    Groups {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Publish a context variable value
    SetContext { name: String, value: String },

    /// Place streams of a process into a group
    RegisterPid {
        pid: u32,
        group: String,
        /// Stream property to match (default: match every stream of the process)
        #[arg(long)]
        property: Option<String>,
        #[arg(long, default_value = "true")]
        method: String,
        #[arg(long, default_value = "")]
        pattern: String,
    },

    /// Remove a per-process override
    UnregisterPid {
        pid: u32,
        #[arg(long)]
        property: Option<String>,
        #[arg(long, default_value = "true")]
        method: String,
        #[arg(long, default_value = "")]
        pattern: String,
    },

    /// Route groups to the first device of a type
    Route {
        /// Device type label
        target: String,
        /// Route only this group
        #[arg(short, long)]
        group: Option<String>,
        #[arg(long, default_value = "sink", value_parser = parse_class)]
        class: DeviceClass,
        /// Value stamped as the target's policy mode
        #[arg(long)]
        mode: Option<String>,
        /// Value stamped as the target's hardware id
        #[arg(long)]
        hwid: Option<String>,
    },

    /// Cork every stream of a group
    Cork { group: String },

    /// Uncork every stream of a group
    Uncork { group: String },

    /// Set a volume limit in percent
    VolumeLimit {
        percent: u32,
        /// Limit only this group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Locally mute or unmute a group
    Mute {
        group: String,
        #[arg(long)]
        off: bool,
    },

    /// Record an explicit mute change on a stream
    StreamMute {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        index: u32,
        #[arg(long)]
        off: bool,
    },

    /// Delete a policy group, moving its streams to the default group
    DeleteGroup { group: String },

    /// Announce an entity to the daemon
    Create {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        index: u32,
        name: String,
        /// Properties as KEY=VALUE
        #[arg(short, long = "prop", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },

    /// Announce removal of an entity
    Remove {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        index: u32,
    },

    /// Validate config file (local, no daemon needed)
    Validate,

    /// Classify an object against the configured rules (local, no daemon needed)
    Classify {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        name: String,
        #[arg(short, long = "prop", value_parser = parse_property)]
        properties: Vec<(String, String)>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Gracefully shutdown the daemon
    Shutdown,
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    s.parse()
}

fn parse_class(s: &str) -> Result<DeviceClass, String> {
    s.parse()
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_create_parses_properties() {
        let args = Args::try_parse_from([
            "audio-policy",
            "create",
            "sink-input",
            "7",
            "music",
            "-p",
            "application.process.id=42",
        ])
        .unwrap();
        match args.command {
            Some(Command::Create {
                kind, properties, ..
            }) => {
                assert_eq!(kind, EntityKind::SinkInput);
                assert_eq!(properties, vec![("application.process.id".into(), "42".into())]);
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_bad_property_rejected() {
        let args = ["audio-policy", "classify", "sink", "x", "-p", "novalue"];
        assert!(Args::try_parse_from(args).is_err());
    }
}
