//! audio-policy binary entry point
//!
//! Dispatches to daemon mode or subcommands based on CLI arguments.

use clap::Parser;
use color_eyre::eyre::Result;
use std::path::Path;
use std::sync::Arc;

use audio_policy::{cli::Args, cli::Command, commands, config::Config, daemon};

/// Logging for CLI commands; the daemon sets up its own
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    if !matches!(args.command, Some(Command::Daemon { .. })) {
        init_logging();
    }

    dispatch(args)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("{e:#}"))
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    let config_path = args.config.as_deref();

    match args.command {
        None => commands::status(false).await,

        Some(Command::Daemon { foreground }) => {
            let config = load_config(config_path)?;
            daemon::run(Arc::new(config), foreground).await
        }

        Some(Command::Status { json }) => commands::status(json).await,
        Some(Command::Groups { json }) => commands::groups(json).await,
        Some(Command::SetContext { name, value }) => commands::set_context(&name, &value).await,

        Some(Command::RegisterPid {
            pid,
            group,
            property,
            method,
            pattern,
        }) => commands::register_pid(pid, group, property, method, pattern).await,

        Some(Command::UnregisterPid {
            pid,
            property,
            method,
            pattern,
        }) => commands::unregister_pid(pid, property, method, pattern).await,

        Some(Command::Route {
            target,
            group,
            class,
            mode,
            hwid,
        }) => commands::route(target, group, class, mode, hwid).await,

        Some(Command::Cork { group }) => commands::cork(group, true).await,
        Some(Command::Uncork { group }) => commands::cork(group, false).await,
        Some(Command::VolumeLimit { percent, group }) => {
            commands::volume_limit(percent, group).await
        }
        Some(Command::Mute { group, off }) => commands::mute(group, !off).await,
        Some(Command::StreamMute { kind, index, off }) => {
            commands::stream_mute(kind, index, !off).await
        }
        Some(Command::DeleteGroup { group }) => commands::delete_group(group).await,

        Some(Command::Create {
            kind,
            index,
            name,
            properties,
        }) => commands::create(kind, index, name, properties).await,
        Some(Command::Remove { kind, index }) => commands::remove(kind, index).await,

        Some(Command::Shutdown) => commands::shutdown().await,

        // Local commands (no daemon needed)
        Some(Command::Validate) => {
            let config = load_config(config_path)?;
            commands::validate(&config)
        }

        Some(Command::Classify {
            kind,
            name,
            properties,
            json,
        }) => {
            let config = load_config(config_path)?;
            commands::classify(&config, kind, &name, properties, json)
        }
    }
}
