//! Daemon mode
//!
//! Owns the policy engine on the main task. IPC connections are served on
//! their own tasks and forward each request to the engine through a channel,
//! so every engine operation runs on one dispatch task.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UnixStream;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::actions::{Notifier, TracingActions, TracingNotifier};
use crate::classify::DeviceClass;
use crate::config::Config;
use crate::engine::Engine;
use crate::entity::Entity;
use crate::ipc::{self, IpcServer, Request, Response};
use crate::logging::RotatingFileAppender;
use crate::matcher::MatchRule;
use crate::notification::DesktopNotifier;

const LOG_FILE: &str = "daemon.log";
const LOG_MAX_BYTES: u64 = 1_000_000;

/// A request waiting for the engine, with the channel for its reply
type Job = (Request, oneshot::Sender<Response>);

/// Initialize daemon logging
///
/// Foreground logs go to stderr. Background logs go to a size-rotated file
/// under the user data dir; the returned guard must live as long as the daemon.
///
/// # Errors
/// Returns an error if the log directory cannot be determined.
pub fn init_logging(
    log_level: &str,
    foreground: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("audio_policy={log_level}"))
    });

    if foreground {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let log_dir = dirs::data_local_dir()
        .context("Could not determine data directory")?
        .join("audio-policy");
    let appender = RotatingFileAppender::new(&log_dir, LOG_FILE, LOG_MAX_BYTES);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}

/// Run the daemon with the given configuration
///
/// # Errors
/// Returns an error if logging or the IPC socket cannot be set up.
pub async fn run(config: Arc<Config>, foreground: bool) -> Result<()> {
    let _log_guard = init_logging(&config.settings.log_level, foreground)?;

    info!("Starting audio-policy daemon");
    info!(
        "Loaded {} groups, {} device, {} card, {} stream, {} context rules",
        config.groups.len(),
        config.devices.len(),
        config.cards.len(),
        config.streams.len(),
        config.context.len()
    );

    let notifier: Box<dyn Notifier + Send> = if config.settings.notify_desktop {
        Box::new(DesktopNotifier::new())
    } else {
        Box::new(TracingNotifier)
    };
    let mut engine = config.build_engine(Box::new(TracingActions), notifier);
    let diagnostics = engine.classifier().diagnostics().len();
    if diagnostics > 0 {
        warn!(
            "{} rule(s) degraded to match-all, run 'audio-policy validate' for details",
            diagnostics
        );
    }

    let ipc_server = IpcServer::bind().await?;
    info!("IPC server listening on {:?}", ipc_server.socket_path());

    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        debug!("sd_notify READY failed: {}", e);
    }

    let start_time = Instant::now();
    let (tx, mut rx) = mpsc::channel::<Job>(64);

    loop {
        tokio::select! {
            Some(stream) = ipc_server.accept() => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, tx).await {
                        error!("IPC request handling error: {:#}", e);
                    }
                });
            }

            Some((request, reply)) = rx.recv() => {
                let shutdown = matches!(request, Request::Shutdown);
                let response = handle_request(&mut engine, request, start_time);
                if reply.send(response).is_err() {
                    debug!("IPC client went away before the reply");
                }
                if shutdown {
                    info!("Shutdown requested via IPC");
                    break;
                }
            }

            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        debug!("sd_notify STOPPING failed: {}", e);
    }

    // Let in-flight replies (the shutdown acknowledgement) reach their clients
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(())
}

/// Read one request, hand it to the engine task and write back its reply
async fn serve_connection(mut stream: UnixStream, tx: mpsc::Sender<Job>) -> Result<()> {
    let request = ipc::read_request(&mut stream).await?;
    debug!("IPC request: {:?}", request);

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send((request, reply_tx))
        .await
        .context("Daemon is shutting down")?;
    let response = reply_rx.await.context("Request dropped by daemon")?;

    ipc::write_response(&mut stream, &response).await
}

fn ok(message: impl Into<String>) -> Response {
    Response::Ok {
        message: message.into(),
    }
}

fn err(message: impl Into<String>) -> Response {
    Response::Error {
        message: message.into(),
    }
}

fn outcome(done: bool, success: String, failure: String) -> Response {
    if done { ok(success) } else { err(failure) }
}

/// Apply one request to the engine
pub fn handle_request(engine: &mut Engine, request: Request, start_time: Instant) -> Response {
    match request {
        Request::Status => Response::Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: start_time.elapsed().as_secs(),
            engine: engine.status(),
        },

        Request::ListGroups => Response::Groups {
            groups: engine.group_summaries(),
        },

        Request::Context { name, value } => {
            let report = engine.variable_changed(&name, &value);
            Response::Context {
                changed: report.changed,
                mutations: report.mutations,
                failures: report.failures.iter().map(ToString::to_string).collect(),
            }
        }

        Request::RegisterPid {
            pid,
            property,
            method,
            pattern,
            group,
        } => {
            let mut diags = crate::error::Diagnostics::new();
            let matcher = MatchRule::parse(&method, &pattern, &mut diags);
            if let Some(problem) = diags.iter().next() {
                return err(problem.to_string());
            }
            engine.register_pid(pid, property.as_deref(), matcher, &group);
            ok(format!("Pid {pid} → {group}"))
        }

        Request::UnregisterPid {
            pid,
            property,
            method,
            pattern,
        } => {
            let mut diags = crate::error::Diagnostics::new();
            let matcher = MatchRule::parse(&method, &pattern, &mut diags);
            outcome(
                engine.unregister_pid(pid, property.as_deref(), &matcher),
                format!("Pid {pid} override removed"),
                format!("Pid {pid} has no such override"),
            )
        }

        Request::Route {
            group,
            class,
            target,
            mode,
            hwid,
        } => {
            let class: DeviceClass = match class.parse() {
                Ok(class) => class,
                Err(e) => return err(e),
            };
            outcome(
                engine.move_to(group.as_deref(), class, &target, mode.as_deref(), hwid.as_deref()),
                format!("Routed to '{target}'"),
                format!("Cannot route to '{target}'"),
            )
        }

        Request::Cork { group, corked } => outcome(
            engine.cork(&group, corked),
            format!("Group '{group}' {}", if corked { "corked" } else { "uncorked" }),
            format!("Unknown group '{group}'"),
        ),

        Request::VolumeLimit { group, percent } => {
            if percent > 100 {
                return err(format!("Volume limit {percent}% exceeds 100%"));
            }
            outcome(
                engine.set_volume_limit(group.as_deref(), percent),
                format!("Volume limit {percent}%"),
                format!("Unknown group '{}'", group.unwrap_or_default()),
            )
        }

        Request::LocalMute { group, muted } => outcome(
            engine.set_local_mute(&group, muted),
            format!("Group '{group}' {}", if muted { "muted" } else { "unmuted" }),
            format!("Unknown group '{group}'"),
        ),

        Request::StreamMuted { kind, index, muted } => {
            engine.stream_muted(kind, index, muted);
            ok(format!("{kind} #{index} mute={muted}"))
        }

        Request::DeleteGroup { group } => outcome(
            engine.delete_group(&group),
            format!("Group '{group}' deleted"),
            format!("Unknown group '{group}'"),
        ),

        Request::EntityCreated {
            kind,
            index,
            name,
            properties,
        } => {
            let mut entity = Entity::new(kind, index, name);
            entity.properties = properties;
            engine.on_entity_created(entity);
            let group = engine.groups().group_of(kind, index).map(String::from);
            match group {
                Some(group) => ok(format!("{kind} #{index} → {group}")),
                None => ok(format!("{kind} #{index} created")),
            }
        }

        Request::EntityRemoved { kind, index } => outcome(
            engine.on_entity_removed(kind, index),
            format!("{kind} #{index} removed"),
            format!("Unknown {kind} #{index}"),
        ),

        Request::Shutdown => ok("Daemon shutting down..."),
    }
}
