//! CLI commands
//!
//! Implements local commands (validate, classify) and IPC-based commands
//! that talk to the daemon (status, groups, context, routing and the entity feed).

use anyhow::Result;
use crossterm::style::Stylize;
use std::collections::BTreeMap;
use tracing::info;

use crate::classify::{DeviceClass, RuleFlags, StreamIdentity};
use crate::config::Config;
use crate::entity::{Entity, EntityKind};
use crate::group::GroupSummary;
use crate::ipc::{self, Request, Response};
use crate::style::PolicyStyle;

// ============================================================================
// Local Commands (no daemon needed)
// ============================================================================

/// Validate configuration and report degraded rules
///
/// # Errors
/// Returns an error if any rule degraded to match-all.
pub fn validate(config: &Config) -> Result<()> {
    config.print_summary();

    let diagnostics = config.diagnostics();
    if diagnostics.is_empty() {
        return Ok(());
    }

    println!("\n{} ({}):", "Degraded rules".warning(), diagnostics.len().to_string().stat());
    for d in diagnostics.iter() {
        println!("  {} {}", "!".warning(), d);
    }
    anyhow::bail!("{} rule(s) degraded to match-all", diagnostics.len());
}

/// Classify an object against the configured rules
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub fn classify(
    config: &Config,
    kind: EntityKind,
    name: &str,
    properties: Vec<(String, String)>,
    json_output: bool,
) -> Result<()> {
    let classifier = config.build_classifier();
    let mut entity = Entity::new(kind, 0, name);
    entity.properties = properties.into_iter().collect();

    let (labels, notify, group) = match kind {
        EntityKind::Sink | EntityKind::Source => {
            let class = if kind == EntityKind::Sink {
                DeviceClass::Sink
            } else {
                DeviceClass::Source
            };
            let all =
                classifier.device_labels(class, &entity, RuleFlags::empty(), RuleFlags::empty());
            let notify = classifier.device_labels(
                class,
                &entity,
                RuleFlags::DISABLE_NOTIFY,
                RuleFlags::empty(),
            );
            (all, notify, None)
        }
        EntityKind::Card => {
            let profiles = entity.profiles();
            let all =
                classifier.card_labels(&entity, &profiles, RuleFlags::empty(), RuleFlags::empty());
            let notify = classifier.card_labels(
                &entity,
                &profiles,
                RuleFlags::DISABLE_NOTIFY,
                RuleFlags::empty(),
            );
            (all, notify, None)
        }
        EntityKind::SinkInput | EntityKind::SourceOutput => {
            let identity = StreamIdentity::from_attributes(&entity);
            let class = classifier.find_group_for_stream(&identity, &entity);
            let flags: Vec<String> = class
                .flags
                .iter_names()
                .map(|(n, _)| n.to_lowercase())
                .collect();
            (flags, Vec::new(), Some(class.group))
        }
        EntityKind::Module => (Vec::new(), Vec::new(), None),
    };

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "kind": kind,
                "name": name,
                "labels": if group.is_some() { Vec::new() } else { labels.clone() },
                "notify_labels": notify,
                "group": group,
                "stream_flags": if group.is_some() { labels } else { Vec::new() },
            }))?
        );
        return Ok(());
    }

    println!("{} {}", kind.to_string().header(), name.bold());
    if let Some(group) = group {
        println!("  {} {}", "group:".dim(), group.as_str().success());
        if !labels.is_empty() {
            println!("  {} {}", "flags:".dim(), labels.join(", ").technical());
        }
    } else if labels.is_empty() {
        println!("  {}", "(no matching rule)".dim());
    } else {
        println!("  {} {}", "type:".dim(), labels.join(" ").technical());
        if notify != labels {
            println!("  {} {}", "announced as:".dim(), notify.join(" ").technical());
        }
    }
    Ok(())
}

/// Format uptime in human-readable form
fn format_uptime(secs: u64) -> String {
    const SECS_PER_MINUTE: u64 = 60;
    const SECS_PER_HOUR: u64 = 3600;

    if secs < SECS_PER_MINUTE {
        return format!("{secs}s");
    }
    if secs < SECS_PER_HOUR {
        return format!("{mins}m", mins = secs / SECS_PER_MINUTE);
    }
    let hours = secs / SECS_PER_HOUR;
    let mins = (secs % SECS_PER_HOUR) / SECS_PER_MINUTE;
    if mins > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{hours}h")
    }
}

// ============================================================================
// IPC-based Commands (require daemon)
// ============================================================================

async fn require_daemon() -> Result<()> {
    if !ipc::is_daemon_running().await {
        anyhow::bail!("Daemon is not running. Start it with: audio-policy daemon");
    }
    Ok(())
}

/// Send a request whose reply is a plain Ok/Error message
async fn send_simple(request: Request) -> Result<()> {
    require_daemon().await?;

    match ipc::send_request(request).await? {
        Response::Ok { message } => {
            println!("{}", message.success());
            Ok(())
        }
        Response::Error { message } => anyhow::bail!("Error: {message}"),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Query daemon status
///
/// # Errors
/// Returns an error if IPC communication fails or JSON serialization fails.
pub async fn status(json_output: bool) -> Result<()> {
    let daemon_info = if ipc::is_daemon_running().await {
        match ipc::send_request(Request::Status).await {
            Ok(Response::Status {
                version,
                uptime_secs,
                engine,
            }) => Some((version, uptime_secs, engine)),
            _ => None,
        }
    } else {
        None
    };

    if json_output {
        let json = match daemon_info {
            Some((version, uptime_secs, engine)) => serde_json::json!({
                "running": true,
                "version": version,
                "uptime_secs": uptime_secs,
                "uptime_human": format_uptime(uptime_secs),
                "engine": engine,
            }),
            None => serde_json::json!({ "running": false }),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{}", "Daemon".header());
    println!("{}", "-".repeat(6));

    let Some((version, uptime_secs, engine)) = daemon_info else {
        println!("{} {}", "Status:".dim(), "Not running".error());
        println!("  Start with: {}", "audio-policy daemon".technical());
        return Ok(());
    };

    println!(
        "{} {}",
        "Status:".dim(),
        format!("Running (uptime: {})", format_uptime(uptime_secs)).success()
    );
    println!("{} {}", "Version:".dim(), version);
    println!(
        "{} {}",
        "Default group:".dim(),
        engine.default_group.as_deref().unwrap_or("(deleted)").bold()
    );
    println!(
        "{} {} groups, {} streams, {} sinks, {} sources, {} cards",
        "Tracking:".dim(),
        engine.groups.to_string().stat(),
        engine.streams.to_string().stat(),
        engine.sinks.to_string().stat(),
        engine.sources.to_string().stat(),
        engine.cards.to_string().stat()
    );
    println!("{} {}", "Pid overrides:".dim(), engine.pid_overrides.to_string().stat());
    if engine.diagnostics > 0 {
        println!(
            "{} {}",
            "Degraded rules:".dim(),
            engine.diagnostics.to_string().warning()
        );
    }

    if !engine.context.is_empty() {
        println!("\n{}", "Context".header());
        println!("{}", "-".repeat(7));
        for (name, value) in &engine.context {
            let value = if value.is_empty() { "(unset)" } else { value.as_str() };
            println!("  {} = {}", name.as_str().bold(), value.technical());
        }
    }

    Ok(())
}

fn print_group(group: &GroupSummary) {
    let mut state = Vec::new();
    if group.locally_muted {
        state.push("muted");
    }
    if group.corked {
        state.push("corked");
    }
    if group.muted_by_route {
        state.push("muted by route");
    }

    println!(
        "  {} {} {}",
        group.name.as_str().bold(),
        format!("({} streams)", group.members).dim(),
        state.join(", ").warning()
    );
    println!(
        "     {} {}  {} {}  {} {}",
        "sink:".dim(),
        group.sink.as_deref().unwrap_or("-"),
        "source:".dim(),
        group.source.as_deref().unwrap_or("-"),
        "limit:".dim(),
        format!("{}%", group.limit_percent).stat()
    );
    if !group.flags.is_empty() {
        println!("     {} {}", "flags:".dim(), group.flags.join(", ").technical());
    }
}

/// List policy groups
///
/// # Errors
/// Returns an error if no daemon is running or IPC communication fails.
pub async fn groups(json_output: bool) -> Result<()> {
    require_daemon().await?;

    match ipc::send_request(Request::ListGroups).await? {
        Response::Groups { groups } => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                let header = format!("Policy Groups ({}):", groups.len());
                println!("{}", header.as_str().header());
                println!("{}", "-".repeat(header.len()));
                for group in &groups {
                    print_group(group);
                }
            }
            Ok(())
        }
        Response::Error { message } => anyhow::bail!("Error: {message}"),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Publish a context variable value
///
/// # Errors
/// Returns an error if no daemon is running, IPC fails, or any action failed.
pub async fn set_context(name: &str, value: &str) -> Result<()> {
    require_daemon().await?;

    let response = ipc::send_request(Request::Context {
        name: name.to_string(),
        value: value.to_string(),
    })
    .await?;

    match response {
        Response::Context {
            changed,
            mutations,
            failures,
        } => {
            if !changed {
                println!("{} {}", name.bold(), "unchanged".dim());
            } else {
                println!(
                    "{} {} = {} ({} properties changed)",
                    "Set".success(),
                    name.bold(),
                    value.technical(),
                    mutations.to_string().stat()
                );
            }
            for failure in &failures {
                println!("  {} {}", "✗".error(), failure);
            }
            if failures.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("{} context action(s) failed", failures.len())
            }
        }
        Response::Error { message } => anyhow::bail!("Error: {message}"),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

/// Register a per-process group override
///
/// # Errors
/// Returns an error if no daemon is running or the daemon rejects the request.
pub async fn register_pid(
    pid: u32,
    group: String,
    property: Option<String>,
    method: String,
    pattern: String,
) -> Result<()> {
    info!("Registering pid {} → {}", pid, group);
    send_simple(Request::RegisterPid {
        pid,
        property,
        method,
        pattern,
        group,
    })
    .await
}

/// Remove a per-process group override
///
/// # Errors
/// Returns an error if no daemon is running or no such override exists.
pub async fn unregister_pid(
    pid: u32,
    property: Option<String>,
    method: String,
    pattern: String,
) -> Result<()> {
    send_simple(Request::UnregisterPid {
        pid,
        property,
        method,
        pattern,
    })
    .await
}

/// Route groups to a device type
///
/// # Errors
/// Returns an error if no daemon is running or no such device exists.
pub async fn route(
    target: String,
    group: Option<String>,
    class: DeviceClass,
    mode: Option<String>,
    hwid: Option<String>,
) -> Result<()> {
    send_simple(Request::Route {
        group,
        class: class.as_str().to_string(),
        target,
        mode,
        hwid,
    })
    .await
}

/// Cork or uncork a group
///
/// # Errors
/// Returns an error if no daemon is running or the group is unknown.
pub async fn cork(group: String, corked: bool) -> Result<()> {
    send_simple(Request::Cork { group, corked }).await
}

/// Set a volume limit
///
/// # Errors
/// Returns an error if no daemon is running or the group is unknown.
pub async fn volume_limit(percent: u32, group: Option<String>) -> Result<()> {
    if percent > 100 {
        anyhow::bail!("Volume limit must be between 0 and 100");
    }
    send_simple(Request::VolumeLimit { group, percent }).await
}

/// Locally mute or unmute a group
///
/// # Errors
/// Returns an error if no daemon is running or the group is unknown.
pub async fn mute(group: String, muted: bool) -> Result<()> {
    send_simple(Request::LocalMute { group, muted }).await
}

/// Record an explicit stream mute
///
/// # Errors
/// Returns an error if no daemon is running.
pub async fn stream_mute(kind: EntityKind, index: u32, muted: bool) -> Result<()> {
    send_simple(Request::StreamMuted { kind, index, muted }).await
}

/// Delete a policy group
///
/// # Errors
/// Returns an error if no daemon is running or the group is unknown.
pub async fn delete_group(group: String) -> Result<()> {
    send_simple(Request::DeleteGroup { group }).await
}

/// Announce a new entity
///
/// # Errors
/// Returns an error if no daemon is running.
pub async fn create(
    kind: EntityKind,
    index: u32,
    name: String,
    properties: Vec<(String, String)>,
) -> Result<()> {
    let properties: BTreeMap<String, String> = properties.into_iter().collect();
    send_simple(Request::EntityCreated {
        kind,
        index,
        name,
        properties,
    })
    .await
}

/// Announce removal of an entity
///
/// # Errors
/// Returns an error if no daemon is running or the entity is unknown.
pub async fn remove(kind: EntityKind, index: u32) -> Result<()> {
    send_simple(Request::EntityRemoved { kind, index }).await
}

/// Gracefully shutdown the daemon
///
/// # Errors
/// Returns an error if no daemon is running or IPC communication fails.
pub async fn shutdown() -> Result<()> {
    if !ipc::is_daemon_running().await {
        anyhow::bail!("Daemon is not running");
    }
    send_simple(Request::Shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m");
        assert_eq!(format_uptime(3600), "1h");
        assert_eq!(format_uptime(3 * 3600 + 5 * 60), "3h 5m");
    }

    #[test]
    fn test_classify_runs_against_default_rules() {
        let config = Config::from_toml(
            r#"
            [settings]
            default_group = "a"
            [[groups]]
            name = "a"
            "#,
        )
        .unwrap();
        classify(&config, EntityKind::SinkInput, "x", Vec::new(), true).unwrap();
    }
}
