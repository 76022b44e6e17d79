//! Configuration management
//!
//! Handles loading, parsing, and validating the TOML configuration file and
//! turning it into classifier rule tables, policy groups and context rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::actions::{DeviceActions, Notifier, Volume};
use crate::classify::{Classifier, DeviceClass, RuleFlags, StreamFlags, parse_flags};
use crate::context::{ContextEngine, PropertyValue};
use crate::engine::Engine;
use crate::entity::EntityKind;
use crate::error::Diagnostics;
use crate::group::{GroupFlags, GroupModel, GroupSpec, ZeroLimit};
use crate::matcher::MatchRule;

// ============================================================================
// Public Configuration Types
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub groups: Vec<GroupConfig>,
    pub devices: Vec<DeviceRuleConfig>,
    pub cards: Vec<CardRuleConfig>,
    pub streams: Vec<StreamRuleConfig>,
    pub context: Vec<ContextRuleConfig>,
}

/// Global settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: String,
    /// Group for streams no rule places
    pub default_group: String,
    /// Silent sink used for mute-by-route
    pub null_sink: Option<String>,
    pub zero_limit: ZeroLimit,
    pub notify_desktop: bool,
}

#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub name: String,
    pub flags: GroupFlags,
    /// Device type label of the initial sink
    pub sink: Option<String>,
    pub source: Option<String>,
    pub port: Option<String>,
    /// Volume limit in percent
    pub limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DeviceRuleConfig {
    pub class: DeviceClass,
    pub type_label: String,
    pub property: Option<String>,
    pub method: String,
    pub pattern: String,
    pub ports: Option<HashMap<String, String>>,
    pub flags: RuleFlags,
}

#[derive(Debug, Clone)]
pub struct CardRuleConfig {
    pub type_label: String,
    pub method: String,
    pub pattern: String,
    pub profile: Option<String>,
    pub flags: RuleFlags,
}

#[derive(Debug, Clone)]
pub struct StreamRuleConfig {
    pub property: Option<String>,
    pub method: String,
    pub pattern: String,
    pub client: Option<String>,
    pub uid: Option<u32>,
    pub exe: Option<String>,
    pub group: Option<String>,
    pub flags: StreamFlags,
}

#[derive(Debug, Clone)]
pub struct ContextRuleConfig {
    pub variable: String,
    pub method: String,
    pub value: String,
    pub actions: Vec<ContextActionConfig>,
}

#[derive(Debug, Clone)]
pub enum ContextActionConfig {
    SetProperty {
        object: EntityKind,
        method: String,
        name: String,
        property: String,
        value: PropertyValue,
    },
    DeleteProperty {
        object: EntityKind,
        method: String,
        name: String,
        property: String,
    },
}

// ============================================================================
// Config File Deserialization (TOML)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    settings: SettingsFile,
    #[serde(default)]
    groups: Vec<GroupFile>,
    #[serde(default)]
    devices: Vec<DeviceRuleFile>,
    #[serde(default)]
    cards: Vec<CardRuleFile>,
    #[serde(default)]
    streams: Vec<StreamRuleFile>,
    #[serde(default)]
    context: Vec<ContextRuleFile>,
}

#[derive(Debug, Deserialize)]
struct SettingsFile {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    default_group: Option<String>,
    #[serde(default)]
    null_sink: Option<String>,
    #[serde(default)]
    zero_limit: ZeroLimit,
    #[serde(default)]
    notify_desktop: bool,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    name: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    sink: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    port: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DeviceRuleFile {
    class: String,
    #[serde(rename = "type")]
    type_label: String,
    #[serde(default)]
    property: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    ports: Option<HashMap<String, String>>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CardRuleFile {
    #[serde(rename = "type")]
    type_label: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StreamRuleFile {
    #[serde(default)]
    property: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    uid: Option<u32>,
    #[serde(default)]
    exe: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ContextRuleFile {
    variable: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    actions: Vec<ContextActionFile>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum ContextActionFile {
    SetProperty {
        object: String,
        #[serde(default = "default_method")]
        method: String,
        name: String,
        property: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        copy: bool,
    },
    DeleteProperty {
        object: String,
        #[serde(default = "default_method")]
        method: String,
        name: String,
        property: String,
    },
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_method() -> String {
    "equals".to_string()
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_group: None,
            null_sink: None,
            zero_limit: ZeroLimit::default(),
            notify_desktop: false,
        }
    }
}

fn flags<F: bitflags::Flags>(names: &[String], what: &str) -> Result<F> {
    parse_flags(names).map_err(|name| anyhow::anyhow!("Unknown {what} flag '{name}'"))
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from the default XDG config path, creating a
    /// default file on first use
    ///
    /// # Errors
    /// Returns an error if the file cannot be created, read, parsed or validated.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            info!("Creating default config at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {config_path:?}"))?;

        Self::from_toml(&contents).with_context(|| format!("Invalid config: {config_path:?}"))
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config_file: ConfigFile = toml::from_str(contents).context("Failed to parse config")?;
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: ConfigFile) -> Result<Self> {
        if config_file.groups.is_empty() {
            anyhow::bail!(
                "No policy groups defined. Add at least one [[groups]] section to config."
            );
        }

        let default_group = match config_file.settings.default_group {
            Some(name) => name,
            None => anyhow::bail!("No default group. Set 'default_group' in [settings]"),
        };

        let settings = Settings {
            log_level: config_file.settings.log_level,
            default_group,
            null_sink: config_file.settings.null_sink,
            zero_limit: config_file.settings.zero_limit,
            notify_desktop: config_file.settings.notify_desktop,
        };

        let groups = config_file
            .groups
            .into_iter()
            .map(|g| {
                Ok(GroupConfig {
                    flags: flags(&g.flags, &format!("group '{}'", g.name))?,
                    name: g.name,
                    sink: g.sink,
                    source: g.source,
                    port: g.port,
                    limit: g.limit,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut devices = Vec::with_capacity(config_file.devices.len());
        for (i, d) in config_file.devices.into_iter().enumerate() {
            let class = d
                .class
                .parse()
                .map_err(|e: String| anyhow::anyhow!("Device rule {}: {e}", i + 1))?;
            devices.push(DeviceRuleConfig {
                class,
                flags: flags(&d.flags, &format!("device rule {}", i + 1))?,
                type_label: d.type_label,
                property: d.property,
                method: d.method,
                pattern: d.pattern,
                ports: d.ports,
            });
        }

        let cards = config_file
            .cards
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                Ok(CardRuleConfig {
                    flags: flags(&c.flags, &format!("card rule {}", i + 1))?,
                    type_label: c.type_label,
                    method: c.method,
                    pattern: c.pattern,
                    profile: c.profile,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let streams = config_file
            .streams
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                Ok(StreamRuleConfig {
                    flags: flags(&s.flags, &format!("stream rule {}", i + 1))?,
                    property: s.property,
                    method: s.method,
                    pattern: s.pattern,
                    client: s.client,
                    uid: s.uid,
                    exe: s.exe,
                    group: s.group,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut context = Vec::with_capacity(config_file.context.len());
        for c in config_file.context {
            let mut actions = Vec::with_capacity(c.actions.len());
            for a in c.actions {
                actions.push(Self::context_action(&c.variable, a)?);
            }
            context.push(ContextRuleConfig {
                variable: c.variable,
                method: c.method,
                value: c.value,
                actions,
            });
        }

        let config = Config {
            settings,
            groups,
            devices,
            cards,
            streams,
            context,
        };
        config.validate()?;
        Ok(config)
    }

    fn context_action(variable: &str, action: ContextActionFile) -> Result<ContextActionConfig> {
        let kind = |object: &str| {
            object
                .parse::<EntityKind>()
                .map_err(|e| anyhow::anyhow!("Context rule for '{variable}': {e}"))
        };

        Ok(match action {
            ContextActionFile::SetProperty {
                object,
                method,
                name,
                property,
                value,
                copy,
            } => {
                let value = match (value, copy) {
                    (_, true) => PropertyValue::CopyFromVariable,
                    (Some(v), false) => PropertyValue::Constant(v),
                    (None, false) => anyhow::bail!(
                        "Context rule for '{variable}': set-property '{property}' \
                         needs 'value' or 'copy = true'"
                    ),
                };
                ContextActionConfig::SetProperty {
                    object: kind(&object)?,
                    method,
                    name,
                    property,
                    value,
                }
            }
            ContextActionFile::DeleteProperty {
                object,
                method,
                name,
                property,
            } => ContextActionConfig::DeleteProperty {
                object: kind(&object)?,
                method,
                name,
                property,
            },
        })
    }

    fn validate(&self) -> Result<()> {
        match self.settings.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => anyhow::bail!(
                "Invalid log_level '{level}'. Must be: error, warn, info, debug, or trace"
            ),
        }

        let mut seen = HashSet::with_capacity(self.groups.len());
        for group in &self.groups {
            if !seen.insert(group.name.as_str()) {
                anyhow::bail!("Duplicate policy group: '{}'", group.name);
            }
            if let Some(limit) = group.limit
                && limit > 100
            {
                anyhow::bail!("Policy group '{}' limit {limit} exceeds 100%", group.name);
            }
        }

        if !seen.contains(self.settings.default_group.as_str()) {
            anyhow::bail!(
                "Default group '{}' is not defined. Available: [{}]",
                self.settings.default_group,
                self.group_names().join(", ")
            );
        }

        for (i, rule) in self.streams.iter().enumerate() {
            if let Some(group) = &rule.group
                && !seen.contains(group.as_str())
            {
                anyhow::bail!(
                    "Stream rule {} references unknown group '{}'. Available: [{}]",
                    i + 1,
                    group,
                    self.group_names().join(", ")
                );
            }
        }

        Ok(())
    }

    fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// Get the XDG config path
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined or created.
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("audio-policy");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {config_dir:?}"))?;
        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write config: {path:?}"))?;

        eprintln!("Created default config at: {path:?}");
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Edit the config file to describe your devices and groups");
        eprintln!("  2. Run 'audio-policy validate' to check your config");
        eprintln!("  3. Run 'audio-policy daemon' to start");
        eprintln!();

        Ok(())
    }

    // ========================================================================
    // Engine construction
    // ========================================================================

    /// Build the classifier rule tables. Malformed matchers are reported in
    /// the classifier's diagnostics.
    #[must_use]
    pub fn build_classifier(&self) -> Classifier {
        let mut classifier = Classifier::new(self.settings.default_group.as_str());

        for d in &self.devices {
            let matcher = MatchRule::parse(&d.method, &d.pattern, classifier.diagnostics_mut());
            classifier.add_device_rule(
                d.class,
                d.type_label.as_str(),
                d.property.as_deref(),
                matcher,
                d.ports.clone(),
                d.flags,
            );
        }

        for c in &self.cards {
            let matcher = MatchRule::parse(&c.method, &c.pattern, classifier.diagnostics_mut());
            classifier.add_card_rule(c.type_label.as_str(), matcher, c.profile.clone(), c.flags);
        }

        for (i, s) in self.streams.iter().enumerate() {
            let matcher = MatchRule::parse(&s.method, &s.pattern, classifier.diagnostics_mut());
            if classifier
                .add_stream_rule(
                    s.property.as_deref(),
                    matcher,
                    s.client.as_deref(),
                    s.uid,
                    s.exe.as_deref(),
                    s.group.as_deref(),
                    s.flags,
                )
                .is_err()
            {
                debug!("Stream rule {} skipped", i + 1);
            }
        }

        classifier
    }

    #[must_use]
    pub fn build_groups(&self) -> GroupModel {
        let mut model = GroupModel::new(
            self.settings.default_group.as_str(),
            self.settings.null_sink.clone(),
            self.settings.zero_limit,
        );
        for g in &self.groups {
            model.add_group(GroupSpec {
                name: g.name.clone(),
                flags: g.flags,
                sink_type: g.sink.clone(),
                source_type: g.source.clone(),
                port: g.port.clone(),
                limit: g.limit.map(Volume::from_percent),
            });
        }
        model
    }

    pub fn build_context(&self, diags: &mut Diagnostics) -> ContextEngine {
        let mut engine = ContextEngine::new();
        for rule in &self.context {
            let matcher = MatchRule::parse(&rule.method, &rule.value, diags);
            let handle = engine.add_variable_rule(&rule.variable, matcher);
            for action in &rule.actions {
                match action {
                    ContextActionConfig::SetProperty {
                        object,
                        method,
                        name,
                        property,
                        value,
                    } => {
                        let matcher = MatchRule::parse(method, name, diags);
                        engine.add_set_property_action(
                            handle,
                            *object,
                            matcher,
                            property.as_str(),
                            value.clone(),
                        );
                    }
                    ContextActionConfig::DeleteProperty {
                        object,
                        method,
                        name,
                        property,
                    } => {
                        let matcher = MatchRule::parse(method, name, diags);
                        engine.add_delete_property_action(
                            handle,
                            *object,
                            matcher,
                            property.as_str(),
                        );
                    }
                }
            }
        }
        engine
    }

    /// Assemble a ready engine around the given executors
    #[must_use]
    pub fn build_engine(
        &self,
        actions: Box<dyn DeviceActions + Send>,
        notifier: Box<dyn Notifier + Send>,
    ) -> Engine {
        let mut classifier = self.build_classifier();
        let context = self.build_context(classifier.diagnostics_mut());
        Engine::new(classifier, self.build_groups(), context, actions, notifier)
    }

    /// Every malformed-matcher diagnostic the configuration would produce
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let mut classifier = self.build_classifier();
        self.build_context(classifier.diagnostics_mut());
        classifier.diagnostics().clone()
    }

    /// Print a human-readable summary of the configuration
    pub fn print_summary(&self) {
        println!("✓ Configuration valid\n");

        println!("Settings:");
        println!("  log_level: {}", self.settings.log_level);
        println!("  default_group: {}", self.settings.default_group);
        println!(
            "  null_sink: {}",
            self.settings.null_sink.as_deref().unwrap_or("(none)")
        );
        println!("  zero_limit: {:?}", self.settings.zero_limit);
        println!("  notify_desktop: {}", self.settings.notify_desktop);

        println!("\nGroups ({}):", self.groups.len());
        for (i, group) in self.groups.iter().enumerate() {
            let marker = if group.name == self.settings.default_group {
                " [DEFAULT]"
            } else {
                ""
            };
            println!("  {}. {}{}", i + 1, group.name, marker);
            let names: Vec<_> = group.flags.iter_names().map(|(n, _)| n.to_lowercase()).collect();
            if !names.is_empty() {
                println!("     flags: {}", names.join(", "));
            }
            if let Some(ref sink) = group.sink {
                println!("     sink: {sink}");
            }
            if let Some(ref source) = group.source {
                println!("     source: {source}");
            }
            if let Some(limit) = group.limit {
                println!("     limit: {limit}%");
            }
        }

        println!(
            "\nRules: {} device, {} card, {} stream, {} context",
            self.devices.len(),
            self.cards.len(),
            self.streams.len(),
            self.context.len()
        );

        if let Ok(path) = Self::get_config_path() {
            println!("\nConfig: {path:?}");
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# audio-policy configuration
#
# Streams are sorted into policy groups; groups decide routing, volume
# limits, corking and muting. Devices and cards are tagged with type labels.

[settings]
log_level = "info"          # error, warn, info, debug, trace
default_group = "othermedia"
null_sink = "sink.null"     # silent sink used when a group is muted by route
zero_limit = "keep"         # keep: 0% only reroutes; store: also stores 0%
notify_desktop = false      # desktop notifications for device changes

# Policy groups
# flags: set_sink, set_source, route_audio, limit_volume, cork_stream,
#        media_notify, mute_by_route

[[groups]]
name = "othermedia"
flags = ["set_sink", "set_source", "route_audio", "limit_volume"]
sink = "ihf"

[[groups]]
name = "player"
flags = ["set_sink", "route_audio", "limit_volume", "cork_stream", "media_notify", "mute_by_route"]
sink = "ihf"

[[groups]]
name = "ringtone"
flags = ["set_sink", "route_audio"]
sink = "ihf"

# Device rules
# method: equals, startswith, matches (whole-string regex), true
# flags: disable_notify, refresh_always, delayed_port

[[devices]]
class = "sink"
type = "ihf"
method = "startswith"
pattern = "alsa_output"

[[devices]]
class = "sink"
type = "headset"
method = "startswith"
pattern = "bluez_sink"

[[devices]]
class = "sink"
type = "null"
pattern = "sink.null"
flags = ["disable_notify"]

# Stream rules (first match wins)
# flags: local_route, local_mute, local_volmax

[[streams]]
property = "application.name"
method = "matches"
pattern = "(?:mpv|vlc|rhythmbox)"
group = "player"

[[streams]]
property = "media.role"
pattern = "phone"
group = "ringtone"
flags = ["local_mute"]

# Context rules
#
# [[context]]
# variable = "active_profile"
# value = "car"
#
# [[context.actions]]
# action = "set-property"
# object = "card"
# name = "pci-card0"
# property = "audio.mode"
# value = "car"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.settings.default_group, "othermedia");
        assert_eq!(config.groups.len(), 3);
        assert!(config.diagnostics().is_empty());

        let groups = config.build_groups();
        assert!(groups.group("player").unwrap().flags.contains(GroupFlags::MUTE_BY_ROUTE));
    }

    #[test]
    fn test_copy_action_needs_no_value() {
        let config = Config::from_toml(
            r#"
            [settings]
            default_group = "a"
            [[groups]]
            name = "a"
            [[context]]
            variable = "profile"
            method = "true"
            [[context.actions]]
            action = "set-property"
            object = "sink"
            method = "true"
            name = ""
            property = "profile"
            copy = true
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.context[0].actions[0],
            ContextActionConfig::SetProperty {
                value: PropertyValue::CopyFromVariable,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let err = Config::from_toml(
            r#"
            [settings]
            default_group = "a"
            [[groups]]
            name = "a"
            flags = ["route_everything"]
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("route_everything"));
    }
}
