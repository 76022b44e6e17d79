//! Integration tests for config loading and validation
//!
//! These tests go through TOML files on disk rather than constructing
//! Config structs directly.

use std::fs;
use tempfile::TempDir;

use audio_policy::config::{Config, ContextActionConfig};
use audio_policy::context::PropertyValue;
use audio_policy::entity::EntityKind;
use audio_policy::group::{GroupFlags, ZeroLimit};

fn setup_temp_config() -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_dir = temp_dir.path().join("audio-policy");
    fs::create_dir_all(&config_dir).expect("Failed to create config dir");
    let config_path = config_dir.join("config.toml");
    (temp_dir, config_path)
}

fn load(contents: &str) -> anyhow::Result<Config> {
    let (_temp, config_path) = setup_temp_config();
    fs::write(&config_path, contents).expect("Failed to write TOML");
    Config::load_from_path(&config_path)
}

fn load_err(contents: &str) -> String {
    format!("{:#}", load(contents).expect_err("config should be rejected"))
}

#[test]
fn test_full_config_loads() {
    let loaded = load(
        r#"
[settings]
log_level = "debug"
default_group = "othermedia"
null_sink = "sink.null"
zero_limit = "store"
notify_desktop = true

[[groups]]
name = "othermedia"
flags = ["set_sink", "route_audio", "limit_volume"]
sink = "ihf"
limit = 80

[[groups]]
name = "navigator"
flags = ["set-sink", "mute-by-route"]
sink = "ihf"
port = "speaker"

[[devices]]
class = "sink"
type = "ihf"
method = "startswith"
pattern = "alsa_output"
ports = { "alsa_output.0" = "analog-output-speaker" }

[[devices]]
class = "source"
type = "mic"
property = "device.form_factor"
pattern = "microphone"
flags = ["disable_notify"]

[[cards]]
type = "bt"
method = "startswith"
pattern = "bluez_card"
profile = "a2dp_sink"

[[streams]]
property = "media.role"
pattern = "navigation"
group = "navigator"
flags = ["local_route"]

[[streams]]
uid = 1000
exe = "/usr/bin/mpv"

[[context]]
variable = "active_profile"
value = "car"

[[context.actions]]
action = "set-property"
object = "card"
name = "pci-card0"
property = "audio.mode"
copy = true

[[context.actions]]
action = "delete-property"
object = "sink"
method = "startswith"
name = "alsa"
property = "audio.mode"
"#,
    )
    .expect("Failed to load config");

    assert_eq!(loaded.settings.log_level, "debug");
    assert_eq!(loaded.settings.default_group, "othermedia");
    assert_eq!(loaded.settings.null_sink.as_deref(), Some("sink.null"));
    assert_eq!(loaded.settings.zero_limit, ZeroLimit::Store);
    assert!(loaded.settings.notify_desktop);

    assert_eq!(loaded.groups.len(), 2);
    assert_eq!(loaded.groups[0].limit, Some(80));
    assert!(loaded.groups[1].flags.contains(GroupFlags::MUTE_BY_ROUTE));
    assert_eq!(loaded.groups[1].port.as_deref(), Some("speaker"));

    assert_eq!(loaded.devices.len(), 2);
    assert_eq!(loaded.devices[1].property.as_deref(), Some("device.form_factor"));
    assert_eq!(loaded.devices[1].method, "equals");
    assert_eq!(loaded.cards[0].profile.as_deref(), Some("a2dp_sink"));
    assert_eq!(loaded.streams[1].group, None);

    assert_eq!(loaded.context.len(), 1);
    let actions = &loaded.context[0].actions;
    assert_eq!(actions.len(), 2);
    match &actions[0] {
        ContextActionConfig::SetProperty { object, value, .. } => {
            assert_eq!(*object, EntityKind::Card);
            assert_eq!(*value, PropertyValue::CopyFromVariable);
        }
        ContextActionConfig::DeleteProperty { .. } => panic!("expected set-property"),
    }
    assert!(matches!(
        &actions[1],
        ContextActionConfig::DeleteProperty { object: EntityKind::Sink, .. }
    ));

    assert!(loaded.diagnostics().is_empty());
}

#[test]
fn test_defaults_applied() {
    let loaded = load(
        r#"
[settings]
default_group = "a"

[[groups]]
name = "a"
"#,
    )
    .unwrap();
    assert_eq!(loaded.settings.log_level, "info");
    assert_eq!(loaded.settings.zero_limit, ZeroLimit::Keep);
    assert!(!loaded.settings.notify_desktop);
    assert!(loaded.groups[0].flags.is_empty());
}

#[test]
fn test_missing_file_is_an_error() {
    let (_temp, config_path) = setup_temp_config();
    assert!(Config::load_from_path(&config_path).is_err());
}

#[test]
fn test_malformed_toml_rejected() {
    let err = load_err("[settings\ndefault_group = 1");
    assert!(err.contains("parse"), "{err}");
}

#[test]
fn test_no_groups_rejected() {
    let err = load_err("[settings]\ndefault_group = \"a\"\n");
    assert!(err.contains("No policy groups"), "{err}");
}

#[test]
fn test_missing_default_group_rejected() {
    let err = load_err("[[groups]]\nname = \"a\"\n");
    assert!(err.contains("default group"), "{err}");
}

#[test]
fn test_undefined_default_group_rejected() {
    let err = load_err("[settings]\ndefault_group = \"b\"\n[[groups]]\nname = \"a\"\n");
    assert!(err.contains("'b' is not defined"), "{err}");
}

#[test]
fn test_duplicate_group_rejected() {
    let err = load_err(
        "[settings]\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\n[[groups]]\nname = \"a\"\n",
    );
    assert!(err.contains("Duplicate"), "{err}");
}

#[test]
fn test_limit_over_100_rejected() {
    let err =
        load_err("[settings]\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\nlimit = 101\n");
    assert!(err.contains("exceeds 100%"), "{err}");
}

#[test]
fn test_invalid_log_level_rejected() {
    let err = load_err(
        "[settings]\nlog_level = \"loud\"\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\n",
    );
    assert!(err.contains("Invalid log_level"), "{err}");
}

#[test]
fn test_unknown_flag_rejected() {
    let err = load_err(
        "[settings]\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\nflags = [\"fly\"]\n",
    );
    assert!(err.contains("Unknown group 'a' flag 'fly'"), "{err}");
}

#[test]
fn test_unknown_device_class_rejected() {
    let err = load_err(
        "[settings]\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\n\
         [[devices]]\nclass = \"card\"\ntype = \"x\"\n",
    );
    assert!(err.contains("Device rule 1"), "{err}");
}

#[test]
fn test_stream_rule_unknown_group_rejected() {
    let err = load_err(
        "[settings]\ndefault_group = \"a\"\n[[groups]]\nname = \"a\"\n\
         [[streams]]\npattern = \"x\"\ngroup = \"zz\"\n",
    );
    assert!(err.contains("unknown group 'zz'"), "{err}");
}

#[test]
fn test_set_property_needs_value() {
    let err = load_err(
        r#"
[settings]
default_group = "a"
[[groups]]
name = "a"
[[context]]
variable = "v"
[[context.actions]]
action = "set-property"
object = "card"
name = "c"
property = "p"
"#,
    );
    assert!(err.contains("needs 'value'"), "{err}");
}

#[test]
fn test_bad_regex_degrades_not_rejects() {
    let loaded = load(
        r#"
[settings]
default_group = "a"
[[groups]]
name = "a"
[[streams]]
property = "media.role"
method = "matches"
pattern = "("
"#,
    )
    .unwrap();
    assert_eq!(loaded.diagnostics().len(), 1);
}
