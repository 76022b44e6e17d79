//! Rule-based classification of devices, cards and streams
//!
//! Device and card rules assign type labels (`"ihf"`, `"headset"`, ...) that
//! groups and context actions refer to. Stream rules pick the policy group a
//! new stream joins. A per-process override table, filled at runtime by an
//! external controller, is always consulted before the static stream rules.

use bitflags::bitflags;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::entity::{
    Attributes, PROP_CLIENT_NAME, PROP_PROCESS_BINARY, PROP_PROCESS_ID, PROP_PROCESS_UID,
};
use crate::error::{ConfigError, Diagnostics};
use crate::matcher::MatchRule;

bitflags! {
    /// Flags carried by device and card rules
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RuleFlags: u32 {
        /// Do not announce connect/disconnect of devices with this label
        const DISABLE_NOTIFY = 1 << 0;
        /// Re-apply routing even if the target did not change
        const REFRESH_ALWAYS = 1 << 1;
        /// Switch ports only after streams have moved
        const DELAYED_PORT = 1 << 2;
    }
}

bitflags! {
    /// Flags a stream rule attaches to the streams it classifies
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamFlags: u32 {
        /// Stream picks its own route; mute-by-route does not apply and the group port is forced
        const LOCAL_ROUTE = 1 << 0;
        /// Stream mutes every other group routed to the same device while alive
        const LOCAL_MUTE = 1 << 1;
        /// Stream is exempt from group volume limits
        const LOCAL_VOLMAX = 1 << 2;
    }
}

/// Parse flag names such as `"disable_notify"` or `"local-route"`.
///
/// # Errors
/// Returns the first unknown flag name.
pub fn parse_flags<F: bitflags::Flags>(names: &[String]) -> Result<F, String> {
    names.iter().try_fold(F::empty(), |acc, name| {
        let key = name.trim().to_uppercase().replace('-', "_");
        F::from_name(&key)
            .map(|flag| acc.union(flag))
            .ok_or_else(|| name.clone())
    })
}

/// Which side of the audio graph a device rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Sink,
    Source,
}

impl DeviceClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sink => "sink",
            Self::Source => "source",
        }
    }
}

impl std::str::FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sink" => Ok(Self::Sink),
            "source" => Ok(Self::Source),
            other => Err(format!("unknown device class '{other}' (expected sink or source)")),
        }
    }
}

/// Data attached to a device type label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceData {
    /// Device name → port to activate when routing to that device
    pub ports: Option<HashMap<String, String>>,
    pub flags: RuleFlags,
}

impl DeviceData {
    #[must_use]
    pub fn port_for(&self, device_name: &str) -> Option<&str> {
        self.ports
            .as_ref()
            .and_then(|p| p.get(device_name))
            .map(String::as_str)
    }
}

/// Data attached to a card type label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardData {
    pub required_profile: Option<String>,
    pub flags: RuleFlags,
}

#[derive(Debug, Clone)]
pub struct DeviceRule {
    pub type_label: String,
    pub property: String,
    pub matcher: MatchRule,
    pub data: DeviceData,
}

#[derive(Debug, Clone)]
pub struct CardRule {
    pub type_label: String,
    pub property: String,
    pub matcher: MatchRule,
    pub data: CardData,
}

#[derive(Debug, Clone)]
pub struct StreamRule {
    pub property: Option<String>,
    pub matcher: MatchRule,
    pub client_name: Option<String>,
    pub uid: Option<u32>,
    pub exe: Option<String>,
    pub group: String,
    pub flags: StreamFlags,
}

impl StreamRule {
    fn matches(&self, stream: &StreamIdentity<'_>, attrs: &dyn Attributes) -> bool {
        if let Some(property) = &self.property
            && !self.matcher.matches(attrs.attribute(property))
        {
            return false;
        }
        if let Some(client) = &self.client_name
            && stream.client_name != Some(client.as_str())
        {
            return false;
        }
        if let Some(uid) = self.uid
            && stream.uid != Some(uid)
        {
            return false;
        }
        if let Some(exe) = &self.exe
            && stream.exe != Some(exe.as_str())
        {
            return false;
        }
        true
    }
}

/// Runtime group assignment for one process
#[derive(Debug, Clone)]
pub struct PidOverride {
    pub property: Option<String>,
    pub matcher: MatchRule,
    pub group: String,
}

impl PidOverride {
    fn matches(&self, attrs: &dyn Attributes) -> bool {
        match &self.property {
            Some(property) => self.matcher.matches(attrs.attribute(property)),
            None => true,
        }
    }

    fn same_selector(&self, property: Option<&str>, matcher: &MatchRule) -> bool {
        self.property.as_deref() == property && &self.matcher == matcher
    }
}

/// Owner process details of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamIdentity<'a> {
    pub pid: Option<u32>,
    pub client_name: Option<&'a str>,
    pub uid: Option<u32>,
    pub exe: Option<&'a str>,
}

impl<'a> StreamIdentity<'a> {
    /// Read the identity from the well-known stream properties
    pub fn from_attributes(attrs: &'a dyn Attributes) -> Self {
        Self {
            pid: attrs
                .attribute(PROP_PROCESS_ID)
                .and_then(|v| v.parse().ok()),
            client_name: attrs.attribute(PROP_CLIENT_NAME),
            uid: attrs
                .attribute(PROP_PROCESS_UID)
                .and_then(|v| v.parse().ok()),
            exe: attrs.attribute(PROP_PROCESS_BINARY),
        }
    }
}

/// Group lookup result for a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamClass {
    pub group: String,
    pub flags: StreamFlags,
}

/// Ordered rule tables plus the per-process override table
#[derive(Debug, Clone)]
pub struct Classifier {
    sinks: Vec<DeviceRule>,
    sources: Vec<DeviceRule>,
    cards: Vec<CardRule>,
    streams: Vec<StreamRule>,
    pids: HashMap<u32, Vec<PidOverride>>,
    default_group: String,
    diagnostics: Diagnostics,
}

impl Classifier {
    #[must_use]
    pub fn new(default_group: impl Into<String>) -> Self {
        Self {
            sinks: Vec::new(),
            sources: Vec::new(),
            cards: Vec::new(),
            streams: Vec::new(),
            pids: HashMap::new(),
            default_group: default_group.into(),
            diagnostics: Diagnostics::new(),
        }
    }

    #[must_use]
    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    /// Problems found while building rules
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    fn device_rules(&self, class: DeviceClass) -> &[DeviceRule] {
        match class {
            DeviceClass::Sink => &self.sinks,
            DeviceClass::Source => &self.sources,
        }
    }

    #[must_use]
    pub fn device_rule_count(&self, class: DeviceClass) -> usize {
        self.device_rules(class).len()
    }

    #[must_use]
    pub fn card_rule_count(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn stream_rule_count(&self) -> usize {
        self.streams.len()
    }

    /// Append a device rule. Duplicate labels are kept and all evaluated.
    pub fn add_device_rule(
        &mut self,
        class: DeviceClass,
        type_label: impl Into<String>,
        property: Option<&str>,
        matcher: MatchRule,
        ports: Option<HashMap<String, String>>,
        flags: RuleFlags,
    ) {
        let rule = DeviceRule {
            type_label: type_label.into(),
            property: property.unwrap_or("name").to_string(),
            matcher,
            data: DeviceData { ports, flags },
        };
        debug!(
            "Add {} rule: type={} {}={}",
            class.as_str(),
            rule.type_label,
            rule.property,
            rule.matcher
        );
        match class {
            DeviceClass::Sink => self.sinks.push(rule),
            DeviceClass::Source => self.sources.push(rule),
        }
    }

    pub fn add_card_rule(
        &mut self,
        type_label: impl Into<String>,
        matcher: MatchRule,
        required_profile: Option<String>,
        flags: RuleFlags,
    ) {
        let rule = CardRule {
            type_label: type_label.into(),
            property: "name".to_string(),
            matcher,
            data: CardData {
                required_profile,
                flags,
            },
        };
        debug!("Add card rule: type={} name={}", rule.type_label, rule.matcher);
        self.cards.push(rule);
    }

    /// Append a stream rule.
    ///
    /// A rule with no property, uid or exe needs an explicit group; without one
    /// it is rejected and reported. Other rules without a group fall back to the
    /// default group.
    ///
    /// # Errors
    /// Returns [`ConfigError::IncompleteStreamRule`] for the rejected form.
    #[allow(clippy::too_many_arguments)]
    pub fn add_stream_rule(
        &mut self,
        property: Option<&str>,
        matcher: MatchRule,
        client_name: Option<&str>,
        uid: Option<u32>,
        exe: Option<&str>,
        group: Option<&str>,
        flags: StreamFlags,
    ) -> Result<(), ConfigError> {
        if property.is_none() && uid.is_none() && exe.is_none() && group.is_none() {
            self.diagnostics.push(ConfigError::IncompleteStreamRule);
            return Err(ConfigError::IncompleteStreamRule);
        }

        let rule = StreamRule {
            property: property.map(String::from),
            matcher,
            client_name: client_name.map(String::from),
            uid,
            exe: exe.map(String::from),
            group: group.unwrap_or(self.default_group.as_str()).to_string(),
            flags,
        };
        debug!(
            "Add stream rule: {}={} client={:?} uid={:?} exe={:?} → {}",
            rule.property.as_deref().unwrap_or("-"),
            rule.matcher,
            rule.client_name,
            rule.uid,
            rule.exe,
            rule.group
        );
        self.streams.push(rule);
        Ok(())
    }

    /// Labels of every rule that matches `attrs` and whose flags satisfy
    /// `flags & mask == value`, in rule order
    #[must_use]
    pub fn device_labels(
        &self,
        class: DeviceClass,
        attrs: &dyn Attributes,
        mask: RuleFlags,
        value: RuleFlags,
    ) -> Vec<String> {
        self.device_rules(class)
            .iter()
            .filter(|r| (r.data.flags & mask) == value)
            .filter(|r| r.matcher.matches(attrs.attribute(&r.property)))
            .map(|r| r.type_label.clone())
            .collect()
    }

    /// Space separated classification string, empty if nothing matched
    #[must_use]
    pub fn classify_device(
        &self,
        class: DeviceClass,
        attrs: &dyn Attributes,
        mask: RuleFlags,
        value: RuleFlags,
    ) -> String {
        self.device_labels(class, attrs, mask, value).join(" ")
    }

    /// First rule for `type_label` whose predicate accepts `attrs`, regardless of flags
    #[must_use]
    pub fn is_device_type(
        &self,
        class: DeviceClass,
        attrs: &dyn Attributes,
        type_label: &str,
    ) -> Option<&DeviceData> {
        self.device_rules(class)
            .iter()
            .filter(|r| r.type_label == type_label)
            .find(|r| r.matcher.matches(attrs.attribute(&r.property)))
            .map(|r| &r.data)
    }

    #[must_use]
    pub fn card_labels(
        &self,
        attrs: &dyn Attributes,
        profiles: &[&str],
        mask: RuleFlags,
        value: RuleFlags,
    ) -> Vec<String> {
        self.cards
            .iter()
            .filter(|r| (r.data.flags & mask) == value)
            .filter(|r| {
                r.data
                    .required_profile
                    .as_deref()
                    .is_none_or(|p| profiles.contains(&p))
            })
            .filter(|r| r.matcher.matches(attrs.attribute(&r.property)))
            .map(|r| r.type_label.clone())
            .collect()
    }

    /// Like [`Classifier::classify_device`], but a rule with a required profile
    /// only matches cards that support it
    #[must_use]
    pub fn classify_card(
        &self,
        attrs: &dyn Attributes,
        profiles: &[&str],
        mask: RuleFlags,
        value: RuleFlags,
    ) -> String {
        self.card_labels(attrs, profiles, mask, value).join(" ")
    }

    #[must_use]
    pub fn is_card_type(&self, attrs: &dyn Attributes, type_label: &str) -> Option<&CardData> {
        self.cards
            .iter()
            .filter(|r| r.type_label == type_label)
            .find(|r| r.matcher.matches(attrs.attribute(&r.property)))
            .map(|r| &r.data)
    }

    /// Pick the group for a stream.
    ///
    /// Runtime overrides for the owning process win over the static rules;
    /// with no match at all the stream lands in the default group.
    #[must_use]
    pub fn find_group_for_stream(
        &self,
        stream: &StreamIdentity<'_>,
        attrs: &dyn Attributes,
    ) -> StreamClass {
        if let Some(pid) = stream.pid
            && let Some(overrides) = self.pids.get(&pid)
            && let Some(hit) = overrides.iter().find(|o| o.matches(attrs))
        {
            debug!("Stream of pid {} → {} (override)", pid, hit.group);
            return StreamClass {
                group: hit.group.clone(),
                flags: StreamFlags::empty(),
            };
        }

        if let Some(rule) = self.streams.iter().find(|r| r.matches(stream, attrs)) {
            return StreamClass {
                group: rule.group.clone(),
                flags: rule.flags,
            };
        }

        StreamClass {
            group: self.default_group.clone(),
            flags: StreamFlags::empty(),
        }
    }

    /// Add or update a runtime override for `pid`.
    ///
    /// Entries are keyed by `(pid, property, method, argument)`; registering
    /// the same selector again only replaces its group.
    pub fn register_pid(
        &mut self,
        pid: u32,
        property: Option<&str>,
        matcher: MatchRule,
        group: impl Into<String>,
    ) {
        let group = group.into();
        let overrides = self.pids.entry(pid).or_default();

        if let Some(existing) = overrides
            .iter_mut()
            .find(|o| o.same_selector(property, &matcher))
        {
            info!(
                "Pid {} override {} group {} → {}",
                pid, existing.matcher, existing.group, group
            );
            existing.group = group;
            return;
        }

        info!("Pid {} override {} → {}", pid, matcher, group);
        overrides.push(PidOverride {
            property: property.map(String::from),
            matcher,
            group,
        });
    }

    /// Remove a runtime override. Returns `false` if no such entry existed.
    pub fn unregister_pid(
        &mut self,
        pid: u32,
        property: Option<&str>,
        matcher: &MatchRule,
    ) -> bool {
        let Some(overrides) = self.pids.get_mut(&pid) else {
            warn!("Pid {} has no overrides to remove", pid);
            return false;
        };

        let before = overrides.len();
        overrides.retain(|o| !o.same_selector(property, matcher));
        let removed = overrides.len() < before;
        if overrides.is_empty() {
            self.pids.remove(&pid);
        }

        if removed {
            info!("Pid {} override {} removed", pid, matcher);
        } else {
            warn!("Pid {} has no override {}", pid, matcher);
        }
        removed
    }

    /// Number of runtime overrides currently registered
    #[must_use]
    pub fn pid_override_count(&self) -> usize {
        self.pids.values().map(Vec::len).sum()
    }
}
