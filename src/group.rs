//! Policy groups
//!
//! Every live stream belongs to exactly one named group. The group decides
//! where its streams are routed, how loud they may be, and whether they are
//! muted or corked. Groups are created from configuration; a stream the
//! classifier cannot place joins the default group.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::actions::{DeviceActions, MediaKind, Notifier, Volume};
use crate::classify::{Classifier, DeviceClass, StreamFlags};
use crate::entity::{
    EntityHandle, EntityKind, PROP_POLICY_GROUP, PROP_POLICY_HWID, PROP_POLICY_MODE, Registry,
};

bitflags! {
    /// Behaviour switches of a policy group
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GroupFlags: u32 {
        /// Follows sink route commands addressed to all groups
        const SET_SINK = 1 << 0;
        /// Follows source route commands addressed to all groups
        const SET_SOURCE = 1 << 1;
        /// Streams are moved to the group's device
        const ROUTE_AUDIO = 1 << 2;
        /// The group's volume limit is applied to its streams
        const LIMIT_VOLUME = 1 << 3;
        /// New streams are corked while the group is corked
        const CORK_STREAM = 1 << 4;
        /// Announce when the group becomes active or idle
        const MEDIA_NOTIFY = 1 << 5;
        /// A zero volume limit reroutes streams to the null sink
        const MUTE_BY_ROUTE = 1 << 6;
    }
}

/// What a zero percent limit does to the stored limit of a mute-by-route group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroLimit {
    /// Only reroute; the previous limit stays stored
    #[default]
    Keep,
    /// Reroute and store the zero limit
    Store,
}

/// Collaborators a group operation works through
pub struct Dispatch<'a> {
    pub registry: &'a mut Registry,
    pub classifier: &'a Classifier,
    pub actions: &'a mut dyn DeviceActions,
    pub notifier: &'a mut dyn Notifier,
}

impl Dispatch<'_> {
    fn route(&mut self, stream: EntityHandle, target: EntityHandle) {
        let (Some(s), Some(t)) = (self.registry.get(stream), self.registry.get(target)) else {
            debug!("Route skipped: stream or target no longer exists");
            return;
        };
        if let Err(e) = self.actions.set_route(s, t) {
            warn!("Failed to route {} #{} to '{}': {:#}", s.kind, s.index, t.name, e);
        }
    }

    fn port(&mut self, device: EntityHandle, port: &str) {
        let Some(d) = self.registry.get(device) else {
            return;
        };
        if let Err(e) = self.actions.set_port(d, port) {
            warn!("Failed to set port {} on '{}': {:#}", port, d.name, e);
        }
    }

    fn volume(&mut self, stream: EntityHandle, volume: Volume) {
        let Some(s) = self.registry.get(stream) else {
            return;
        };
        if let Err(e) = self.actions.set_volume_factor(s, volume) {
            warn!("Failed to limit {} #{}: {:#}", s.kind, s.index, e);
        }
    }

    fn mute(&mut self, stream: EntityHandle, muted: bool) {
        let Some(s) = self.registry.get(stream) else {
            return;
        };
        if let Err(e) = self.actions.set_mute(s, muted) {
            warn!("Failed to (un)mute {} #{}: {:#}", s.kind, s.index, e);
        }
    }

    fn cork(&mut self, stream: EntityHandle, corked: bool) {
        let Some(s) = self.registry.get(stream) else {
            return;
        };
        if let Err(e) = self.actions.cork(s, corked) {
            warn!("Failed to (un)cork {} #{}: {:#}", s.kind, s.index, e);
        }
    }
}

/// A device a group routes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub handle: EntityHandle,
    pub name: String,
}

/// A stream inside a group
#[derive(Debug, Clone)]
pub struct Member {
    pub handle: EntityHandle,
    pub kind: EntityKind,
    pub index: u32,
    pub flags: StreamFlags,
    /// Muted by its owner, independent of group policy
    pub muted: bool,
    /// Was muted already when local mute engaged; stays muted when it lifts
    pub marked: bool,
    /// Groups this `local_mute` stream muted on arrival
    pub imposed: Vec<String>,
}

/// Static description of a group, as configured
#[derive(Debug, Clone, Default)]
pub struct GroupSpec {
    pub name: String,
    pub flags: GroupFlags,
    /// Sink type label the group routes to once such a sink appears
    pub sink_type: Option<String>,
    pub source_type: Option<String>,
    pub port: Option<String>,
    pub limit: Option<Volume>,
}

#[derive(Debug, Clone)]
pub struct PolicyGroup {
    pub name: String,
    pub flags: GroupFlags,
    pub sink_type: Option<String>,
    pub source_type: Option<String>,
    pub port: Option<String>,
    sink: Option<Target>,
    source: Option<Target>,
    limit: Volume,
    /// Muted by an explicit `set_local_mute`
    operator_muted: bool,
    /// Live `local_mute` streams holding this group muted
    mute_holders: usize,
    corked: bool,
    muted_by_route: bool,
    members: Vec<Member>,
}

impl PolicyGroup {
    fn from_spec(spec: GroupSpec) -> Self {
        Self {
            name: spec.name,
            flags: spec.flags,
            sink_type: spec.sink_type,
            source_type: spec.source_type,
            port: spec.port,
            sink: None,
            source: None,
            limit: spec.limit.unwrap_or(Volume::NORM),
            operator_muted: false,
            mute_holders: 0,
            corked: false,
            muted_by_route: false,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn sink(&self) -> Option<&Target> {
        self.sink.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&Target> {
        self.source.as_ref()
    }

    #[must_use]
    pub fn limit(&self) -> Volume {
        self.limit
    }

    #[must_use]
    pub fn locally_muted(&self) -> bool {
        self.operator_muted || self.mute_holders > 0
    }

    #[must_use]
    pub fn corked(&self) -> bool {
        self.corked
    }

    #[must_use]
    pub fn muted_by_route(&self) -> bool {
        self.muted_by_route
    }

    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn target(&self, class: DeviceClass) -> Option<&Target> {
        match class {
            DeviceClass::Sink => self.sink.as_ref(),
            DeviceClass::Source => self.source.as_ref(),
        }
    }

    fn set_target(&mut self, class: DeviceClass, target: Option<Target>) {
        match class {
            DeviceClass::Sink => self.sink = target,
            DeviceClass::Source => self.source = target,
        }
    }

    /// Members travelling over `class` that follow the group route
    fn routed_members(&self, class: DeviceClass) -> Vec<EntityHandle> {
        let kind = stream_kind(class);
        self.members
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.handle)
            .collect()
    }

    /// Playback members subject to mute-by-route
    fn reroutable_members(&self) -> Vec<EntityHandle> {
        self.members
            .iter()
            .filter(|m| {
                m.kind == EntityKind::SinkInput && !m.flags.contains(StreamFlags::LOCAL_ROUTE)
            })
            .map(|m| m.handle)
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            name: self.name.clone(),
            flags: self
                .flags
                .iter_names()
                .map(|(name, _)| name.to_lowercase())
                .collect(),
            sink: self.sink.as_ref().map(|t| t.name.clone()),
            source: self.source.as_ref().map(|t| t.name.clone()),
            limit_percent: self.limit.percent(),
            locally_muted: self.locally_muted(),
            corked: self.corked,
            muted_by_route: self.muted_by_route,
            members: self.members.len(),
        }
    }
}

/// Serializable snapshot of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub flags: Vec<String>,
    pub sink: Option<String>,
    pub source: Option<String>,
    pub limit_percent: u32,
    pub locally_muted: bool,
    pub corked: bool,
    pub muted_by_route: bool,
    pub members: usize,
}

fn stream_kind(class: DeviceClass) -> EntityKind {
    match class {
        DeviceClass::Sink => EntityKind::SinkInput,
        DeviceClass::Source => EntityKind::SourceOutput,
    }
}

fn device_kind(class: DeviceClass) -> EntityKind {
    match class {
        DeviceClass::Sink => EntityKind::Sink,
        DeviceClass::Source => EntityKind::Source,
    }
}

/// All policy groups plus the name of the default one
#[derive(Debug, Clone, Default)]
pub struct GroupModel {
    groups: Vec<PolicyGroup>,
    default: Option<String>,
    null_sink: Option<String>,
    zero_limit: ZeroLimit,
}

impl GroupModel {
    #[must_use]
    pub fn new(
        default: impl Into<String>,
        null_sink: Option<String>,
        zero_limit: ZeroLimit,
    ) -> Self {
        Self {
            groups: Vec::new(),
            default: Some(default.into()),
            null_sink,
            zero_limit,
        }
    }

    /// Add a group. Returns `false` if the name is taken.
    pub fn add_group(&mut self, spec: GroupSpec) -> bool {
        if self.position(&spec.name).is_some() {
            warn!("Policy group '{}' already exists", spec.name);
            return false;
        }
        debug!("Add policy group '{}' {:?}", spec.name, spec.flags);
        self.groups.push(PolicyGroup::from_spec(spec));
        true
    }

    #[must_use]
    pub fn groups(&self) -> &[PolicyGroup] {
        &self.groups
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&PolicyGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    #[must_use]
    pub fn default_group(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Sum of member counts over all groups
    #[must_use]
    pub fn member_total(&self) -> usize {
        self.groups.iter().map(PolicyGroup::member_count).sum()
    }

    /// Name of the group a stream belongs to
    #[must_use]
    pub fn group_of(&self, kind: EntityKind, index: u32) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.members.iter().any(|m| m.kind == kind && m.index == index))
            .map(|g| g.name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    fn resolve(&self, name: Option<&str>) -> Option<usize> {
        if let Some(name) = name {
            if let Some(i) = self.position(name) {
                return Some(i);
            }
            debug!("Unknown policy group '{}', using default", name);
        }
        self.default.as_deref().and_then(|d| self.position(d))
    }

    fn null_sink(&self, registry: &Registry) -> Option<EntityHandle> {
        self.null_sink
            .as_deref()
            .and_then(|name| registry.find_by_name(EntityKind::Sink, name))
    }

    /// A sink or source appeared: bind it to groups configured for its type
    pub fn device_added(
        &mut self,
        class: DeviceClass,
        device: EntityHandle,
        cx: &mut Dispatch<'_>,
    ) {
        let Some(entity) = cx.registry.get(device) else {
            return;
        };
        let name = entity.name.clone();
        let wanted: Vec<usize> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.target(class).is_none())
            .filter(|(_, g)| {
                let label = match class {
                    DeviceClass::Sink => g.sink_type.as_deref(),
                    DeviceClass::Source => g.source_type.as_deref(),
                };
                label.is_some_and(|l| cx.classifier.is_device_type(class, entity, l).is_some())
            })
            .map(|(i, _)| i)
            .collect();

        for gi in wanted {
            let g = &mut self.groups[gi];
            info!("Policy group '{}' {} → '{}'", g.name, class.as_str(), name);
            g.set_target(
                class,
                Some(Target {
                    handle: device,
                    name: name.clone(),
                }),
            );
            if !g.flags.contains(GroupFlags::ROUTE_AUDIO)
                || (class == DeviceClass::Sink && g.muted_by_route)
            {
                continue;
            }
            for stream in g.routed_members(class) {
                cx.route(stream, device);
            }
        }
    }

    /// A sink or source went away: forget it as a route target
    pub fn device_removed(&mut self, device: EntityHandle) {
        for g in &mut self.groups {
            for class in [DeviceClass::Sink, DeviceClass::Source] {
                if g.target(class).is_some_and(|t| t.handle == device) {
                    info!("Policy group '{}' lost its {}", g.name, class.as_str());
                    g.set_target(class, None);
                }
            }
        }
    }

    /// A stream arrived. Places it in `group` (or the default group) and
    /// applies the group's routing, cork, mute and volume policy to it.
    ///
    /// Returns the name of the group joined, or `None` if no group applies.
    pub fn insert(
        &mut self,
        group: Option<&str>,
        stream: EntityHandle,
        flags: StreamFlags,
        cx: &mut Dispatch<'_>,
    ) -> Option<String> {
        let Some(entity) = cx.registry.get(stream) else {
            error!("Cannot insert unknown stream into policy group");
            return None;
        };
        let (kind, index) = (entity.kind, entity.index);
        if !kind.is_stream() {
            warn!("Only streams join policy groups, got {} #{}", kind, index);
            return None;
        }
        let Some(gi) = self.resolve(group) else {
            debug!("No policy group for {} #{}", kind, index);
            return None;
        };
        let null = self.null_sink(cx.registry);

        let g = &mut self.groups[gi];
        g.members.push(Member {
            handle: stream,
            kind,
            index,
            flags,
            muted: false,
            marked: false,
            imposed: Vec::new(),
        });
        let first = g.members.len() == 1;
        let name = g.name.clone();
        cx.registry.set_property(stream, PROP_POLICY_GROUP, &name);
        debug!("{} #{} joined policy group '{}'", kind, index, name);

        match kind {
            EntityKind::SinkInput => {
                if let Some(sink) = g.sink.as_ref().map(|t| t.handle) {
                    if g.muted_by_route && !flags.contains(StreamFlags::LOCAL_ROUTE) {
                        match null {
                            Some(null) => cx.route(stream, null),
                            None => warn!(
                                "Policy group '{}' is muted by route but no null sink exists",
                                name
                            ),
                        }
                    } else if g.flags.contains(GroupFlags::ROUTE_AUDIO) {
                        cx.route(stream, sink);
                        if flags.contains(StreamFlags::LOCAL_ROUTE)
                            && let Some(port) = g.port.as_deref()
                        {
                            cx.port(sink, port);
                        }
                    }
                }
            }
            EntityKind::SourceOutput => {
                if let Some(source) = g.source.as_ref().map(|t| t.handle)
                    && g.flags.contains(GroupFlags::ROUTE_AUDIO)
                {
                    cx.route(stream, source);
                }
            }
            _ => {}
        }

        if g.flags.contains(GroupFlags::CORK_STREAM) && g.corked {
            cx.cork(stream, true);
        }
        if g.locally_muted() {
            cx.mute(stream, true);
        }

        let limit = (g.flags.contains(GroupFlags::LIMIT_VOLUME)
            && !flags.contains(StreamFlags::LOCAL_VOLMAX))
        .then_some(g.limit);
        let notify = first && g.flags.contains(GroupFlags::MEDIA_NOTIFY);
        let sink = g.sink.as_ref().map(|t| t.handle);

        if flags.contains(StreamFlags::LOCAL_MUTE) {
            let imposed = self.impose_local_mute(sink, gi, cx);
            if let Some(m) = self.groups[gi].members.last_mut() {
                m.imposed = imposed;
            }
        } else if let Some(limit) = limit {
            cx.volume(stream, limit);
        }

        if notify {
            cx.notifier
                .media_status(MediaKind::for_stream(kind), &name, true);
        }
        Some(name)
    }

    /// A stream went away. Returns the name of the group it left.
    pub fn remove(
        &mut self,
        kind: EntityKind,
        index: u32,
        cx: &mut Dispatch<'_>,
    ) -> Option<String> {
        let (gi, pos) = self.groups.iter().enumerate().find_map(|(gi, g)| {
            g.members
                .iter()
                .position(|m| m.kind == kind && m.index == index)
                .map(|pos| (gi, pos))
        })?;

        let g = &mut self.groups[gi];
        let member = g.members.remove(pos);
        let name = g.name.clone();
        debug!("{} #{} left policy group '{}'", kind, index, name);

        if g.members.is_empty() && g.flags.contains(GroupFlags::MEDIA_NOTIFY) {
            cx.notifier
                .media_status(MediaKind::for_stream(kind), &name, false);
        }

        self.release_local_mute(&member.imposed, cx);
        Some(name)
    }

    /// Hold every other group routed to `sink` muted. Returns the groups held.
    fn impose_local_mute(
        &mut self,
        sink: Option<EntityHandle>,
        except: usize,
        cx: &mut Dispatch<'_>,
    ) -> Vec<String> {
        let Some(sink) = sink else {
            return Vec::new();
        };
        let sharing: Vec<usize> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(i, g)| *i != except && g.sink.as_ref().is_some_and(|t| t.handle == sink))
            .map(|(i, _)| i)
            .collect();

        let mut imposed = Vec::with_capacity(sharing.len());
        for gi in sharing {
            let was = self.groups[gi].locally_muted();
            self.groups[gi].mute_holders += 1;
            self.sync_local_mute(gi, was, cx);
            imposed.push(self.groups[gi].name.clone());
        }
        imposed
    }

    /// Drop the holds a departing `local_mute` stream placed on `groups`
    fn release_local_mute(&mut self, groups: &[String], cx: &mut Dispatch<'_>) {
        for name in groups {
            let Some(gi) = self.position(name) else {
                continue;
            };
            let was = self.groups[gi].locally_muted();
            let g = &mut self.groups[gi];
            g.mute_holders = g.mute_holders.saturating_sub(1);
            self.sync_local_mute(gi, was, cx);
        }
    }

    /// Push a change of the effective local mute state to the members
    fn sync_local_mute(&mut self, gi: usize, was: bool, cx: &mut Dispatch<'_>) {
        let g = &mut self.groups[gi];
        let muted = g.locally_muted();
        if muted == was {
            return;
        }
        info!(
            "Policy group '{}' locally {}",
            g.name,
            if muted { "muted" } else { "unmuted" }
        );

        for m in &mut g.members {
            if muted {
                if m.muted {
                    m.marked = true;
                } else {
                    cx.mute(m.handle, true);
                }
            } else if !(m.marked || m.muted) {
                cx.mute(m.handle, false);
            }
        }
    }

    /// Toggle local mute on a group. Returns `false` for an unknown group.
    pub fn set_local_mute(&mut self, name: &str, muted: bool, cx: &mut Dispatch<'_>) -> bool {
        let Some(gi) = self.position(name) else {
            warn!("Cannot mute unknown policy group '{}'", name);
            return false;
        };
        let was = self.groups[gi].locally_muted();
        self.groups[gi].operator_muted = muted;
        self.sync_local_mute(gi, was, cx);
        true
    }

    /// Record an explicit mute change made by a stream's owner
    pub fn stream_muted(&mut self, kind: EntityKind, index: u32, muted: bool) {
        for m in self.groups.iter_mut().flat_map(|g| g.members.iter_mut()) {
            if m.kind == kind && m.index == index {
                m.muted = muted;
                if !muted {
                    m.marked = false;
                }
            }
        }
    }

    /// Route a group (or every group following route commands) to the first
    /// device classified as `target_type`.
    ///
    /// `mode` and `hwid` are stamped on the target; a change notification is
    /// raised only if either actually changed.
    #[allow(clippy::too_many_arguments)]
    pub fn move_to(
        &mut self,
        group: Option<&str>,
        class: DeviceClass,
        target_type: &str,
        mode: Option<&str>,
        hwid: Option<&str>,
        cx: &mut Dispatch<'_>,
    ) -> bool {
        let kind = device_kind(class);
        let found = cx.registry.of_kind(kind).into_iter().find_map(|(h, e)| {
            cx.classifier
                .is_device_type(class, e, target_type)
                .map(|data| (h, e.name.clone(), e.index, data.port_for(&e.name).map(String::from)))
        });
        let Some((target, target_name, target_index, port)) = found else {
            warn!("No {} of type '{}' to route to", class.as_str(), target_type);
            return false;
        };

        let selected: Vec<usize> = match group {
            Some(name) => match self.position(name) {
                Some(gi) => vec![gi],
                None => {
                    warn!("Cannot route unknown policy group '{}'", name);
                    return false;
                }
            },
            None => {
                let follow = match class {
                    DeviceClass::Sink => GroupFlags::SET_SINK,
                    DeviceClass::Source => GroupFlags::SET_SOURCE,
                };
                self.groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.flags.contains(follow))
                    .map(|(i, _)| i)
                    .collect()
            }
        };

        let mut changed = false;
        if let Some(mode) = mode {
            changed |= cx.registry.set_property(target, PROP_POLICY_MODE, mode) == Some(true);
        }
        if let Some(hwid) = hwid {
            changed |= cx.registry.set_property(target, PROP_POLICY_HWID, hwid) == Some(true);
        }
        if changed {
            cx.notifier.object_changed(kind, target_index);
        }
        if let Some(port) = port.as_deref() {
            cx.port(target, port);
        }

        for gi in selected {
            let g = &mut self.groups[gi];
            info!("Policy group '{}' {} → '{}'", g.name, class.as_str(), target_name);
            g.set_target(
                class,
                Some(Target {
                    handle: target,
                    name: target_name.clone(),
                }),
            );
            if class == DeviceClass::Sink && g.muted_by_route {
                debug!("Policy group '{}' is muted by route, streams stay put", g.name);
                continue;
            }
            if group.is_none() && !g.flags.contains(GroupFlags::ROUTE_AUDIO) {
                continue;
            }
            for stream in g.routed_members(class) {
                cx.route(stream, target);
            }
        }
        true
    }

    /// Cork or uncork every stream of a group. Returns `false` for an unknown group.
    pub fn cork(&mut self, name: &str, corked: bool, cx: &mut Dispatch<'_>) -> bool {
        let Some(gi) = self.position(name) else {
            warn!("Cannot cork unknown policy group '{}'", name);
            return false;
        };
        let g = &mut self.groups[gi];
        if g.corked == corked {
            return true;
        }
        g.corked = corked;
        info!(
            "Policy group '{}' {}",
            g.name,
            if corked { "corked" } else { "uncorked" }
        );
        for m in &g.members {
            cx.cork(m.handle, corked);
        }
        true
    }

    /// Set a volume limit in percent on one group, or on every group that
    /// limits volume or mutes by route.
    ///
    /// For mute-by-route groups zero percent means "reroute to the null sink"
    /// and any positive value means "route back to the real device".
    pub fn set_volume_limit(
        &mut self,
        name: Option<&str>,
        percent: u32,
        cx: &mut Dispatch<'_>,
    ) -> bool {
        let selected: Vec<usize> = match name {
            Some(name) => match self.position(name) {
                Some(gi) => vec![gi],
                None => {
                    warn!("Cannot limit unknown policy group '{}'", name);
                    return false;
                }
            },
            None => self
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| {
                    g.flags
                        .intersects(GroupFlags::LIMIT_VOLUME | GroupFlags::MUTE_BY_ROUTE)
                })
                .map(|(i, _)| i)
                .collect(),
        };

        let limit = Volume::from_percent(percent);
        let null = self.null_sink(cx.registry);
        let zero_limit = self.zero_limit;

        for gi in selected {
            let g = &mut self.groups[gi];

            if g.flags.contains(GroupFlags::MUTE_BY_ROUTE) {
                if percent == 0 {
                    if zero_limit == ZeroLimit::Store {
                        g.limit = limit;
                    }
                    if g.muted_by_route {
                        continue;
                    }
                    g.muted_by_route = true;
                    info!("Policy group '{}' muted by route", g.name);
                    match null {
                        Some(null) => {
                            for stream in g.reroutable_members() {
                                cx.route(stream, null);
                            }
                        }
                        None => warn!("No null sink to mute policy group '{}'", g.name),
                    }
                    continue;
                }

                if g.muted_by_route {
                    g.muted_by_route = false;
                    info!("Policy group '{}' unmuted by route", g.name);
                    if let Some(sink) = g.sink.as_ref().map(|t| t.handle) {
                        for stream in g.reroutable_members() {
                            cx.route(stream, sink);
                        }
                    }
                }
                g.limit = limit;
                if !g.flags.contains(GroupFlags::LIMIT_VOLUME) {
                    continue;
                }
            } else {
                g.limit = limit;
            }

            debug!("Policy group '{}' volume limit {}", g.name, limit);
            for m in g
                .members
                .iter()
                .filter(|m| !m.flags.contains(StreamFlags::LOCAL_VOLMAX))
            {
                cx.volume(m.handle, limit);
            }
        }
        true
    }

    /// Delete a group.
    ///
    /// Members of a non-default group move to the default group; members of
    /// the default group are detached and belong to no group afterwards.
    pub fn delete_group(&mut self, name: &str, cx: &mut Dispatch<'_>) -> bool {
        let Some(gi) = self.position(name) else {
            warn!("Cannot delete unknown policy group '{}'", name);
            return false;
        };
        let group = self.groups.remove(gi);
        let was_active = !group.members.is_empty();

        if was_active && group.flags.contains(GroupFlags::MEDIA_NOTIFY) {
            let media = MediaKind::for_stream(group.members[0].kind);
            cx.notifier.media_status(media, &group.name, false);
        }

        if self.default.as_deref() == Some(name) {
            self.default = None;
            warn!(
                "Default policy group '{}' deleted, {} streams detached",
                name,
                group.members.len()
            );
            for m in &group.members {
                self.release_local_mute(&m.imposed, cx);
                cx.registry.delete_property(m.handle, PROP_POLICY_GROUP);
            }
            return true;
        }

        info!(
            "Policy group '{}' deleted, {} streams move to default",
            name,
            group.members.len()
        );
        for m in group.members {
            self.release_local_mute(&m.imposed, cx);
            if self.insert(None, m.handle, m.flags, cx).is_none() {
                cx.registry.delete_property(m.handle, PROP_POLICY_GROUP);
                continue;
            }
            self.stream_muted(m.kind, m.index, m.muted);
            if m.marked
                && let Some(moved) = self
                    .groups
                    .iter_mut()
                    .flat_map(|g| g.members.iter_mut())
                    .find(|x| x.handle == m.handle)
            {
                moved.marked = true;
            }
        }
        true
    }
}
