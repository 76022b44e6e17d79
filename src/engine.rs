//! Engine state
//!
//! Ties the classifier, policy groups and context rules to the entity feed.
//! Every operation runs to completion on the caller's task; the daemon owns
//! one [`Engine`] and serializes all requests through it.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::actions::{DeviceActions, DeviceState, Notifier};
use crate::classify::{Classifier, DeviceClass, RuleFlags, StreamIdentity};
use crate::context::{ChangeReport, ContextEngine};
use crate::entity::{Entity, EntityHandle, EntityKind, Registry};
use crate::group::{Dispatch, GroupModel, GroupSummary};
use crate::matcher::MatchRule;

/// Counters reported by `status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub default_group: Option<String>,
    pub groups: usize,
    pub streams: usize,
    pub sinks: usize,
    pub sources: usize,
    pub cards: usize,
    pub pid_overrides: usize,
    pub diagnostics: usize,
    /// Context variables and their current values
    pub context: Vec<(String, String)>,
}

fn device_class(kind: EntityKind) -> Option<DeviceClass> {
    match kind {
        EntityKind::Sink => Some(DeviceClass::Sink),
        EntityKind::Source => Some(DeviceClass::Source),
        _ => None,
    }
}

pub struct Engine {
    classifier: Classifier,
    groups: GroupModel,
    context: ContextEngine,
    registry: Registry,
    actions: Box<dyn DeviceActions + Send>,
    notifier: Box<dyn Notifier + Send>,
}

impl Engine {
    #[must_use]
    pub fn new(
        classifier: Classifier,
        groups: GroupModel,
        context: ContextEngine,
        actions: Box<dyn DeviceActions + Send>,
        notifier: Box<dyn Notifier + Send>,
    ) -> Self {
        Self {
            classifier,
            groups,
            context,
            registry: Registry::new(),
            actions,
            notifier,
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    #[must_use]
    pub fn groups(&self) -> &GroupModel {
        &self.groups
    }

    #[must_use]
    pub fn context(&self) -> &ContextEngine {
        &self.context
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Look up a live entity by kind and server index
    #[must_use]
    pub fn entity(&self, kind: EntityKind, index: u32) -> Option<&Entity> {
        self.registry
            .lookup(kind, index)
            .and_then(|h| self.registry.get(h))
    }

    fn split(&mut self) -> (&mut GroupModel, Dispatch<'_>) {
        (
            &mut self.groups,
            Dispatch {
                registry: &mut self.registry,
                classifier: &self.classifier,
                actions: &mut *self.actions,
                notifier: &mut *self.notifier,
            },
        )
    }

    fn notify_labels(&mut self, handle: EntityHandle, state: DeviceState) {
        let Some(entity) = self.registry.get(handle) else {
            return;
        };
        let labels = match entity.kind {
            EntityKind::Card => {
                let profiles = entity.profiles();
                self.classifier
                    .card_labels(entity, &profiles, RuleFlags::DISABLE_NOTIFY, RuleFlags::empty())
            }
            kind => match device_class(kind) {
                Some(class) => self.classifier.device_labels(
                    class,
                    entity,
                    RuleFlags::DISABLE_NOTIFY,
                    RuleFlags::empty(),
                ),
                None => return,
            },
        };
        if labels.is_empty() {
            debug!("{} '{}' has no notifiable type", entity.kind, entity.name);
            return;
        }
        self.notifier.device_state(state, &labels);
    }

    /// An entity appeared on the audio server
    pub fn on_entity_created(&mut self, entity: Entity) -> EntityHandle {
        let (kind, index) = (entity.kind, entity.index);
        if self.registry.lookup(kind, index).is_some() {
            debug!("{} #{} announced again, replacing", kind, index);
            self.on_entity_removed(kind, index);
        }

        let name = entity.name.clone();
        let (handle, _) = self.registry.insert(entity);
        info!("{} #{} '{}' created", kind, index, name);

        match kind {
            EntityKind::Sink | EntityKind::Source => {
                self.notify_labels(handle, DeviceState::Connected);
                if let Some(class) = device_class(kind) {
                    let (groups, mut cx) = self.split();
                    groups.device_added(class, handle, &mut cx);
                }
            }
            EntityKind::Card => self.notify_labels(handle, DeviceState::Connected),
            EntityKind::SinkInput | EntityKind::SourceOutput => {
                let class = match self.registry.get(handle) {
                    Some(e) => self
                        .classifier
                        .find_group_for_stream(&StreamIdentity::from_attributes(e), e),
                    None => return handle,
                };
                let (groups, mut cx) = self.split();
                groups.insert(Some(&class.group), handle, class.flags, &mut cx);
            }
            EntityKind::Module => {}
        }

        self.context.register_object(kind, &name, handle, index);
        handle
    }

    /// An entity went away. Returns `false` if it was never known.
    pub fn on_entity_removed(&mut self, kind: EntityKind, index: u32) -> bool {
        let Some(handle) = self.registry.lookup(kind, index) else {
            error!("Removal of unknown {} #{}", kind, index);
            self.context.unregister_object(kind, None, index);
            return false;
        };

        match kind {
            EntityKind::Sink | EntityKind::Source => {
                self.notify_labels(handle, DeviceState::Disconnected);
                self.groups.device_removed(handle);
            }
            EntityKind::Card => self.notify_labels(handle, DeviceState::Disconnected),
            EntityKind::SinkInput | EntityKind::SourceOutput => {
                let (groups, mut cx) = self.split();
                if groups.remove(kind, index, &mut cx).is_none() {
                    debug!("{} #{} was in no policy group", kind, index);
                }
            }
            EntityKind::Module => {}
        }

        self.context.unregister_object(kind, Some(handle), index);
        self.registry.remove(handle);
        info!("{} #{} removed", kind, index);
        true
    }

    /// Apply a context variable change
    pub fn variable_changed(&mut self, name: &str, value: &str) -> ChangeReport {
        self.context
            .variable_changed(name, value, &mut self.registry, &mut *self.notifier)
    }

    pub fn register_pid(
        &mut self,
        pid: u32,
        property: Option<&str>,
        matcher: MatchRule,
        group: &str,
    ) {
        self.classifier.register_pid(pid, property, matcher, group);
    }

    pub fn unregister_pid(
        &mut self,
        pid: u32,
        property: Option<&str>,
        matcher: &MatchRule,
    ) -> bool {
        self.classifier.unregister_pid(pid, property, matcher)
    }

    pub fn move_to(
        &mut self,
        group: Option<&str>,
        class: DeviceClass,
        target_type: &str,
        mode: Option<&str>,
        hwid: Option<&str>,
    ) -> bool {
        let (groups, mut cx) = self.split();
        groups.move_to(group, class, target_type, mode, hwid, &mut cx)
    }

    pub fn cork(&mut self, group: &str, corked: bool) -> bool {
        let (groups, mut cx) = self.split();
        groups.cork(group, corked, &mut cx)
    }

    pub fn set_volume_limit(&mut self, group: Option<&str>, percent: u32) -> bool {
        let (groups, mut cx) = self.split();
        groups.set_volume_limit(group, percent, &mut cx)
    }

    pub fn set_local_mute(&mut self, group: &str, muted: bool) -> bool {
        let (groups, mut cx) = self.split();
        groups.set_local_mute(group, muted, &mut cx)
    }

    pub fn delete_group(&mut self, group: &str) -> bool {
        let (groups, mut cx) = self.split();
        groups.delete_group(group, &mut cx)
    }

    pub fn stream_muted(&mut self, kind: EntityKind, index: u32, muted: bool) {
        self.groups.stream_muted(kind, index, muted);
    }

    #[must_use]
    pub fn group_summaries(&self) -> Vec<GroupSummary> {
        self.groups.groups().iter().map(|g| g.summary()).collect()
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            default_group: self.groups.default_group().map(String::from),
            groups: self.groups.groups().len(),
            streams: self.registry.count(EntityKind::SinkInput)
                + self.registry.count(EntityKind::SourceOutput),
            sinks: self.registry.count(EntityKind::Sink),
            sources: self.registry.count(EntityKind::Source),
            cards: self.registry.count(EntityKind::Card),
            pid_overrides: self.classifier.pid_override_count(),
            diagnostics: self.classifier.diagnostics().len(),
            context: self
                .context
                .variables()
                .iter()
                .map(|v| (v.name.clone(), v.value.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PROP_POLICY_GROUP, PROP_PROCESS_ID};
    use crate::group::{GroupFlags, GroupSpec, ZeroLimit};
    use crate::test_utils::{Notice, RecordingActions, RecordingNotifier};

    fn engine() -> (Engine, RecordingActions, RecordingNotifier) {
        let mut classifier = Classifier::new("default");
        for (label, flags) in [("ihf", RuleFlags::empty()), ("quiet", RuleFlags::DISABLE_NOTIFY)] {
            classifier.add_device_rule(
                DeviceClass::Sink,
                label,
                None,
                MatchRule::starts_with("alsa_output"),
                None,
                flags,
            );
        }
        classifier
            .add_stream_rule(
                Some("application.name"),
                MatchRule::equals("player"),
                None,
                None,
                None,
                Some("player"),
                Default::default(),
            )
            .unwrap();

        let mut groups = GroupModel::new("default", None, ZeroLimit::Keep);
        for name in ["default", "player"] {
            groups.add_group(GroupSpec {
                name: name.into(),
                flags: GroupFlags::ROUTE_AUDIO,
                sink_type: Some("ihf".into()),
                ..GroupSpec::default()
            });
        }

        let actions = RecordingActions::new();
        let notifier = RecordingNotifier::new();
        let engine = Engine::new(
            classifier,
            groups,
            ContextEngine::new(),
            Box::new(actions.clone()),
            Box::new(notifier.clone()),
        );
        (engine, actions, notifier)
    }

    #[test]
    fn test_device_lifecycle_notifies_labels() {
        let (mut engine, _, notifier) = engine();
        engine.on_entity_created(Entity::new(EntityKind::Sink, 0, "alsa_output.0"));
        assert!(engine.on_entity_removed(EntityKind::Sink, 0));
        assert_eq!(
            notifier.take(),
            vec![
                Notice::Device { state: DeviceState::Connected, labels: vec!["ihf".into()] },
                Notice::Device { state: DeviceState::Disconnected, labels: vec!["ihf".into()] },
            ]
        );
        assert!(engine.groups().group("player").unwrap().sink().is_none());
    }

    #[test]
    fn test_stream_classified_and_grouped() {
        let (mut engine, actions, _) = engine();
        engine.on_entity_created(Entity::new(EntityKind::Sink, 0, "alsa_output.0"));
        let h = engine.on_entity_created(
            Entity::new(EntityKind::SinkInput, 5, "music")
                .with_property("application.name", "player"),
        );
        assert_eq!(engine.registry().get(h).unwrap().property(PROP_POLICY_GROUP), Some("player"));
        assert_eq!(actions.calls().len(), 1);
        assert_eq!(engine.status().streams, 1);

        assert!(engine.on_entity_removed(EntityKind::SinkInput, 5));
        assert_eq!(engine.groups().member_total(), 0);
        assert!(!engine.on_entity_removed(EntityKind::SinkInput, 5));
    }

    #[test]
    fn test_pid_override_routes_new_streams() {
        let (mut engine, _, _) = engine();
        engine.register_pid(42, None, MatchRule::always(), "player");
        engine.on_entity_created(
            Entity::new(EntityKind::SinkInput, 1, "a").with_property(PROP_PROCESS_ID, "42"),
        );
        assert_eq!(engine.groups().group_of(EntityKind::SinkInput, 1), Some("player"));

        assert!(engine.unregister_pid(42, None, &MatchRule::always()));
        engine.on_entity_created(
            Entity::new(EntityKind::SinkInput, 2, "b").with_property(PROP_PROCESS_ID, "42"),
        );
        assert_eq!(engine.groups().group_of(EntityKind::SinkInput, 2), Some("default"));
    }

    #[test]
    fn test_reannounced_entity_replaces_previous() {
        let (mut engine, _, _) = engine();
        engine.on_entity_created(Entity::new(EntityKind::SinkInput, 1, "a"));
        engine.on_entity_created(Entity::new(EntityKind::SinkInput, 1, "a"));
        assert_eq!(engine.groups().member_total(), 1);
    }
}
