//! Context rules
//!
//! External controllers publish named context variables (for example the
//! active audio profile). Each variable owns an ordered list of rules; when
//! its value changes, every rule whose matcher accepts the new value runs all
//! of its property actions against the objects bound to their selectors.

use tracing::{debug, error, info, warn};

use crate::actions::Notifier;
use crate::entity::{EntityHandle, EntityKind, Registry};
use crate::error::ActionError;
use crate::matcher::MatchRule;

/// Value written by a set-property action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Constant(String),
    /// Write the variable's new value
    CopyFromVariable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    handle: EntityHandle,
    index: u32,
}

/// Picks at most one live object by kind and name
#[derive(Debug, Clone)]
pub struct ObjectSelector {
    pub kind: EntityKind,
    pub matcher: MatchRule,
    binding: Option<Binding>,
}

impl ObjectSelector {
    fn new(kind: EntityKind, matcher: MatchRule) -> Self {
        Self {
            kind,
            matcher,
            binding: None,
        }
    }

    #[must_use]
    pub fn bound(&self) -> Option<EntityHandle> {
        self.binding.map(|b| b.handle)
    }
}

#[derive(Debug, Clone)]
pub enum ContextAction {
    SetProperty {
        object: ObjectSelector,
        property: String,
        value: PropertyValue,
    },
    DeleteProperty {
        object: ObjectSelector,
        property: String,
    },
}

impl ContextAction {
    fn object(&self) -> &ObjectSelector {
        match self {
            Self::SetProperty { object, .. } | Self::DeleteProperty { object, .. } => object,
        }
    }

    fn object_mut(&mut self) -> &mut ObjectSelector {
        match self {
            Self::SetProperty { object, .. } | Self::DeleteProperty { object, .. } => object,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextRule {
    pub matcher: MatchRule,
    pub actions: Vec<ContextAction>,
}

#[derive(Debug, Clone)]
pub struct ContextVariable {
    pub name: String,
    pub value: String,
    pub rules: Vec<ContextRule>,
}

/// Identifies a rule for attaching actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleHandle {
    variable: usize,
    rule: usize,
}

/// Outcome of a variable change
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    /// The stored value was different and has been replaced
    pub changed: bool,
    /// Property writes and deletions actually performed
    pub mutations: usize,
    pub failures: Vec<ActionError>,
}

impl ChangeReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContextEngine {
    variables: Vec<ContextVariable>,
}

impl ContextEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn variables(&self) -> &[ContextVariable] {
        &self.variables
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&ContextVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Add a rule to a variable, creating the variable with an empty value if needed
    pub fn add_variable_rule(&mut self, variable: &str, matcher: MatchRule) -> RuleHandle {
        let vi = match self.variables.iter().position(|v| v.name == variable) {
            Some(vi) => vi,
            None => {
                debug!("New context variable '{}'", variable);
                self.variables.push(ContextVariable {
                    name: variable.to_string(),
                    value: String::new(),
                    rules: Vec::new(),
                });
                self.variables.len() - 1
            }
        };
        let var = &mut self.variables[vi];
        debug!("Context rule: {} {}", var.name, matcher);
        var.rules.push(ContextRule {
            matcher,
            actions: Vec::new(),
        });
        RuleHandle {
            variable: vi,
            rule: var.rules.len() - 1,
        }
    }

    fn rule_mut(&mut self, handle: RuleHandle) -> Option<&mut ContextRule> {
        self.variables
            .get_mut(handle.variable)
            .and_then(|v| v.rules.get_mut(handle.rule))
    }

    /// Returns `false` if `rule` does not name a rule of this engine.
    pub fn add_set_property_action(
        &mut self,
        rule: RuleHandle,
        kind: EntityKind,
        matcher: MatchRule,
        property: impl Into<String>,
        value: PropertyValue,
    ) -> bool {
        let Some(rule) = self.rule_mut(rule) else {
            return false;
        };
        rule.actions.push(ContextAction::SetProperty {
            object: ObjectSelector::new(kind, matcher),
            property: property.into(),
            value,
        });
        true
    }

    /// Returns `false` if `rule` does not name a rule of this engine.
    pub fn add_delete_property_action(
        &mut self,
        rule: RuleHandle,
        kind: EntityKind,
        matcher: MatchRule,
        property: impl Into<String>,
    ) -> bool {
        let Some(rule) = self.rule_mut(rule) else {
            return false;
        };
        rule.actions.push(ContextAction::DeleteProperty {
            object: ObjectSelector::new(kind, matcher),
            property: property.into(),
        });
        true
    }

    fn selectors_mut(&mut self) -> impl Iterator<Item = &mut ObjectSelector> {
        self.variables
            .iter_mut()
            .flat_map(|v| v.rules.iter_mut())
            .flat_map(|r| r.actions.iter_mut())
            .map(ContextAction::object_mut)
    }

    /// Bind a new object to every unbound selector that picks it.
    ///
    /// Returns the number of selectors bound.
    pub fn register_object(
        &mut self,
        kind: EntityKind,
        name: &str,
        handle: EntityHandle,
        index: u32,
    ) -> usize {
        let mut bound = 0;
        for sel in self.selectors_mut() {
            if sel.kind != kind || !sel.matcher.matches(Some(name)) {
                continue;
            }
            if let Some(existing) = sel.binding {
                if existing.handle != handle {
                    warn!(
                        "{} '{}' also matches selector {} already bound to #{}",
                        kind, name, sel.matcher, existing.index
                    );
                }
                continue;
            }
            debug!("Context selector {} bound to {} #{}", sel.matcher, kind, index);
            sel.binding = Some(Binding { handle, index });
            bound += 1;
        }
        bound
    }

    /// Release every selector bound to `handle`, or to `(kind, index)` when
    /// the handle is already gone.
    ///
    /// Returns the number of selectors released.
    pub fn unregister_object(
        &mut self,
        kind: EntityKind,
        handle: Option<EntityHandle>,
        index: u32,
    ) -> usize {
        let mut released = 0;
        for sel in self.selectors_mut() {
            let Some(b) = sel.binding else {
                continue;
            };
            let hit = match handle {
                Some(handle) => b.handle == handle,
                None => sel.kind == kind && b.index == index,
            };
            if hit {
                debug!("Context selector {} released {} #{}", sel.matcher, kind, index);
                sel.binding = None;
                released += 1;
            }
        }
        released
    }

    /// Apply a new value to a variable.
    ///
    /// Every rule whose matcher accepts `value` runs all of its actions in
    /// order. A failing action is reported and the remaining actions still run.
    /// An unchanged value or an unknown variable does nothing.
    pub fn variable_changed(
        &mut self,
        name: &str,
        value: &str,
        registry: &mut Registry,
        notifier: &mut dyn Notifier,
    ) -> ChangeReport {
        let mut report = ChangeReport::default();
        let Some(var) = self.variables.iter_mut().find(|v| v.name == name) else {
            debug!("Context variable '{}' has no rules", name);
            return report;
        };
        if var.value == value {
            debug!("Context variable '{}' unchanged", name);
            return report;
        }

        info!("Context variable '{}': '{}' → '{}'", name, var.value, value);
        var.value = value.to_string();
        report.changed = true;

        for rule in var.rules.iter_mut().filter(|r| r.matcher.matches(Some(value))) {
            for action in &mut rule.actions {
                match apply(action, value, registry, notifier) {
                    Ok(true) => report.mutations += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Context variable '{}': {}", name, e);
                        report.failures.push(e);
                    }
                }
            }
        }
        report
    }
}

/// Run one action. `Ok(true)` means the object was modified.
fn apply(
    action: &mut ContextAction,
    value: &str,
    registry: &mut Registry,
    notifier: &mut dyn Notifier,
) -> Result<bool, ActionError> {
    let sel = action.object();
    let (kind, Some(binding)) = (sel.kind, sel.binding) else {
        return Err(ActionError::Unbound {
            kind: sel.kind,
            pattern: sel.matcher.argument().to_string(),
        });
    };

    let changed = match &*action {
        ContextAction::SetProperty {
            property,
            value: target,
            ..
        } => {
            let target = match target {
                PropertyValue::Constant(v) => v.as_str(),
                PropertyValue::CopyFromVariable => value,
            };
            let changed = registry.set_property(binding.handle, property, target);
            if changed == Some(true) {
                debug!("{} #{}: {} = '{}'", kind, binding.index, property, target);
            }
            changed
        }
        ContextAction::DeleteProperty { property, .. } => {
            let changed = registry.delete_property(binding.handle, property);
            if changed == Some(true) {
                debug!("{} #{}: {} deleted", kind, binding.index, property);
            }
            changed
        }
    };

    match changed {
        Some(true) => {
            notifier.object_changed(kind, binding.index);
            Ok(true)
        }
        Some(false) => Ok(false),
        None => {
            error!("{} #{} bound to a context selector no longer exists", kind, binding.index);
            action.object_mut().binding = None;
            Err(ActionError::Dangling {
                kind,
                index: binding.index,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::test_utils::{Notice, RecordingNotifier};

    fn card_engine() -> (ContextEngine, Registry, EntityHandle) {
        let mut engine = ContextEngine::new();
        let rule = engine.add_variable_rule("active_profile", MatchRule::equals("car"));
        assert!(engine.add_set_property_action(
            rule,
            EntityKind::Card,
            MatchRule::equals("pci-card0"),
            "audio.mode",
            PropertyValue::Constant("car".into()),
        ));

        let mut registry = Registry::new();
        let (card, _) = registry.insert(Entity::new(EntityKind::Card, 0, "pci-card0"));
        assert_eq!(engine.register_object(EntityKind::Card, "pci-card0", card, 0), 1);
        (engine, registry, card)
    }

    #[test]
    fn test_variable_created_empty() {
        let mut engine = ContextEngine::new();
        engine.add_variable_rule("call", MatchRule::always());
        engine.add_variable_rule("call", MatchRule::equals("active"));
        let var = engine.variable("call").unwrap();
        assert_eq!(var.value, "");
        assert_eq!(var.rules.len(), 2);
        assert_eq!(engine.variables().len(), 1);
    }

    #[test]
    fn test_set_property_then_same_value_is_noop() {
        let (mut engine, mut registry, card) = card_engine();
        let notifier = RecordingNotifier::new();
        let mut sink = notifier.clone();

        let report = engine.variable_changed("active_profile", "car", &mut registry, &mut sink);
        assert!(report.changed && report.is_success());
        assert_eq!(report.mutations, 1);
        assert_eq!(registry.get(card).unwrap().property("audio.mode"), Some("car"));
        assert_eq!(
            notifier.take(),
            vec![Notice::Changed { kind: EntityKind::Card, index: 0 }]
        );

        let report = engine.variable_changed("active_profile", "car", &mut registry, &mut sink);
        assert!(!report.changed);
        assert_eq!(report.mutations, 0);
        assert!(notifier.take().is_empty());

        let report = engine.variable_changed("active_profile", "home", &mut registry, &mut sink);
        assert!(report.changed && report.is_success());
        assert_eq!(report.mutations, 0);
        assert_eq!(registry.get(card).unwrap().property("audio.mode"), Some("car"));
        assert!(notifier.take().is_empty());
    }

    #[test]
    fn test_existing_value_is_not_rewritten() {
        let (mut engine, mut registry, card) = card_engine();
        registry.set_property(card, "audio.mode", "car");
        let mut notifier = RecordingNotifier::new();

        let report = engine.variable_changed("active_profile", "car", &mut registry, &mut notifier);
        assert_eq!(report.mutations, 0);
        assert!(notifier.notices().is_empty());
    }

    #[test]
    fn test_all_matching_rules_run() {
        let mut engine = ContextEngine::new();
        let any = engine.add_variable_rule("profile", MatchRule::always());
        let car = engine.add_variable_rule("profile", MatchRule::starts_with("car"));
        engine.add_set_property_action(
            any,
            EntityKind::Sink,
            MatchRule::always(),
            "profile",
            PropertyValue::CopyFromVariable,
        );
        engine.add_delete_property_action(car, EntityKind::Sink, MatchRule::always(), "night");

        let mut registry = Registry::new();
        let (sink, _) =
            registry.insert(Entity::new(EntityKind::Sink, 4, "out").with_property("night", "1"));
        assert_eq!(engine.register_object(EntityKind::Sink, "out", sink, 4), 2);

        let mut notifier = RecordingNotifier::new();
        let report = engine.variable_changed("profile", "car-kit", &mut registry, &mut notifier);
        assert_eq!(report.mutations, 2);
        let e = registry.get(sink).unwrap();
        assert_eq!(e.property("profile"), Some("car-kit"));
        assert_eq!(e.property("night"), None);
        assert_eq!(notifier.notices().len(), 2);
    }

    #[test]
    fn test_unbound_selector_fails_but_others_run() {
        let mut engine = ContextEngine::new();
        let rule = engine.add_variable_rule("mode", MatchRule::always());
        engine.add_set_property_action(
            rule,
            EntityKind::Card,
            MatchRule::equals("missing"),
            "x",
            PropertyValue::CopyFromVariable,
        );
        engine.add_set_property_action(
            rule,
            EntityKind::Sink,
            MatchRule::always(),
            "x",
            PropertyValue::CopyFromVariable,
        );

        let mut registry = Registry::new();
        let (sink, _) = registry.insert(Entity::new(EntityKind::Sink, 1, "out"));
        engine.register_object(EntityKind::Sink, "out", sink, 1);

        let mut notifier = RecordingNotifier::new();
        let report = engine.variable_changed("mode", "a", &mut registry, &mut notifier);
        assert!(!report.is_success());
        assert_eq!(
            report.failures,
            vec![ActionError::Unbound {
                kind: EntityKind::Card,
                pattern: "missing".into()
            }]
        );
        assert_eq!(registry.get(sink).unwrap().property("x"), Some("a"));
    }

    #[test]
    fn test_selector_binds_first_object_only() {
        let mut engine = ContextEngine::new();
        let rule = engine.add_variable_rule("v", MatchRule::always());
        engine.add_set_property_action(
            rule,
            EntityKind::Sink,
            MatchRule::starts_with("alsa"),
            "p",
            PropertyValue::CopyFromVariable,
        );

        let mut registry = Registry::new();
        let (a, _) = registry.insert(Entity::new(EntityKind::Sink, 1, "alsa.a"));
        let (b, _) = registry.insert(Entity::new(EntityKind::Sink, 2, "alsa.b"));
        assert_eq!(engine.register_object(EntityKind::Sink, "alsa.a", a, 1), 1);
        assert_eq!(engine.register_object(EntityKind::Sink, "alsa.b", b, 2), 0);
        // Wrong kind never binds
        assert_eq!(engine.register_object(EntityKind::Source, "alsa.a", a, 1), 0);

        assert_eq!(engine.unregister_object(EntityKind::Sink, Some(a), 1), 1);
        assert_eq!(engine.register_object(EntityKind::Sink, "alsa.b", b, 2), 1);
    }

    #[test]
    fn test_unregister_by_index_when_handle_gone() {
        let (mut engine, mut registry, card) = card_engine();
        registry.remove(card);
        assert_eq!(engine.unregister_object(EntityKind::Sink, None, 0), 0);
        assert_eq!(engine.unregister_object(EntityKind::Card, None, 0), 1);
    }

    #[test]
    fn test_dangling_handle_reports_and_unbinds() {
        let (mut engine, mut registry, card) = card_engine();
        registry.remove(card);
        // Slot reused by an unrelated entity
        registry.insert(Entity::new(EntityKind::Card, 7, "usb-card"));

        let mut notifier = RecordingNotifier::new();
        let report = engine.variable_changed("active_profile", "car", &mut registry, &mut notifier);
        assert_eq!(
            report.failures,
            vec![ActionError::Dangling { kind: EntityKind::Card, index: 0 }]
        );
        assert!(notifier.notices().is_empty());

        let sel = engine.variables()[0].rules[0].actions[0].object().bound();
        assert_eq!(sel, None);
    }

    #[test]
    fn test_unknown_variable_is_noop() {
        let (mut engine, mut registry, _) = card_engine();
        let mut notifier = RecordingNotifier::new();
        let report = engine.variable_changed("nope", "x", &mut registry, &mut notifier);
        assert_eq!(report, ChangeReport::default());
    }
}
