//! Error taxonomy
//!
//! Nothing in the engine aborts the host process. Malformed rules degrade to a
//! permissive matcher and are reported through [`Diagnostics`]; failed context
//! actions are reported per action as [`ActionError`] and aggregated by the caller.

use thiserror::Error;
use tracing::warn;

use crate::entity::EntityKind;

/// A malformed rule definition. The rule keeps working as match-all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid regex '{pattern}': {reason} (rule now matches everything)")]
    InvalidRegex { pattern: String, reason: String },

    #[error("regex '{pattern}' contains capture groups and can never match")]
    CaptureGroups { pattern: String },

    #[error("unknown match method '{method}' (rule now matches everything)")]
    UnknownMethod { method: String },

    #[error("stream rule has no property, uid or exe and no group")]
    IncompleteStreamRule,
}

/// A context action that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("no {kind} bound for selector '{pattern}'")]
    Unbound { kind: EntityKind, pattern: String },

    #[error("{kind} #{index} is gone")]
    Dangling { kind: EntityKind, index: u32 },
}

/// Structured channel for configuration diagnostics.
///
/// Every pushed entry is also logged at warn level, so callers that never
/// inspect the channel still see the problem in the log.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<ConfigError>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ConfigError) {
        warn!("{}", error);
        self.entries.push(error);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.entries.iter()
    }

    /// Move all entries of `other` into this channel without logging them again
    pub fn absorb(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_collects_entries() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());

        diags.push(ConfigError::UnknownMethod {
            method: "fuzzy".to_string(),
        });
        diags.push(ConfigError::IncompleteStreamRule);

        assert_eq!(diags.len(), 2);
        assert!(matches!(
            diags.iter().next(),
            Some(ConfigError::UnknownMethod { method }) if method == "fuzzy"
        ));
    }

    #[test]
    fn test_absorb_keeps_order() {
        let mut first = Diagnostics::new();
        first.push(ConfigError::IncompleteStreamRule);
        let mut second = Diagnostics::new();
        second.push(ConfigError::CaptureGroups {
            pattern: "(a)".to_string(),
        });

        first.absorb(second);
        let kinds: Vec<_> = first.iter().cloned().collect();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0], ConfigError::IncompleteStreamRule);
    }

    #[test]
    fn test_action_error_display() {
        let err = ActionError::Unbound {
            kind: EntityKind::Card,
            pattern: "pci-card0".to_string(),
        };
        assert_eq!(err.to_string(), "no card bound for selector 'pci-card0'");
    }
}
