//! String predicates used by every rule table
//!
//! A [`MatchRule`] is one of `equals`, `startswith`, `matches` (whole-string
//! regex) or `true`. Absent attributes are probed as [`UNKNOWN`] so rule
//! authors can match them on purpose.

use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Diagnostics};

/// Probe value used when an attribute is absent
pub const UNKNOWN: &str = "<unknown>";

/// How a [`MatchRule`] compares its pattern to a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMethod {
    Equals,
    StartsWith,
    Regex,
    True,
}

impl MatchMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::StartsWith => "startswith",
            Self::Regex => "matches",
            Self::True => "true",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(Self::Equals),
            "startswith" | "starts-with" => Ok(Self::StartsWith),
            "matches" | "regex" => Ok(Self::Regex),
            "true" => Ok(Self::True),
            other => Err(ConfigError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Pattern {
    Any,
    Text(String),
    Regex {
        source: String,
        compiled: Regex,
        has_groups: bool,
    },
}

/// A predicate over a single string value
#[derive(Debug, Clone)]
pub struct MatchRule {
    method: MatchMethod,
    pattern: Pattern,
}

impl MatchRule {
    #[must_use]
    pub fn equals(value: impl Into<String>) -> Self {
        Self {
            method: MatchMethod::Equals,
            pattern: Pattern::Text(value.into()),
        }
    }

    #[must_use]
    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Self {
            method: MatchMethod::StartsWith,
            pattern: Pattern::Text(prefix.into()),
        }
    }

    /// Match-all rule
    #[must_use]
    pub fn always() -> Self {
        Self {
            method: MatchMethod::True,
            pattern: Pattern::Any,
        }
    }

    /// Compile a whole-string regex rule.
    ///
    /// The pattern is compiled as written; [`MatchRule::matches`] accepts a
    /// value only when the leftmost match spans all of it.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidRegex`] if the pattern does not compile.
    pub fn regex(pattern: &str) -> Result<Self, ConfigError> {
        let compiled = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let has_groups = compiled.captures_len() > 1;

        Ok(Self {
            method: MatchMethod::Regex,
            pattern: Pattern::Regex {
                source: pattern.to_string(),
                compiled,
                has_groups,
            },
        })
    }

    /// Build a rule from a method name and its argument.
    ///
    /// Unknown methods and broken regexes degrade to [`MatchRule::always`];
    /// the problem is pushed into `diags`.
    pub fn parse(method: &str, argument: &str, diags: &mut Diagnostics) -> Self {
        match method.parse::<MatchMethod>() {
            Ok(method) => Self::with_method(method, argument, diags),
            Err(e) => {
                diags.push(e);
                Self::always()
            }
        }
    }

    /// Build a rule for an already known method, degrading a bad regex to match-all.
    pub fn with_method(method: MatchMethod, argument: &str, diags: &mut Diagnostics) -> Self {
        match method {
            MatchMethod::Equals => Self::equals(argument),
            MatchMethod::StartsWith => Self::starts_with(argument),
            MatchMethod::True => Self::always(),
            MatchMethod::Regex => match Self::regex(argument) {
                Ok(rule) => {
                    if let Pattern::Regex {
                        has_groups: true, ..
                    } = rule.pattern
                    {
                        diags.push(ConfigError::CaptureGroups {
                            pattern: argument.to_string(),
                        });
                    }
                    rule
                }
                Err(e) => {
                    diags.push(e);
                    Self::always()
                }
            },
        }
    }

    #[must_use]
    pub fn method(&self) -> MatchMethod {
        self.method
    }

    /// The pattern text as configured (empty for match-all)
    #[must_use]
    pub fn argument(&self) -> &str {
        match &self.pattern {
            Pattern::Any => "",
            Pattern::Text(text) => text,
            Pattern::Regex { source, .. } => source,
        }
    }

    /// Test `value` against this rule. `None` is probed as [`UNKNOWN`].
    #[must_use]
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or(UNKNOWN);
        match &self.pattern {
            Pattern::Any => true,
            Pattern::Text(text) => match self.method {
                MatchMethod::StartsWith => value.starts_with(text.as_str()),
                _ => value == text,
            },
            Pattern::Regex {
                compiled,
                has_groups,
                ..
            } => {
                !has_groups
                    && compiled
                        .find(value)
                        .is_some_and(|m| m.start() == 0 && m.end() == value.len())
            }
        }
    }
}

impl PartialEq for MatchRule {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.argument() == other.argument()
    }
}

impl Eq for MatchRule {}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            MatchMethod::True => f.write_str("true"),
            method => write!(f, "{method}:{}", self.argument()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("alsa_output.0", "alsa_output.0", true ; "identical")]
    #[test_case("alsa_output.0", "alsa_output.01", false ; "longer value")]
    #[test_case("alsa_output.0", "alsa_output", false ; "prefix only")]
    #[test_case("<unknown>", "<unknown>", true ; "sentinel")]
    fn test_equals(pattern: &str, value: &str, expected: bool) {
        assert_eq!(MatchRule::equals(pattern).matches(Some(value)), expected);
    }

    #[test_case("alsa_output.", "alsa_output.0", true ; "prefix")]
    #[test_case("alsa_output.", "alsa_output.", true ; "whole")]
    #[test_case("alsa_output.", "bluez_sink.0", false ; "other")]
    #[test_case("", "anything", true ; "empty prefix")]
    fn test_starts_with(pattern: &str, value: &str, expected: bool) {
        assert_eq!(MatchRule::starts_with(pattern).matches(Some(value)), expected);
    }

    #[test_case("alsa_output.*", "alsa_output.0", true ; "wildcard")]
    #[test_case("output", "alsa_output.0", false ; "substring is not enough")]
    #[test_case("(?i)HEADSET", "headset", true ; "inline flag")]
    #[test_case("a|b", "b", true ; "alternation is anchored as a whole")]
    #[test_case("a|b", "ab", false ; "alternation no partial")]
    #[test_case("ab|a", "ab", true ; "longer alternative first")]
    #[test_case("^alsa", "alsa_output", false ; "explicit anchor still needs the whole value")]
    #[test_case("", "", true ; "empty pattern matches empty value")]
    fn test_regex_is_full_match(pattern: &str, value: &str, expected: bool) {
        let rule = MatchRule::regex(pattern).unwrap();
        assert_eq!(rule.matches(Some(value)), expected);
    }

    #[test]
    fn test_capture_group_never_matches() {
        let mut diags = Diagnostics::new();
        let rule = MatchRule::parse("matches", "(alsa)_output.*", &mut diags);

        assert!(!rule.matches(Some("alsa_output.0")));
        assert_eq!(diags.len(), 1);
        assert!(matches!(
            diags.iter().next(),
            Some(ConfigError::CaptureGroups { .. })
        ));
    }

    #[test]
    fn test_non_capturing_group_is_allowed() {
        let rule = MatchRule::regex("(?:alsa|bluez)_output.*").unwrap();
        assert!(rule.matches(Some("bluez_output.1")));
    }

    #[test]
    fn test_bad_regex_degrades_to_true() {
        let mut diags = Diagnostics::new();
        let rule = MatchRule::parse("matches", "alsa_output.(", &mut diags);

        assert_eq!(rule.method(), MatchMethod::True);
        assert!(rule.matches(Some("anything at all")));
        assert!(matches!(
            diags.iter().next(),
            Some(ConfigError::InvalidRegex { pattern, .. }) if pattern == "alsa_output.("
        ));
    }

    #[test]
    fn test_unbalanced_group_is_rejected_not_spliced() {
        assert!(MatchRule::regex("a)|(?:b").is_err());

        let mut diags = Diagnostics::new();
        let rule = MatchRule::parse("matches", "a)|(?:b", &mut diags);
        assert_eq!(rule.method(), MatchMethod::True);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_unknown_method_degrades_to_true() {
        let mut diags = Diagnostics::new();
        let rule = MatchRule::parse("contains", "foo", &mut diags);

        assert_eq!(rule.method(), MatchMethod::True);
        assert!(rule.matches(None));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_absent_value_matches_as_unknown() {
        assert!(MatchRule::equals(UNKNOWN).matches(None));
        assert!(!MatchRule::equals("alsa").matches(None));
        assert!(MatchRule::starts_with("<unk").matches(None));
    }

    #[test]
    fn test_equality_uses_method_and_argument() {
        assert_eq!(MatchRule::equals("a"), MatchRule::equals("a"));
        assert_ne!(MatchRule::equals("a"), MatchRule::starts_with("a"));
        assert_eq!(
            MatchRule::regex("a.*").unwrap(),
            MatchRule::regex("a.*").unwrap()
        );
    }

    #[test]
    fn test_method_parsing_aliases() {
        assert_eq!("starts-with".parse::<MatchMethod>(), Ok(MatchMethod::StartsWith));
        assert_eq!("regex".parse::<MatchMethod>(), Ok(MatchMethod::Regex));
        assert!("nope".parse::<MatchMethod>().is_err());
    }
}
