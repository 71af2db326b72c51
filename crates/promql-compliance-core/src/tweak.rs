//! Per-target query rewriting.
//!
//! A [`QueryTweak`] is a declared `(match_pattern, replacement, applies_to)`
//! rule that compensates for a known syntax gap in one target. Rules are
//! applied as plain text substitutions in declaration order, so when two rules
//! touch the same text the later one has the final say. The tweaker never
//! looks at the semantic structure of a query.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Target;

/// Which targets a tweak rewrites queries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TweakTarget {
    Reference,
    #[default]
    Test,
    Both,
}

impl TweakTarget {
    #[must_use]
    pub const fn covers(self, target: Target) -> bool {
        matches!(
            (self, target),
            (Self::Both, _)
                | (Self::Reference, Target::Reference)
                | (Self::Test, Target::Test)
        )
    }
}

/// A declared rewrite rule, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTweak {
    /// Free-form explanation shown next to affected results.
    #[serde(default)]
    pub note: String,
    /// Regular expression matched against query substrings.
    pub match_pattern: String,
    /// Replacement text; `$1`/`${name}` expand capture groups.
    pub replacement: String,
    #[serde(default)]
    pub applies_to: TweakTarget,
    /// The divergence this tweak papers over is expected behavior, not a bug
    /// in the system under test.
    #[serde(default)]
    pub no_bug: bool,
}

#[derive(Debug, Clone)]
struct CompiledTweak {
    pattern: Regex,
    replacement: String,
    applies_to: TweakTarget,
}

/// Ordered, compiled tweak rules.
#[derive(Debug, Clone, Default)]
pub struct QueryTweaker {
    rules: Vec<CompiledTweak>,
}

impl QueryTweaker {
    /// Compile the declared rules, keeping their declaration order.
    pub fn new(tweaks: &[QueryTweak]) -> Result<Self, ConfigError> {
        let rules = tweaks
            .iter()
            .enumerate()
            .map(|(index, tweak)| {
                let pattern = Regex::new(&tweak.match_pattern).map_err(|err| {
                    ConfigError::InvalidTweakPattern {
                        index,
                        pattern: tweak.match_pattern.clone(),
                        reason: err.to_string(),
                    }
                })?;
                Ok(CompiledTweak {
                    pattern,
                    replacement: tweak.replacement.clone(),
                    applies_to: tweak.applies_to,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite `query` for `target`. The empty rule set is the identity.
    #[must_use]
    pub fn apply(&self, query: &str, target: Target) -> String {
        let mut rewritten = query.to_string();
        for rule in self.rules.iter().filter(|r| r.applies_to.covers(target)) {
            let next = rule
                .pattern
                .replace_all(&rewritten, rule.replacement.as_str())
                .into_owned();
            if next != rewritten {
                tracing::trace!(target_side = %target, pattern = %rule.pattern, "query tweak applied");
            }
            rewritten = next;
        }
        rewritten
    }
}
