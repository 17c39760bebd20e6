//! Warp rules: property changes driven by other values.
//!
//! A warpable element follows one or more master leaves through named
//! variables. Whenever a master changes, the first rule whose condition
//! holds over the variables is applied to the element: a warped node gets
//! its concrete class from the rule, a warped leaf gets a replacement
//! value spec, and any element may have its level or status adjusted.

use crate::schema::class::{Level, Status};
use crate::schema::value::ValueSpec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Property overrides applied when a warp rule matches.
#[derive(Debug, Clone, Default)]
pub struct WarpEffects {
    /// Concrete class for a warped node.
    pub node_class: Option<String>,
    /// Replacement spec for a warped leaf.
    pub value: Option<Arc<ValueSpec>>,
    /// Level override.
    pub level: Option<Level>,
    /// Status override.
    pub status: Option<Status>,
}

/// One rule: a conjunction over warp variables and the effects to apply.
///
/// An empty condition matches unconditionally, which makes it a natural
/// final rule.
#[derive(Debug, Clone)]
pub struct WarpRule {
    /// Variable name to required value; all must hold.
    pub condition: Vec<(String, String)>,
    /// The overrides applied when the condition holds.
    pub effects: WarpEffects,
}

impl WarpRule {
    /// Whether the condition holds over the given variable values.
    ///
    /// A variable whose master resolved to nothing never satisfies an
    /// equality requirement.
    #[must_use]
    pub fn matches(&self, values: &BTreeMap<String, Option<String>>) -> bool {
        self.condition.iter().all(|(var, expected)| {
            values
                .get(var)
                .and_then(Option::as_ref)
                .is_some_and(|v| v == expected)
        })
    }
}

/// The warp declaration of one element: followed masters and the ordered
/// rules table.
#[derive(Debug, Clone)]
pub struct WarpSpec {
    /// Variable name to master leaf path.
    pub follow: Vec<(String, String)>,
    /// Ordered rules; the first match wins.
    pub rules: Vec<WarpRule>,
}

impl WarpSpec {
    /// Creates a warp spec following the given masters.
    #[must_use]
    pub fn new(follow: &[(&str, &str)]) -> Self {
        Self {
            follow: follow
                .iter()
                .map(|(v, p)| ((*v).to_string(), (*p).to_string()))
                .collect(),
            rules: Vec::new(),
        }
    }

    /// Appends a rule; rules are evaluated in insertion order.
    #[must_use]
    pub fn rule(mut self, condition: &[(&str, &str)], effects: WarpEffects) -> Self {
        self.rules.push(WarpRule {
            condition: condition
                .iter()
                .map(|(v, e)| ((*v).to_string(), (*e).to_string()))
                .collect(),
            effects,
        });
        self
    }

    /// Picks the first rule whose condition holds, if any.
    #[must_use]
    pub fn select<'a>(
        &'a self,
        values: &BTreeMap<String, Option<String>>,
    ) -> Option<&'a WarpEffects> {
        self.rules
            .iter()
            .find(|rule| rule.matches(values))
            .map(|rule| &rule.effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let spec = WarpSpec::new(&[("f1", "- family")])
            .rule(
                &[("f1", "old")],
                WarpEffects {
                    node_class: Some("OldStyle".to_string()),
                    ..WarpEffects::default()
                },
            )
            .rule(
                &[],
                WarpEffects {
                    node_class: Some("NewStyle".to_string()),
                    ..WarpEffects::default()
                },
            );

        let selected = spec.select(&values(&[("f1", Some("old"))])).unwrap();
        assert_eq!(selected.node_class.as_deref(), Some("OldStyle"));

        let selected = spec.select(&values(&[("f1", Some("anything"))])).unwrap();
        assert_eq!(selected.node_class.as_deref(), Some("NewStyle"));
    }

    #[test]
    fn test_unset_master_never_matches_equality() {
        let spec = WarpSpec::new(&[("f1", "- family")]).rule(
            &[("f1", "old")],
            WarpEffects::default(),
        );
        assert!(spec.select(&values(&[("f1", None)])).is_none());
    }

    #[test]
    fn test_conjunction_requires_all() {
        let spec = WarpSpec::new(&[("a", "- a"), ("b", "- b")]).rule(
            &[("a", "1"), ("b", "2")],
            WarpEffects::default(),
        );
        assert!(spec
            .select(&values(&[("a", Some("1")), ("b", Some("2"))]))
            .is_some());
        assert!(spec
            .select(&values(&[("a", Some("1")), ("b", Some("3"))]))
            .is_none());
    }
}
