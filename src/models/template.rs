// Rule templates - reusable rule bodies parametrized by configuration

//! # Rule Templates
//!
//! A template is a named, reusable rule body. A rule that references a
//! template supplies only configuration; on registration the engine clones
//! the template's modules and substitutes `${name}` references inside
//! their configurations with the rule's configuration values.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::module::{Action, Condition, Trigger};
use super::module_type::ConfigDescriptor;

/// A reusable rule body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub uid: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Configuration keys a deriving rule is expected to supply
    #[serde(default)]
    pub config_descriptors: Vec<ConfigDescriptor>,
    /// Tags merged into every rule derived from this template
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl RuleTemplate {
    pub fn new<U: Into<String>>(uid: U) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_descriptor(mut self, descriptor: ConfigDescriptor) -> Self {
        self.config_descriptors.push(descriptor);
        self
    }

    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.insert(tag.into());
        self
    }
}
