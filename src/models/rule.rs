// Rules - declarative trigger/condition/action compositions

//! # Rules
//!
//! A [`Rule`] is the unit users register with the engine: an ordered
//! sequence of triggers, conditions and actions, a configuration map, a
//! tag set and an optional template reference.
//!
//! Rules are **declarative**. Registering one hands the engine a deep
//! copy; the engine binds handlers to the copy and never shares state back
//! through the object the caller kept. `get` likewise returns defensive
//! copies.
//!
//! ## Example
//!
//! ```rust
//! use homeflow::models::{Action, Connection, Rule, Trigger};
//! use serde_json::json;
//!
//! let rule = Rule::new()
//!     .with_name("hallway light")
//!     .with_trigger(Trigger::new("motion", "sensor.motion"))
//!     .with_action(
//!         Action::new("light", "light.on")
//!             .with_config("brightness", json!(60))
//!             .with_connection(Connection::new("device", "motion", "device_id")),
//!     )
//!     .with_tag("hallway");
//! assert!(rule.uid.is_none());
//! ```
//!
//! A rule may instead reference a [template](crate::models::RuleTemplate)
//! by UID and supply only configuration; the engine expands the template
//! into concrete modules on registration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::module::{Action, Condition, Trigger};

/// A user-defined automation rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule UID; `None` asks the engine to generate one on add
    #[serde(default)]
    pub uid: Option<String>,

    /// Template this rule is derived from, if any
    #[serde(default)]
    pub template_uid: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub triggers: Vec<Trigger>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub actions: Vec<Action>,

    /// Option name to value; also the substitution source for `${name}`
    /// references when the rule is template-bound
    #[serde(default)]
    pub configuration: HashMap<String, Value>,

    /// May be empty, never semantically "null"
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule with a caller-chosen UID
    pub fn with_uid<U: Into<String>>(uid: U) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    /// A template-bound rule: concrete modules are derived on registration
    pub fn from_template<T: Into<String>>(
        template_uid: T,
        configuration: HashMap<String, Value>,
    ) -> Self {
        Self {
            template_uid: Some(template_uid.into()),
            configuration,
            ..Self::default()
        }
    }

    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
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

    pub fn with_config<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Any-of match against a tag set
    pub fn matches_any_tag<'a, I: IntoIterator<Item = &'a String>>(&self, tags: I) -> bool {
        tags.into_iter().any(|tag| self.tags.contains(tag))
    }

    /// Ids of all modules, in trigger, condition, action order
    pub fn module_ids(&self) -> Vec<&str> {
        self.triggers
            .iter()
            .map(|module| module.id.as_str())
            .chain(self.conditions.iter().map(|module| module.id.as_str()))
            .chain(self.actions.iter().map(|module| module.id.as_str()))
            .collect()
    }
}
