// Module types - schemas for the modules a rule can reference

//! # Module Types
//!
//! A module type describes what a module of that type looks like: which
//! configuration keys it understands, which named inputs it consumes and
//! which named outputs it produces. The engine consults module types when
//! it validates the connections of a freshly bound rule.
//!
//! ## Type UIDs
//!
//! Two UID shapes exist:
//!
//! - **System**: a plain UID such as `timer`. The handler factory that
//!   claims `timer` is responsible for modules of this type.
//! - **Composite custom**: `timer:sunrise`. The portion before the `:`
//!   separator names the system parent; the engine routes such modules
//!   through its composite factory, which layers the custom type's fixed
//!   configuration under the module's own and delegates to the parent's
//!   factory.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::module::ModuleKind;

/// Separator between the system parent and the custom part of a type UID
pub const TYPE_UID_SEPARATOR: char = ':';

/// The system parent half of a type UID
///
/// For `timer:sunrise` this is `timer`; for a plain `timer` it is the
/// whole UID.
pub fn system_parent_of(type_uid: &str) -> &str {
    match type_uid.find(TYPE_UID_SEPARATOR) {
        Some(index) => &type_uid[..index],
        None => type_uid,
    }
}

/// The custom half of a composite type UID, if any
pub fn custom_part_of(type_uid: &str) -> Option<&str> {
    type_uid
        .find(TYPE_UID_SEPARATOR)
        .map(|index| &type_uid[index + 1..])
}

/// True when the UID has a custom part (`system:custom` shape)
pub fn is_custom_type(type_uid: &str) -> bool {
    type_uid.contains(TYPE_UID_SEPARATOR)
}

/// A named input declared by a condition or action type
///
/// An empty `type_name` means the input accepts any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    #[serde(default)]
    pub type_name: String,
}

impl Input {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, type_name: T) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn untyped<N: Into<String>>(name: N) -> Self {
        Self::new(name, "")
    }
}

/// A named output declared by a trigger or action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(default)]
    pub type_name: String,
}

impl Output {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, type_name: T) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn untyped<N: Into<String>>(name: N) -> Self {
        Self::new(name, "")
    }
}

/// A configuration key a module type understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ConfigDescriptor {
    pub fn new<N: Into<String>>(name: N, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            default: None,
        }
    }
}

/// Schema for one module type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleType {
    pub uid: String,
    pub kind: ModuleKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config_descriptors: Vec<ConfigDescriptor>,
    /// Inputs, meaningful for condition and action kinds
    #[serde(default)]
    pub inputs: Vec<Input>,
    /// Outputs, meaningful for trigger and action kinds
    #[serde(default)]
    pub outputs: Vec<Output>,
    /// Fixed configuration of a composite custom type, layered under the
    /// module configuration when the composite factory routes to the
    /// system parent
    #[serde(default)]
    pub defaults: HashMap<String, Value>,
}

impl ModuleType {
    pub fn new<U: Into<String>>(uid: U, kind: ModuleKind) -> Self {
        Self {
            uid: uid.into(),
            kind,
            label: None,
            description: None,
            config_descriptors: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            defaults: HashMap::new(),
        }
    }

    pub fn with_label<L: Into<String>>(mut self, label: L) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_descriptor(mut self, descriptor: ConfigDescriptor) -> Self {
        self.config_descriptors.push(descriptor);
        self
    }

    pub fn with_default<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// The system parent half of this type's UID
    pub fn system_parent(&self) -> &str {
        system_parent_of(&self.uid)
    }

    /// True for `system:custom` shaped UIDs
    pub fn is_custom(&self) -> bool {
        is_custom_type(&self.uid)
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|output| output.name == name)
    }
}
