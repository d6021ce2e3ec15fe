// Rule modules - the trigger/condition/action building blocks of a rule

//! # Rule Modules
//!
//! A rule is composed of **modules**: triggers that start an evaluation,
//! conditions that gate it, and actions that run when the gate passes.
//! Each module carries a module-type UID that names its schema and the
//! handler factory responsible for it, plus a configuration map.
//!
//! Conditions and actions additionally declare **connections**: directed
//! links from another module's named output to one of their named inputs.
//! Connections are what turn a rule into a small dataflow graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The three module roles a rule is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    Trigger,
    Condition,
    Action,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Trigger => write!(f, "trigger"),
            ModuleKind::Condition => write!(f, "condition"),
            ModuleKind::Action => write!(f, "action"),
        }
    }
}

/// A directed link from a source module's named output to an input
///
/// `input` names an input declared by the module type of the module that
/// owns the connection. `source_module` is the id of another module in the
/// same rule, and `output` names one of that module's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub input: String,
    pub source_module: String,
    pub output: String,
}

impl Connection {
    pub fn new<I, S, O>(input: I, source_module: S, output: O) -> Self
    where
        I: Into<String>,
        S: Into<String>,
        O: Into<String>,
    {
        Self {
            input: input.into(),
            source_module: source_module.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- {}.{}", self.input, self.source_module, self.output)
    }
}

/// A trigger module declaration
///
/// Triggers start rule evaluation. Their named outputs are declared by the
/// module type; the values arrive with each firing and are published into
/// the rule's execution context as `<id>.<outputName>` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Module id, unique within the owning rule
    pub id: String,

    /// Module-type UID, plain (`timer`) or composite custom (`timer:sunrise`)
    pub type_uid: String,

    /// Configuration handed to the handler factory
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
}

impl Trigger {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, type_uid: T) -> Self {
        Self {
            id: id.into(),
            type_uid: type_uid.into(),
            configuration: HashMap::new(),
        }
    }

    /// Add a configuration entry, consuming and returning self for chaining
    pub fn with_config<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }
}

/// A condition module declaration
///
/// Conditions gate the action pipeline. Their inputs are fed through the
/// declared connections; evaluation stops at the first unsatisfied
/// condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub type_uid: String,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Condition {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, type_uid: T) -> Self {
        Self {
            id: id.into(),
            type_uid: type_uid.into(),
            configuration: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_config<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }
}

/// An action module declaration
///
/// Actions run in declared order once every condition is satisfied. An
/// action may produce named outputs of its own; those are published into
/// the execution context and are visible to subsequent actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub type_uid: String,
    #[serde(default)]
    pub configuration: HashMap<String, Value>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Action {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, type_uid: T) -> Self {
        Self {
            id: id.into(),
            type_uid: type_uid.into(),
            configuration: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_config<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }
}

/// Runtime view of a module handed to handler factories
///
/// This is the merged form the engine builds when it requests a handler:
/// for plain modules it mirrors the declaration, for composite custom
/// types it carries the system parent type UID and the configuration
/// layered over the custom type's defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInstance {
    pub kind: ModuleKind,
    pub id: String,
    pub type_uid: String,
    pub configuration: HashMap<String, Value>,
}

impl ModuleInstance {
    pub fn new<I: Into<String>, T: Into<String>>(kind: ModuleKind, id: I, type_uid: T) -> Self {
        Self {
            kind,
            id: id.into(),
            type_uid: type_uid.into(),
            configuration: HashMap::new(),
        }
    }
}
