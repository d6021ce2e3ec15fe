// Handler contracts - the runtime implementations behind rule modules

//! # Handler Contracts
//!
//! A module declaration names a module type; a **handler** is the runtime
//! implementation of that module's behavior. Handlers are produced by
//! [`ModuleHandlerFactory`] implementations that claim one or more system
//! module-type UIDs, and every handler the engine requests is returned to
//! its factory on teardown.
//!
//! ## Lifetime
//!
//! Handlers are bound 1:1 to a module instance within one rule activation.
//! Rebinding (after an update, a factory change, an enable) produces fresh
//! handler instances; a released handler is never reattached.
//!
//! ## Threading
//!
//! Trigger handlers fire from whatever task or thread they own; the
//! callback they receive is safe to call from anywhere. Condition and
//! action handlers are async and may block or await for as long as they
//! need; the engine holds no lock while they run.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{ModuleInstance, ModuleKind};
use crate::Result;

/// The engine-side bridge handed to every trigger handler
///
/// Calling [`triggered`](RuleEngineCallback::triggered) schedules one rule
/// execution carrying the firing trigger's module id and its output
/// values. The reference is non-owning; after the rule is torn down the
/// callback swallows firings.
pub trait RuleEngineCallback: Send + Sync {
    fn triggered(&self, trigger_id: &str, outputs: HashMap<String, Value>);
}

/// Runtime implementation of a trigger module
///
/// Implementations keep the callback behind interior mutability; the
/// engine installs it right after binding and clears it on teardown.
pub trait TriggerHandler: Send + Sync {
    /// Install the engine callback this handler fires into
    fn set_callback(&self, callback: Arc<dyn RuleEngineCallback>);

    /// Drop the callback reference; subsequent events must not fire it
    fn clear_callback(&self);
}

/// Runtime implementation of a condition module
#[async_trait::async_trait]
pub trait ConditionHandler: Send + Sync {
    /// Evaluate against the merged snapshot of resolved inputs and the
    /// rule's execution context
    async fn is_satisfied(&self, inputs: &HashMap<String, Value>) -> Result<bool>;
}

/// Runtime implementation of an action module
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action. A returned map is published into the execution
    /// context as `<moduleId>.<outputName>` entries visible to subsequent
    /// actions.
    async fn execute(
        &self,
        inputs: &HashMap<String, Value>,
    ) -> Result<Option<HashMap<String, Value>>>;
}

/// A typed handler reference, one variant per module role
#[derive(Clone)]
pub enum ModuleHandler {
    Trigger(Arc<dyn TriggerHandler>),
    Condition(Arc<dyn ConditionHandler>),
    Action(Arc<dyn ActionHandler>),
}

impl ModuleHandler {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleHandler::Trigger(_) => ModuleKind::Trigger,
            ModuleHandler::Condition(_) => ModuleKind::Condition,
            ModuleHandler::Action(_) => ModuleKind::Action,
        }
    }

    pub fn as_trigger(&self) -> Option<&Arc<dyn TriggerHandler>> {
        match self {
            ModuleHandler::Trigger(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn as_condition(&self) -> Option<&Arc<dyn ConditionHandler>> {
        match self {
            ModuleHandler::Condition(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Arc<dyn ActionHandler>> {
        match self {
            ModuleHandler::Action(handler) => Some(handler),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ModuleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModuleHandler::{}", self.kind())
    }
}

/// A provider of handlers for one or more system module types
///
/// Factories appear and disappear at runtime; the engine tracks them via
/// the factory bus or the direct `add_handler_factory` /
/// `remove_handler_factory` entry points and re-drives affected rules on
/// every change.
pub trait ModuleHandlerFactory: Send + Sync {
    /// The system module-type UIDs this factory serves
    fn module_types(&self) -> Vec<String>;

    /// Produce a handler for the given module within the given rule.
    /// `None` means the factory cannot serve this module; the engine
    /// records a binding error for it.
    fn get_handler(&self, module: &ModuleInstance, rule_uid: &str) -> Option<ModuleHandler>;

    /// Take a previously produced handler back. Called exactly once per
    /// handler on rule teardown.
    fn unget_handler(&self, module: &ModuleInstance, rule_uid: &str, handler: ModuleHandler);
}
