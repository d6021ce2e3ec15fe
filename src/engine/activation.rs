// Rule activations - the engine-owned runtime state behind each rule

//! # Rule Activations
//!
//! The engine never executes the declarative [`Rule`] a caller registered.
//! It keeps one [`RuleActivation`] per rule: the canonical definition (for
//! defensive copies), the runtime modules built from the definition or its
//! template expansion, the handlers bound to them, the accumulated
//! execution context, and the trigger callback.
//!
//! Activations are owned exclusively by the engine and mutated only under
//! the engine lock or, for the execution context, by the single in-flight
//! execution of that rule.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::callback::TriggerCallback;
use super::dataflow::OutputRef;
use crate::handler::ModuleHandler;
use crate::models::{Connection, ModuleInstance, ModuleKind, Rule};

/// One module of an activated rule
pub(crate) struct ActiveModule {
    /// The module as declared, original type UID intact
    pub instance: ModuleInstance,

    pub connections: Vec<Connection>,

    pub handler: Option<ModuleHandler>,

    /// The module view the producing factory saw; differs from `instance`
    /// for composite custom types (parent type UID, merged configuration)
    pub bound_instance: Option<ModuleInstance>,

    /// Key of the producing factory in the engine's factory map
    pub bound_factory_key: Option<String>,

    /// Cached connection resolution, filled on first execution
    pub resolved_inputs: Option<HashMap<String, OutputRef>>,
}

impl ActiveModule {
    fn new(instance: ModuleInstance, connections: Vec<Connection>) -> Self {
        Self {
            instance,
            connections,
            handler: None,
            bound_instance: None,
            bound_factory_key: None,
            resolved_inputs: None,
        }
    }
}

/// Engine-side runtime state of one registered rule
pub(crate) struct RuleActivation {
    pub uid: String,

    /// Canonical copy of the rule as registered; template reference intact
    pub definition: Rule,

    /// Identity of the caller that registered the rule
    pub scope: Option<String>,

    pub triggers: Vec<ActiveModule>,
    pub conditions: Vec<ActiveModule>,
    pub actions: Vec<ActiveModule>,

    /// Engine-wide sequence number of the last module rebuild. An
    /// in-flight execution staged under an older generation discards its
    /// result instead of writing into the replacement activation.
    pub generation: u64,

    /// `<moduleId>.<outputName>` to latest value; accumulates across
    /// firings
    pub context: HashMap<String, Value>,

    pub callback: Option<Arc<TriggerCallback>>,
}

impl RuleActivation {
    pub fn new(uid: String, definition: Rule, scope: Option<String>) -> Self {
        Self {
            uid,
            definition,
            scope,
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            generation: 0,
            context: HashMap::new(),
            callback: None,
        }
    }

    /// Rebuild the runtime modules from a concrete rule body, keeping the
    /// declared order. Existing handlers must have been released first.
    /// `generation` must be unique across every rebuild in the engine.
    pub fn install_modules(&mut self, body: &Rule, generation: u64) {
        self.generation = generation;
        self.triggers = body
            .triggers
            .iter()
            .map(|trigger| {
                let mut instance = ModuleInstance::new(
                    ModuleKind::Trigger,
                    trigger.id.as_str(),
                    trigger.type_uid.as_str(),
                );
                instance.configuration = trigger.configuration.clone();
                ActiveModule::new(instance, Vec::new())
            })
            .collect();

        self.conditions = body
            .conditions
            .iter()
            .map(|condition| {
                let mut instance = ModuleInstance::new(
                    ModuleKind::Condition,
                    condition.id.as_str(),
                    condition.type_uid.as_str(),
                );
                instance.configuration = condition.configuration.clone();
                ActiveModule::new(instance, condition.connections.clone())
            })
            .collect();

        self.actions = body
            .actions
            .iter()
            .map(|action| {
                let mut instance = ModuleInstance::new(
                    ModuleKind::Action,
                    action.id.as_str(),
                    action.type_uid.as_str(),
                );
                instance.configuration = action.configuration.clone();
                ActiveModule::new(instance, action.connections.clone())
            })
            .collect();
    }

    pub fn modules(&self) -> impl Iterator<Item = &ActiveModule> {
        self.triggers
            .iter()
            .chain(self.conditions.iter())
            .chain(self.actions.iter())
    }

    pub fn modules_mut(&mut self) -> impl Iterator<Item = &mut ActiveModule> {
        self.triggers
            .iter_mut()
            .chain(self.conditions.iter_mut())
            .chain(self.actions.iter_mut())
    }

    /// Declared type UIDs of all runtime modules
    pub fn module_type_uids(&self) -> HashSet<String> {
        self.modules()
            .map(|module| module.instance.type_uid.clone())
            .collect()
    }

    /// Ids of the modules that publish output values
    pub fn producer_ids(&self) -> HashSet<String> {
        self.triggers
            .iter()
            .chain(self.actions.iter())
            .map(|module| module.instance.id.clone())
            .collect()
    }
}
