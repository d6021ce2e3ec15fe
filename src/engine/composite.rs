// Composite handler factory - custom-over-system module types

//! # Composite Handler Factory
//!
//! Module types with a composite UID (`system:custom`) are never served by
//! a factory registered for the full UID. The engine owns a single
//! composite factory that materializes their handlers: it layers the
//! module's configuration over the custom type's fixed defaults, rewrites
//! the type UID to the system parent, and requests the handler from the
//! factory registered for the parent.
//!
//! The parent-typed module view it builds is also what gets handed back on
//! `unget_handler`, so the parent factory always sees the same shape on
//! both sides of the handler lifetime.

use std::sync::Arc;

use crate::handler::{ModuleHandler, ModuleHandlerFactory};
use crate::models::{system_parent_of, ModuleInstance, ModuleType};

pub(crate) struct CompositeHandlerFactory;

impl CompositeHandlerFactory {
    /// Compose a handler for a custom-typed module. Returns the
    /// parent-typed module view used for the request alongside the
    /// factory's answer.
    pub fn get_handler(
        &self,
        module: &ModuleInstance,
        rule_uid: &str,
        custom_type: &ModuleType,
        parent_factory: &Arc<dyn ModuleHandlerFactory>,
    ) -> (ModuleInstance, Option<ModuleHandler>) {
        let mut configuration = custom_type.defaults.clone();
        configuration.extend(module.configuration.clone());

        let inner = ModuleInstance {
            kind: module.kind,
            id: module.id.clone(),
            type_uid: system_parent_of(&module.type_uid).to_string(),
            configuration,
        };
        let handler = parent_factory.get_handler(&inner, rule_uid);
        (inner, handler)
    }
}
