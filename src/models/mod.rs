// Core domain models for the rule engine
// These are the declarative data structures users register and query

//! # Domain Models Module
//!
//! This module contains the declarative data model of the rule engine:
//! rules and their modules, the module-type schemas, rule templates and
//! the status types reported to observers.
//!
//! Everything here is plain data: serde-serializable, `Clone` for the
//! defensive copies the engine exchanges across its boundary, and free of
//! runtime state. Handlers, factories and the engine's activation records
//! live elsewhere.

// Trigger/Condition/Action declarations and connections
pub mod module;

// Module-type schemas and composite type UID parsing
pub mod module_type;

// The Rule aggregate
pub mod rule;

// Per-rule status, detail codes and status-info bundles
pub mod status;

// Reusable rule bodies
pub mod template;

// Re-export the main types for convenience
pub use module::{Action, Condition, Connection, ModuleInstance, ModuleKind, Trigger};
pub use module_type::{
    custom_part_of, is_custom_type, system_parent_of, ConfigDescriptor, Input, ModuleType, Output,
    TYPE_UID_SEPARATOR,
};
pub use rule::Rule;
pub use status::{RuleStatus, RuleStatusInfo, StatusDetail};
pub use template::RuleTemplate;
