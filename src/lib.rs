// Homeflow - a home-automation rule engine
// Rules compose triggers, conditions and actions; handlers arrive at runtime

//! # Homeflow Library
//!
//! Homeflow is the rule-engine core of a home-automation runtime. Users
//! register declarative rules; the engine binds each rule's modules to
//! handler implementations discovered at runtime, tracks readiness as
//! handlers and type definitions come and go, evaluates rules when
//! triggers fire, and reports status changes to observers.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`Rule`]: an ordered composition of triggers, conditions and actions
//! - [`Trigger`] / [`Condition`] / [`Action`]: the module declarations
//! - [`Connection`]: a directed link from a source module's output to an
//!   input, turning each rule into a small dataflow graph
//! - [`ModuleType`]: the schema behind a module-type UID
//! - [`RuleTemplate`]: a reusable rule body parametrized by configuration
//! - [`RuleStatusInfo`]: status plus detail code plus message
//!
//! ### Engine
//!
//! [`RuleEngine`] is the registry and orchestrator. Each rule moves
//! through a four-state machine:
//!
//! ```text
//!            bind ok                 trigger fires
//! NOT_INITIALIZED ----> IDLE <-------------------> RUNNING
//!        ^               |        run finished
//!        |   teardown    |
//!        +---------------+        (DISABLED reachable from anywhere)
//! ```
//!
//! Binding re-runs automatically whenever a handler factory, module type
//! or template appears; a disappearing factory tears the dependent rules
//! back down to `NOT_INITIALIZED`.
//!
//! ### Handler Contracts
//!
//! [`ModuleHandlerFactory`] implementations claim system module-type UIDs
//! and produce [`TriggerHandler`] / [`ConditionHandler`] /
//! [`ActionHandler`] instances on demand. Custom module types with a
//! composite UID (`system:custom`) are materialized by the engine's own
//! composite factory on top of the system parent's factory.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use homeflow::{
//!     models::{Action, Connection, Rule, Trigger},
//!     registry::{HandlerFactoryBus, InMemoryModuleTypeProvider, InMemoryTemplateProvider},
//!     RuleEngine,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> homeflow::Result<()> {
//! let module_types = Arc::new(InMemoryModuleTypeProvider::new());
//! let templates = Arc::new(InMemoryTemplateProvider::new());
//! let factories = HandlerFactoryBus::new();
//!
//! let engine = RuleEngine::new(module_types, templates);
//! engine.start(factories.subscribe());
//!
//! let rule = Rule::new()
//!     .with_trigger(Trigger::new("motion", "sensor.motion"))
//!     .with_action(
//!         Action::new("light", "light.on")
//!             .with_connection(Connection::new("device", "motion", "device_id")),
//!     );
//! let uid = engine.add(rule)?;
//! println!("registered {uid}");
//! # Ok(())
//! # }
//! ```

// Declarative domain models (rules, modules, types, templates, status)
pub mod models;

// Handler and factory contracts implemented by module providers
pub mod handler;

// Registry contracts and in-memory reference implementations
pub mod registry;

// The engine: rule store, binder, executor, watcher, status machine
pub mod engine;

// Re-export the core types for a flat API
pub use engine::{ids::RULE_UID_PREFIX, RuleEngine, StatusObserver};
pub use handler::{
    ActionHandler, ConditionHandler, ModuleHandler, ModuleHandlerFactory, RuleEngineCallback,
    TriggerHandler,
};
pub use models::{
    Action, Condition, Connection, ModuleInstance, ModuleKind, ModuleType, Rule, RuleStatus,
    RuleStatusInfo, RuleTemplate, StatusDetail, Trigger,
};
pub use registry::{
    FactoryEvent, HandlerFactoryBus, InMemoryModuleTypeProvider, InMemoryTemplateProvider,
    ModuleTypeRegistry, RegistryEvent, TemplateRegistry,
};

// Core error types
use thiserror::Error;

/// Error type for every fallible engine operation
///
/// Binding problems are not errors: they surface as status details on the
/// affected rule. Errors are reserved for illegal API use and for handler
/// implementations reporting failure.
#[derive(Error, Debug)]
pub enum HomeflowError {
    /// The UID does not name a registered rule
    #[error("rule not found: {uid}")]
    RuleNotFound { uid: String },

    /// `add` was called with a UID that is already taken
    #[error("rule already exists: {uid}")]
    DuplicateRule { uid: String },

    /// The rule violates a structural requirement (empty type UID,
    /// duplicate module id)
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Template substitution hit an unresolvable reference
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The engine was disposed; mutations are no longer accepted
    #[error("rule engine has been disposed")]
    EngineDisposed,

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failures reported by handler implementations
    #[error("handler error: {0}")]
    Handler(#[from] anyhow::Error),

    /// Internal invariant violations
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, HomeflowError>;
