// Registry contracts for module types, templates and handler factories
// These are the dynamic collaborators the engine watches at runtime

//! # Registry Contracts
//!
//! The engine resolves rules against three dynamic sources:
//!
//! - a **module-type registry** holding the schemas modules reference,
//! - a **template registry** holding reusable rule bodies,
//! - the set of **handler factories** currently offering handlers.
//!
//! All three can change at any time. Each source exposes a
//! [`tokio::sync::broadcast`] subscription; the engine's registry watcher
//! consumes those events and re-drives affected rules.
//!
//! ## Reference Implementations
//!
//! [`InMemoryModuleTypeProvider`] and [`InMemoryTemplateProvider`] are
//! thread-safe in-memory stores that emit events on every mutation. They
//! make the engine usable and testable without a host framework; a real
//! deployment can substitute its own providers behind the same traits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::handler::ModuleHandlerFactory;
use crate::models::{ModuleKind, ModuleType, RuleTemplate};

/// Buffer size shared by the reference providers and the factory bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capacity of the broadcast channel carrying registry events
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1000,
        }
    }
}

/// A change in a module-type or template registry, carrying the UID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    Added(String),
    Updated(String),
    Removed(String),
}

impl RegistryEvent {
    pub fn uid(&self) -> &str {
        match self {
            RegistryEvent::Added(uid)
            | RegistryEvent::Updated(uid)
            | RegistryEvent::Removed(uid) => uid,
        }
    }
}

/// Read access plus change notification for module types
pub trait ModuleTypeRegistry: Send + Sync {
    /// Look up a type by UID. `locale` selects translated labels where a
    /// provider carries them; providers without i18n ignore it.
    fn get(&self, uid: &str, locale: Option<&str>) -> Option<ModuleType>;

    /// All types, optionally narrowed to one module kind
    fn get_types(&self, kind: Option<ModuleKind>, locale: Option<&str>) -> Vec<ModuleType>;

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent>;
}

/// Read access plus change notification for rule templates
pub trait TemplateRegistry: Send + Sync {
    fn get(&self, uid: &str) -> Option<RuleTemplate>;

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent>;
}

/// In-memory module-type store emitting an event per mutation
pub struct InMemoryModuleTypeProvider {
    types: RwLock<HashMap<String, ModuleType>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl InMemoryModuleTypeProvider {
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    pub fn with_config(config: &RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            types: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Insert or replace a type; emits `Added` or `Updated` accordingly
    pub fn add(&self, module_type: ModuleType) {
        let uid = module_type.uid.clone();
        let replaced = {
            // Lock poisoning is not recovered from; a panicked writer
            // leaves the registry unusable anyway
            let mut types = self.types.write().unwrap();
            types.insert(uid.clone(), module_type).is_some()
        };
        let event = if replaced {
            RegistryEvent::Updated(uid)
        } else {
            RegistryEvent::Added(uid)
        };
        debug!(event = ?event, "module type registry changed");
        let _ = self.events.send(event);
    }

    pub fn remove(&self, uid: &str) -> bool {
        let removed = {
            let mut types = self.types.write().unwrap();
            types.remove(uid).is_some()
        };
        if removed {
            let _ = self.events.send(RegistryEvent::Removed(uid.to_string()));
        }
        removed
    }
}

impl Default for InMemoryModuleTypeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleTypeRegistry for InMemoryModuleTypeProvider {
    fn get(&self, uid: &str, _locale: Option<&str>) -> Option<ModuleType> {
        let types = self.types.read().unwrap();
        types.get(uid).cloned()
    }

    fn get_types(&self, kind: Option<ModuleKind>, _locale: Option<&str>) -> Vec<ModuleType> {
        let types = self.types.read().unwrap();
        types
            .values()
            .filter(|module_type| kind.map_or(true, |wanted| module_type.kind == wanted))
            .cloned()
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

/// In-memory template store emitting an event per mutation
pub struct InMemoryTemplateProvider {
    templates: RwLock<HashMap<String, RuleTemplate>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl InMemoryTemplateProvider {
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    pub fn with_config(config: &RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            templates: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn add(&self, template: RuleTemplate) {
        let uid = template.uid.clone();
        let replaced = {
            let mut templates = self.templates.write().unwrap();
            templates.insert(uid.clone(), template).is_some()
        };
        let event = if replaced {
            RegistryEvent::Updated(uid)
        } else {
            RegistryEvent::Added(uid)
        };
        debug!(event = ?event, "template registry changed");
        let _ = self.events.send(event);
    }

    pub fn remove(&self, uid: &str) -> bool {
        let removed = {
            let mut templates = self.templates.write().unwrap();
            templates.remove(uid).is_some()
        };
        if removed {
            let _ = self.events.send(RegistryEvent::Removed(uid.to_string()));
        }
        removed
    }
}

impl Default for InMemoryTemplateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry for InMemoryTemplateProvider {
    fn get(&self, uid: &str) -> Option<RuleTemplate> {
        let templates = self.templates.read().unwrap();
        templates.get(uid).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}

/// A handler factory appearing or disappearing
#[derive(Clone)]
pub enum FactoryEvent {
    Registered(Arc<dyn ModuleHandlerFactory>),
    Unregistered(Arc<dyn ModuleHandlerFactory>),
}

impl std::fmt::Debug for FactoryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactoryEvent::Registered(factory) => {
                write!(f, "Registered({:?})", factory.module_types())
            }
            FactoryEvent::Unregistered(factory) => {
                write!(f, "Unregistered({:?})", factory.module_types())
            }
        }
    }
}

/// Announcement channel for handler factories
///
/// Hosts register and unregister factories here; the engine subscribes on
/// [`start`](crate::engine::RuleEngine::start) and reacts to each event.
pub struct HandlerFactoryBus {
    sender: broadcast::Sender<FactoryEvent>,
}

impl HandlerFactoryBus {
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    pub fn with_config(config: &RegistryConfig) -> Self {
        let (sender, _) = broadcast::channel(config.event_channel_capacity);
        Self { sender }
    }

    pub fn register(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        debug!(types = ?factory.module_types(), "handler factory registered");
        let _ = self.sender.send(FactoryEvent::Registered(factory));
    }

    pub fn unregister(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        debug!(types = ?factory.module_types(), "handler factory unregistered");
        let _ = self.sender.send(FactoryEvent::Unregistered(factory));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FactoryEvent> {
        self.sender.subscribe()
    }
}

impl Default for HandlerFactoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HandlerFactoryBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
