// Rule engine core - registry, lifecycle and orchestration

//! # Rule Engine Module
//!
//! This module contains the engine itself: the canonical rule store, the
//! per-rule status machine, handler binding and the trigger-driven
//! execution pipeline.
//!
//! ## Architecture
//!
//! The engine sits between three dynamic sources and the rules users
//! register:
//!
//! 1. callers add, update, enable and remove declarative rules,
//! 2. the engine binds each rule's modules to handlers produced by the
//!    currently registered factories, expanding templates on the way,
//! 3. registry watchers re-drive affected rules whenever factories, module
//!    types or templates come and go,
//! 4. bound trigger handlers fire through per-rule callbacks into the
//!    executor, which runs the condition/action pipeline.
//!
//! ## Locking
//!
//! One engine-wide mutex serializes every registry mutation and watcher
//! reaction. The mutex is never held across an `.await`; the bodies of
//! condition and action handlers run without it so a slow handler never
//! blocks registration. The status map is a [`DashMap`] so status reads
//! need no lock at all.

pub mod ids;

mod activation;
mod binder;
mod callback;
mod composite;
mod dataflow;
mod executor;
mod status;
mod template;
mod watcher;

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::activation::RuleActivation;
use self::callback::TriggerCallback;
use self::composite::CompositeHandlerFactory;
use self::ids::UidGenerator;
use crate::handler::{ModuleHandler, ModuleHandlerFactory};
use crate::models::{system_parent_of, Rule, RuleStatus, RuleStatusInfo, StatusDetail};
use crate::registry::{FactoryEvent, ModuleTypeRegistry, TemplateRegistry};
use crate::{HomeflowError, Result};

/// Receiver of per-rule status changes; at most one may be set
pub trait StatusObserver: Send + Sync {
    fn status_changed(&self, rule_uid: &str, info: &RuleStatusInfo);
}

/// Status updates collected under the lock and delivered after it
type Notices = Vec<(String, RuleStatusInfo)>;

/// The rule engine public surface
///
/// Cheap to clone; clones share the same engine. See the crate-level
/// documentation for a usage walkthrough.
#[derive(Clone)]
pub struct RuleEngine {
    core: Arc<EngineCore>,
}

pub(crate) struct EngineCore {
    self_ref: Weak<EngineCore>,
    state: Mutex<EngineState>,
    pub(crate) statuses: DashMap<String, RuleStatusInfo>,
    observer: Mutex<Option<Arc<dyn StatusObserver>>>,
    module_types: Arc<dyn ModuleTypeRegistry>,
    templates: Arc<dyn TemplateRegistry>,
    composite: CompositeHandlerFactory,
    disposed: AtomicBool,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct EngineState {
    pub(crate) rules: HashMap<String, RuleActivation>,
    /// Claimed module-type UID to factory
    pub(crate) factories: HashMap<String, Arc<dyn ModuleHandlerFactory>>,
    /// Declared module-type UID to rules referencing it
    pub(crate) type_index: HashMap<String, HashSet<String>>,
    /// Template UID to rules awaiting it
    pub(crate) template_index: HashMap<String, HashSet<String>>,
    pub(crate) uids: UidGenerator,
    /// Sequence behind activation generations; bumped on every module
    /// rebuild so superseded in-flight executions can be told apart
    pub(crate) activation_seq: u64,
}

impl RuleEngine {
    pub fn new(
        module_types: Arc<dyn ModuleTypeRegistry>,
        templates: Arc<dyn TemplateRegistry>,
    ) -> Self {
        let core = Arc::new_cyclic(|weak| EngineCore {
            self_ref: weak.clone(),
            state: Mutex::new(EngineState {
                rules: HashMap::new(),
                factories: HashMap::new(),
                type_index: HashMap::new(),
                template_index: HashMap::new(),
                uids: UidGenerator::new(),
                activation_seq: 0,
            }),
            statuses: DashMap::new(),
            observer: Mutex::new(None),
            module_types,
            templates,
            composite: CompositeHandlerFactory,
            disposed: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
        });
        Self { core }
    }

    /// Open the registry subscriptions: module types and templates from
    /// the registries handed to [`new`](RuleEngine::new), factories from
    /// the given bus subscription
    pub fn start(&self, factory_events: broadcast::Receiver<FactoryEvent>) {
        let mut watchers = self.core.watchers.lock().unwrap();
        if !watchers.is_empty() {
            warn!("rule engine already started");
            return;
        }
        let weak = Arc::downgrade(&self.core);
        watchers.push(tokio::spawn(watcher::watch_factories(
            weak.clone(),
            factory_events,
        )));
        watchers.push(tokio::spawn(watcher::watch_module_types(
            weak.clone(),
            self.core.module_types.subscribe(),
        )));
        watchers.push(tokio::spawn(watcher::watch_templates(
            weak,
            self.core.templates.subscribe(),
        )));
        info!("rule engine started");
    }

    /// Register a rule without a scope
    pub fn add(&self, rule: Rule) -> Result<String> {
        self.add_with_scope(rule, None)
    }

    /// Register a rule on behalf of the given caller scope
    ///
    /// The rule is copied into canonical form; a UID is generated when the
    /// rule carries none. Registration schedules initialization
    /// immediately, so the returned UID already has a status.
    pub fn add_with_scope(&self, rule: Rule, scope: Option<&str>) -> Result<String> {
        validate_rule(&rule)?;
        let mut notices = Vec::new();
        let uid = {
            let mut guard = self.core.lock_state();
            if self.core.is_disposed() {
                return Err(HomeflowError::EngineDisposed);
            }
            let state = &mut *guard;
            let uid = match &rule.uid {
                Some(uid) => {
                    if state.rules.contains_key(uid) {
                        return Err(HomeflowError::DuplicateRule { uid: uid.clone() });
                    }
                    state.uids.observe(uid);
                    uid.clone()
                }
                None => state.uids.next_uid(),
            };
            let mut canonical = rule;
            canonical.uid = Some(uid.clone());
            let activation = RuleActivation::new(uid.clone(), canonical, scope.map(String::from));
            state.rules.insert(uid.clone(), activation);
            self.core.update_status(
                &uid,
                RuleStatusInfo::new(RuleStatus::NotInitialized),
                &mut notices,
            );
            self.core.initialize_rule(state, &uid, &mut notices);
            uid
        };
        self.core.emit(notices);
        info!(rule = uid.as_str(), "rule added");
        Ok(uid)
    }

    /// Replace an existing rule with a new definition under the same UID
    ///
    /// The prior activation is torn down before re-binding. A rule updated
    /// while disabled stays disabled.
    pub fn update(&self, rule: Rule) -> Result<()> {
        validate_rule(&rule)?;
        let Some(uid) = rule.uid.clone() else {
            return Err(HomeflowError::InvalidRule(
                "a rule UID is required for update".to_string(),
            ));
        };
        let mut notices = Vec::new();
        {
            let mut guard = self.core.lock_state();
            if self.core.is_disposed() {
                return Err(HomeflowError::EngineDisposed);
            }
            let state = &mut *guard;
            if !state.rules.contains_key(&uid) {
                return Err(HomeflowError::RuleNotFound { uid });
            }
            let was_disabled = self.core.status_of(&uid) == Some(RuleStatus::Disabled);
            self.core.teardown_activation(state, &uid);
            prune_rule_from_indexes(state, &uid);

            let scope = state
                .rules
                .get(&uid)
                .and_then(|activation| activation.scope.clone());
            let mut canonical = rule;
            canonical.uid = Some(uid.clone());
            state
                .rules
                .insert(uid.clone(), RuleActivation::new(uid.clone(), canonical, scope));

            if was_disabled {
                debug!(rule = uid.as_str(), "rule updated while disabled");
            } else {
                self.core.update_status(
                    &uid,
                    RuleStatusInfo::new(RuleStatus::NotInitialized),
                    &mut notices,
                );
                self.core.initialize_rule(state, &uid, &mut notices);
            }
        }
        self.core.emit(notices);
        info!(rule = uid.as_str(), "rule updated");
        Ok(())
    }

    /// Tear down and remove a rule. Returns whether a rule was removed.
    pub fn remove(&self, uid: &str) -> bool {
        let removed = {
            let mut guard = self.core.lock_state();
            if self.core.is_disposed() {
                warn!(rule = uid, "remove on disposed engine");
                return false;
            }
            let state = &mut *guard;
            if state.rules.contains_key(uid) {
                self.core.teardown_activation(state, uid);
                prune_rule_from_indexes(state, uid);
                state.rules.remove(uid);
                self.core.statuses.remove(uid);
                true
            } else {
                false
            }
        };
        if removed {
            info!(rule = uid, "rule removed");
        }
        removed
    }

    /// A defensive copy of the rule as registered
    pub fn get(&self, uid: &str) -> Option<Rule> {
        let guard = self.core.lock_state();
        guard
            .rules
            .get(uid)
            .map(|activation| activation.definition.clone())
    }

    pub fn get_all(&self) -> Vec<Rule> {
        let guard = self.core.lock_state();
        guard
            .rules
            .values()
            .map(|activation| activation.definition.clone())
            .collect()
    }

    pub fn get_by_tag(&self, tag: &str) -> Vec<Rule> {
        let guard = self.core.lock_state();
        guard
            .rules
            .values()
            .filter(|activation| activation.definition.has_tag(tag))
            .map(|activation| activation.definition.clone())
            .collect()
    }

    /// Rules carrying at least one of the given tags
    pub fn get_by_tags(&self, tags: &HashSet<String>) -> Vec<Rule> {
        let guard = self.core.lock_state();
        guard
            .rules
            .values()
            .filter(|activation| activation.definition.matches_any_tag(tags))
            .map(|activation| activation.definition.clone())
            .collect()
    }

    /// Lock-free status read
    pub fn get_status(&self, uid: &str) -> Option<RuleStatusInfo> {
        self.core.statuses.get(uid).map(|entry| entry.value().clone())
    }

    /// Enable or disable a rule
    ///
    /// Disabling tears the activation down and parks the rule in
    /// `DISABLED`; enabling a disabled rule drives it through
    /// initialization again. Anything else is a logged no-op.
    pub fn set_enabled(&self, uid: &str, enabled: bool) {
        let mut notices = Vec::new();
        {
            let mut guard = self.core.lock_state();
            if self.core.is_disposed() {
                warn!(rule = uid, "set_enabled on disposed engine");
                return;
            }
            let state = &mut *guard;
            if !state.rules.contains_key(uid) {
                warn!(rule = uid, "set_enabled on unknown rule");
                return;
            }
            let current = self.core.status_of(uid);
            if enabled {
                if current == Some(RuleStatus::Disabled) {
                    self.core.update_status(
                        uid,
                        RuleStatusInfo::new(RuleStatus::NotInitialized),
                        &mut notices,
                    );
                    self.core.initialize_rule(state, uid, &mut notices);
                } else {
                    debug!(rule = uid, "rule is not disabled, enable is a no-op");
                }
            } else if current == Some(RuleStatus::Disabled) {
                debug!(rule = uid, "rule is already disabled");
            } else {
                self.core.teardown_activation(state, uid);
                self.core.update_status(
                    uid,
                    RuleStatusInfo::new(RuleStatus::Disabled),
                    &mut notices,
                );
            }
        }
        self.core.emit(notices);
    }

    /// Distinct scope identifiers across all registered rules
    pub fn get_scope_identifiers(&self) -> HashSet<String> {
        let guard = self.core.lock_state();
        guard
            .rules
            .values()
            .filter_map(|activation| activation.scope.clone())
            .collect()
    }

    /// Install the status observer, replacing any previous one
    pub fn set_status_observer(&self, observer: Arc<dyn StatusObserver>) {
        *self.core.observer.lock().unwrap() = Some(observer);
    }

    pub fn clear_status_observer(&self) {
        *self.core.observer.lock().unwrap() = None;
    }

    /// Direct factory registration, also driven by the factory bus
    pub fn add_handler_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        self.core.add_handler_factory(factory);
    }

    /// Direct factory removal, also driven by the factory bus
    pub fn remove_handler_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        self.core.remove_handler_factory(factory);
    }

    /// Shut the engine down for good
    ///
    /// Closes the registry subscriptions, tears down every rule and
    /// returns its handlers to their factories, clears the status map and
    /// turns every further mutation into a no-op.
    pub fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut watchers = self.core.watchers.lock().unwrap();
            for watcher in watchers.drain(..) {
                watcher.abort();
            }
        }
        {
            let mut guard = self.core.lock_state();
            let state = &mut *guard;
            let uids: Vec<String> = state.rules.keys().cloned().collect();
            for uid in &uids {
                self.core.teardown_activation(state, uid);
            }
            state.rules.clear();
            state.factories.clear();
            state.type_index.clear();
            state.template_index.clear();
        }
        self.core.statuses.clear();
        *self.core.observer.lock().unwrap() = None;
        info!("rule engine disposed");
    }

    #[cfg(test)]
    fn context_snapshot(&self, uid: &str) -> Option<HashMap<String, serde_json::Value>> {
        let guard = self.core.lock_state();
        guard
            .rules
            .get(uid)
            .map(|activation| activation.context.clone())
    }
}

impl EngineCore {
    /// Lock poisoning is not recovered from; a panic while holding the
    /// engine lock leaves the engine unusable anyway
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn status_of(&self, uid: &str) -> Option<RuleStatus> {
        self.statuses.get(uid).map(|entry| entry.status)
    }

    /// Apply a status transition if the table allows it; the notice is
    /// delivered by [`emit`](EngineCore::emit) once the lock is released
    pub(crate) fn update_status(
        &self,
        uid: &str,
        info: RuleStatusInfo,
        notices: &mut Notices,
    ) -> bool {
        if let Some(current) = self.status_of(uid) {
            if !status::is_transition_allowed(current, info.status) {
                warn!(
                    rule = uid,
                    from = %current,
                    to = %info.status,
                    "status transition rejected"
                );
                return false;
            }
        }
        self.statuses.insert(uid.to_string(), info.clone());
        notices.push((uid.to_string(), info));
        true
    }

    pub(crate) fn emit(&self, notices: Notices) {
        if notices.is_empty() {
            return;
        }
        let observer = self.observer.lock().unwrap().clone();
        for (uid, info) in &notices {
            debug!(rule = uid.as_str(), status = %info, "rule status changed");
            if let Some(observer) = &observer {
                observer.status_changed(uid, info);
            }
        }
    }

    /// Drive one rule from `NOT_INITIALIZED` towards `IDLE`: expand its
    /// template if it has one, rebuild the runtime modules, bind handlers,
    /// validate connections and register the trigger callback
    fn initialize_rule(&self, state: &mut EngineState, uid: &str, notices: &mut Notices) {
        let EngineState {
            rules,
            factories,
            type_index,
            template_index,
            activation_seq,
            ..
        } = state;
        let Some(activation) = rules.get_mut(uid) else {
            return;
        };

        binder::release_handlers(activation, factories);

        let body = if let Some(template_uid) = activation.definition.template_uid.clone() {
            match self.templates.get(&template_uid) {
                None => {
                    template_index
                        .entry(template_uid.clone())
                        .or_default()
                        .insert(uid.to_string());
                    self.update_status(
                        uid,
                        RuleStatusInfo::with_detail(
                            RuleStatus::NotInitialized,
                            StatusDetail::TemplateMissing,
                            format!("rule template '{}' is not registered", template_uid),
                        ),
                        notices,
                    );
                    return;
                }
                Some(template) => match template::expand_rule(&activation.definition, &template) {
                    Ok(expanded) => {
                        if let Some(waiting) = template_index.get_mut(&template_uid) {
                            waiting.remove(uid);
                            if waiting.is_empty() {
                                template_index.remove(&template_uid);
                            }
                        }
                        expanded
                    }
                    Err(cause) => {
                        self.update_status(
                            uid,
                            RuleStatusInfo::with_detail(
                                RuleStatus::NotInitialized,
                                StatusDetail::ConfigurationError,
                                cause.to_string(),
                            ),
                            notices,
                        );
                        return;
                    }
                },
            }
        } else {
            activation.definition.clone()
        };

        *activation_seq += 1;
        activation.install_modules(&body, *activation_seq);

        // Indexed whether or not binding succeeds, so a later factory
        // arrival can re-drive this rule
        for type_uid in activation.module_type_uids() {
            type_index.entry(type_uid).or_default().insert(uid.to_string());
        }

        let mut errors = binder::bind_rule(
            activation,
            factories,
            &self.composite,
            self.module_types.as_ref(),
        );
        errors.extend(binder::validate_connections(
            activation,
            self.module_types.as_ref(),
        ));

        if errors.is_empty() {
            let callback = activation
                .callback
                .get_or_insert_with(|| {
                    Arc::new(TriggerCallback::new(self.self_ref.clone(), uid.to_string()))
                })
                .clone();
            for module in &activation.triggers {
                if let Some(handler) = module.handler.as_ref().and_then(ModuleHandler::as_trigger) {
                    handler.set_callback(callback.clone());
                }
            }
            self.update_status(uid, RuleStatusInfo::new(RuleStatus::Idle), notices);
        } else {
            binder::release_handlers(activation, factories);
            self.update_status(
                uid,
                RuleStatusInfo::with_detail(
                    RuleStatus::NotInitialized,
                    StatusDetail::HandlerInitializingError,
                    errors.join("\n"),
                ),
                notices,
            );
        }
    }

    /// Release handlers and disarm the trigger callback; status handling
    /// is the caller's business
    fn teardown_activation(&self, state: &mut EngineState, uid: &str) {
        let EngineState {
            rules, factories, ..
        } = state;
        if let Some(activation) = rules.get_mut(uid) {
            binder::release_handlers(activation, factories);
            if let Some(callback) = activation.callback.take() {
                callback.dispose();
            }
        }
    }

    pub(crate) fn add_handler_factory(&self, factory: Arc<dyn ModuleHandlerFactory>) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock_state();
            if self.is_disposed() {
                return;
            }
            let state = &mut *guard;
            let claimed = factory.module_types();
            let mut affected: HashSet<String> = HashSet::new();
            for type_uid in &claimed {
                if state
                    .factories
                    .insert(type_uid.clone(), factory.clone())
                    .is_some()
                {
                    warn!(
                        type_uid = type_uid.as_str(),
                        "replacing existing handler factory"
                    );
                }
                for (indexed, rules) in &state.type_index {
                    if system_parent_of(indexed) == type_uid.as_str() {
                        affected.extend(rules.iter().cloned());
                    }
                }
            }
            info!(types = ?claimed, "handler factory added");
            for uid in affected {
                if self.status_of(&uid) == Some(RuleStatus::NotInitialized) {
                    self.initialize_rule(state, &uid, &mut notices);
                }
            }
        }
        self.emit(notices);
    }

    pub(crate) fn remove_handler_factory(&self, factory: &Arc<dyn ModuleHandlerFactory>) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock_state();
            if self.is_disposed() {
                return;
            }
            let state = &mut *guard;
            let claimed = factory.module_types();

            // Rules currently depending on the leaving factory, torn down
            // while the factory can still take its handlers back
            let mut affected: HashMap<String, BTreeSet<String>> = HashMap::new();
            for type_uid in &claimed {
                for (indexed, rules) in &state.type_index {
                    if system_parent_of(indexed) == type_uid.as_str() {
                        for rule_uid in rules {
                            affected
                                .entry(rule_uid.clone())
                                .or_default()
                                .insert(type_uid.clone());
                        }
                    }
                }
            }
            for (uid, missing) in affected {
                if matches!(
                    self.status_of(&uid),
                    Some(RuleStatus::Idle) | Some(RuleStatus::Running)
                ) {
                    self.teardown_activation(state, &uid);
                    let missing = missing
                        .iter()
                        .map(|type_uid| format!("'{}'", type_uid))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.update_status(
                        &uid,
                        RuleStatusInfo::with_detail(
                            RuleStatus::NotInitialized,
                            StatusDetail::HandlerMissing,
                            format!("handler factory for {} disappeared", missing),
                        ),
                        &mut notices,
                    );
                }
            }

            for type_uid in &claimed {
                let matches_leaving = state
                    .factories
                    .get(type_uid)
                    .map(|existing| Arc::ptr_eq(existing, factory))
                    .unwrap_or(false);
                if matches_leaving {
                    state.factories.remove(type_uid);
                }
            }
            info!(types = ?claimed, "handler factory removed");
        }
        self.emit(notices);
    }

    pub(crate) fn module_type_changed(&self, type_uid: &str) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock_state();
            if self.is_disposed() {
                return;
            }
            let state = &mut *guard;
            let affected: Vec<String> = state
                .type_index
                .get(type_uid)
                .map(|rules| rules.iter().cloned().collect())
                .unwrap_or_default();
            for uid in affected {
                if self.status_of(&uid) == Some(RuleStatus::NotInitialized) {
                    self.initialize_rule(state, &uid, &mut notices);
                }
            }
        }
        self.emit(notices);
    }

    pub(crate) fn template_changed(&self, template_uid: &str) {
        let mut notices = Vec::new();
        {
            let mut guard = self.lock_state();
            if self.is_disposed() {
                return;
            }
            let state = &mut *guard;
            let waiting: Vec<String> = state
                .template_index
                .get(template_uid)
                .map(|rules| rules.iter().cloned().collect())
                .unwrap_or_default();
            for uid in waiting {
                if self.status_of(&uid) == Some(RuleStatus::NotInitialized) {
                    self.initialize_rule(state, &uid, &mut notices);
                }
            }
        }
        self.emit(notices);
    }
}

fn prune_rule_from_indexes(state: &mut EngineState, uid: &str) {
    state.type_index.retain(|_, rules| {
        rules.remove(uid);
        !rules.is_empty()
    });
    state.template_index.retain(|_, rules| {
        rules.remove(uid);
        !rules.is_empty()
    });
}

/// Illegal API use is rejected up front, before any state changes
fn validate_rule(rule: &Rule) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    let modules = rule
        .triggers
        .iter()
        .map(|module| (&module.id, &module.type_uid))
        .chain(
            rule.conditions
                .iter()
                .map(|module| (&module.id, &module.type_uid)),
        )
        .chain(
            rule.actions
                .iter()
                .map(|module| (&module.id, &module.type_uid)),
        );
    for (id, type_uid) in modules {
        if id.is_empty() {
            return Err(HomeflowError::InvalidRule(
                "module id must not be empty".to_string(),
            ));
        }
        if type_uid.is_empty() {
            return Err(HomeflowError::InvalidRule(format!(
                "module '{}' has an empty module type UID",
                id
            )));
        }
        if !seen.insert(id.as_str()) {
            return Err(HomeflowError::InvalidRule(format!(
                "duplicate module id '{}'",
                id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        ActionHandler, ConditionHandler, ModuleHandler, RuleEngineCallback, TriggerHandler,
    };
    use crate::models::{
        Action, Condition, Connection, ModuleInstance, ModuleKind, ModuleType, Rule, Trigger,
    };
    use crate::registry::{HandlerFactoryBus, InMemoryModuleTypeProvider, InMemoryTemplateProvider};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct MockTrigger {
        id: String,
        callback: StdMutex<Option<Arc<dyn RuleEngineCallback>>>,
    }

    impl MockTrigger {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                callback: StdMutex::new(None),
            })
        }

        fn fire(&self, outputs: HashMap<String, Value>) {
            let callback = self.callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback.triggered(&self.id, outputs);
            }
        }

        fn has_callback(&self) -> bool {
            self.callback.lock().unwrap().is_some()
        }
    }

    impl TriggerHandler for MockTrigger {
        fn set_callback(&self, callback: Arc<dyn RuleEngineCallback>) {
            *self.callback.lock().unwrap() = Some(callback);
        }

        fn clear_callback(&self) {
            *self.callback.lock().unwrap() = None;
        }
    }

    struct StaticCondition {
        satisfied: bool,
    }

    #[async_trait::async_trait]
    impl ConditionHandler for StaticCondition {
        async fn is_satisfied(&self, _inputs: &HashMap<String, Value>) -> Result<bool> {
            Ok(self.satisfied)
        }
    }

    struct RecordingAction {
        entered: AtomicUsize,
        seen: StdMutex<Vec<HashMap<String, Value>>>,
        outputs: Option<HashMap<String, Value>>,
        delay: Option<Duration>,
    }

    impl RecordingAction {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                outputs: None,
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                entered: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                outputs: None,
                delay: Some(delay),
            })
        }

        fn with_outputs(outputs: HashMap<String, Value>) -> Arc<Self> {
            Arc::new(Self {
                entered: AtomicUsize::new(0),
                seen: StdMutex::new(Vec::new()),
                outputs: Some(outputs),
                delay: None,
            })
        }

        fn runs(&self) -> usize {
            self.entered.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ActionHandler for RecordingAction {
        async fn execute(
            &self,
            inputs: &HashMap<String, Value>,
        ) -> Result<Option<HashMap<String, Value>>> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().unwrap().push(inputs.clone());
            Ok(self.outputs.clone())
        }
    }

    struct FailingAction {
        entered: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ActionHandler for FailingAction {
        async fn execute(
            &self,
            _inputs: &HashMap<String, Value>,
        ) -> Result<Option<HashMap<String, Value>>> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            Err(HomeflowError::Internal("device unreachable".to_string()))
        }
    }

    type MakeHandler = Box<dyn Fn(&ModuleInstance, &str) -> Option<ModuleHandler> + Send + Sync>;

    struct TestFactory {
        types: Vec<String>,
        make: MakeHandler,
        requests: StdMutex<Vec<ModuleInstance>>,
        released: AtomicUsize,
    }

    impl TestFactory {
        fn new(types: &[&str], make: MakeHandler) -> Arc<Self> {
            Arc::new(Self {
                types: types.iter().map(|uid| uid.to_string()).collect(),
                make,
                requests: StdMutex::new(Vec::new()),
                released: AtomicUsize::new(0),
            })
        }

        fn trigger(type_uid: &str, handler: Arc<MockTrigger>) -> Arc<Self> {
            Self::new(
                &[type_uid],
                Box::new(move |_, _| Some(ModuleHandler::Trigger(handler.clone()))),
            )
        }

        fn condition(type_uid: &str, satisfied: bool) -> Arc<Self> {
            Self::new(
                &[type_uid],
                Box::new(move |_, _| {
                    Some(ModuleHandler::Condition(Arc::new(StaticCondition {
                        satisfied,
                    })))
                }),
            )
        }

        fn action(type_uid: &str, handler: Arc<RecordingAction>) -> Arc<Self> {
            Self::new(
                &[type_uid],
                Box::new(move |_, _| Some(ModuleHandler::Action(handler.clone()))),
            )
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> ModuleInstance {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ModuleHandlerFactory for TestFactory {
        fn module_types(&self) -> Vec<String> {
            self.types.clone()
        }

        fn get_handler(&self, module: &ModuleInstance, rule_uid: &str) -> Option<ModuleHandler> {
            self.requests.lock().unwrap().push(module.clone());
            (self.make)(module, rule_uid)
        }

        fn unget_handler(
            &self,
            _module: &ModuleInstance,
            _rule_uid: &str,
            _handler: ModuleHandler,
        ) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: StdMutex<Vec<(String, RuleStatus, Option<StatusDetail>)>>,
    }

    impl RecordingObserver {
        fn statuses_for(&self, uid: &str) -> Vec<RuleStatus> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(rule, _, _)| rule == uid)
                .map(|(_, status, _)| *status)
                .collect()
        }
    }

    impl StatusObserver for RecordingObserver {
        fn status_changed(&self, rule_uid: &str, info: &RuleStatusInfo) {
            self.events
                .lock()
                .unwrap()
                .push((rule_uid.to_string(), info.status, info.detail));
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn new_engine() -> (
        RuleEngine,
        Arc<InMemoryModuleTypeProvider>,
        Arc<InMemoryTemplateProvider>,
    ) {
        init_tracing();
        let module_types = Arc::new(InMemoryModuleTypeProvider::new());
        let templates = Arc::new(InMemoryTemplateProvider::new());
        let engine = RuleEngine::new(module_types.clone(), templates.clone());
        (engine, module_types, templates)
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, predicate: F) {
        for _ in 0..400 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn wait_for_status(engine: &RuleEngine, uid: &str, status: RuleStatus) {
        let what = format!("rule {} to reach {}", uid, status);
        wait_until(&what, || {
            engine.get_status(uid).map(|info| info.status) == Some(status)
        })
        .await;
    }

    fn simple_rule() -> Rule {
        Rule::new()
            .with_trigger(Trigger::new("t", "sysTrig"))
            .with_action(
                Action::new("a", "sysAct").with_connection(Connection::new("v", "t", "x")),
            )
    }

    fn status_detail(engine: &RuleEngine, uid: &str) -> Option<StatusDetail> {
        engine.get_status(uid).and_then(|info| info.detail)
    }

    #[tokio::test]
    async fn test_trigger_output_reaches_action() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::action("sysAct", action.clone()));

        let observer = Arc::new(RecordingObserver::default());
        engine.set_status_observer(observer.clone());

        let uid = engine.add(simple_rule()).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        trigger.fire(HashMap::from([("x".to_string(), json!(42))]));
        wait_until("action to run", || action.runs() == 1).await;
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;

        let seen = action.seen.lock().unwrap();
        assert_eq!(seen[0].get("v"), Some(&json!(42)));
        drop(seen);

        assert_eq!(
            observer.statuses_for(&uid),
            vec![
                RuleStatus::NotInitialized,
                RuleStatus::Idle,
                RuleStatus::Running,
                RuleStatus::Idle,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_factory_then_late_arrival() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");

        let rule = Rule::new().with_trigger(Trigger::new("t", "missing"));
        let uid = engine.add(rule).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::NotInitialized)
        );
        assert_eq!(
            status_detail(&engine, &uid),
            Some(StatusDetail::HandlerInitializingError)
        );

        engine.add_handler_factory(TestFactory::trigger("missing", trigger.clone()));
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );
        assert!(trigger.has_callback());
    }

    #[tokio::test]
    async fn test_factory_disappearance_detaches_rule() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        let action_factory: Arc<dyn ModuleHandlerFactory> =
            TestFactory::action("sysAct", action.clone());
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(action_factory.clone());

        let uid = engine.add(simple_rule()).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        engine.remove_handler_factory(&action_factory);
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::NotInitialized)
        );
        assert_eq!(status_detail(&engine, &uid), Some(StatusDetail::HandlerMissing));
        assert!(!trigger.has_callback());

        // A firing after teardown must not execute anything
        trigger.fire(HashMap::from([("x".to_string(), json!(1))]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(action.runs(), 0);
    }

    #[tokio::test]
    async fn test_template_rule_waits_for_template() {
        let (engine, _, templates) = new_engine();
        let bus = HandlerFactoryBus::new();
        engine.start(bus.subscribe());

        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        let action_factory = TestFactory::action("sysAct", action.clone());
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(action_factory.clone());

        let rule = Rule::from_template(
            "tpl",
            HashMap::from([("greeting".to_string(), json!("hi"))]),
        );
        let uid = engine.add(rule).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::NotInitialized)
        );
        assert_eq!(status_detail(&engine, &uid), Some(StatusDetail::TemplateMissing));

        templates.add(
            crate::models::RuleTemplate::new("tpl")
                .with_trigger(Trigger::new("t", "sysTrig"))
                .with_action(
                    Action::new("a", "sysAct").with_config("message", json!("${greeting}")),
                ),
        );
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;

        // Expansion substituted the configuration reference before binding
        assert_eq!(
            action_factory.last_request().configuration.get("message"),
            Some(&json!("hi"))
        );
        engine.dispose();
    }

    #[tokio::test]
    async fn test_unsatisfied_condition_blocks_actions() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::condition("sysCond", false));
        engine.add_handler_factory(TestFactory::action("sysAct", action.clone()));

        let rule = Rule::new()
            .with_trigger(Trigger::new("t", "sysTrig"))
            .with_condition(Condition::new("c", "sysCond"))
            .with_action(Action::new("a", "sysAct"));
        let uid = engine.add(rule).unwrap();

        trigger.fire(HashMap::from([("x".to_string(), json!(7))]));
        wait_until("execution to finish", || {
            engine
                .context_snapshot(&uid)
                .map(|context| context.contains_key("t.x"))
                .unwrap_or(false)
        })
        .await;
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;

        assert_eq!(action.runs(), 0);
        let context = engine.context_snapshot(&uid).unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context.get("t.x"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_second_firing_dropped_while_running() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::slow(Duration::from_millis(200));
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::action("sysAct", action.clone()));

        let observer = Arc::new(RecordingObserver::default());
        engine.set_status_observer(observer.clone());

        let uid = engine.add(simple_rule()).unwrap();
        trigger.fire(HashMap::from([("x".to_string(), json!(1))]));
        wait_for_status(&engine, &uid, RuleStatus::Running).await;
        trigger.fire(HashMap::from([("x".to_string(), json!(2))]));
        wait_until("slow action to finish", || action.runs() >= 1).await;
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(action.runs(), 1);
        assert_eq!(
            observer.statuses_for(&uid),
            vec![
                RuleStatus::NotInitialized,
                RuleStatus::Idle,
                RuleStatus::Running,
                RuleStatus::Idle,
            ]
        );
    }

    #[tokio::test]
    async fn test_action_outputs_feed_later_actions() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let first = RecordingAction::with_outputs(HashMap::from([(
            "result".to_string(),
            json!("ok"),
        )]));
        let second = RecordingAction::new();
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::new(&["sysAct"], {
            let first = first.clone();
            let second = second.clone();
            Box::new(move |module, _| {
                let handler = if module.id == "a1" {
                    first.clone() as Arc<dyn ActionHandler>
                } else {
                    second.clone() as Arc<dyn ActionHandler>
                };
                Some(ModuleHandler::Action(handler))
            })
        }));

        let rule = Rule::new()
            .with_trigger(Trigger::new("t", "sysTrig"))
            .with_action(Action::new("a1", "sysAct"))
            .with_action(
                Action::new("a2", "sysAct").with_connection(Connection::new("in", "a1", "result")),
            );
        engine.add(rule).unwrap();

        trigger.fire(HashMap::new());
        wait_until("both actions to run", || second.runs() == 1).await;

        let seen = second.seen.lock().unwrap();
        assert_eq!(seen[0].get("in"), Some(&json!("ok")));
        assert_eq!(seen[0].get("a1.result"), Some(&json!("ok")));
    }

    #[tokio::test]
    async fn test_failing_action_does_not_abort_rule() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let failing = Arc::new(FailingAction {
            entered: AtomicUsize::new(0),
        });
        let recording = RecordingAction::new();
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::new(&["sysAct"], {
            let failing = failing.clone();
            let recording = recording.clone();
            Box::new(move |module, _| {
                let handler = if module.id == "bad" {
                    failing.clone() as Arc<dyn ActionHandler>
                } else {
                    recording.clone() as Arc<dyn ActionHandler>
                };
                Some(ModuleHandler::Action(handler))
            })
        }));

        let rule = Rule::new()
            .with_trigger(Trigger::new("t", "sysTrig"))
            .with_action(Action::new("bad", "sysAct"))
            .with_action(Action::new("good", "sysAct"));
        let uid = engine.add(rule).unwrap();

        trigger.fire(HashMap::new());
        wait_until("second action to run", || recording.runs() == 1).await;
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;
        assert_eq!(failing.entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_composite_type_routes_through_parent_factory() {
        let (engine, module_types, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let parent_factory = TestFactory::trigger("sysTrig", trigger.clone());
        // A factory claiming the full custom UID must never be consulted
        let decoy_factory = TestFactory::new(&["sysTrig:custom"], Box::new(|_, _| None));
        engine.add_handler_factory(parent_factory.clone());
        engine.add_handler_factory(decoy_factory.clone());

        module_types.add(
            ModuleType::new("sysTrig:custom", ModuleKind::Trigger)
                .with_default("mode", json!("night")),
        );

        let rule = Rule::new()
            .with_trigger(Trigger::new("t", "sysTrig:custom").with_config("extra", json!(1)));
        let uid = engine.add(rule).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        assert_eq!(decoy_factory.request_count(), 0);
        let request = parent_factory.last_request();
        assert_eq!(request.type_uid, "sysTrig");
        assert_eq!(request.configuration.get("mode"), Some(&json!("night")));
        assert_eq!(request.configuration.get("extra"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_disable_and_enable_cycle() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        let action_factory = TestFactory::action("sysAct", action.clone());
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(action_factory.clone());

        let uid = engine.add(simple_rule()).unwrap();
        engine.set_enabled(&uid, false);
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Disabled)
        );
        assert!(action_factory.released.load(Ordering::SeqCst) >= 1);

        trigger.fire(HashMap::from([("x".to_string(), json!(1))]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(action.runs(), 0);

        engine.set_enabled(&uid, true);
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        trigger.fire(HashMap::from([("x".to_string(), json!(2))]));
        wait_until("action to run after enable", || action.runs() == 1).await;
    }

    #[tokio::test]
    async fn test_duplicate_uid_is_rejected_without_mutation() {
        let (engine, _, _) = new_engine();
        let first = Rule::with_uid("mine").with_tag("original");
        engine.add(first).unwrap();

        let second = Rule::with_uid("mine").with_tag("impostor");
        let error = engine.add(second).unwrap_err();
        assert!(matches!(error, HomeflowError::DuplicateRule { .. }));
        assert!(engine.get("mine").unwrap().has_tag("original"));
        assert_eq!(engine.get_all().len(), 1);
    }

    #[tokio::test]
    async fn test_generated_uids_stay_ahead_of_explicit_ones() {
        let (engine, _, _) = new_engine();
        let generated = engine.add(Rule::new()).unwrap();
        assert_eq!(generated, "rule_1");

        engine.add(Rule::with_uid("rule_10")).unwrap();
        let next = engine.add(Rule::new()).unwrap();
        assert_eq!(next, "rule_11");

        // Suffixes never regress, even after removals
        engine.remove("rule_10");
        assert_eq!(engine.add(Rule::new()).unwrap(), "rule_12");
    }

    #[tokio::test]
    async fn test_get_returns_defensive_copies() {
        let (engine, _, _) = new_engine();
        let uid = engine.add(Rule::new().with_tag("keep")).unwrap();

        let mut copy = engine.get(&uid).unwrap();
        copy.tags.insert("sneaky".to_string());
        copy.triggers.push(Trigger::new("t", "sysTrig"));

        let stored = engine.get(&uid).unwrap();
        assert!(!stored.has_tag("sneaky"));
        assert!(stored.triggers.is_empty());
    }

    #[tokio::test]
    async fn test_remove_clears_rule_and_status() {
        let (engine, _, _) = new_engine();
        let uid = engine.add(simple_rule()).unwrap();
        assert!(engine.remove(&uid));
        assert!(engine.get(&uid).is_none());
        assert!(engine.get_status(&uid).is_none());
        assert!(!engine.remove(&uid));

        // The UID is free again and no index entry resurrects the old rule
        let trigger = MockTrigger::new("t");
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        assert!(engine.get_status(&uid).is_none());
    }

    #[tokio::test]
    async fn test_tag_queries() {
        let (engine, _, _) = new_engine();
        engine
            .add(Rule::with_uid("r1").with_tag("lighting").with_tag("hall"))
            .unwrap();
        engine.add(Rule::with_uid("r2").with_tag("climate")).unwrap();
        engine.add(Rule::with_uid("r3")).unwrap();

        assert_eq!(engine.get_by_tag("lighting").len(), 1);
        assert_eq!(engine.get_by_tag("nothing").len(), 0);

        let wanted: HashSet<String> = ["hall", "climate"]
            .iter()
            .map(|tag| tag.to_string())
            .collect();
        assert_eq!(engine.get_by_tags(&wanted).len(), 2);
        assert_eq!(engine.get_all().len(), 3);
    }

    #[tokio::test]
    async fn test_update_mid_flight_discards_stale_context() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::slow(Duration::from_millis(150));
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::action("sysAct", action.clone()));

        let uid = engine.add(simple_rule()).unwrap();
        trigger.fire(HashMap::from([("x".to_string(), json!(9))]));
        wait_for_status(&engine, &uid, RuleStatus::Running).await;

        // Replace the rule while the slow action is still in flight
        let mut replacement = simple_rule().with_tag("v2");
        replacement.uid = Some(uid.clone());
        engine.update(replacement).unwrap();
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        wait_until("stale execution to finish", || {
            action.seen.lock().unwrap().len() == 1
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The superseded run's context must not leak into the new
        // activation, and its return must not disturb the new status
        assert!(engine.context_snapshot(&uid).unwrap().is_empty());
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );
    }

    #[tokio::test]
    async fn test_update_replaces_rule() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let action = RecordingAction::new();
        engine.add_handler_factory(TestFactory::trigger("sysTrig", trigger.clone()));
        engine.add_handler_factory(TestFactory::action("sysAct", action.clone()));

        let uid = engine.add(simple_rule()).unwrap();
        let mut replacement = simple_rule().with_tag("v2");
        replacement.uid = Some(uid.clone());
        engine.update(replacement).unwrap();

        assert!(engine.get(&uid).unwrap().has_tag("v2"));
        assert_eq!(
            engine.get_status(&uid).map(|info| info.status),
            Some(RuleStatus::Idle)
        );

        let unknown = Rule::with_uid("ghost");
        assert!(matches!(
            engine.update(unknown).unwrap_err(),
            HomeflowError::RuleNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_scope_identifiers() {
        let (engine, _, _) = new_engine();
        engine
            .add_with_scope(Rule::with_uid("r1"), Some("web"))
            .unwrap();
        engine
            .add_with_scope(Rule::with_uid("r2"), Some("web"))
            .unwrap();
        engine.add(Rule::with_uid("r3")).unwrap();

        let scopes = engine.get_scope_identifiers();
        assert_eq!(scopes.len(), 1);
        assert!(scopes.contains("web"));
    }

    #[tokio::test]
    async fn test_factory_bus_drives_binding() {
        let (engine, _, _) = new_engine();
        let bus = HandlerFactoryBus::new();
        engine.start(bus.subscribe());

        let uid = engine
            .add(Rule::new().with_trigger(Trigger::new("t", "sysTrig")))
            .unwrap();
        assert_eq!(
            status_detail(&engine, &uid),
            Some(StatusDetail::HandlerInitializingError)
        );

        let trigger = MockTrigger::new("t");
        bus.register(TestFactory::trigger("sysTrig", trigger.clone()));
        wait_for_status(&engine, &uid, RuleStatus::Idle).await;
        engine.dispose();
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let (engine, _, _) = new_engine();
        let trigger = MockTrigger::new("t");
        let factory = TestFactory::trigger("sysTrig", trigger.clone());
        engine.add_handler_factory(factory.clone());
        let uid = engine
            .add(Rule::new().with_trigger(Trigger::new("t", "sysTrig")))
            .unwrap();

        engine.dispose();
        assert!(engine.get_status(&uid).is_none());
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
        assert!(!trigger.has_callback());

        assert!(matches!(
            engine.add(Rule::new()).unwrap_err(),
            HomeflowError::EngineDisposed
        ));
        assert!(!engine.remove(&uid));

        // Idempotent
        engine.dispose();
    }

    #[tokio::test]
    async fn test_invalid_rules_are_rejected() {
        let (engine, _, _) = new_engine();
        let empty_type = Rule::new().with_trigger(Trigger::new("t", ""));
        assert!(matches!(
            engine.add(empty_type).unwrap_err(),
            HomeflowError::InvalidRule(_)
        ));

        let duplicate_ids = Rule::new()
            .with_trigger(Trigger::new("m", "sysTrig"))
            .with_action(Action::new("m", "sysAct"));
        assert!(matches!(
            engine.add(duplicate_ids).unwrap_err(),
            HomeflowError::InvalidRule(_)
        ));
        assert!(engine.get_all().is_empty());
    }
}
