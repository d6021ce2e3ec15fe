// Trigger callback - the bridge between trigger handlers and the executor

//! # Trigger Callback
//!
//! Each rule activation gets one [`TriggerCallback`]. The engine hands it
//! to every bound trigger handler; when a handler observes its event it
//! calls [`triggered`](crate::handler::RuleEngineCallback::triggered) and
//! the callback schedules one executor run on the tokio runtime.
//!
//! The callback holds the engine core only weakly and can be disarmed.
//! After [`dispose`](TriggerCallback::dispose) every firing is swallowed,
//! which is what guarantees that a teardown observed before a firing
//! prevents that firing from executing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::executor;
use super::EngineCore;
use crate::handler::RuleEngineCallback;

/// One trigger firing on its way to the executor
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub id: Uuid,
    pub rule_uid: String,
    pub trigger_id: String,
    pub outputs: HashMap<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Firing {
    pub fn new(rule_uid: String, trigger_id: String, outputs: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_uid,
            trigger_id,
            outputs,
            occurred_at: Utc::now(),
        }
    }
}

/// Per-rule bridge handed to trigger handlers
pub(crate) struct TriggerCallback {
    core: Weak<EngineCore>,
    rule_uid: String,
    runtime: Option<Handle>,
    armed: AtomicBool,
}

impl TriggerCallback {
    pub fn new(core: Weak<EngineCore>, rule_uid: String) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!(
                rule = rule_uid.as_str(),
                "no tokio runtime available, trigger firings for this rule will be dropped"
            );
        }
        Self {
            core,
            rule_uid,
            runtime,
            armed: AtomicBool::new(true),
        }
    }

    /// Disarm the callback; later firings are ignored
    pub fn dispose(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl RuleEngineCallback for TriggerCallback {
    fn triggered(&self, trigger_id: &str, outputs: HashMap<String, Value>) {
        if !self.armed.load(Ordering::SeqCst) {
            debug!(
                rule = self.rule_uid.as_str(),
                trigger = trigger_id,
                "firing on disposed callback dropped"
            );
            return;
        }
        let Some(core) = self.core.upgrade() else {
            debug!(
                rule = self.rule_uid.as_str(),
                trigger = trigger_id,
                "engine is gone, firing dropped"
            );
            return;
        };
        let Some(runtime) = &self.runtime else {
            warn!(
                rule = self.rule_uid.as_str(),
                trigger = trigger_id,
                "no runtime handle, firing dropped"
            );
            return;
        };

        let firing = Firing::new(self.rule_uid.clone(), trigger_id.to_string(), outputs);
        debug!(
            rule = firing.rule_uid.as_str(),
            trigger = firing.trigger_id.as_str(),
            execution = %firing.id,
            "trigger fired, scheduling execution"
        );
        runtime.spawn(executor::run(core, firing));
    }
}
