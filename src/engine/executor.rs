// Rule executor - the condition/action pipeline behind a trigger firing

//! # Rule Executor
//!
//! One executor run services one trigger firing:
//!
//! 1. under the engine lock: gate on `IDLE` (anything else drops the
//!    firing), transition to `RUNNING`, stage the trigger's outputs into
//!    the execution context, resolve any not-yet-resolved connections and
//!    snapshot the work set,
//! 2. without the lock: evaluate conditions in declared order, stopping at
//!    the first unsatisfied one, then run actions in declared order. Each
//!    handler receives its resolved inputs merged over the context
//!    snapshot. Action outputs feed the working context immediately so
//!    later actions can consume them. A failing action is logged and the
//!    pipeline continues,
//! 3. under the lock again: merge the working context back and transition
//!    `RUNNING` back to `IDLE`. If a teardown forced another status while
//!    the run was in flight, that status is left untouched; if the
//!    activation itself was replaced (an update, or a remove and re-add
//!    under the same UID), the run's result is discarded entirely so the
//!    replacement never inherits context from modules it does not have.
//!    The staged activation is identified by its generation, bumped on
//!    every module rebuild.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::callback::Firing;
use super::dataflow::{self, OutputRef};
use super::EngineCore;
use crate::handler::{ActionHandler, ConditionHandler};
use crate::models::{RuleStatus, RuleStatusInfo};

struct StagedCondition {
    module_id: String,
    handler: Arc<dyn ConditionHandler>,
    inputs: HashMap<String, OutputRef>,
}

struct StagedAction {
    module_id: String,
    handler: Arc<dyn ActionHandler>,
    inputs: HashMap<String, OutputRef>,
}

pub(crate) async fn run(core: Arc<EngineCore>, firing: Firing) {
    let rule_uid = firing.rule_uid.clone();

    // Phase 1: gate and stage under the engine lock
    let staged = {
        let mut notices = Vec::new();
        let mut guard = core.lock_state();
        let state = &mut *guard;

        if core.is_disposed() {
            return;
        }
        let Some(activation) = state.rules.get_mut(&rule_uid) else {
            debug!(rule = rule_uid.as_str(), "rule gone, firing dropped");
            return;
        };

        let current = core.status_of(&rule_uid);
        if current != Some(RuleStatus::Idle) {
            debug!(
                rule = rule_uid.as_str(),
                status = ?current,
                execution = %firing.id,
                "rule is not idle, firing dropped"
            );
            return;
        }
        core.update_status(&rule_uid, RuleStatusInfo::new(RuleStatus::Running), &mut notices);

        for (output, value) in &firing.outputs {
            activation
                .context
                .insert(format!("{}.{}", firing.trigger_id, output), value.clone());
        }

        let producers = activation.producer_ids();
        for module in activation
            .conditions
            .iter_mut()
            .chain(activation.actions.iter_mut())
        {
            if module.resolved_inputs.is_none() {
                module.resolved_inputs = Some(dataflow::resolve_connections(
                    &rule_uid,
                    &module.instance.id,
                    &module.connections,
                    &producers,
                ));
            }
        }

        let conditions: Vec<StagedCondition> = activation
            .conditions
            .iter()
            .filter_map(|module| {
                let handler = module.handler.as_ref()?.as_condition()?.clone();
                Some(StagedCondition {
                    module_id: module.instance.id.clone(),
                    handler,
                    inputs: module.resolved_inputs.clone().unwrap_or_default(),
                })
            })
            .collect();
        let actions: Vec<StagedAction> = activation
            .actions
            .iter()
            .filter_map(|module| {
                let handler = module.handler.as_ref()?.as_action()?.clone();
                Some(StagedAction {
                    module_id: module.instance.id.clone(),
                    handler,
                    inputs: module.resolved_inputs.clone().unwrap_or_default(),
                })
            })
            .collect();
        let context = activation.context.clone();
        let generation = activation.generation;

        drop(guard);
        core.emit(notices);
        (conditions, actions, context, generation)
    };
    let (conditions, actions, mut context, generation) = staged;

    // Phase 2: evaluate without the lock
    let mut satisfied = true;
    for condition in &conditions {
        let snapshot = merged_inputs(&condition.inputs, &context);
        match condition.handler.is_satisfied(&snapshot).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    rule = rule_uid.as_str(),
                    module = condition.module_id.as_str(),
                    execution = %firing.id,
                    "condition not satisfied, skipping actions"
                );
                satisfied = false;
                break;
            }
            Err(cause) => {
                warn!(
                    rule = rule_uid.as_str(),
                    module = condition.module_id.as_str(),
                    error = %cause,
                    "condition handler failed, treating as not satisfied"
                );
                satisfied = false;
                break;
            }
        }
    }

    if satisfied {
        for action in &actions {
            let snapshot = merged_inputs(&action.inputs, &context);
            match action.handler.execute(&snapshot).await {
                Ok(Some(outputs)) => {
                    for (output, value) in outputs {
                        context.insert(format!("{}.{}", action.module_id, output), value);
                    }
                }
                Ok(None) => {}
                Err(cause) => {
                    error!(
                        rule = rule_uid.as_str(),
                        module = action.module_id.as_str(),
                        error = %cause,
                        "action handler failed, continuing with remaining actions"
                    );
                }
            }
        }
    }

    // Phase 3: merge back and return to idle, but only into the same
    // activation this run was staged from
    let mut notices = Vec::new();
    {
        let mut guard = core.lock_state();
        let state = &mut *guard;
        match state.rules.get_mut(&rule_uid) {
            Some(activation) if activation.generation == generation => {
                activation.context = context;
                match core.status_of(&rule_uid) {
                    Some(RuleStatus::Running) => {
                        core.update_status(
                            &rule_uid,
                            RuleStatusInfo::new(RuleStatus::Idle),
                            &mut notices,
                        );
                    }
                    other => debug!(
                        rule = rule_uid.as_str(),
                        status = ?other,
                        "rule torn down mid-flight, leaving status untouched"
                    ),
                }
            }
            Some(_) => debug!(
                rule = rule_uid.as_str(),
                execution = %firing.id,
                "activation superseded mid-flight, discarding execution result"
            ),
            None => debug!(
                rule = rule_uid.as_str(),
                execution = %firing.id,
                "rule gone, discarding execution result"
            ),
        }
    }
    core.emit(notices);
    debug!(rule = rule_uid.as_str(), execution = %firing.id, "execution finished");
}

/// Resolved inputs merged over the context snapshot; inputs win
fn merged_inputs(
    inputs: &HashMap<String, OutputRef>,
    context: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut merged = context.clone();
    merged.extend(dataflow::materialize_inputs(inputs, context));
    merged
}
