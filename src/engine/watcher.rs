// Registry watcher - reacting to factory, type and template changes

//! # Registry Watcher
//!
//! Three background tasks, one per subscription:
//!
//! - **factory events**: an appearing factory re-drives the
//!   `NOT_INITIALIZED` rules referencing its types; a disappearing one
//!   force-tears-down the `IDLE`/`RUNNING` rules that depend on it,
//! - **module-type events**: added or updated types re-drive waiting
//!   rules,
//! - **template events**: added or updated templates re-drive the rules
//!   recorded as awaiting them.
//!
//! Every reaction goes through the engine core's regular binding path
//! under the engine lock. The tasks hold the core only weakly and stop
//! when the engine is dropped or the channel closes.

use std::sync::Weak;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::EngineCore;
use crate::registry::{FactoryEvent, RegistryEvent};

pub(crate) async fn watch_factories(
    core: Weak<EngineCore>,
    mut events: broadcast::Receiver<FactoryEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(core) = core.upgrade() else { break };
                match event {
                    FactoryEvent::Registered(factory) => core.add_handler_factory(factory),
                    FactoryEvent::Unregistered(factory) => {
                        core.remove_handler_factory(&factory)
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "factory event subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("factory watcher stopped");
}

pub(crate) async fn watch_module_types(
    core: Weak<EngineCore>,
    mut events: broadcast::Receiver<RegistryEvent>,
) {
    loop {
        match events.recv().await {
            Ok(RegistryEvent::Added(uid)) | Ok(RegistryEvent::Updated(uid)) => {
                let Some(core) = core.upgrade() else { break };
                core.module_type_changed(&uid);
            }
            Ok(RegistryEvent::Removed(uid)) => {
                // Bound rules keep running against the schema they were
                // validated with; nothing to re-drive
                debug!(type_uid = uid.as_str(), "module type removed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "module type subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("module type watcher stopped");
}

pub(crate) async fn watch_templates(
    core: Weak<EngineCore>,
    mut events: broadcast::Receiver<RegistryEvent>,
) {
    loop {
        match events.recv().await {
            Ok(RegistryEvent::Added(uid)) | Ok(RegistryEvent::Updated(uid)) => {
                let Some(core) = core.upgrade() else { break };
                core.template_changed(&uid);
            }
            Ok(RegistryEvent::Removed(uid)) => {
                debug!(template = uid.as_str(), "template removed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "template subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("template watcher stopped");
}
