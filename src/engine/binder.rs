// Handler binding - attaching factory-produced handlers to rule modules

//! # Handler Binding
//!
//! Binding walks every module of a rule and requests a handler from the
//! responsible factory:
//!
//! 1. the system parent of the module-type UID picks the factory
//!    (`timer:sunrise` routes through the composite factory to the
//!    factory claiming `timer`; plain `timer` goes to it directly),
//! 2. a missing factory, a `None` answer or a handler of the wrong role
//!    records an error for that module,
//! 3. errors accumulate across all modules so one status update can list
//!    every problem at once.
//!
//! After binding, connection validation checks the declared connections
//! against the module-type registry. Validation is schema-driven: where a
//! type is not registered or declares no inputs/outputs, nothing can be
//! checked and the connection is accepted as declared.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::activation::RuleActivation;
use super::composite::CompositeHandlerFactory;
use crate::handler::{ModuleHandler, ModuleHandlerFactory};
use crate::models::{is_custom_type, system_parent_of};
use crate::registry::ModuleTypeRegistry;

/// Attempt to bind every module of the activation. Returns the collected
/// error lines; empty means fully bound.
pub(crate) fn bind_rule(
    activation: &mut RuleActivation,
    factories: &HashMap<String, Arc<dyn ModuleHandlerFactory>>,
    composite: &CompositeHandlerFactory,
    module_types: &dyn ModuleTypeRegistry,
) -> Vec<String> {
    let rule_uid = activation.uid.clone();
    let mut errors = Vec::new();

    for module in activation.modules_mut() {
        let module_id = module.instance.id.clone();
        let type_uid = module.instance.type_uid.clone();
        let parent = system_parent_of(&type_uid).to_string();

        let Some(factory) = factories.get(&parent) else {
            errors.push(format!(
                "module '{}': no handler factory for module type '{}'",
                module_id, type_uid
            ));
            continue;
        };

        let (bound_instance, handler) = if is_custom_type(&type_uid) {
            let Some(custom_type) = module_types.get(&type_uid, None) else {
                errors.push(format!(
                    "module '{}': custom module type '{}' is not registered",
                    module_id, type_uid
                ));
                continue;
            };
            composite.get_handler(&module.instance, &rule_uid, &custom_type, factory)
        } else {
            (
                module.instance.clone(),
                factory.get_handler(&module.instance, &rule_uid),
            )
        };

        match handler {
            Some(handler) if handler.kind() == module.instance.kind => {
                debug!(
                    rule = rule_uid.as_str(),
                    module = module_id.as_str(),
                    type_uid = type_uid.as_str(),
                    "handler bound"
                );
                module.handler = Some(handler);
                module.bound_instance = Some(bound_instance);
                module.bound_factory_key = Some(parent);
            }
            Some(handler) => {
                let produced = handler.kind();
                factory.unget_handler(&bound_instance, &rule_uid, handler);
                errors.push(format!(
                    "module '{}': factory returned a {} handler for a {} module",
                    module_id, produced, module.instance.kind
                ));
            }
            None => {
                errors.push(format!(
                    "module '{}': factory produced no handler for module type '{}'",
                    module_id, type_uid
                ));
            }
        }
    }

    errors
}

/// Return every attached handler to its factory and clear the cached
/// dataflow resolution. Safe to call on partially bound activations.
pub(crate) fn release_handlers(
    activation: &mut RuleActivation,
    factories: &HashMap<String, Arc<dyn ModuleHandlerFactory>>,
) {
    let rule_uid = activation.uid.clone();
    for module in activation.modules_mut() {
        if let Some(handler) = module.handler.take() {
            if let ModuleHandler::Trigger(trigger) = &handler {
                trigger.clear_callback();
            }
            let instance = module
                .bound_instance
                .take()
                .unwrap_or_else(|| module.instance.clone());
            match module
                .bound_factory_key
                .take()
                .and_then(|key| factories.get(&key).cloned())
            {
                Some(factory) => factory.unget_handler(&instance, &rule_uid, handler),
                None => warn!(
                    rule = rule_uid.as_str(),
                    module = module.instance.id.as_str(),
                    "factory gone before handler release"
                ),
            }
        }
        module.resolved_inputs = None;
    }
}

/// Check declared connections against the module-type registry
pub(crate) fn validate_connections(
    activation: &RuleActivation,
    module_types: &dyn ModuleTypeRegistry,
) -> Vec<String> {
    let mut errors = Vec::new();
    let types_by_id: HashMap<&str, &str> = activation
        .modules()
        .map(|module| {
            (
                module.instance.id.as_str(),
                module.instance.type_uid.as_str(),
            )
        })
        .collect();

    for module in activation.conditions.iter().chain(activation.actions.iter()) {
        let module_id = module.instance.id.as_str();
        let target_type = module_types.get(&module.instance.type_uid, None);

        for connection in &module.connections {
            let declared_input = target_type.as_ref().and_then(|module_type| {
                if module_type.inputs.is_empty() {
                    None
                } else {
                    Some(module_type.input(&connection.input))
                }
            });
            if let Some(None) = declared_input {
                errors.push(format!(
                    "module '{}': input '{}' is not declared by module type '{}'",
                    module_id, connection.input, module.instance.type_uid
                ));
                continue;
            }

            let Some(source_type_uid) = types_by_id.get(connection.source_module.as_str()) else {
                errors.push(format!(
                    "module '{}': connection '{}' references unknown module '{}'",
                    module_id, connection, connection.source_module
                ));
                continue;
            };

            let Some(source_type) = module_types.get(source_type_uid, None) else {
                continue;
            };
            if source_type.outputs.is_empty() {
                continue;
            }
            match source_type.output(&connection.output) {
                None => errors.push(format!(
                    "module '{}': output '{}' is not declared by module type '{}'",
                    module_id, connection.output, source_type_uid
                )),
                Some(output) => {
                    let input = declared_input.flatten();
                    if let Some(input) = input {
                        if !types_compatible(&input.type_name, &output.type_name) {
                            errors.push(format!(
                                "module '{}': input '{}' ({}) is incompatible with output '{}.{}' ({})",
                                module_id,
                                connection.input,
                                input.type_name,
                                connection.source_module,
                                connection.output,
                                output.type_name
                            ));
                        }
                    }
                }
            }
        }
    }

    errors
}

fn types_compatible(input_type: &str, output_type: &str) -> bool {
    input_type.is_empty()
        || output_type.is_empty()
        || input_type == "any"
        || output_type == "any"
        || input_type == output_type
}
