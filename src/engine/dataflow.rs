// Dataflow binding - resolving connections to live output references

//! # Dataflow Binding
//!
//! Each condition and action declares connections of the form
//! `input <- sourceModule.output`. On the module's first execution the
//! engine resolves those declarations into [`OutputRef`]s, lazy pointers
//! into the rule's execution context, and caches the mapping so later
//! executions reuse it.
//!
//! A connection whose source module produces no outputs (a condition, or
//! an id that does not exist in the rule) is logged and skipped; the
//! remaining connections still resolve.
//!
//! At execution time [`materialize_inputs`] dereferences each ref against
//! the current context snapshot. Values the source has not published yet
//! are simply absent from the snapshot.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::models::Connection;

/// A lazy pointer to the latest value a module published for one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputRef {
    pub source_module: String,
    pub output: String,
}

impl OutputRef {
    /// The execution-context key this ref dereferences through
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.source_module, self.output)
    }
}

/// Resolve a module's declared connections against the rule's value
/// producers (trigger and action module ids)
pub(crate) fn resolve_connections(
    rule_uid: &str,
    module_id: &str,
    connections: &[Connection],
    producers: &HashSet<String>,
) -> HashMap<String, OutputRef> {
    let mut resolved = HashMap::new();
    for connection in connections {
        if !producers.contains(&connection.source_module) {
            warn!(
                rule = rule_uid,
                module = module_id,
                connection = %connection,
                "connection source is not a value-producing module, skipping"
            );
            continue;
        }
        resolved.insert(
            connection.input.clone(),
            OutputRef {
                source_module: connection.source_module.clone(),
                output: connection.output.clone(),
            },
        );
    }
    resolved
}

/// Dereference each resolved input against the current context
pub(crate) fn materialize_inputs(
    resolved: &HashMap<String, OutputRef>,
    context: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    resolved
        .iter()
        .filter_map(|(input, output_ref)| {
            context
                .get(&output_ref.qualified_name())
                .map(|value| (input.clone(), value.clone()))
        })
        .collect()
}
