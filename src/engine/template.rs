// Template expansion - deriving a concrete rule from a template

//! # Template Expansion
//!
//! A template-bound rule carries a template UID and a configuration map.
//! Expansion clones the template's modules and resolves `${name}`
//! references inside each module's configuration against the rule's
//! configuration:
//!
//! - a value that is exactly one reference, `"${name}"`, is replaced by
//!   the configuration value itself, so numbers stay numbers and objects
//!   stay objects
//! - references embedded in longer strings interpolate textually
//! - arrays and objects are walked recursively
//!
//! An unresolved reference fails the whole expansion; the rule then
//! reports `CONFIGURATION_ERROR` instead of binding.
//!
//! The expanded rule adopts the original rule's UID and configuration and
//! the union of the rule's and the template's tags.

use serde_json::Value;
use std::collections::HashMap;

use crate::models::{Rule, RuleTemplate};
use crate::{HomeflowError, Result};

/// Build the concrete rule body for a template-bound rule
pub(crate) fn expand_rule(rule: &Rule, template: &RuleTemplate) -> Result<Rule> {
    let mut expanded = rule.clone();

    expanded.triggers = template.triggers.clone();
    for trigger in &mut expanded.triggers {
        trigger.configuration = substitute_config(&trigger.configuration, &rule.configuration)?;
    }

    expanded.conditions = template.conditions.clone();
    for condition in &mut expanded.conditions {
        condition.configuration =
            substitute_config(&condition.configuration, &rule.configuration)?;
    }

    expanded.actions = template.actions.clone();
    for action in &mut expanded.actions {
        action.configuration = substitute_config(&action.configuration, &rule.configuration)?;
    }

    expanded.tags.extend(template.tags.iter().cloned());
    Ok(expanded)
}

fn substitute_config(
    config: &HashMap<String, Value>,
    rule_config: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    config
        .iter()
        .map(|(key, value)| Ok((key.clone(), substitute_value(value, rule_config)?)))
        .collect()
}

fn substitute_value(value: &Value, rule_config: &HashMap<String, Value>) -> Result<Value> {
    match value {
        Value::String(text) => substitute_str(text, rule_config),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, rule_config))
                .collect::<Result<_>>()?,
        )),
        Value::Object(fields) => Ok(Value::Object(
            fields
                .iter()
                .map(|(key, item)| Ok((key.clone(), substitute_value(item, rule_config)?)))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn substitute_str(text: &str, rule_config: &HashMap<String, Value>) -> Result<Value> {
    // Whole-string reference: keep the configured value's type
    if let Some(name) = single_reference(text) {
        return rule_config
            .get(name)
            .cloned()
            .ok_or_else(|| unresolved(name));
    }

    let mut result = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // No closing brace; the remainder is literal text
            result.push_str(rest);
            return Ok(Value::String(result));
        };
        let name = &after[..end];
        let value = rule_config.get(name).ok_or_else(|| unresolved(name))?;
        result.push_str(&rest[..start]);
        result.push_str(&stringify(value));
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(Value::String(result))
}

/// `Some(name)` when the whole string is a single `${name}` reference
fn single_reference(text: &str) -> Option<&str> {
    let name = text.strip_prefix("${")?.strip_suffix('}')?;
    if name.contains("${") || name.contains('}') {
        return None;
    }
    Some(name)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn unresolved(name: &str) -> HomeflowError {
    HomeflowError::Configuration(format!(
        "no configuration value for template reference ${{{}}}",
        name
    ))
}
