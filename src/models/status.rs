// Rule status - the per-rule readiness state reported to observers

//! # Rule Status
//!
//! Every registered rule is in exactly one of four states at any moment:
//!
//! - **Disabled**: explicitly switched off, nothing is bound
//! - **NotInitialized**: registered but not runnable; the detail code says
//!   why (missing template, missing handler, failed binding)
//! - **Idle**: fully bound, waiting for a trigger firing
//! - **Running**: a trigger firing is being executed right now
//!
//! Status changes are published to the registered status observer as
//! [`RuleStatusInfo`] bundles: the state plus an optional detail code and
//! human-readable message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four rule states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    Disabled,
    NotInitialized,
    Idle,
    Running,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStatus::Disabled => write!(f, "DISABLED"),
            RuleStatus::NotInitialized => write!(f, "NOT_INITIALIZED"),
            RuleStatus::Idle => write!(f, "IDLE"),
            RuleStatus::Running => write!(f, "RUNNING"),
        }
    }
}

/// Why a rule is in its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusDetail {
    /// A handler factory for a referenced module type left the system
    HandlerMissing,
    /// Binding was attempted and failed; the message lists each module
    HandlerInitializingError,
    /// The referenced rule template is not registered yet
    TemplateMissing,
    /// Template expansion hit an unresolvable configuration reference
    ConfigurationError,
}

impl std::fmt::Display for StatusDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusDetail::HandlerMissing => write!(f, "HANDLER_MISSING"),
            StatusDetail::HandlerInitializingError => write!(f, "HANDLER_INITIALIZING_ERROR"),
            StatusDetail::TemplateMissing => write!(f, "TEMPLATE_MISSING"),
            StatusDetail::ConfigurationError => write!(f, "CONFIGURATION_ERROR"),
        }
    }
}

/// A status snapshot: state, optional detail code, optional message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStatusInfo {
    pub status: RuleStatus,
    #[serde(default)]
    pub detail: Option<StatusDetail>,
    #[serde(default)]
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RuleStatusInfo {
    pub fn new(status: RuleStatus) -> Self {
        Self {
            status,
            detail: None,
            description: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_detail<D: Into<String>>(
        status: RuleStatus,
        detail: StatusDetail,
        description: D,
    ) -> Self {
        Self {
            status,
            detail: Some(detail),
            description: Some(description.into()),
            updated_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for RuleStatusInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(detail) = &self.detail {
            write!(f, "/{}", detail)?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}
