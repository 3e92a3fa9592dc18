//! Retry policy resolution for failing leaves
//!
//! Resolution order: a step-level `retries` override wins over the
//! workflow-level [`RetryConfig`]; the default is zero additional attempts
//! (exactly one try). Retries are immediate re-invocations with identical
//! input. Exhausting retries marks the leaf `failed` with the final error and
//! short-circuits only that branch; concurrent siblings are unaffected.

use crate::step::Step;
use serde::{Deserialize, Serialize};

/// Workflow-level retry configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure (0 = exactly one try)
    pub attempts: u32,
}

impl RetryConfig {
    /// Config allowing the given number of additional attempts
    pub fn new(attempts: u32) -> Self {
        Self { attempts }
    }
}

/// Number of additional attempts for a step under the given workflow config
pub(crate) fn resolve_attempts(step: &Step, config: &RetryConfig) -> u32 {
    step.retries.unwrap_or(config.attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepOutcome;
    use serde_json::json;

    fn step(retries: Option<u32>) -> Step {
        let mut s = Step::new("s", |_ctx| async move { StepOutcome::success(json!({})) });
        if let Some(r) = retries {
            s = s.with_retries(r);
        }
        s
    }

    #[test]
    fn test_step_override_wins() {
        let config = RetryConfig::new(5);
        assert_eq!(resolve_attempts(&step(Some(2)), &config), 2);
    }

    #[test]
    fn test_workflow_config_applies_without_override() {
        let config = RetryConfig::new(3);
        assert_eq!(resolve_attempts(&step(None), &config), 3);
    }

    #[test]
    fn test_default_is_single_try() {
        assert_eq!(resolve_attempts(&step(None), &RetryConfig::default()), 0);
    }
}
