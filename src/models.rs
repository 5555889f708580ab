use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::error::{ValidationError, ValidationErrors};

// ============================================================================
// Run Request
// ============================================================================

/// Inbound request to execute (or relay) one browser-test run.
///
/// Validated before the upstream backend is ever contacted; the body is
/// forwarded as-is once it passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub test_case_id: i64,
    pub steps: Vec<TestStep>,
    pub browser: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    // Set by the executor when re-opening the exchange after retry_scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.test_case_id <= 0 {
            errors.add(
                ValidationError::new("test_case_id", "must be a positive integer")
                    .with_code("NOT_POSITIVE"),
            );
        }

        if self.steps.is_empty() {
            errors.add(
                ValidationError::new("steps", "must contain at least one step")
                    .with_code("EMPTY"),
            );
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.action.trim().is_empty() {
                errors.add(
                    ValidationError::new(format!("steps[{}].action", i), "must not be empty")
                        .with_code("EMPTY"),
                );
            }
        }

        if BrowserEngine::from_str(&self.browser).is_err() {
            let known = BrowserEngine::iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            errors.add(
                ValidationError::new(
                    "browser",
                    format!("unknown engine '{}', expected one of: {}", self.browser, known),
                )
                .with_code("UNKNOWN_ENGINE"),
            );
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// ============================================================================
// Browser Engines
// ============================================================================

/// Closed set of engines the backend can drive.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BrowserEngine {
    Chromium,
    Firefox,
    Webkit,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub backend: bool,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth { backend: true },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.services.backend
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RunRequest {
        RunRequest {
            test_case_id: 42,
            steps: vec![TestStep {
                action: "goto".to_string(),
                target: Some("https://example.com".to_string()),
                value: None,
                description: None,
            }],
            browser: "chromium".to_string(),
            base_url: None,
            max_retries: Some(2),
            original_run_id: None,
            retry_attempt: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn test_non_positive_id_rejected() {
        let mut request = valid_request();
        request.test_case_id = 0;

        let errors = request.validate().unwrap_err();
        assert!(errors.errors.iter().any(|e| e.field == "test_case_id"));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let mut request = valid_request();
        request.steps.clear();

        let errors = request.validate().unwrap_err();
        assert!(errors.errors.iter().any(|e| e.field == "steps"));
    }

    #[test]
    fn test_blank_action_rejected() {
        let mut request = valid_request();
        request.steps.push(TestStep {
            action: "  ".to_string(),
            target: None,
            value: None,
            description: None,
        });

        let errors = request.validate().unwrap_err();
        assert!(errors.errors.iter().any(|e| e.field == "steps[1].action"));
    }

    #[test]
    fn test_unknown_browser_rejected() {
        let mut request = valid_request();
        request.browser = "netscape".to_string();

        let errors = request.validate().unwrap_err();
        let err = errors
            .errors
            .iter()
            .find(|e| e.field == "browser")
            .unwrap();
        assert!(err.message.contains("chromium"));
    }

    #[test]
    fn test_engine_names_round_trip() {
        for engine in BrowserEngine::iter() {
            let parsed = BrowserEngine::from_str(&engine.to_string()).unwrap();
            assert_eq!(parsed, engine);
        }
    }

    #[test]
    fn test_health_status() {
        let health = HealthStatus::healthy();
        assert!(health.is_healthy());
        assert_eq!(health.status, "healthy");
    }
}
