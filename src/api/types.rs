//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::driver::VisionMode;

/// Browser automation task request.
///
/// Timeouts are independent: `llm_timeout` bounds one model call,
/// `step_timeout` bounds one agent step, and `timeout` bounds the whole
/// task. The per-call timeouts must sit below the overall one; that is a
/// caller error and rejected before execution begins.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    /// Task for the agent to perform
    pub task: String,

    /// Client-generated task ID for cancellation support
    #[serde(default)]
    pub task_id: Option<String>,

    /// LLM provider: browseruse, gemini, openai, anthropic
    #[serde(default = "default_provider")]
    pub llm_provider: String,

    /// Model name (uses provider default if not set)
    #[serde(default)]
    pub llm_model: Option<String>,

    /// LLM provider for page extraction (defaults to main LLM)
    #[serde(default)]
    pub page_extraction_llm_provider: Option<String>,

    /// Model for page extraction
    #[serde(default)]
    pub page_extraction_llm_model: Option<String>,

    /// Vision mode: "auto", true, or false
    #[serde(default, deserialize_with = "deserialize_vision")]
    pub use_vision: VisionMode,

    /// Maximum agent steps
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Generate GIF of agent actions
    #[serde(default)]
    pub generate_gif: bool,

    /// Task timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Timeout for individual LLM calls in seconds
    #[serde(default = "default_call_timeout")]
    pub llm_timeout: u64,

    /// Timeout for each agent step in seconds
    #[serde(default = "default_call_timeout")]
    pub step_timeout: u64,

    /// Calculate LLM usage costs
    #[serde(default = "default_true")]
    pub calculate_cost: bool,

    /// Enable detailed debug logging and the debug bundle in the response
    #[serde(default)]
    pub debug_mode: bool,

    /// Run browser in headless mode (false for VNC viewing)
    #[serde(default)]
    pub headless: bool,

    /// Browser window width
    #[serde(default = "default_window_width")]
    pub window_width: u32,

    /// Browser window height
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Save full conversation history
    #[serde(default)]
    pub save_conversation: bool,

    /// Customer ID for organizing files
    #[serde(default)]
    pub customer_id: Option<i64>,

    /// Enable persistent browser session (preserves cookies, auth tokens,
    /// local storage across tasks)
    #[serde(default = "default_true")]
    pub session_enabled: bool,
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_max_steps() -> u32 {
    100
}

fn default_timeout() -> u64 {
    900
}

fn default_call_timeout() -> u64 {
    120
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_true() -> bool {
    true
}

fn deserialize_vision<'de, D>(deserializer: D) -> Result<VisionMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(VisionMode::normalize(&value))
}

impl TaskRequest {
    /// Fail-fast validation of caller input. Violations never reach the
    /// supervisor.
    pub fn validate(&self) -> Result<(), String> {
        if self.task.trim().is_empty() {
            return Err("task must not be empty".to_string());
        }
        range_check("max_steps", self.max_steps as u64, 1, 500)?;
        range_check("timeout", self.timeout, 30, 1800)?;
        range_check("llm_timeout", self.llm_timeout, 30, 600)?;
        range_check("step_timeout", self.step_timeout, 30, 600)?;
        range_check("window_width", self.window_width as u64, 800, 3840)?;
        range_check("window_height", self.window_height as u64, 600, 2160)?;

        if self.llm_timeout >= self.timeout {
            return Err(format!(
                "llm_timeout ({}) must be below the overall timeout ({})",
                self.llm_timeout, self.timeout
            ));
        }
        if self.step_timeout >= self.timeout {
            return Err(format!(
                "step_timeout ({}) must be below the overall timeout ({})",
                self.step_timeout, self.timeout
            ));
        }
        Ok(())
    }
}

fn range_check(field: &str, value: u64, min: u64, max: u64) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!(
            "{} must be between {} and {} (got {})",
            field, min, max, value
        ));
    }
    Ok(())
}

/// Browser automation task response.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub success: bool,
    pub result: Option<String>,
    pub final_url: Option<String>,
    pub urls_visited: Vec<String>,
    pub steps_taken: u32,
    pub execution_time: f64,
    pub gif_path: Option<String>,
    pub error: Option<String>,
    /// Human-readable judge evaluation of task execution (if available)
    pub judge_verdict: Option<String>,
    pub cost: Option<f64>,
    pub cost_currency: String,
    pub llm_calls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_data: Option<crate::report::DebugBundle>,
    pub conversation_path: Option<String>,
    pub downloaded_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<String>,
}

impl TaskResponse {
    /// Skeleton response for non-completed outcomes (failure, timeout,
    /// cancellation). Always carries the elapsed time.
    pub fn not_completed(task_id: String, error: String, execution_time: f64) -> Self {
        Self {
            task_id,
            success: false,
            result: None,
            final_url: None,
            urls_visited: Vec::new(),
            steps_taken: 0,
            execution_time,
            gif_path: None,
            error: Some(error),
            judge_verdict: None,
            cost: None,
            cost_currency: "USD".to_string(),
            llm_calls: 0,
            debug_data: None,
            conversation_path: None,
            downloaded_files: Vec::new(),
            partial_result: None,
        }
    }
}

/// Response to a cancellation request.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub partial_result: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub display: String,
    pub driver_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request(extra: serde_json::Value) -> TaskRequest {
        let mut base = serde_json::json!({ "task": "find the pricing page" });
        if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let request = minimal_request(serde_json::json!({}));
        assert_eq!(request.llm_provider, "gemini");
        assert_eq!(request.max_steps, 100);
        assert_eq!(request.timeout, 900);
        assert_eq!(request.llm_timeout, 120);
        assert_eq!(request.step_timeout, 120);
        assert!(request.calculate_cost);
        assert!(request.session_enabled);
        assert!(!request.debug_mode);
        assert_eq!(request.use_vision, VisionMode::Auto);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn use_vision_accepts_bool_and_string() {
        let request = minimal_request(serde_json::json!({ "use_vision": true }));
        assert_eq!(request.use_vision, VisionMode::Enabled);

        let request = minimal_request(serde_json::json!({ "use_vision": "false" }));
        assert_eq!(request.use_vision, VisionMode::Disabled);

        let request = minimal_request(serde_json::json!({ "use_vision": "anything" }));
        assert_eq!(request.use_vision, VisionMode::Auto);
    }

    #[test]
    fn empty_task_is_rejected() {
        let request = minimal_request(serde_json::json!({ "task": "  " }));
        assert!(request.validate().is_err());
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let request = minimal_request(serde_json::json!({ "max_steps": 0 }));
        assert!(request.validate().unwrap_err().contains("max_steps"));

        let request = minimal_request(serde_json::json!({ "timeout": 10_000 }));
        assert!(request.validate().unwrap_err().contains("timeout"));

        let request = minimal_request(serde_json::json!({ "window_width": 100 }));
        assert!(request.validate().unwrap_err().contains("window_width"));
    }

    #[test]
    fn per_call_timeouts_must_sit_below_overall() {
        let request = minimal_request(serde_json::json!({ "timeout": 60, "llm_timeout": 60 }));
        assert!(request.validate().unwrap_err().contains("llm_timeout"));

        let request = minimal_request(serde_json::json!({ "timeout": 60, "step_timeout": 90 }));
        assert!(request.validate().unwrap_err().contains("step_timeout"));

        let request =
            minimal_request(serde_json::json!({ "timeout": 300, "llm_timeout": 60, "step_timeout": 60 }));
        assert!(request.validate().is_ok());
    }
}
