//! Browser driver collaborator interfaces.
//!
//! The actual page-driving agent lives in a separate component; this module
//! defines the seams the task engine needs from it: session lifecycle,
//! in-page script evaluation, storage-state export, and a queryable
//! execution history. Every history query is independently fallible so the
//! aggregator can degrade per field instead of losing the whole report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmSelection;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser driver error: {0}")]
    Driver(String),

    #[error("browser session not started")]
    NotStarted,
}

/// A single history query failed. The rest of the history stays queryable.
#[derive(Debug, Error)]
#[error("history query failed: {0}")]
pub struct HistoryError(pub String);

/// Vision mode for the agent. `auto` lets the driver decide per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionMode {
    #[default]
    Auto,
    Enabled,
    Disabled,
}

impl VisionMode {
    /// Normalize the caller's value. Booleans map directly; the strings
    /// `"true"`/`"false"` are accepted, anything else means auto.
    pub fn normalize(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(true) => Self::Enabled,
            serde_json::Value::Bool(false) => Self::Disabled,
            serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Self::Enabled,
                "false" => Self::Disabled,
                _ => Self::Auto,
            },
            _ => Self::Auto,
        }
    }
}

/// Browser construction parameters.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,

    /// Existing storage-state blob to load, if any
    pub storage_state: Option<PathBuf>,

    /// Directory downloads should land in (advisory; the driver may ignore it)
    pub downloads_dir: PathBuf,

    /// Keep the browser open after the agent finishes so state can be exported
    pub keep_alive: bool,
}

/// Agent construction parameters.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub task: String,
    pub llm: LlmSelection,
    pub page_extraction_llm: Option<LlmSelection>,
    pub vision: VisionMode,
    pub calculate_cost: bool,
    pub llm_timeout: Duration,
    pub step_timeout: Duration,

    /// Where the agent may write files
    pub working_dir: PathBuf,

    /// Record an animated trace to this path
    pub gif_path: Option<PathBuf>,

    /// Save the full conversation to this path
    pub conversation_path: Option<PathBuf>,
}

/// Token usage and cost as reported by the driver, when available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_cost: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Optional pass/fail evaluation of the finished task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Judgement {
    pub verdict: bool,
    pub reasoning: Option<String>,
    pub failure_reason: Option<String>,
    pub impossible_task: bool,
    pub reached_captcha: bool,
}

/// One model reasoning/action pair from the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelThought {
    pub thought: String,
    pub action: Option<String>,
    pub reasoning: Option<String>,
}

/// A live browser session owned by one task.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Establish the control channel. Must be called before navigation.
    async fn start(&self) -> Result<(), DriverError>;

    /// Orderly shutdown. Sessions are created with keep-alive, so the caller
    /// owns closing them on every exit path.
    async fn stop(&self) -> Result<(), DriverError>;

    /// Out-of-band termination of the underlying browser process. Safe to
    /// call while an execution is still using the session.
    async fn kill(&self) -> Result<(), DriverError>;

    /// Evaluate a script in the currently active page. Returns `None` when no
    /// page is open.
    async fn eval_in_active_page(
        &self,
        script: &str,
    ) -> Result<Option<serde_json::Value>, DriverError>;

    /// Register a script that runs in every new page context before any
    /// task-supplied script.
    async fn add_init_script(&self, script: &str) -> Result<(), DriverError>;

    /// Write the driver's opaque storage-state blob to `path`. Only works
    /// while the session is open.
    async fn export_storage_state(&self, path: &Path) -> Result<(), DriverError>;
}

/// The page-driving agent bound to one session.
#[async_trait]
pub trait BrowserAgent: Send + Sync {
    async fn run(&self, max_steps: u32) -> Result<Arc<dyn ExecutionHistory>, DriverError>;

    /// Last-known state snapshot. Never blocks on the running execution.
    fn current_state(&self) -> Option<String>;
}

/// Factory constructing sessions and agents.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn create_session(&self, spec: SessionSpec) -> Result<Arc<dyn BrowserSession>, DriverError>;

    async fn create_agent(
        &self,
        spec: AgentSpec,
        session: Arc<dyn BrowserSession>,
    ) -> Result<Arc<dyn BrowserAgent>, DriverError>;

    /// Driver version string for the health endpoint.
    fn version(&self) -> String;
}

/// Record of one finished (or aborted) agent run, queryable field by field.
pub trait ExecutionHistory: Send + Sync {
    fn final_result(&self) -> Result<Option<String>, HistoryError>;
    fn is_done(&self) -> Result<bool, HistoryError>;
    fn is_successful(&self) -> Result<Option<bool>, HistoryError>;
    fn has_errors(&self) -> Result<bool, HistoryError>;
    fn urls(&self) -> Result<Vec<String>, HistoryError>;
    fn number_of_steps(&self) -> Result<u32, HistoryError>;
    fn total_duration_seconds(&self) -> Result<f64, HistoryError>;
    fn errors(&self) -> Result<Vec<String>, HistoryError>;
    fn usage(&self) -> Result<Option<UsageSummary>, HistoryError>;
    fn judgement(&self) -> Result<Option<Judgement>, HistoryError>;
    fn extracted_content(&self) -> Result<Vec<String>, HistoryError>;
    fn model_thoughts(&self) -> Result<Vec<ModelThought>, HistoryError>;
}

/// Default runtime for builds without a browser backend linked in.
///
/// Keeps the service bootable (health, providers, cancellation) while every
/// task fails at session construction with a clear message. Deployments
/// select a real backend in `main`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedRuntime;

#[async_trait]
impl AgentRuntime for DisconnectedRuntime {
    async fn create_session(
        &self,
        _spec: SessionSpec,
    ) -> Result<Arc<dyn BrowserSession>, DriverError> {
        Err(DriverError::Driver(
            "no browser driver backend is linked into this build".to_string(),
        ))
    }

    async fn create_agent(
        &self,
        _spec: AgentSpec,
        _session: Arc<dyn BrowserSession>,
    ) -> Result<Arc<dyn BrowserAgent>, DriverError> {
        Err(DriverError::Driver(
            "no browser driver backend is linked into this build".to_string(),
        ))
    }

    fn version(&self) -> String {
        "unavailable".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock driver implementations shared by the engine tests.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// History stub with per-query failure injection.
    #[derive(Default, Clone)]
    pub struct StubHistory {
        pub final_result: Option<String>,
        pub done: bool,
        pub successful: Option<bool>,
        pub errors: Vec<String>,
        pub urls: Vec<String>,
        pub steps: u32,
        pub duration: f64,
        pub usage: Option<UsageSummary>,
        pub judgement: Option<Judgement>,
        pub extracted_content: Vec<String>,
        pub thoughts: Vec<ModelThought>,
        /// Query names that should fail when called
        pub failing: Vec<&'static str>,
    }

    impl StubHistory {
        fn guard(&self, query: &'static str) -> Result<(), HistoryError> {
            if self.failing.contains(&query) {
                Err(HistoryError(format!("{} unavailable", query)))
            } else {
                Ok(())
            }
        }
    }

    impl ExecutionHistory for StubHistory {
        fn final_result(&self) -> Result<Option<String>, HistoryError> {
            self.guard("final_result")?;
            Ok(self.final_result.clone())
        }
        fn is_done(&self) -> Result<bool, HistoryError> {
            self.guard("is_done")?;
            Ok(self.done)
        }
        fn is_successful(&self) -> Result<Option<bool>, HistoryError> {
            self.guard("is_successful")?;
            Ok(self.successful)
        }
        fn has_errors(&self) -> Result<bool, HistoryError> {
            self.guard("has_errors")?;
            Ok(!self.errors.is_empty())
        }
        fn urls(&self) -> Result<Vec<String>, HistoryError> {
            self.guard("urls")?;
            Ok(self.urls.clone())
        }
        fn number_of_steps(&self) -> Result<u32, HistoryError> {
            self.guard("number_of_steps")?;
            Ok(self.steps)
        }
        fn total_duration_seconds(&self) -> Result<f64, HistoryError> {
            self.guard("total_duration_seconds")?;
            Ok(self.duration)
        }
        fn errors(&self) -> Result<Vec<String>, HistoryError> {
            self.guard("errors")?;
            Ok(self.errors.clone())
        }
        fn usage(&self) -> Result<Option<UsageSummary>, HistoryError> {
            self.guard("usage")?;
            Ok(self.usage.clone())
        }
        fn judgement(&self) -> Result<Option<Judgement>, HistoryError> {
            self.guard("judgement")?;
            Ok(self.judgement.clone())
        }
        fn extracted_content(&self) -> Result<Vec<String>, HistoryError> {
            self.guard("extracted_content")?;
            Ok(self.extracted_content.clone())
        }
        fn model_thoughts(&self) -> Result<Vec<ModelThought>, HistoryError> {
            self.guard("model_thoughts")?;
            Ok(self.thoughts.clone())
        }
    }

    /// Session mock recording lifecycle calls and init scripts.
    #[derive(Default)]
    pub struct MockSession {
        pub started: AtomicBool,
        pub stopped: AtomicBool,
        pub killed: AtomicBool,
        pub init_scripts: Mutex<Vec<String>>,
        /// Value returned by `eval_in_active_page`; `None` models "no page"
        pub eval_result: Mutex<Option<serde_json::Value>>,
        /// Blob written by `export_storage_state`
        pub storage_blob: Vec<u8>,
        pub fail_storage_export: bool,
    }

    impl MockSession {
        pub fn with_eval_result(value: serde_json::Value) -> Self {
            Self {
                eval_result: Mutex::new(Some(value)),
                storage_blob: b"{\"cookies\":[]}".to_vec(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BrowserSession for MockSession {
        async fn start(&self) -> Result<(), DriverError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), DriverError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn kill(&self) -> Result<(), DriverError> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn eval_in_active_page(
            &self,
            _script: &str,
        ) -> Result<Option<serde_json::Value>, DriverError> {
            Ok(self.eval_result.lock().unwrap().clone())
        }

        async fn add_init_script(&self, script: &str) -> Result<(), DriverError> {
            self.init_scripts.lock().unwrap().push(script.to_string());
            Ok(())
        }

        async fn export_storage_state(&self, path: &Path) -> Result<(), DriverError> {
            if self.fail_storage_export {
                return Err(DriverError::Driver("export unsupported".to_string()));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DriverError::Driver(e.to_string()))?;
            }
            std::fs::write(path, &self.storage_blob)
                .map_err(|e| DriverError::Driver(e.to_string()))?;
            Ok(())
        }
    }

    /// Agent mock returning a preconfigured history after an optional delay.
    pub struct MockAgent {
        pub history: StubHistory,
        pub run_delay: Option<Duration>,
        pub state: Option<String>,
    }

    #[async_trait]
    impl BrowserAgent for MockAgent {
        async fn run(&self, _max_steps: u32) -> Result<Arc<dyn ExecutionHistory>, DriverError> {
            if let Some(delay) = self.run_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Arc::new(self.history.clone()))
        }

        fn current_state(&self) -> Option<String> {
            self.state.clone()
        }
    }

    /// Runtime mock handing out shared session/agent instances and recording
    /// the specs it was called with.
    pub struct MockRuntime {
        pub session: Arc<MockSession>,
        pub agent: Arc<MockAgent>,
        pub session_spec: Mutex<Option<SessionSpec>>,
        pub agent_spec: Mutex<Option<AgentSpec>>,
    }

    impl MockRuntime {
        pub fn new(session: MockSession, agent: MockAgent) -> Self {
            Self {
                session: Arc::new(session),
                agent: Arc::new(agent),
                session_spec: Mutex::new(None),
                agent_spec: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AgentRuntime for MockRuntime {
        async fn create_session(
            &self,
            spec: SessionSpec,
        ) -> Result<Arc<dyn BrowserSession>, DriverError> {
            *self.session_spec.lock().unwrap() = Some(spec);
            Ok(self.session.clone())
        }

        async fn create_agent(
            &self,
            spec: AgentSpec,
            _session: Arc<dyn BrowserSession>,
        ) -> Result<Arc<dyn BrowserAgent>, DriverError> {
            *self.agent_spec.lock().unwrap() = Some(spec);
            Ok(self.agent.clone())
        }

        fn version(&self) -> String {
            "mock".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vision_mode_normalizes_strings_and_bools() {
        assert_eq!(VisionMode::normalize(&json!(true)), VisionMode::Enabled);
        assert_eq!(VisionMode::normalize(&json!(false)), VisionMode::Disabled);
        assert_eq!(VisionMode::normalize(&json!("TRUE")), VisionMode::Enabled);
        assert_eq!(VisionMode::normalize(&json!("false")), VisionMode::Disabled);
        assert_eq!(VisionMode::normalize(&json!("whatever")), VisionMode::Auto);
        assert_eq!(VisionMode::normalize(&json!(null)), VisionMode::Auto);
    }
}
