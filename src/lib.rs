//! # webpilot
//!
//! A self-hosted browser automation task service.
//!
//! This library provides:
//! - An HTTP API for submitting, bounding, and cancelling browser tasks
//! - Per-identity browser session persistence across independent task runs
//! - Reconciliation of driver-dropped downloads into per-task directories
//! - Deterministic result aggregation under partial telemetry
//!
//! ## Architecture
//!
//! A task flows through the engine as:
//! 1. The API accepts and validates a task request
//! 2. The supervisor registers it and runs it under a hard deadline
//! 3. The orchestrator restores session state, drives the external browser
//!    agent, exports state while the session is live, and always closes the
//!    browser
//! 4. Downloads are reconciled and the report is assembled, even when parts
//!    of the execution telemetry are unavailable
//!
//! The page-driving agent itself is an external collaborator behind the
//! traits in [`driver`].

pub mod api;
pub mod config;
pub mod downloads;
pub mod driver;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod supervisor;

pub use config::Config;
