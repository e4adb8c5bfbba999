//! # Pipelines-as-Code LLM Analysis
//!
//! Asks an LLM to explain finished PipelineRuns and posts the answer on the
//! pull request.
//!
//! Analysis is configured per Repository under `settings.ai`: a backend
//! (`openai` or `gemini`), a token secret and a list of roles. Each role
//! carries a prompt, an optional CEL filter (`on_cel`) and the context it
//! wants (commit, pull request, errors, container logs).
//!
//! [`LlmAnalyzer`] plugs into the reconciler as a
//! [`pac_core::reconciler::CompletionHook`]:
//!
//! ```rust,no_run
//! use pac_core::MemoryKubeClient;
//! use pac_llm::LlmAnalyzer;
//! use std::sync::Arc;
//!
//! let kube = Arc::new(MemoryKubeClient::new());
//! let analyzer = Arc::new(LlmAnalyzer::new(kube));
//! ```

pub mod analyzer;
pub mod client;
pub mod context;
pub mod error;
pub mod gemini;
pub mod openai;

pub use analyzer::{AnalysisResult, LlmAnalyzer, RetryPolicy};
pub use client::{AnalysisRequest, AnalysisResponse, ClientConfig, LlmClient, LlmProvider};
pub use error::LlmError;
