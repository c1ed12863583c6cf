//! # secondlight-analysis
//!
//! The document-analysis pipeline for Second Light.
//!
//! This crate provides:
//! - The Analysis Requestor ([`AnalysisPipeline`]): validation, the Analysis
//!   Service call, lenient reply parsing, the findings fallback, persistence
//! - Text extraction from uploaded PDFs, images and Word files
//! - The Client Poller ([`DocumentPoller`])
//! - In-memory repositories for tests (feature `memory`)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use secondlight_analysis::{AnalysisConfig, AnalysisPipeline, AnalysisRequest, AnalysisStores};
//! use secondlight_db::Database;
//! use secondlight_inference::OpenAIBackend;
//!
//! let db = Database::connect("postgres://...").await?;
//! let pipeline = AnalysisPipeline::new(
//!     AnalysisStores::from_database(&db),
//!     Arc::new(OpenAIBackend::from_env()?),
//!     AnalysisConfig::from_env(),
//! );
//!
//! let outcome = pipeline
//!     .run(&AnalysisRequest::new(document_id, text, "PDF", "Bloodwork"), Some(user_id))
//!     .await?;
//! println!("{}", outcome.summary);
//! ```

pub mod error;
pub mod extraction;
pub mod poller;
pub mod prompts;
pub mod requestor;
pub mod response;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

// Re-export core types
pub use secondlight_core::*;

pub use error::AnalysisError;
pub use extraction::{
    detect_file, DetectedFile, ExtractionError, ExtractionRegistry, FileKind, TextExtractor,
};
#[cfg(any(test, feature = "memory"))]
pub use memory::MemoryStore;
pub use poller::{DocumentPoller, DocumentStatus, DocumentStatusSource, HttpDocumentSource, PollerHandle};
pub use requestor::{
    success_body, AnalysisConfig, AnalysisOutcome, AnalysisPipeline, AnalysisRequest,
    AnalysisStores, PersistOutcome,
};
pub use response::{parse_analysis, parse_findings, ParsedAnalysis};
