//! Lifecycle and audit ledger engine for trade-finance documents.
//!
//! A document's status is never stored. It is folded from the document's
//! append-only, hash-chained ledger every time it is needed, and every write
//! is checked against the central policy table first.

pub mod config;
pub mod document;
pub mod error;
pub mod hashing;
pub mod policy;
pub mod projector;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use document::{Document, DocumentDraft, DocumentTimeline, LedgerEntry, TradeTimeline};
pub use error::WorkflowError;
pub use service::DocumentWorkflowEngine;
pub use types::{Action, Actor, DocType, Role, Status};
