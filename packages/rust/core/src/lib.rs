//! Core orchestration for ragkb.
//!
//! This crate ties the provider crates together:
//! - [`ComponentRegistry`] — compile-time table of provider builders per axis
//! - [`Binder`] — assembles the component graph for each trigger, no I/O
//! - [`validators`] — pre-flight checks that may skip a run
//! - [`run_ingestion`] — extract → clean → split → embed → load
//! - [`QueryEngine`] and [`run_evaluation`] for the chat and evaluate triggers

pub mod binder;
pub mod evaluation;
pub mod pipeline;
pub mod query_engine;
pub mod registry;
pub mod validators;

pub use binder::{
    AugmentationComponents, Binder, DEFAULT_HTTP_TIMEOUT, Dependencies, EvaluationComponents,
    IngestionComponents,
};
pub use evaluation::{EvaluationRecord, EvaluationSample, EvaluationSummary, read_dataset, run_evaluation};
pub use pipeline::{
    FailedSource, IngestionReport, ProgressReporter, RunControl, SilentProgress, run_ingestion,
};
pub use query_engine::{QueryEngine, QueryResponse, Retriever, TreeSynthesizer};
pub use registry::{BIND_ORDER, Builder, Capability, ComponentRegistry, Registration};
