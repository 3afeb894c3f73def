//! Beton dispatch runtime.
//!
//! The async layer around `beton-core`: store contracts, the workflow
//! engine that runs guarded transitions against them, the dispatch board
//! controller and its background reconciler.

pub mod board;
pub mod config;
pub mod engine;
pub mod memory;
pub mod reconciler;
pub mod store;

pub use board::{BoardSnapshot, BoardStatus, DispatchBoard};
pub use config::{ConfigError, DispatchConfig};
pub use engine::{ProductionStart, WorkflowEngine};
pub use memory::InMemoryBackend;
pub use reconciler::BoardReconciler;
pub use store::Stores;
