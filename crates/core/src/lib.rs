//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise agent.
//! This crate has **no I/O**: it defines the domain model that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates, which keeps the dependency graph pointing inward and
//! makes every collaborator replaceable by a test double.

pub mod catalog;
pub mod decision;
pub mod error;
pub mod provider;
pub mod risk;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use catalog::{CatalogProvider, ParamDetail, UnitEntry, UnitInfo, UnitKind};
pub use decision::{Action, ActionKind, ArgMap, Decision};
pub use error::{CatalogError, Error, ExecError, ProviderError, Result, ToolError};
pub use provider::{AskOptions, Completion, Provider, TokenSink};
pub use risk::{Assessment, RiskLevel, RiskPolicy};
pub use tool::{RunResult, Tool, ToolRegistry};
