//! # matchday-flow
//!
//! Endpoint orchestration engine for the Matchday sports-data answering
//! service.
//!
//! Matchday answers natural-language questions about sports data by fetching
//! from a rate-limited, multi-endpoint upstream API. This crate implements
//! the part of that product with real state machines and ordering
//! invariants:
//!
//! - **Dependency Planning**: turning "endpoints I need" into a
//!   dependency-respecting, stage-parallel [`plan::ExecutionPlan`]
//! - **Caching & Coalescing**: TTL-bounded response caching that guarantees
//!   at most one live upstream call per call fingerprint at any instant
//! - **Circuit Breaking**: per-endpoint failure tracking that short-circuits
//!   calls against an unhealthy upstream
//! - **Orchestration**: stage-by-stage concurrent dispatch with bounded
//!   retries, cooperative cancellation, and partial-failure aggregation
//!
//! Question parsing, answer generation, and transport are external
//! collaborators; this crate only defines the contracts it needs from them
//! ([`catalog::Catalog`] and [`client::ApiClient`]).
//!
//! ## Guarantees
//!
//! - **Deterministic planning**: same catalog and inputs always produce the
//!   same stage partition and per-stage ordering
//! - **No hard per-call failures**: a single endpoint's problem never aborts
//!   execution; every requested endpoint's fate is reported in the
//!   [`outcome::ExecutionResult`]
//! - **Dependency ordering**: a stage is never dispatched before every call
//!   in the previous stage has resolved
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//!
//! use matchday_flow::catalog::{EndpointDescriptor, EndpointId, StaticCatalog, Volatility};
//! use matchday_flow::error::Result;
//! use matchday_flow::plan::Planner;
//!
//! # fn main() -> Result<()> {
//! let catalog = StaticCatalog::builder()
//!     .endpoint(EndpointDescriptor::new("teams", Volatility::Static))
//!     .endpoint(
//!         EndpointDescriptor::new("team_stats", Volatility::Daily).with_dependency("teams"),
//!     )
//!     .build();
//!
//! let planner = Planner::new(&catalog);
//! let plan = planner.plan(&[EndpointId::new("team_stats")], &HashMap::new())?;
//! assert_eq!(plan.stages.len(), 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

// Internal module - not exposed in the public API.
pub(crate) mod dag;

pub mod breaker;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod plan;
pub mod retry;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::breaker::{Admission, CircuitRegistry, CircuitState};
    pub use crate::cache::ResponseCache;
    pub use crate::catalog::{Catalog, EndpointDescriptor, EndpointId, StaticCatalog, Volatility};
    pub use crate::client::{ApiClient, CallError, Payload};
    pub use crate::config::{FlowConfig, TtlPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::FlowMetrics;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::outcome::{
        CallOutcome, CallRecord, ExecutionResult, OverallStatus, PayloadSource, SkipReason,
    };
    pub use crate::plan::{CallRequest, ExecutionPlan, Fingerprint, Params, Planner, Stage};
    pub use crate::retry::{AttemptState, RetryPolicy};
}
