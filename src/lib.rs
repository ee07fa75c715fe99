//! `linmux`: a contextual linear bandit (LinUCB) decision engine.
//!
//! Designed for routing problems where every request arrives with a feature
//! vector describing its context (task type, cost budget, recent performance
//! signals) and you must pick one of several discrete options: a model, a
//! tool, a quality-threshold profile. After the request completes you observe
//! a reward in `[0, 1]` and feed it back; the engine learns which arm pays off
//! in which context.
//!
//! **Goals:**
//! - **Deterministic**: same state + same context + same candidate order → same choice.
//!   Ties go to the earliest candidate the caller listed.
//! - **Lazy arms**: arms are not declared up front; any id passed to `select`
//!   or `update` gets a fresh model.
//! - **Self-healing numerics**: cached inverses are maintained by Sherman–Morrison
//!   rank-one updates and rebuilt from scratch on a schedule, on a condition-number
//!   trigger, or when the rank-one update degenerates. None of this surfaces as an error.
//! - **Shared**: one [`LinUcbEngine`] is `Send + Sync` and is meant to sit behind an `Arc`.
//! - **Small d**: dense `O(d^2)` / `O(d^3)` kernels sized for dimensions in the tens.
//!
//! **Surface:**
//! - [`LinUcbEngine::select`] / [`LinUcbEngine::select_with_score`] / [`LinUcbEngine::decide`]:
//!   argmax UCB selection (the latter returns an audit-friendly [`Decision`]).
//! - [`LinUcbEngine::update`]: fold in an observed reward.
//! - [`LinUcbEngine::scores`] / [`LinUcbEngine::probabilities`]: score breakdowns and a softmax
//!   allocation for traffic splitting or propensity logging.
//! - (feature `stochastic`) [`LinUcbEngine::select_softmax`]: seeded sampling from that allocation.
//! - [`LinUcbEngine::snapshot`] / [`LinUcbEngine::restore`] and [`SnapshotStore`]:
//!   persistence of `(A, b)` with atomic file writes.
//! - [`EngineMetrics`]: counters and gauges for an external metrics facade.
//!
//! **Non-goals:**
//! - Non-linear contextual models (trees, neural bandits).
//! - Context-free multi-armed bandits.
//! - Transport: contexts and rewards arrive by function call.
//!
//! # Example
//!
//! ```rust
//! use linmux::{EngineConfig, LinUcbEngine};
//!
//! let engine = LinUcbEngine::new(EngineConfig::with_dim(2).alpha(1.0)).unwrap();
//! engine.update("A", 1.0, &[1.0, 0.0]).unwrap();
//!
//! let arm = engine.select(&["A", "B"], &[1.0, 0.0]).unwrap();
//! assert_eq!(arm, "A");
//! ```
//!
//! # Disabled mode
//!
//! With `EngineConfig::enabled = false`, selection returns the first candidate
//! without scoring and `update` is a no-op. This lets a host service keep the
//! call sites in place while contextual routing is switched off.

#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

pub mod linalg;
pub use linalg::LinalgError;

mod arm;
pub use arm::*;

mod alloc;
pub use alloc::*;

mod decision;
pub use decision::{ArmScore, Decision, DecisionNote, DecisionPolicy};

mod config;
pub use config::*;

mod metrics;
pub use metrics::*;

mod persist;
pub use persist::{ArmRecord, EngineSnapshot, RestoreReport, SkipReason, SnapshotStore};

mod engine;
pub use engine::LinUcbEngine;
