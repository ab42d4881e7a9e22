//! Self-healing change-request remediation orchestrator.
//!
//! `mend` sweeps a repository's open change requests and walks each one
//! through a label-driven remediation ladder: automated review, automated
//! repair, fallback routing to human agents, and finally a gated automerge.
//! Throughput is shaped by a per-tier rate-limit governor with time-of-day
//! bands, and a health monitor folds every run into a bounded history that
//! drives escalations when a tier degrades or the backlog goes stale.

pub mod automerge;
pub mod config;
pub mod dispatch;
pub mod domains;
pub mod health;
pub mod orchestrator;
pub mod priority;
pub mod ratelimit;
pub mod state;
pub mod tiers;
