//! Run configuration.
//!
//! The orchestrator reads a single JSON config file at the start of every
//! run. Configuration is validated before any mutation happens; an invalid
//! or missing required field fails the whole run fast. There is no
//! hot-reload within a run.

use std::path::{Path, PathBuf};

use scm::MergeMethod;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors abort the run before any external mutation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Base hourly request budgets per remediation tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierCapacities {
    /// Review-sync requests per hour
    pub review: u32,
    /// Repair submissions per hour
    pub repair: u32,
    /// Fallback dispatches per hour
    pub fallback: u32,
}

impl Default for TierCapacities {
    fn default() -> Self {
        Self {
            review: 12,
            repair: 6,
            fallback: 6,
        }
    }
}

/// Time-of-day capacity multipliers (UTC hours).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBands {
    /// Weekday peak hours (09:00-18:00 UTC), above 1x
    pub peak: f64,
    /// Weekday off hours, below 1x
    pub off_hours: f64,
    /// Saturday/Sunday, the lowest band
    pub weekend: f64,
}

impl Default for TimeBands {
    fn default() -> Self {
        Self {
            peak: 1.25,
            off_hours: 0.75,
            weekend: 0.5,
        }
    }
}

/// Thresholds splitting diffs into low/medium/high complexity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityThresholds {
    /// Changed-file count above which a diff is at least medium
    pub files_medium: u32,
    /// Changed-file count above which a diff is high
    pub files_high: u32,
    /// Changed-line count above which a diff is at least medium
    pub lines_medium: u32,
    /// Changed-line count above which a diff is high
    pub lines_high: u32,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            files_medium: 5,
            files_high: 20,
            lines_medium: 200,
            lines_high: 1000,
        }
    }
}

/// Weights for the priority score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityWeights {
    /// Points per hour of age
    pub age_per_hour: f64,
    /// Flat bonus for urgency-labeled change requests
    pub urgency_bonus: f64,
    /// Flat bonus for very recently updated change requests
    pub recency_bonus: f64,
    /// Penalty per complexity step above low
    pub complexity_penalty: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            age_per_hour: 1.0,
            urgency_bonus: 50.0,
            recency_bonus: 10.0,
            complexity_penalty: 15.0,
        }
    }
}

/// Health-monitor escalation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Minimum per-tier success rate over the trailing window
    pub success_floor: f64,
    /// Number of trailing runs the success floor is computed over
    pub trailing_runs: usize,
    /// Stuck change-request count that triggers a backlog escalation
    pub stuck_backlog: u32,
    /// Rate-limit deferrals in one run that trigger a throttling escalation
    pub deferral_limit: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            success_floor: 0.5,
            trailing_runs: 10,
            stuck_backlog: 5,
            deferral_limit: 10,
        }
    }
}

fn default_target_branch() -> String {
    "main".to_string()
}

fn default_merge_method() -> MergeMethod {
    MergeMethod::Squash
}

fn default_skip_label() -> String {
    "mend:skip".to_string()
}

fn default_urgency_labels() -> Vec<String> {
    vec!["security".to_string(), "critical-bug".to_string()]
}

fn default_max_per_run() -> usize {
    20
}

fn default_worker_limit() -> usize {
    4
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_run_deadline_secs() -> u64 {
    600
}

fn default_recency_window_mins() -> u64 {
    60
}

fn default_staleness_hours() -> u64 {
    48
}

fn default_escalation_cooldown_mins() -> u64 {
    240
}

fn default_history_path() -> PathBuf {
    PathBuf::from("mend-history.jsonl")
}

fn default_history_limit() -> usize {
    200
}

/// Full orchestrator configuration, deserialized from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Repository in `owner/name` form
    pub repository: String,

    /// Branch pull requests must target to be auto-merged
    #[serde(default = "default_target_branch")]
    pub target_branch: String,

    /// Static merge strategy
    #[serde(default = "default_merge_method")]
    pub merge_method: MergeMethod,

    /// Label that disables automation for a change request
    #[serde(default = "default_skip_label")]
    pub skip_label: String,

    /// Labels that grant the urgency bonus
    #[serde(default = "default_urgency_labels")]
    pub urgency_labels: Vec<String>,

    /// Maximum change requests processed per run
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,

    /// Worker-pool bound for concurrent dispatch
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Timeout for a single external tier call, seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Wall-clock budget for a whole run, seconds
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,

    /// Per-tier base hourly capacities
    #[serde(default)]
    pub tiers: TierCapacities,

    /// Time-of-day capacity multipliers
    #[serde(default)]
    pub time_bands: TimeBands,

    /// Complexity tier thresholds
    #[serde(default)]
    pub complexity: ComplexityThresholds,

    /// Priority score weights
    #[serde(default)]
    pub weights: PriorityWeights,

    /// Window in which an update counts as "very recent", minutes
    #[serde(default = "default_recency_window_mins")]
    pub recency_window_mins: u64,

    /// Hours without update after which a non-terminal change request
    /// counts as stuck
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u64,

    /// Health-monitor thresholds
    #[serde(default)]
    pub health: HealthThresholds,

    /// Minimum minutes between escalations of the same kind
    #[serde(default = "default_escalation_cooldown_mins")]
    pub escalation_cooldown_mins: u64,

    /// Check names that must be green before merging; empty means all
    /// checks on the head commit are required
    #[serde(default)]
    pub required_checks: Vec<String>,

    /// Review capability endpoint
    pub review_url: String,

    /// Repair capability endpoint
    pub repair_url: String,

    /// Path of the health snapshot history file
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// Maximum retained history length
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Whether escalations also open a tracking issue
    #[serde(default)]
    pub tracking_issues: bool,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints; called before any mutation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (owner, repo) = self.split_repository()?;
        if owner.is_empty() || repo.is_empty() {
            return Err(ConfigError::Invalid(
                "repository must be in owner/name form".to_string(),
            ));
        }
        if self.target_branch.is_empty() {
            return Err(ConfigError::Invalid("target_branch is empty".to_string()));
        }
        if self.tiers.review == 0 || self.tiers.repair == 0 || self.tiers.fallback == 0 {
            return Err(ConfigError::Invalid(
                "tier capacities must be positive".to_string(),
            ));
        }
        if self.worker_limit == 0 {
            return Err(ConfigError::Invalid("worker_limit must be >= 1".to_string()));
        }
        if self.max_per_run == 0 {
            return Err(ConfigError::Invalid("max_per_run must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.health.success_floor) {
            return Err(ConfigError::Invalid(
                "health.success_floor must be within [0, 1]".to_string(),
            ));
        }
        if self.health.trailing_runs == 0 {
            return Err(ConfigError::Invalid(
                "health.trailing_runs must be >= 1".to_string(),
            ));
        }
        if self.review_url.is_empty() || self.repair_url.is_empty() {
            return Err(ConfigError::Invalid(
                "review_url and repair_url are required".to_string(),
            ));
        }
        if self.time_bands.peak <= 0.0
            || self.time_bands.off_hours <= 0.0
            || self.time_bands.weekend <= 0.0
        {
            return Err(ConfigError::Invalid(
                "time band multipliers must be positive".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "history_limit must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Split `repository` into `(owner, name)`.
    pub fn split_repository(&self) -> Result<(&str, &str), ConfigError> {
        self.repository
            .split_once('/')
            .ok_or_else(|| ConfigError::Invalid("repository must be in owner/name form".to_string()))
    }
}
