use crate::diff::{DEFAULT_MAX_DIFFS, DiffOptions};
use crate::queue::{
    BatchQueueConfig, DEFAULT_DEBOUNCE_MS, DEFAULT_FLUSH_THRESHOLD, DEFAULT_MAX_WAIT_MS,
};
use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BOUNDING_PADDING: u32 = 1;
pub const DEFAULT_MAX_CELLS_PER_CHANGE: u64 = 500;
pub const DEFAULT_MAX_FORMULA_COMPLEXITY: u32 = 24;
pub const DEFAULT_MAX_VALUE_CHANGE_PCT: f64 = 50.0;

const ENV_PREFIX: &str = "SPREADSHEET_PREVIEW_";

/// How much rope the proposing agent gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Every non-read operation is rejected with a stated reason.
    Ask,
    /// Write-class edits are batched for diff preview; everything else
    /// non-read waits for single approval.
    #[default]
    AgentDefault,
    /// Everything executes immediately, surfaced for visibility.
    AgentYolo,
}

impl AutonomyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::AgentDefault => "agent_default",
            Self::AgentYolo => "agent_yolo",
        }
    }
}

impl std::fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AutonomyMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "agent_default" | "agent-default" | "default" => Ok(Self::AgentDefault),
            "agent_yolo" | "agent-yolo" | "yolo" => Ok(Self::AgentYolo),
            other => Err(de::Error::unknown_variant(
                other,
                &["ask", "agent_default", "agent_yolo"],
            )),
        }
    }
}

/// Permission set plus rule thresholds backing one autonomy mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AutonomyPolicy {
    pub can_modify_values: bool,
    pub can_modify_formulas: bool,
    pub can_modify_formatting: bool,
    pub can_modify_layout: bool,
    /// Edits touching more cells than this need explicit single approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cells_per_change: Option<u64>,
    /// Value rewrites moving an existing number by more than this percentage
    /// need explicit single approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_change_pct: Option<f64>,
    /// Formulas scoring above this need explicit single approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_formula_complexity: Option<u32>,
}

impl AutonomyPolicy {
    pub fn for_mode(mode: AutonomyMode) -> Self {
        match mode {
            AutonomyMode::Ask => Self {
                can_modify_values: false,
                can_modify_formulas: false,
                can_modify_formatting: false,
                can_modify_layout: false,
                max_cells_per_change: None,
                max_value_change_pct: None,
                max_formula_complexity: None,
            },
            AutonomyMode::AgentDefault => Self {
                can_modify_values: true,
                can_modify_formulas: true,
                can_modify_formatting: true,
                can_modify_layout: true,
                max_cells_per_change: Some(DEFAULT_MAX_CELLS_PER_CHANGE),
                max_value_change_pct: Some(DEFAULT_MAX_VALUE_CHANGE_PCT),
                max_formula_complexity: Some(DEFAULT_MAX_FORMULA_COMPLEXITY),
            },
            AutonomyMode::AgentYolo => Self {
                can_modify_values: true,
                can_modify_formulas: true,
                can_modify_formatting: true,
                can_modify_layout: true,
                max_cells_per_change: None,
                max_value_change_pct: None,
                max_formula_complexity: None,
            },
        }
    }
}

impl Default for AutonomyPolicy {
    fn default() -> Self {
        Self::for_mode(AutonomyMode::AgentDefault)
    }
}

/// Engine-wide tuning. Defaults work out of the box; a YAML file and
/// `SPREADSHEET_PREVIEW_*` environment variables can override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debounce_ms: u64,
    pub max_wait_ms: u64,
    pub flush_threshold: usize,
    pub max_diffs: usize,
    pub include_styles: bool,
    /// Cells of padding around the bounding range, to catch adjacency
    /// effects.
    pub bounding_padding: u32,
    pub autonomy_mode: AutonomyMode,
    pub policy: AutonomyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            max_diffs: DEFAULT_MAX_DIFFS,
            include_styles: true,
            bounding_padding: DEFAULT_BOUNDING_PADDING,
            autonomy_mode: AutonomyMode::default(),
            policy: AutonomyPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config '{}'", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse config '{}'", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn for_mode(mode: AutonomyMode) -> Self {
        Self {
            autonomy_mode: mode,
            policy: AutonomyPolicy::for_mode(mode),
            ..Self::default()
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u64>("DEBOUNCE_MS") {
            self.debounce_ms = v;
        }
        if let Some(v) = env_parse::<u64>("MAX_WAIT_MS") {
            self.max_wait_ms = v;
        }
        if let Some(v) = env_parse::<usize>("FLUSH_THRESHOLD") {
            self.flush_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_DIFFS") {
            self.max_diffs = v;
        }
        if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}AUTONOMY_MODE")) {
            match serde_yaml::from_str::<AutonomyMode>(&raw) {
                Ok(mode) => {
                    self.autonomy_mode = mode;
                    self.policy = AutonomyPolicy::for_mode(mode);
                }
                Err(_) => warn!("ignoring invalid {ENV_PREFIX}AUTONOMY_MODE='{raw}'"),
            }
        }
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            max_diffs: self.max_diffs,
            include_styles: self.include_styles,
        }
    }

    pub fn batch_queue(&self) -> BatchQueueConfig {
        BatchQueueConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
            flush_threshold: self.flush_threshold,
        }
    }
}

fn env_parse<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .and_then(|raw| raw.parse().ok())
}
