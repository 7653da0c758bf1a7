//! Server configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file yields a
//! working single-board server with eight slots in a `default` group.
//!
//! ```toml
//! [engine]
//! step_interval_ms = 10
//!
//! [allocation]
//! policy = "longest_idle"
//!
//! [[boards]]
//! name = "board0"
//! spans = [{ name = "span0", slots = 4 }]
//! groups = [{ name = "sales", spans = ["span0"], limit = 2, script = "@sales" }]
//!
//! [scripts]
//! files = ["scripts/main.scr"]
//! schedule = "scripts/schedule.conf"
//! ```

use crate::errors::{IvrError, Result};
use rvoip_script_core::{InterpreterConfig, DEFAULT_ENTRY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvrConfig {
    pub engine: EngineConfig,
    pub workers: WorkerConfig,
    pub allocation: AllocationConfig,
    pub boards: Vec<BoardConfig>,
    pub scripts: ScriptsConfig,
    pub logging: LogSettings,
}

impl Default for IvrConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            workers: WorkerConfig::default(),
            allocation: AllocationConfig::default(),
            boards: vec![BoardConfig::default()],
            scripts: ScriptsConfig::default(),
            logging: LogSettings::default(),
        }
    }
}

impl IvrConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| IvrError::config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IvrError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Total number of timeslots across all boards
    pub fn slot_count(&self) -> usize {
        self.boards
            .iter()
            .flat_map(|b| b.spans.iter())
            .map(|s| s.slots)
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.slot_count() == 0 {
            return Err(IvrError::config("At least one timeslot must be configured"));
        }
        if self.engine.steps_per_tick == 0 {
            return Err(IvrError::config("engine.steps_per_tick must be greater than zero"));
        }
        if self.engine.max_frames == 0 {
            return Err(IvrError::config("engine.max_frames must be greater than zero"));
        }
        if self.workers.message_queue_capacity == 0 {
            return Err(IvrError::config("workers.message_queue_capacity must be greater than zero"));
        }
        crate::logging::filter(&self.logging)?;

        let total = self.slot_count();
        let mut names = HashSet::new();
        for board in &self.boards {
            if !names.insert(("board", board.name.as_str())) {
                return Err(IvrError::config(format!("Duplicate board {}", board.name)));
            }
            for span in &board.spans {
                if span.slots == 0 {
                    return Err(IvrError::config(format!("Span {} has no slots", span.name)));
                }
                if !names.insert(("span", span.name.as_str())) {
                    return Err(IvrError::config(format!("Duplicate span {}", span.name)));
                }
            }
            for group in &board.groups {
                if !names.insert(("group", group.name.as_str())) {
                    return Err(IvrError::config(format!("Duplicate group {}", group.name)));
                }
                for span in &group.spans {
                    if !board.spans.iter().any(|s| &s.name == span) {
                        return Err(IvrError::config(format!(
                            "Group {} references unknown span {}",
                            group.name, span
                        )));
                    }
                }
                check_slots(&group.name, &group.slots, total)?;
            }
            for registration in &board.registrations {
                if !names.insert(("registration", registration.name.as_str())) {
                    return Err(IvrError::config(format!(
                        "Duplicate registration {}",
                        registration.name
                    )));
                }
                check_slots(&registration.name, &registration.slots, total)?;
            }
        }
        Ok(())
    }
}

fn check_slots(owner: &str, slots: &[usize], total: usize) -> Result<()> {
    match slots.iter().find(|&&id| id >= total) {
        Some(id) => Err(IvrError::config(format!(
            "{} references timeslot {} but only {} exist",
            owner, id, total
        ))),
        None => Ok(()),
    }
}

/// Interpreter and timeslot tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Re-step timer while a script has more work than one tick
    pub step_interval_ms: u64,
    /// Interpreter steps run per event before yielding
    pub steps_per_tick: usize,
    /// Delay between entering RELEASING and returning to the pool
    pub release_delay_ms: u64,
    pub max_frames: usize,
    pub max_symbols: usize,
    pub symbol_size: usize,
    /// Maximum fractional digits kept by `expr`
    pub decimals: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 10,
            steps_per_tick: 32,
            release_delay_ms: 0,
            max_frames: 32,
            max_symbols: 256,
            symbol_size: 64,
            decimals: 2,
        }
    }
}

impl EngineConfig {
    pub fn interpreter(&self) -> InterpreterConfig {
        InterpreterConfig {
            max_frames: self.max_frames,
            max_symbols: self.max_symbols,
            symbol_size: self.symbol_size,
            decimals: self.decimals,
        }
    }

    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

/// Background worker sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub message_queue_capacity: usize,
    pub cdr_pool_size: usize,
    /// Longest the ticker sleeps when no timer is armed
    pub ticker_idle_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            message_queue_capacity: 256,
            cdr_pool_size: 64,
            ticker_idle_ms: 1000,
        }
    }
}

/// How `request` picks among a group's idle slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Lowest numbered idle slot
    First,
    /// Highest numbered idle slot
    Last,
    /// Slot that has been idle the longest
    #[default]
    LongestIdle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub policy: AllocationPolicy,
}

/// One board with its spans, hunt groups and registrations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    #[serde(default)]
    pub spans: Vec<SpanConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub registrations: Vec<RegistrationConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: "board0".to_string(),
            spans: vec![SpanConfig {
                name: "span0".to_string(),
                slots: 8,
            }],
            groups: vec![GroupConfig {
                name: "default".to_string(),
                spans: vec!["span0".to_string()],
                slots: Vec::new(),
                limit: None,
                script: None,
            }],
            registrations: Vec::new(),
        }
    }
}

/// Consecutive timeslots on one board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanConfig {
    pub name: String,
    pub slots: usize,
}

/// Hunt group made of whole spans and/or explicit slot ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub spans: Vec<String>,
    #[serde(default)]
    pub slots: Vec<usize>,
    /// Maximum concurrent calls in the group
    #[serde(default)]
    pub limit: Option<usize>,
    /// Entry point for calls in this group when no schedule rule matches
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub name: String,
    #[serde(default)]
    pub slots: Vec<usize>,
}

/// Script sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Default entry point
    pub entry: String,
    pub files: Vec<PathBuf>,
    /// Optional scheduler rule file
    pub schedule: Option<PathBuf>,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY.to_string(),
            files: Vec::new(),
            schedule: None,
        }
    }
}

/// `[logging]`: subscriber installed when the server starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Base level, overridden per target by `RUST_LOG` and `directives`
    pub level: String,
    /// One JSON object per event instead of the plain format
    pub json: bool,
    /// Include source file and line
    pub file_info: bool,
    /// Log span enter/exit
    pub spans: bool,
    /// Extra filter directives such as `rvoip_ivr_core::timeslot=debug`
    pub directives: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
            directives: Vec::new(),
        }
    }
}
