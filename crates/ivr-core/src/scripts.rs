//! Script sources and the loaded image set
//!
//! A [`ScriptSource`] yields script text and an optional schedule file; the
//! driver compiles them into a [`LoadedScripts`] and swaps it in atomically
//! on reload.

use crate::config::ScriptsConfig;
use crate::errors::{IvrError, Result};
use crate::scheduler::Scheduler;
use parking_lot::RwLock;
use rvoip_script_core::{Compiler, Mask, ScriptImage};
use std::path::PathBuf;
use std::sync::Arc;

/// Commands every timeslot understands, with their resource masks
pub const SLOT_COMMANDS: &[(&str, Mask)] = &[("sleep", 0), ("hangup", 0), ("log", 0)];

/// Where script text comes from
pub trait ScriptSource: Send + Sync {
    /// `(file name, contents)` for every script file
    fn scripts(&self) -> Result<Vec<(String, String)>>;

    /// `(file name, contents)` of the schedule rule file, if any
    fn schedule(&self) -> Result<Option<(String, String)>>;
}

/// Reads the files named in `[scripts]`
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    files: Vec<PathBuf>,
    schedule: Option<PathBuf>,
}

impl FileSource {
    pub fn new(files: Vec<PathBuf>, schedule: Option<PathBuf>) -> Self {
        Self { files, schedule }
    }

    pub fn from_config(config: &ScriptsConfig) -> Self {
        Self::new(config.files.clone(), config.schedule.clone())
    }
}

fn read(path: &PathBuf) -> Result<(String, String)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| IvrError::config(format!("Cannot read {}: {}", path.display(), e)))?;
    Ok((path.display().to_string(), text))
}

impl ScriptSource for FileSource {
    fn scripts(&self) -> Result<Vec<(String, String)>> {
        self.files.iter().map(read).collect()
    }

    fn schedule(&self) -> Result<Option<(String, String)>> {
        self.schedule.as_ref().map(read).transpose()
    }
}

/// In-memory sources that can be replaced between reloads
#[derive(Debug, Default)]
pub struct MemorySource {
    scripts: RwLock<Vec<(String, String)>>,
    schedule: RwLock<Option<(String, String)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(name: impl Into<String>, text: impl Into<String>) -> Self {
        let source = Self::new();
        source.set_script(name, text);
        source
    }

    /// Add or replace one script file
    pub fn set_script(&self, name: impl Into<String>, text: impl Into<String>) {
        let (name, text) = (name.into(), text.into());
        let mut scripts = self.scripts.write();
        match scripts.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = text,
            None => scripts.push((name, text)),
        }
    }

    pub fn set_schedule(&self, name: impl Into<String>, text: impl Into<String>) {
        *self.schedule.write() = Some((name.into(), text.into()));
    }
}

impl ScriptSource for MemorySource {
    fn scripts(&self) -> Result<Vec<(String, String)>> {
        Ok(self.scripts.read().clone())
    }

    fn schedule(&self) -> Result<Option<(String, String)>> {
        Ok(self.schedule.read().clone())
    }
}

/// One generation of compiled scripts
#[derive(Debug)]
pub struct LoadedScripts {
    image: Arc<ScriptImage>,
    scheduler: Scheduler,
    generation: u64,
}

impl LoadedScripts {
    /// Compile everything `source` provides. Any diagnostic fails the whole
    /// load.
    pub(crate) fn compile(
        compiler: &Compiler,
        source: &dyn ScriptSource,
        generation: u64,
    ) -> Result<Self> {
        let scripts = source.scripts()?;
        let output = compiler.compile_all(scripts.iter().map(|(n, t)| (n.as_str(), t.as_str())));
        if !output.is_ok() {
            return Err(IvrError::Compile(output.errors().to_vec()));
        }
        let scheduler = match source.schedule()? {
            Some((name, text)) => Scheduler::parse(&name, &text)?,
            None => Scheduler::default(),
        };
        let image = output.into_image()?;
        Ok(Self {
            image: Arc::new(image),
            scheduler,
            generation,
        })
    }

    pub fn image(&self) -> &Arc<ScriptImage> {
        &self.image
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Increments on every successful reload
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
