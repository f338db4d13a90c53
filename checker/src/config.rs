// config.rs — Pipeline configuration: tool paths, protocol, temp dir, timeout
//
// Built from CLI flags (with env fallbacks) and optionally overlaid with the
// LSP client's `initializationOptions`.
//
// Preconditions: none.
// Postconditions: `check_environment` succeeds only if both executables
//   resolve and the temp root (when set) is an existing directory.
// Failure modes: `ConfigError` for missing executables, bad overlays.
// Side effects: `check_environment` and `validator_program` inspect the
//   filesystem and the current executable path.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ASSEMBLER: &str = "spirv-as";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// How the validating executable is driven and its output read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorProtocol {
    /// `<validator> validate <module> --format json`, a JSON report on stdout.
    #[default]
    Json,
    /// `<validator> <module>`, `spirv-val` text diagnostics.
    SpirvVal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub assembler: PathBuf,
    /// `None` runs this executable as the validator.
    pub validator: Option<PathBuf>,
    pub validator_protocol: ValidatorProtocol,
    /// Root for per-request temp directories; system temp when `None`.
    pub temp_dir: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assembler: PathBuf::from(DEFAULT_ASSEMBLER),
            validator: None,
            validator_protocol: ValidatorProtocol::Json,
            temp_dir: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{role} `{}` was not found", program.display())]
    MissingExecutable { role: &'static str, program: PathBuf },
    #[error("cannot locate the running executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("temporary directory `{}` does not exist", path.display())]
    TempDir { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The validating executable, defaulting to the running binary.
    pub fn validator_program(&self) -> Result<PathBuf, ConfigError> {
        match &self.validator {
            Some(path) => Ok(path.clone()),
            None => env::current_exe().map_err(ConfigError::CurrentExe),
        }
    }

    /// Overlay the keys present in `options` (camelCase) onto this config.
    pub fn merge_json(&self, options: &serde_json::Value) -> Result<Self, ConfigError> {
        let overlay = match options {
            serde_json::Value::Null => return Ok(self.clone()),
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ConfigError::Invalid(serde::de::Error::custom(format!(
                    "expected an object, found {other}"
                ))))
            }
        };
        let mut merged = serde_json::to_value(self)?;
        if let serde_json::Value::Object(base) = &mut merged {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Fail fast when a tool cannot run at all.
    pub fn check_environment(&self) -> Result<(), ConfigError> {
        if resolve_program(&self.assembler).is_none() {
            return Err(ConfigError::MissingExecutable {
                role: "assembler",
                program: self.assembler.clone(),
            });
        }
        let validator = self.validator_program()?;
        if resolve_program(&validator).is_none() {
            return Err(ConfigError::MissingExecutable {
                role: "validator",
                program: validator,
            });
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::TempDir { path: dir.clone() });
            }
        }
        Ok(())
    }
}

/// Resolve `program` the way process spawning does: paths as given, bare
/// names through `PATH`.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
