//! TOML configuration for the adjust engine.
//!
//! Every section is optional. A strategy whose section is missing is not
//! registered, so a request naming it is rejected up front.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreErrorKind};

pub const CONFIG_ENV_VAR: &str = "REPOUR_CONFIG";

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepourConfig {
    pub execution: ExecutionConfig,
    pub callback: CallbackConfig,
    pub adjust: AdjustConfig,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub grace_period_ms: u64,
    pub log_tail_lines: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
            log_tail_lines: 200,
        }
    }
}

impl ExecutionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdjustConfig {
    pub gradle: Option<GradleSettings>,
    pub project_manipulator: Option<ProjectManipulatorSettings>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradleSettings {
    pub init_file_path: PathBuf,
    #[serde(default)]
    pub default_parameters: Vec<String>,
    #[serde(default)]
    pub specific_indy_group: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectManipulatorSettings {
    #[serde(default = "default_execution_name")]
    pub execution_name: String,
    pub jar_path: PathBuf,
    #[serde(default = "default_java_command")]
    pub java_command: PathBuf,
    #[serde(default)]
    pub default_parameters: Vec<String>,
    #[serde(default)]
    pub specific_indy_group: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_execution_name() -> String {
    "PROJECT_MANIPULATOR".to_string()
}

fn default_java_command() -> PathBuf {
    PathBuf::from("java")
}

impl RepourConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(text).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Config,
                format!("invalid configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Config,
                format!("failed to read configuration '{}': {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&text)
    }

    /// Explicit path first, then `REPOUR_CONFIG`, then built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.execution.grace_period_ms == 0 {
            return Err(config_error("execution.grace_period_ms must be greater than zero"));
        }

        if self.callback.max_attempts == 0 {
            return Err(config_error("callback.max_attempts must be at least 1"));
        }

        if self.callback.initial_backoff_ms > self.callback.max_backoff_ms {
            return Err(config_error(
                "callback.initial_backoff_ms must not exceed callback.max_backoff_ms",
            ));
        }

        if let Some(gradle) = &self.adjust.gradle
            && gradle.init_file_path.as_os_str().is_empty()
        {
            return Err(config_error("adjust.gradle.init_file_path must not be empty"));
        }

        if let Some(pme) = &self.adjust.project_manipulator {
            if pme.jar_path.as_os_str().is_empty() {
                return Err(config_error(
                    "adjust.project_manipulator.jar_path must not be empty",
                ));
            }
            if pme.execution_name.trim().is_empty() {
                return Err(config_error(
                    "adjust.project_manipulator.execution_name must not be empty",
                ));
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::Config, message)
}
