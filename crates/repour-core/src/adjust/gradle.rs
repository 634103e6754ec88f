use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::adjust::params::{extra_parameters, take_subfolder, temporary_build_parameters};
use crate::adjust::removed_repos::read_removed_repositories;
use crate::adjust::{AdjustPlan, AdjustProvider, AdjustResult, PlannedCommand, PreparedWorkspace};
use crate::config::GradleSettings;
use crate::execution::CommandSpec;
use crate::models::{AdjustResultData, AdjustTask, CoreError, CoreErrorKind};

pub const GRADLE_STRATEGY: &str = "gradle";
pub const GRADLE_ADJUST_TYPE: &str = "GRADLE";
pub const INIT_SCRIPT_FILE_NAME: &str = "analyzer-init.gradle";
pub const MANIPULATION_FILE_NAME: &str = "manipulation.json";
pub const EXTRA_PARAMETERS_KEY: &str = "ALIGNMENT_PARAMETERS";

const ALIGNMENT_TASK: &str = "generateAlignmentMetadata";

pub struct GradleProvider {
    settings: GradleSettings,
}

impl GradleProvider {
    pub fn new(settings: GradleSettings) -> Self {
        Self { settings }
    }
}

#[derive(Deserialize)]
struct ManipulationFile {
    group: String,
    name: String,
    version: String,
}

impl AdjustProvider for GradleProvider {
    fn name(&self) -> &str {
        GRADLE_STRATEGY
    }

    fn adjust_type(&self) -> &str {
        GRADLE_ADJUST_TYPE
    }

    fn prepare(&self, task: &AdjustTask) -> AdjustResult<PreparedWorkspace> {
        let init_file = &self.settings.init_file_path;
        if !init_file.is_file() {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "The Gradle init file '{}' does not exist - are you sure you provided the correct path in configuration?",
                    init_file.display()
                ),
            ));
        }

        let extra = extra_parameters(&task.parameters, EXTRA_PARAMETERS_KEY)?;
        let (extra, subfolder) = take_subfolder(extra)?;

        let work_dir = match subfolder {
            Some(subfolder) => task.working_dir.join(subfolder),
            None => task.working_dir.clone(),
        };
        if !work_dir.is_dir() {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!("working directory '{}' does not exist", work_dir.display()),
            ));
        }

        tracing::info!(
            task_id = %task.id,
            work_dir = %work_dir.display(),
            init_file = %init_file.display(),
            "copying Gradle init script"
        );
        std::fs::copy(init_file, work_dir.join(INIT_SCRIPT_FILE_NAME)).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "failed to copy Gradle init file '{}' into '{}': {error}",
                    init_file.display(),
                    work_dir.display()
                ),
            )
        })?;

        Ok(PreparedWorkspace {
            work_dir,
            extra_parameters: extra,
        })
    }

    fn build_command(
        &self,
        _task: &AdjustTask,
        workspace: &PreparedWorkspace,
    ) -> AdjustResult<AdjustPlan> {
        let gradle = gradle_command(&workspace.work_dir);

        let version = CommandSpec::new(&gradle)
            .arg("--version")
            .working_dir(&workspace.work_dir);

        let command = CommandSpec::new(&gradle)
            .args([
                "--info",
                "--console",
                "plain",
                "--no-daemon",
                "--stacktrace",
                "--init-script",
                INIT_SCRIPT_FILE_NAME,
                ALIGNMENT_TASK,
            ])
            .args(self.settings.default_parameters.iter().cloned())
            .args(temporary_build_parameters(
                self.settings.timestamp.as_deref(),
                self.settings.specific_indy_group.as_deref(),
            ))
            .args(workspace.extra_parameters.iter().cloned())
            .working_dir(&workspace.work_dir);

        Ok(AdjustPlan {
            adjust_type: GRADLE_ADJUST_TYPE.to_string(),
            work_dir: workspace.work_dir.clone(),
            preflight: vec![PlannedCommand {
                description: "Failed getting Gradle version".to_string(),
                command: version,
            }],
            command,
            results_file: None,
        })
    }

    fn extract_result(&self, plan: &AdjustPlan) -> AdjustResult<AdjustResultData> {
        let path = plan.work_dir.join(MANIPULATION_FILE_NAME);
        tracing::info!(path = %path.display(), "reading alignment result");

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::new(
                    CoreErrorKind::ResultArtifact,
                    format!(
                        "Expected generated alignment file '{}' does not exist",
                        path.display()
                    ),
                ));
            }
            Err(error) => {
                return Err(CoreError::new(
                    CoreErrorKind::ResultArtifact,
                    format!("failed to read '{}': {error}", path.display()),
                ));
            }
        };

        let manipulation: ManipulationFile = serde_json::from_str(&text).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!("alignment file '{}' is not usable: {error}", path.display()),
            )
        })?;

        let removed_repositories =
            read_removed_repositories(&plan.work_dir, &self.settings.default_parameters)?;

        Ok(AdjustResultData {
            group_id: Some(manipulation.group),
            artifact_id: Some(manipulation.name),
            version: Some(manipulation.version),
            removed_repositories,
        })
    }
}

/// Prefers the project's wrapper over a system-wide `gradle`.
fn gradle_command(work_dir: &Path) -> PathBuf {
    let wrapper = work_dir.join("gradlew");
    if wrapper.is_file() {
        wrapper
    } else {
        PathBuf::from("gradle")
    }
}
