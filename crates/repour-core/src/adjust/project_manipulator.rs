use std::path::PathBuf;

use serde_json::Value;

use crate::adjust::params::{extra_parameters, temporary_build_parameters};
use crate::adjust::{AdjustPlan, AdjustProvider, AdjustResult, PreparedWorkspace};
use crate::config::ProjectManipulatorSettings;
use crate::execution::CommandSpec;
use crate::models::{AdjustResultData, AdjustTask, CoreError, CoreErrorKind};

pub const PROJECT_MANIPULATOR_STRATEGY: &str = "project-manipulator";
pub const EXTRA_PARAMETERS_KEY: &str = "CUSTOM_PROJECT_MANIPULATOR_PARAMETERS";

pub struct ProjectManipulatorProvider {
    settings: ProjectManipulatorSettings,
}

impl ProjectManipulatorProvider {
    pub fn new(settings: ProjectManipulatorSettings) -> Self {
        Self { settings }
    }
}

impl AdjustProvider for ProjectManipulatorProvider {
    fn name(&self) -> &str {
        PROJECT_MANIPULATOR_STRATEGY
    }

    fn adjust_type(&self) -> &str {
        &self.settings.execution_name
    }

    fn prepare(&self, task: &AdjustTask) -> AdjustResult<PreparedWorkspace> {
        if !self.settings.jar_path.is_file() {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "{} jar '{}' does not exist",
                    self.settings.execution_name,
                    self.settings.jar_path.display()
                ),
            ));
        }

        if !task.working_dir.is_dir() {
            return Err(CoreError::new(
                CoreErrorKind::Precondition,
                format!(
                    "working directory '{}' does not exist",
                    task.working_dir.display()
                ),
            ));
        }

        Ok(PreparedWorkspace {
            work_dir: task.working_dir.clone(),
            extra_parameters: extra_parameters(&task.parameters, EXTRA_PARAMETERS_KEY)?,
        })
    }

    fn build_command(
        &self,
        task: &AdjustTask,
        workspace: &PreparedWorkspace,
    ) -> AdjustResult<AdjustPlan> {
        let results_file = results_file_for(task)?;

        let command = CommandSpec::new(&self.settings.java_command)
            .arg("-jar")
            .arg(self.settings.jar_path.display().to_string())
            .args(self.settings.default_parameters.iter().cloned())
            .args(temporary_build_parameters(
                self.settings.timestamp.as_deref(),
                self.settings.specific_indy_group.as_deref(),
            ))
            .args(workspace.extra_parameters.iter().cloned())
            .arg(format!("--result={}", results_file.display()))
            .working_dir(&workspace.work_dir);

        tracing::info!(
            task_id = %task.id,
            execution = %self.settings.execution_name,
            command = %command.display(),
            "prepared project manipulator command"
        );

        Ok(AdjustPlan {
            adjust_type: self.settings.execution_name.clone(),
            work_dir: workspace.work_dir.clone(),
            preflight: Vec::new(),
            command,
            results_file: Some(results_file),
        })
    }

    fn extract_result(&self, plan: &AdjustPlan) -> AdjustResult<AdjustResultData> {
        let Some(path) = &plan.results_file else {
            return Err(CoreError::new(
                CoreErrorKind::ResultArtifact,
                "Could not figure out path of results from alignment",
            ));
        };

        let text = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!(
                    "{} results file '{}' is not readable: {error}",
                    self.settings.execution_name,
                    path.display()
                ),
            )
        })?;
        tracing::debug!(path = %path.display(), raw = %text, "project manipulator result data");

        let value: Value = serde_json::from_str(&text).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!(
                    "{} results file '{}' is not valid JSON: {error}",
                    self.settings.execution_name,
                    path.display()
                ),
            )
        })?;

        if !value.is_object() {
            return Err(CoreError::new(
                CoreErrorKind::ResultArtifact,
                format!(
                    "{} results file '{}' does not contain a JSON object",
                    self.settings.execution_name,
                    path.display()
                ),
            ));
        }

        Ok(normalize_result(&value))
    }
}

/// Prefers the execution-root coordinates and falls back to top-level fields.
fn normalize_result(value: &Value) -> AdjustResultData {
    let field = |name: &str| {
        value
            .pointer(&format!("/VersioningState/executionRootModified/{name}"))
            .or_else(|| value.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    AdjustResultData {
        group_id: field("groupId"),
        artifact_id: field("artifactId"),
        version: field("version"),
        removed_repositories: Vec::new(),
    }
}

/// Creates the empty results file up front so the tool writes into a file we
/// own. It outlives this call; `cleanup` removes it.
fn results_file_for(task: &AdjustTask) -> AdjustResult<PathBuf> {
    let safe_id: String = task
        .id
        .as_str()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();

    let file = tempfile::Builder::new()
        .prefix(&format!("repour-pme-{safe_id}-"))
        .suffix(".json")
        .tempfile()
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Precondition,
                format!("could not create project manipulator results file: {error}"),
            )
        })?;

    file.into_temp_path().keep().map_err(|error| {
        CoreError::new(
            CoreErrorKind::Precondition,
            format!("could not keep project manipulator results file: {error}"),
        )
    })
}
