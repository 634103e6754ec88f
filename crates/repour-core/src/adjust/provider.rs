use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adjust::gradle::GradleProvider;
use crate::adjust::project_manipulator::ProjectManipulatorProvider;
use crate::config::AdjustConfig;
use crate::execution::CommandSpec;
use crate::models::{AdjustResultData, AdjustTask, CoreError, CoreErrorKind};

pub type AdjustResult<T> = Result<T, CoreError>;

/// Directory state produced by [`AdjustProvider::prepare`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedWorkspace {
    pub work_dir: PathBuf,
    pub extra_parameters: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlannedCommand {
    pub description: String,
    pub command: CommandSpec,
}

/// Everything the executor needs to run one strategy invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdjustPlan {
    pub adjust_type: String,
    pub work_dir: PathBuf,
    pub preflight: Vec<PlannedCommand>,
    pub command: CommandSpec,
    pub results_file: Option<PathBuf>,
}

pub trait AdjustProvider: Send + Sync {
    /// Registry key callers use to select this strategy.
    fn name(&self) -> &str;

    fn adjust_type(&self) -> &str;

    fn prepare(&self, task: &AdjustTask) -> AdjustResult<PreparedWorkspace>;

    fn build_command(
        &self,
        task: &AdjustTask,
        workspace: &PreparedWorkspace,
    ) -> AdjustResult<AdjustPlan>;

    fn extract_result(&self, plan: &AdjustPlan) -> AdjustResult<AdjustResultData>;

    /// Removes scratch artifacts once the task settled, whatever the outcome.
    fn cleanup(&self, plan: &AdjustPlan) {
        if let Some(results_file) = &plan.results_file
            && let Err(error) = std::fs::remove_file(results_file)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %results_file.display(),
                error = %error,
                "failed to remove adjust results file"
            );
        }
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn AdjustProvider>>,
}

impl ProviderRegistry {
    pub fn new(
        providers: impl IntoIterator<Item = Arc<dyn AdjustProvider>>,
    ) -> AdjustResult<Self> {
        let mut mapped = BTreeMap::new();
        for provider in providers {
            let name = provider.name().to_string();
            if mapped.insert(name.clone(), provider).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::Config,
                    format!("duplicate adjust provider registration for '{name}'"),
                ));
            }
        }

        Ok(Self { providers: mapped })
    }

    pub fn from_config(config: &AdjustConfig) -> AdjustResult<Self> {
        let mut providers: Vec<Arc<dyn AdjustProvider>> = Vec::new();

        if let Some(settings) = &config.gradle {
            providers.push(Arc::new(GradleProvider::new(settings.clone())));
        }

        if let Some(settings) = &config.project_manipulator {
            providers.push(Arc::new(ProjectManipulatorProvider::new(settings.clone())));
        }

        Self::new(providers)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AdjustProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
