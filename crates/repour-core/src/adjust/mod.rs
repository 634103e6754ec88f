pub mod gradle;
pub mod params;
pub mod project_manipulator;
pub mod provider;
pub mod removed_repos;

pub use gradle::{GRADLE_STRATEGY, GradleProvider};
pub use project_manipulator::{PROJECT_MANIPULATOR_STRATEGY, ProjectManipulatorProvider};
pub use provider::{
    AdjustPlan, AdjustProvider, AdjustResult, PlannedCommand, PreparedWorkspace,
    ProviderRegistry,
};
