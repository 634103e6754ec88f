pub mod callback;
pub mod executor;
pub mod registry;
pub mod service;

pub use callback::{
    CallbackDispatcher, CallbackTransport, DeliveryResult, RetryPolicy, UreqTransport,
};
pub use executor::TaskExecutor;
pub use registry::{RegistrySnapshot, TaskRegistration, TaskRegistry};
pub use service::{AdjustService, TaskHandle, TaskReport};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
