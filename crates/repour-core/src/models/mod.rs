pub mod error;
pub mod outcome;
pub mod task;

pub use error::{CoreError, CoreErrorKind};
pub use outcome::{
    AdjustResultData, CallbackPayload, OutcomeRecord, RemovedRepository, TerminalState,
};
pub use task::{
    AdjustRequest, AdjustTask, CallbackDestination, CallbackMethod, TaskId, TaskState,
};
