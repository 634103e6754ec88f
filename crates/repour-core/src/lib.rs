pub mod adjust;
pub mod config;
pub mod execution;
pub mod models;
pub mod orchestration;
