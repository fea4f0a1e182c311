//! Engine and storage configuration

pub mod engine_config;
pub mod storage_config;

pub use engine_config::*;
pub use storage_config::*;
