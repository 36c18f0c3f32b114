pub mod config;
pub mod context;
pub mod error;

pub use config::EngineConfig;
pub use context::{ExecutionContext, Updates, DAG_EXEC_KEY};
pub use error::{OrdraError, Result, SpecError};
