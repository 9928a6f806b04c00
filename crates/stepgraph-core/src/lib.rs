pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;
pub mod value;

pub use config::{AppConfig, EngineConfig};
pub use context::ExecutionContext;
pub use error::{Result, StepGraphError};
pub use registry::{OutboundLinkMode, Registry, StepExecutor, StepType, WorkflowType};
pub use types::*;
