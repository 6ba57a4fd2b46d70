pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ExecutionOptions};
pub use error::{Result, StepflowError};
pub use event::EventBus;
pub use traits::Tool;
pub use types::*;
