pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod policy;
pub mod progress;
pub mod scanner;
pub mod staging;
pub mod template;
pub mod transfer;

pub use config::{load_configuration, AppConfig};
pub use engine::{RunEngine, RunPlan, RunReport};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
