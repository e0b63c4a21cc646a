pub mod bootstrap;
pub mod context;
pub mod db;
pub mod deploy;
pub mod error;
pub mod external;
pub mod gtfs;
pub mod orchestrator;
pub mod proc;
pub mod settings;

pub use context::{RunContext, TaskOutput};
pub use error::{CartobaseError, Result};
pub use orchestrator::{Orchestrator, RunReport, Task};
pub use settings::{Config, DbOverrides, DbSettings, Settings, CONFIG_FILE};
