// Flotilla - configuration-driven task automation
//
// Resolves hosts, host groups and connection templates from YAML
// configuration, compiles configured tasks against a handler registry, and
// executes them across local and SSH targets.

pub mod config;
pub mod executor;
pub mod output;
pub mod shell;
pub mod tasks;
pub mod topology;

pub use config::AutomateConfig;
pub use executor::{AppContext, Connection, Engine, RunReport, TaskResult, TaskReturn};
pub use output::{AutomateError, Logger};
pub use tasks::{Task, TaskHandler, TaskRegistry, TaskSet};
pub use topology::{Host, Topology};

/// Version of the Flotilla tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::AutomateConfig;
    pub use crate::executor::{
        AppContext, Connection, Engine, ReportOptions, RunOptions, RunOverrides, RunReport,
        TaskResult, TaskReturn,
    };
    pub use crate::output::{AutomateError, Logger};
    pub use crate::tasks::{Kwargs, Task, TaskHandler, TaskRegistry, TaskSet};
    pub use crate::topology::{ConnectionConfig, Host, ResolvedConnection, Topology};
}
