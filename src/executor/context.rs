// Application context handed to task handlers

use std::sync::Arc;

use crate::config::AutomateConfig;
use crate::output::terminal::Logger;

/// Explicit context passed into every task handler invocation.
///
/// Handlers reach configuration and logging through this value instead of a
/// process-global application object.
pub struct AppContext {
    pub config: Arc<AutomateConfig>,
    pub logger: Arc<Logger>,
}

impl AppContext {
    pub fn new(config: Arc<AutomateConfig>, logger: Arc<Logger>) -> Self {
        AppContext { config, logger }
    }
}
