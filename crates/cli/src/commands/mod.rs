pub mod config;
pub mod query;
pub mod status;
pub mod utils;
pub mod watch;

pub use config::{handle_config_command, ConfigCommands};
pub use query::run_query;
pub use status::{run_cache_clear, run_cache_stats, run_detect_node, run_gas, run_status};
pub use watch::{run_watch, WatchOptions};
