mod config;
mod log;

pub use config::JsonlLogConfig;
pub use log::JsonlLog;
