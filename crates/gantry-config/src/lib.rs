pub mod config;
pub mod error;
pub mod load;
pub mod logging;
pub mod merge;
pub mod validate;

pub use config::{BuildConfig, Config, LogConfig, LogLevel, SeqModeSetting, ServerConfig, SessionConfig};
pub use error::ConfigError;
pub use load::{load_config, load_from_str};
