pub mod env;
mod loader;

pub use env::{
    AccountConfig, AppConfig, LogFormat, LoggingConfig, MarkingConfig, RspamdConfig, SpamdConfig,
};
pub use loader::{key_file_path, load_config};
#[cfg(test)]
pub use loader::{DEFAULT_HEADER_TEMPLATE, DEFAULT_SUBJECT_MARK};
