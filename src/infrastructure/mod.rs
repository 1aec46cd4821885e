pub mod directories;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod secrets;
pub mod shutdown;
