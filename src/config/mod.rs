mod staging_config;

pub use staging_config::{DEFAULT_PREFIX, StagingConfig, StagingConfigError};
