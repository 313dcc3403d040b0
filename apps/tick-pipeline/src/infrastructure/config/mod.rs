//! Configuration Module
//!
//! Configuration loading for the pipeline service.

mod settings;

pub use settings::{
    ApiSettings, ConfigError, FeedSettings, FinnhubCredentials, PipelineConfig, PipelineSettings,
    StoreBackend, StoreSettings,
};
