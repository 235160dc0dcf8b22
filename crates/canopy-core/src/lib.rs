pub mod config;

pub use config::{CanopyConfig, CrawlSettings, RetrySettings, TunerSettings};
