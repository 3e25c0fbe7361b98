//! Shared building blocks for visitor targeting: the per-visit context,
//! the data provider registry, configuration and error types.

#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod provider;
pub mod visitor;

pub use config::{StorageBackend, StorageConfig, TargetingConfig};
pub use error::{TargetingError, TargetingResult};
pub use provider::{DataProvider, DataProviderRegistry, BEHAVIOR_PROVIDER, DEVICE_PROVIDER};
pub use visitor::{RuleMatch, VisitRequest, VisitorInfo};
