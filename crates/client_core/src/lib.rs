//! Client core for the postal-code office availability alert service.
//!
//! [`workflow::WorkflowController`] drives the subscription workflow on top of
//! the [`directory`] and [`subscription`] clients.

pub mod config;
pub mod directory;
pub mod error;
pub mod subscription;
mod transport;
pub mod workflow;

pub use config::{load_settings, ApiBase, Settings};
pub use directory::{HttpPostalDirectory, PostalDirectory};
pub use error::{ApiError, ConfigError, WorkflowError};
pub use subscription::{HttpSubscriptionClient, QueueReceipt, ServiceReceipt, SubscriptionApi};
pub use workflow::{WorkflowAction, WorkflowController, WorkflowEvent, WorkflowState};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
