//! Seam between the orchestration core and switch platforms.

use super::operations::{DeviceOperation, DeviceResponse};
use super::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Opens sessions to switches of one or more platforms
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn login(&self, host: &str, credentials: &Credentials) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// An established management session with one switch.
///
/// Calls are synchronous round trips; nothing here honours cancellation.
#[async_trait]
pub trait DeviceSession: Send {
    fn host(&self) -> &str;

    async fn execute(&mut self, operation: DeviceOperation) -> Result<DeviceResponse, DeviceError>;
}
