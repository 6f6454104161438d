//! Peripheral-access abstraction for pluggable BLE backends

use async_trait::async_trait;
use bytes::Bytes;
use lbs_shared::ServiceInfo;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a BLE backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Peripheral disconnected")]
    Disconnected,

    #[error("No attribute with handle {0:#06x}")]
    UnknownHandle(u16),

    #[error("Operation not permitted on handle {0:#06x}")]
    NotPermitted(u16),

    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("BLE stack error: {0}")]
    Stack(String),
}

/// LE address type used when connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Random,
    Public,
}

impl AddressKind {
    /// Order in which address types are tried
    pub const ATTEMPT_ORDER: [AddressKind; 2] = [AddressKind::Random, AddressKind::Public];
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Random => write!(f, "random"),
            AddressKind::Public => write!(f, "public"),
        }
    }
}

/// Result of a bounded wait for peripheral traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Nothing arrived before the timeout
    Timeout,
    /// A notification or indication arrived on `handle`
    Event { handle: u16, payload: Bytes },
}

/// An established connection to one peripheral
#[async_trait]
pub trait Peripheral: Send {
    /// Enumerate services with their characteristics and descriptors
    async fn services(&mut self) -> Result<Vec<ServiceInfo>, GattError>;

    /// Read the attribute at `handle`
    async fn read(&mut self, handle: u16) -> Result<Bytes, GattError>;

    /// Write `value` to the attribute at `handle`
    async fn write(&mut self, handle: u16, value: &[u8]) -> Result<(), GattError>;

    /// Wait up to `timeout` for one notification or indication
    async fn wait_for_event(&mut self, timeout: Duration) -> Result<WaitOutcome, GattError>;

    /// Tear the connection down
    async fn disconnect(&mut self) -> Result<(), GattError>;
}

/// Factory for peripheral connections
#[async_trait]
pub trait PeripheralConnector: Send + Sync {
    /// The connection type this connector produces
    type Peripheral: Peripheral;

    /// Attempt one connection with the given address type
    async fn connect(&self, address: &str, kind: AddressKind)
        -> Result<Self::Peripheral, GattError>;

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}
