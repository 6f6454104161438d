pub mod bluez;
#[cfg(test)]
pub mod mock;
pub mod traits;

pub use bluez::BluezConnector;
pub use traits::{AddressKind, GattError, Peripheral, PeripheralConnector, WaitOutcome};
