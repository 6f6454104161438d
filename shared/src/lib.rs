//! LBS Shared Protocol Types
//!
//! This crate provides the GATT data model, payload codec and LED schedule
//! used by the client session. Nothing in here performs I/O.

pub mod codec;
pub mod gatt;
pub mod led;

use std::time::{SystemTime, UNIX_EPOCH};

pub use uuid::Uuid;

// Re-export commonly used types at crate root
pub use codec::{CccdValue, CodecError};
pub use gatt::{CharProperties, CharacteristicInfo, DescriptorInfo, Role, RoleMap, ServiceInfo};
pub use led::LedBlinker;

/// Nordic LED Button Service UUID
pub const LBS_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001523_1212_efde_1523_785feabcd123);

/// Client Characteristic Configuration Descriptor UUID (0x2902)
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Get current wall-clock time in whole seconds since Unix epoch
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Identity of the peripheral this client drives
pub mod defaults {
    /// Hardware address of the target board
    pub const TARGET_ADDRESS: &str = "c9:a3:d9:cb:02:b3";

    /// Display name used in logs
    pub const DISPLAY_NAME: &str = "A_Minh";
}

/// Fixed timing parameters of the run loop
pub mod timing {
    use std::time::Duration;

    /// Upper bound on a single wait for notifications
    pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Pause after each LED write so the same second cannot toggle twice
    pub const LED_DEBOUNCE: Duration = Duration::from_secs(1);

    /// LED toggles on wall-clock seconds divisible by this
    pub const LED_PERIOD_SECS: u64 = 3;

    /// Keep-alive read happens on iterations divisible by this
    pub const KEEP_ALIVE_EVERY: u64 = 10;
}
