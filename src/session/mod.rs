//! Session lifecycle for a single BLE peripheral
//!
//! This module handles:
//! - Connecting with random/public address fallback
//! - Classifying characteristics into Button, LED and Sensor roles
//! - Enabling notifications and indications
//! - The wait/keep-alive/LED run loop
//! - Disconnecting exactly once on every exit path

mod error;
mod manager;

pub use manager::{CccdLocator, SessionConfig, SessionManager};
