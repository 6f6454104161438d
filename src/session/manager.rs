//! Session manager: connect, classify, arm, run, disconnect

use super::error::SessionError;
use crate::transport::{AddressKind, GattError, Peripheral, PeripheralConnector, WaitOutcome};
use lbs_shared::{
    codec::{self, CccdValue},
    defaults, gatt, now_secs, timing, CharacteristicInfo, LedBlinker, Role, RoleMap, ServiceInfo,
    Uuid, CCCD_UUID,
};
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Where the CCCD of a characteristic is expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccdLocator {
    /// Fixed offset from the characteristic's handle
    Offset(u16),
    /// The characteristic's 0x2902 descriptor, else handle + 1
    Discover,
}

impl CccdLocator {
    /// Handle the enable code is written to
    pub fn locate(&self, characteristic: &CharacteristicInfo) -> u16 {
        match self {
            CccdLocator::Offset(offset) => characteristic.handle.wrapping_add(*offset),
            CccdLocator::Discover => characteristic
                .descriptor_handle(CCCD_UUID)
                .unwrap_or_else(|| characteristic.handle.wrapping_add(1)),
        }
    }
}

impl Default for CccdLocator {
    fn default() -> Self {
        CccdLocator::Offset(1)
    }
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hardware address of the peripheral
    pub target_address: String,
    /// Name used in logs
    pub display_name: String,
    /// Only inspect the service with this UUID when set
    pub service_filter: Option<Uuid>,
    /// How enable codes find their descriptor
    pub cccd: CccdLocator,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_address: defaults::TARGET_ADDRESS.into(),
            display_name: defaults::DISPLAY_NAME.into(),
            service_filter: None,
            cccd: CccdLocator::default(),
        }
    }
}

/// Source of the wall-clock second used for LED timing
pub trait WallClock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// System time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_secs(&self) -> u64 {
        now_secs()
    }
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// What ended the run loop
    pub stopped_by: SessionError,
    pub roles: RoleMap,
    /// Roles whose notify/indicate could not be enabled
    pub disabled: Vec<Role>,
    pub events: u64,
    pub button_presses: u64,
    pub keep_alive_reads: u64,
    pub keep_alive_failures: u64,
    pub led_toggles: u64,
    pub disconnect_error: Option<SessionError>,
}

impl SessionReport {
    pub fn exit_code(&self) -> i32 {
        self.stopped_by.exit_code()
    }
}

/// Owns the connector and drives one session at a time
pub struct SessionManager<C, K = SystemClock> {
    config: SessionConfig,
    connector: C,
    clock: K,
}

impl<C: PeripheralConnector> SessionManager<C, SystemClock> {
    /// Create a new session manager using system time
    pub fn new(config: SessionConfig, connector: C) -> Self {
        Self::with_clock(config, connector, SystemClock)
    }
}

impl<C: PeripheralConnector, K: WallClock> SessionManager<C, K> {
    pub fn with_clock(config: SessionConfig, connector: C, clock: K) -> Self {
        Self {
            config,
            connector,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect with a random address, falling back once to a public one
    pub async fn connect(&self) -> Result<C::Peripheral, SessionError> {
        let address = &self.config.target_address;
        info!(
            "[SESSION] Connecting directly to {} ({}) via {}",
            self.config.display_name,
            address,
            self.connector.name()
        );

        let mut failures = Vec::with_capacity(AddressKind::ATTEMPT_ORDER.len());
        for kind in AddressKind::ATTEMPT_ORDER {
            match self.connector.connect(address, kind).await {
                Ok(peripheral) => {
                    info!("[SESSION] Connected ({} address)", kind);
                    return Ok(peripheral);
                }
                Err(e) => {
                    debug!("[SESSION] Connect with {} address failed: {}", kind, e);
                    failures.push(e);
                }
            }
        }

        let mut failures = failures.into_iter();
        let random = failures.next().unwrap_or(GattError::Disconnected);
        let public = failures.next().unwrap_or(GattError::Disconnected);
        let err = SessionError::ConnectionFailure {
            address: address.clone(),
            random,
            public,
        };
        error!("[SESSION] {}", err);
        Err(err)
    }

    /// Run a full session until `shutdown` resolves or the loop stops.
    ///
    /// Returns `Err` only when no connection could be made; every other
    /// outcome is reported after the peripheral has been disconnected.
    pub async fn start<F>(&self, shutdown: F) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()>,
    {
        let peripheral = self.connect().await?;
        let mut session = Session::new(peripheral, &self.config, &self.clock);
        let stopped_by = session.operate(shutdown).await;
        Ok(session.finish(stopped_by).await)
    }
}

/// A connected peripheral and the loop state bound to it
pub struct Session<'a, P, K> {
    peripheral: P,
    config: &'a SessionConfig,
    clock: &'a K,
    roles: RoleMap,
    disabled: Vec<Role>,
    blinker: LedBlinker,
    counter: u64,
    events: u64,
    button_presses: u64,
    keep_alive_reads: u64,
    keep_alive_failures: u64,
}

impl<'a, P: Peripheral, K: WallClock> Session<'a, P, K> {
    pub fn new(peripheral: P, config: &'a SessionConfig, clock: &'a K) -> Self {
        Self {
            peripheral,
            config,
            clock,
            roles: RoleMap::default(),
            disabled: Vec::new(),
            blinker: LedBlinker::new(),
            counter: 0,
            events: 0,
            button_presses: 0,
            keep_alive_reads: 0,
            keep_alive_failures: 0,
        }
    }

    /// Classify, arm and run; returns what stopped the session
    async fn operate<F>(&mut self, shutdown: F) -> SessionError
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.classify().await {
            let err = SessionError::terminal(e);
            error!("[SESSION] Characteristic discovery failed: {}", err);
            return err;
        }
        self.arm().await;

        info!("[SESSION] Setup complete, listening for data from the device");
        if self.roles.led.is_some() {
            info!(
                "[SESSION] Controlling LED every {} seconds",
                timing::LED_PERIOD_SECS
            );
        }
        self.run(shutdown).await
    }

    /// Enumerate services and assign characteristic roles
    pub async fn classify(&mut self) -> Result<&RoleMap, GattError> {
        info!("[SESSION] Searching for services and characteristics...");
        let services = self.peripheral.services().await?;
        log_services(&services);

        let candidates = gatt::candidates(&services, self.config.service_filter);
        for (role, characteristic) in &candidates {
            info!(
                "[SESSION] {} ({:#06x}) is the {} characteristic",
                characteristic.uuid, characteristic.handle, role
            );
        }
        self.roles = RoleMap::assign(candidates);
        Ok(&self.roles)
    }

    /// Enable sensor notifications and button indications.
    ///
    /// Failures are returned as warnings and the role is disabled.
    pub async fn arm(&mut self) -> Vec<SessionError> {
        let mut warnings = Vec::new();

        for (role, code) in [(Role::Sensor, CccdValue::Notify), (Role::Button, CccdValue::Indicate)] {
            let Some(characteristic) = self.roles.get(role) else {
                continue;
            };
            let cccd = self.config.cccd.locate(characteristic);
            info!("[SESSION] Enabling {:?} for {} via {:#06x}", code, role, cccd);

            if let Err(e) = self.peripheral.write(cccd, &code.encode()).await {
                let err = SessionError::SubscriptionFailure { role, source: e };
                warn!("[SESSION] {}", err);
                self.disabled.push(role);
                warnings.push(err);
            }
        }

        warnings
    }

    /// Wait for events and drive the timers until cancelled or stopped
    pub async fn run<F>(&mut self, shutdown: F) -> SessionError
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("[SESSION] Stopped by user");
                    return SessionError::UserCancellation;
                }
                outcome = self.peripheral.wait_for_event(timing::WAIT_TIMEOUT) => outcome,
            };

            match outcome {
                Ok(WaitOutcome::Event { handle, payload }) => {
                    self.dispatch(handle, &payload);
                    continue;
                }
                Ok(WaitOutcome::Timeout) => {}
                Err(e) => return self.stop(e),
            }

            if let Err(e) = self.keep_alive().await {
                return self.stop(e);
            }
            if let Err(e) = self.drive_led().await {
                return self.stop(e);
            }

            self.counter += 1;
        }
    }

    fn stop(&self, err: GattError) -> SessionError {
        let err = SessionError::terminal(err);
        match err {
            SessionError::RuntimeDisconnection => warn!("[SESSION] Device disconnected"),
            _ => error!("[SESSION] {}", err),
        }
        err
    }

    fn dispatch(&mut self, handle: u16, payload: &[u8]) {
        self.events += 1;
        match self.roles.role_of(handle) {
            Some(Role::Button) => {
                let pressed = codec::decode_button(payload);
                if pressed {
                    self.button_presses += 1;
                }
                info!(
                    "[BUTTON] Button: {}",
                    if pressed { "PRESSED" } else { "RELEASED" }
                );
            }
            role => match codec::decode_le(payload) {
                Ok(value) if role == Some(Role::Sensor) => info!("[SENSOR] Sensor data: {}", value),
                Ok(value) => info!("[SESSION] Notification on {:#06x}: {}", handle, value),
                Err(e) => warn!("[SESSION] Undecodable payload {:02x?} on {:#06x}: {}", payload, handle, e),
            },
        }
    }

    /// Handle of the sensor if a keep-alive read is due this iteration
    fn keep_alive_target(&self) -> Option<u16> {
        if self.counter % timing::KEEP_ALIVE_EVERY != 0 {
            return None;
        }
        self.roles
            .sensor
            .as_ref()
            .filter(|sensor| sensor.properties.readable())
            .map(|sensor| sensor.handle)
    }

    /// Periodic sensor read; only a disconnection is returned as an error
    async fn keep_alive(&mut self) -> Result<(), GattError> {
        let Some(handle) = self.keep_alive_target() else {
            return Ok(());
        };

        self.keep_alive_reads += 1;
        match self.peripheral.read(handle).await {
            Ok(value) => {
                match codec::decode_le(&value) {
                    Ok(decoded) => info!("[SENSOR] Keep-alive read: {}", decoded),
                    Err(_) => info!("[SENSOR] Keep-alive read: {:02x?}", &value[..]),
                }
                Ok(())
            }
            Err(GattError::Disconnected) => Err(GattError::Disconnected),
            Err(e) => {
                self.keep_alive_failures += 1;
                warn!("[SENSOR] {}", SessionError::KeepAliveReadFailure(e));
                Ok(())
            }
        }
    }

    /// Toggle the LED on qualifying seconds, then debounce
    async fn drive_led(&mut self) -> Result<(), GattError> {
        let Some(handle) = self.roles.led.as_ref().map(|led| led.handle) else {
            return Ok(());
        };
        let now = self.clock.now_secs();
        if !self.blinker.is_due(now) {
            return Ok(());
        }

        let next = self.blinker.next_state();
        self.peripheral.write(handle, &codec::led_value(next)).await?;
        self.blinker.commit(now);
        info!("[LED] LED: {}", if next { "ON" } else { "OFF" });

        tokio::time::sleep(timing::LED_DEBOUNCE).await;
        Ok(())
    }

    /// Disconnect once and summarise the session
    pub async fn finish(mut self, stopped_by: SessionError) -> SessionReport {
        let disconnect_error = match self.peripheral.disconnect().await {
            Ok(()) => {
                info!("[SESSION] Disconnected successfully");
                None
            }
            Err(e) => {
                debug!("[SESSION] Ignoring disconnect failure: {}", e);
                Some(SessionError::DisconnectFailure(e))
            }
        };

        SessionReport {
            stopped_by,
            roles: self.roles,
            disabled: self.disabled,
            events: self.events,
            button_presses: self.button_presses,
            keep_alive_reads: self.keep_alive_reads,
            keep_alive_failures: self.keep_alive_failures,
            led_toggles: self.blinker.toggles(),
            disconnect_error,
        }
    }
}

fn log_services(services: &[ServiceInfo]) {
    for service in services {
        info!("[SESSION] Service: {}", service.uuid);
        for characteristic in &service.characteristics {
            info!(
                "[SESSION]   Characteristic: {} handle={:#06x} properties=[{}]",
                characteristic.uuid, characteristic.handle, characteristic.properties
            );
        }
    }
}
