//! Scripted in-memory peripheral for exercising the session without hardware

use crate::transport::traits::{AddressKind, GattError, Peripheral, PeripheralConnector, WaitOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use lbs_shared::ServiceInfo;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted answer to `wait_for_event`
#[derive(Debug, Clone)]
pub enum Step {
    /// Sleep the full timeout, then report nothing
    Timeout,
    /// Deliver a notification immediately
    Event(u16, Vec<u8>),
    /// Report that the link dropped
    Drop,
    /// Report a non-disconnection stack failure
    Fail(String),
}

/// Everything the session did to the peripheral
#[derive(Debug, Default)]
pub struct CallLog {
    pub connect_attempts: Vec<AddressKind>,
    pub services_calls: usize,
    pub reads: Vec<u16>,
    pub writes: Vec<(u16, Vec<u8>)>,
    pub waits: usize,
    pub disconnects: usize,
}

impl CallLog {
    pub fn writes_to(&self, handle: u16) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

pub type SharedLog = Arc<Mutex<CallLog>>;

/// In-memory peripheral driven by a script of wait outcomes
pub struct MockPeripheral {
    services: Vec<ServiceInfo>,
    script: VecDeque<Step>,
    values: HashMap<u16, Vec<u8>>,
    failing: HashMap<u16, GattError>,
    services_error: Option<GattError>,
    disconnect_error: Option<GattError>,
    log: SharedLog,
}

impl MockPeripheral {
    pub fn new(services: Vec<ServiceInfo>, log: SharedLog) -> Self {
        Self {
            services,
            script: VecDeque::new(),
            values: HashMap::new(),
            failing: HashMap::new(),
            services_error: None,
            disconnect_error: None,
            log,
        }
    }

    /// Queue wait outcomes; once exhausted every wait times out
    pub fn with_script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.extend(steps);
        self
    }

    /// Value returned by reads of `handle`
    pub fn with_value(mut self, handle: u16, value: &[u8]) -> Self {
        self.values.insert(handle, value.to_vec());
        self
    }

    /// Make every read or write of `handle` fail
    pub fn failing_on(mut self, handle: u16, err: GattError) -> Self {
        self.failing.insert(handle, err);
        self
    }

    pub fn failing_services(mut self, err: GattError) -> Self {
        self.services_error = Some(err);
        self
    }

    pub fn failing_disconnect(mut self, err: GattError) -> Self {
        self.disconnect_error = Some(err);
        self
    }

    fn check(&self, handle: u16) -> Result<(), GattError> {
        match self.failing.get(&handle) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    async fn services(&mut self) -> Result<Vec<ServiceInfo>, GattError> {
        self.log.lock().unwrap().services_calls += 1;
        match &self.services_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.services.clone()),
        }
    }

    async fn read(&mut self, handle: u16) -> Result<Bytes, GattError> {
        self.log.lock().unwrap().reads.push(handle);
        self.check(handle)?;
        self.values
            .get(&handle)
            .map(|v| Bytes::from(v.clone()))
            .ok_or(GattError::UnknownHandle(handle))
    }

    async fn write(&mut self, handle: u16, value: &[u8]) -> Result<(), GattError> {
        self.log.lock().unwrap().writes.push((handle, value.to_vec()));
        self.check(handle)
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> Result<WaitOutcome, GattError> {
        self.log.lock().unwrap().waits += 1;
        match self.script.pop_front().unwrap_or(Step::Timeout) {
            Step::Timeout => {
                tokio::time::sleep(timeout).await;
                Ok(WaitOutcome::Timeout)
            }
            Step::Event(handle, payload) => Ok(WaitOutcome::Event {
                handle,
                payload: Bytes::from(payload),
            }),
            Step::Drop => Err(GattError::Disconnected),
            Step::Fail(reason) => Err(GattError::Stack(reason)),
        }
    }

    async fn disconnect(&mut self) -> Result<(), GattError> {
        self.log.lock().unwrap().disconnects += 1;
        match self.disconnect_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Connector handing out scripted results per attempt
pub struct MockConnector {
    attempts: Mutex<VecDeque<Result<MockPeripheral, GattError>>>,
    log: SharedLog,
}

impl MockConnector {
    pub fn new(log: SharedLog, attempts: Vec<Result<MockPeripheral, GattError>>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            log,
        }
    }
}

#[async_trait]
impl PeripheralConnector for MockConnector {
    type Peripheral = MockPeripheral;

    async fn connect(&self, _address: &str, kind: AddressKind) -> Result<MockPeripheral, GattError> {
        self.log.lock().unwrap().connect_attempts.push(kind);
        self.attempts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(GattError::Stack("no scripted attempt".into())))
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}
