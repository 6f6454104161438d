//! BlueZ backend using `bluer`
//!
//! Attribute handles are the identifiers BlueZ encodes in its D-Bus object
//! paths. BlueZ does not accept raw CCCD writes, so an enable code written to
//! a CCCD descriptor starts the characteristic's notification session instead.
//! Notification sessions and device property events are pumped by background
//! tasks into one channel that `wait_for_event` drains.

use crate::transport::traits::{AddressKind, GattError, Peripheral, PeripheralConnector, WaitOutcome};
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, Descriptor};
use bluer::{Address, AddressType, Device, DeviceEvent, DeviceProperty, ErrorKind};
use bytes::Bytes;
use futures::StreamExt;
use lbs_shared::{
    CccdValue, CharProperties, CharacteristicInfo, DescriptorInfo, ServiceInfo, CCCD_UUID,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Traffic forwarded from the background pumps
#[derive(Debug)]
enum Incoming {
    Value { handle: u16, payload: Vec<u8> },
    Disconnected,
}

fn stack_error(err: bluer::Error) -> GattError {
    match err.kind {
        ErrorKind::NotConnected => GattError::Disconnected,
        _ => GattError::Stack(err.to_string()),
    }
}

fn properties_of(flags: &bluer::gatt::CharacteristicFlags) -> CharProperties {
    let mut bits = 0u8;
    if flags.read {
        bits |= CharProperties::READ;
    }
    if flags.write {
        bits |= CharProperties::WRITE;
    }
    if flags.notify {
        bits |= CharProperties::NOTIFY;
    }
    if flags.indicate {
        bits |= CharProperties::INDICATE;
    }
    CharProperties::from_bits(bits)
}

/// Connector that opens GATT client connections through BlueZ
#[derive(Debug, Default)]
pub struct BluezConnector;

impl BluezConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeripheralConnector for BluezConnector {
    type Peripheral = BluezPeripheral;

    async fn connect(&self, address: &str, kind: AddressKind) -> Result<BluezPeripheral, GattError> {
        let target: Address = address
            .parse()
            .map_err(|_| GattError::InvalidAddress(address.to_string()))?;

        let session = bluer::Session::new().await.map_err(stack_error)?;
        let adapter = session.default_adapter().await.map_err(stack_error)?;
        adapter.set_powered(true).await.map_err(stack_error)?;

        let address_type = match kind {
            AddressKind::Random => AddressType::LeRandom,
            AddressKind::Public => AddressType::LePublic,
        };

        debug!("[BLE] Connecting to {} ({} address) on {}", target, kind, adapter.name());
        let known = adapter.device_addresses().await.map_err(stack_error)?;
        let device = match connect_plan(&known, target) {
            ConnectPlan::Existing => connect_existing(&adapter, target).await?,
            ConnectPlan::ConnectDevice => match adapter.connect_device(target, address_type).await {
                Ok(device) => device,
                Err(err) if matches!(err.kind, ErrorKind::AlreadyExists) => {
                    connect_existing(&adapter, target).await?
                }
                Err(err) => return Err(stack_error(err)),
            },
        };

        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let watcher = spawn_connection_watcher(device.clone(), incoming_tx.clone()).await?;

        info!("[BLE] Connected to {}", target);
        Ok(BluezPeripheral {
            _session: session,
            device,
            characteristics: HashMap::new(),
            descriptors: HashMap::new(),
            incoming_tx,
            incoming_rx,
            pumps: HashMap::new(),
            watcher,
        })
    }

    fn name(&self) -> &'static str {
        "BlueZ"
    }
}

/// How to reach the target device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPlan {
    /// BlueZ already has a device object; connect it directly
    Existing,
    /// Create the device with `ConnectDevice` (experimental in BlueZ)
    ConnectDevice,
}

fn connect_plan(known: &[Address], target: Address) -> ConnectPlan {
    if known.contains(&target) {
        ConnectPlan::Existing
    } else {
        ConnectPlan::ConnectDevice
    }
}

async fn connect_existing(adapter: &bluer::Adapter, target: Address) -> Result<Device, GattError> {
    let device = adapter.device(target).map_err(stack_error)?;
    if !device.is_connected().await.map_err(stack_error)? {
        device.connect().await.map_err(stack_error)?;
    }
    Ok(device)
}

/// Forward `Connected(false)` property changes as a disconnection
async fn spawn_connection_watcher(
    device: Device,
    tx: mpsc::Sender<Incoming>,
) -> Result<JoinHandle<()>, GattError> {
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let events = match device.events().await {
            Ok(events) => {
                let _ = ready_tx.send(Ok(()));
                events
            }
            Err(err) => {
                let _ = ready_tx.send(Err(stack_error(err)));
                return;
            }
        };
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                let _ = tx.send(Incoming::Disconnected).await;
                break;
            }
        }
    });

    ready_rx
        .await
        .map_err(|_| GattError::Stack("device event watcher exited".into()))??;
    Ok(handle)
}

/// Forward every value of a notify session, tagged with the characteristic handle
async fn spawn_notify_pump(
    characteristic: Characteristic,
    handle: u16,
    tx: mpsc::Sender<Incoming>,
) -> Result<JoinHandle<()>, GattError> {
    let (ready_tx, ready_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let values = match characteristic.notify().await {
            Ok(values) => {
                let _ = ready_tx.send(Ok(()));
                values
            }
            Err(err) => {
                let _ = ready_tx.send(Err(stack_error(err)));
                return;
            }
        };
        tokio::pin!(values);

        while let Some(payload) = values.next().await {
            if tx.send(Incoming::Value { handle, payload }).await.is_err() {
                break;
            }
        }
        debug!("[BLE] Notify session for {:#06x} ended", handle);
    });

    ready_rx
        .await
        .map_err(|_| GattError::Stack("notify session task exited".into()))??;
    Ok(task)
}

/// Live GATT client connection through BlueZ
pub struct BluezPeripheral {
    _session: bluer::Session,
    device: Device,
    /// Characteristic handle -> remote characteristic
    characteristics: HashMap<u16, Characteristic>,
    /// Descriptor handle -> (owning characteristic handle, UUID, remote descriptor)
    descriptors: HashMap<u16, (u16, bluer::Uuid, Descriptor)>,
    incoming_tx: mpsc::Sender<Incoming>,
    incoming_rx: mpsc::Receiver<Incoming>,
    /// Characteristic handle -> running notify pump
    pumps: HashMap<u16, JoinHandle<()>>,
    watcher: JoinHandle<()>,
}

impl BluezPeripheral {
    async fn subscribe(&mut self, char_handle: u16, value: &[u8]) -> Result<(), GattError> {
        let code = CccdValue::decode(value).map_err(|_| GattError::NotPermitted(char_handle))?;

        if code == CccdValue::Disabled {
            if let Some(pump) = self.pumps.remove(&char_handle) {
                pump.abort();
            }
            return Ok(());
        }
        if self.pumps.contains_key(&char_handle) {
            return Ok(());
        }

        let characteristic = self
            .characteristics
            .get(&char_handle)
            .cloned()
            .ok_or(GattError::UnknownHandle(char_handle))?;
        let pump = spawn_notify_pump(characteristic, char_handle, self.incoming_tx.clone()).await?;
        self.pumps.insert(char_handle, pump);
        debug!("[BLE] Notify session started for {:#06x} ({:?})", char_handle, code);
        Ok(())
    }

    fn stop_pumps(&mut self) {
        for (_, pump) in self.pumps.drain() {
            pump.abort();
        }
        self.watcher.abort();
    }
}

impl Drop for BluezPeripheral {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}

#[async_trait]
impl Peripheral for BluezPeripheral {
    async fn services(&mut self) -> Result<Vec<ServiceInfo>, GattError> {
        let mut services = Vec::new();
        self.characteristics.clear();
        self.descriptors.clear();

        for service in self.device.services().await.map_err(stack_error)? {
            let uuid = service.uuid().await.map_err(stack_error)?;
            let mut characteristics = Vec::new();

            for characteristic in service.characteristics().await.map_err(stack_error)? {
                let handle = characteristic.id();
                let flags = characteristic.flags().await.map_err(stack_error)?;
                let mut info = CharacteristicInfo::new(
                    characteristic.uuid().await.map_err(stack_error)?,
                    handle,
                    properties_of(&flags),
                );

                for descriptor in characteristic.descriptors().await.map_err(stack_error)? {
                    let desc_uuid = descriptor.uuid().await.map_err(stack_error)?;
                    info.descriptors.push(DescriptorInfo {
                        uuid: desc_uuid,
                        handle: descriptor.id(),
                    });
                    self.descriptors
                        .insert(descriptor.id(), (handle, desc_uuid, descriptor));
                }

                self.characteristics.insert(handle, characteristic);
                characteristics.push(info);
            }

            services.push(ServiceInfo {
                uuid,
                characteristics,
            });
        }

        Ok(services)
    }

    async fn read(&mut self, handle: u16) -> Result<Bytes, GattError> {
        let value = if let Some(characteristic) = self.characteristics.get(&handle) {
            characteristic.read().await.map_err(stack_error)?
        } else if let Some((_, _, descriptor)) = self.descriptors.get(&handle) {
            descriptor.read().await.map_err(stack_error)?
        } else {
            return Err(GattError::UnknownHandle(handle));
        };
        Ok(Bytes::from(value))
    }

    async fn write(&mut self, handle: u16, value: &[u8]) -> Result<(), GattError> {
        if let Some(characteristic) = self.characteristics.get(&handle) {
            return characteristic.write(value).await.map_err(stack_error);
        }

        let (owner, uuid) = match self.descriptors.get(&handle) {
            Some((owner, uuid, _)) => (*owner, *uuid),
            None => return Err(GattError::UnknownHandle(handle)),
        };

        if uuid == CCCD_UUID {
            return self.subscribe(owner, value).await;
        }

        match self.descriptors.get(&handle) {
            Some((_, _, descriptor)) => descriptor.write(value).await.map_err(stack_error),
            None => Err(GattError::UnknownHandle(handle)),
        }
    }

    async fn wait_for_event(&mut self, wait: Duration) -> Result<WaitOutcome, GattError> {
        match timeout(wait, self.incoming_rx.recv()).await {
            Ok(Some(Incoming::Value { handle, payload })) => Ok(WaitOutcome::Event {
                handle,
                payload: Bytes::from(payload),
            }),
            Ok(Some(Incoming::Disconnected)) | Ok(None) => Err(GattError::Disconnected),
            Err(_) => Ok(WaitOutcome::Timeout),
        }
    }

    async fn disconnect(&mut self) -> Result<(), GattError> {
        self.stop_pumps();
        match self.device.disconnect().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("[BLE] Disconnect reported: {}", err);
                Err(stack_error(err))
            }
        }
    }
}
