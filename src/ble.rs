//! btleplug-backed [`Transport`] and device discovery.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::printer::{DeviceSession, NotifyCallback, SessionConfig, Transport};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A device seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bluetooth address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

async fn first_adapter() -> std::result::Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::NoAdapter)
}

/// Scan for `duration` and list every advertising device, strongest first.
pub async fn scan(duration: Duration) -> std::result::Result<Vec<DeviceInfo>, TransportError> {
    let adapter = first_adapter().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    let peripherals = adapter.peripherals().await?;
    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "stop_scan failed");
    }

    let mut devices = Vec::with_capacity(peripherals.len());
    for p in peripherals {
        let props = p.properties().await?;
        devices.push(DeviceInfo {
            address: p.address().to_string(),
            name: props.as_ref().and_then(|pr| pr.local_name.clone()),
            rssi: props.and_then(|pr| pr.rssi),
        });
    }
    devices.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
    debug!(count = devices.len(), "scan finished");
    Ok(devices)
}

/// Build a session over BLE and connect it.
pub async fn connect(config: SessionConfig) -> Result<DeviceSession<BleTransport>> {
    let mut session = DeviceSession::new(BleTransport::new(), config);
    session.connect().await?;
    Ok(session)
}

/// GATT link to a single printer.
#[derive(Default)]
pub struct BleTransport {
    peripheral: Option<Peripheral>,
    subscribed: Vec<Characteristic>,
    notify_task: Option<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn peripheral(&self) -> std::result::Result<&Peripheral, TransportError> {
        self.peripheral.as_ref().ok_or(TransportError::NotConnected)
    }

    fn characteristic(&self, uuid: Uuid) -> std::result::Result<Characteristic, TransportError> {
        self.peripheral()?
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> std::result::Result<Peripheral, TransportError> {
    loop {
        for p in adapter.peripherals().await? {
            if p.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(p);
            }
            let name = p.properties().await?.and_then(|pr| pr.local_name);
            if name.as_deref() == Some(address) {
                return Ok(p);
            }
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(
        &mut self,
        address: &str,
        discovery_timeout: Duration,
    ) -> std::result::Result<(), TransportError> {
        if self.peripheral.is_some() {
            if let Err(e) = self.disconnect().await {
                debug!(error = %e, "dropping previous link failed");
            }
        }

        let adapter = first_adapter().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        debug!(%address, ?discovery_timeout, "scanning for printer");

        let found = tokio::time::timeout(discovery_timeout, find_peripheral(&adapter, address)).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }

        let peripheral = match found {
            Ok(res) => res?,
            Err(_) => {
                return Err(TransportError::DeviceNotFound {
                    address: address.to_string(),
                    timeout: discovery_timeout,
                })
            }
        };

        peripheral.connect().await?;
        peripheral.discover_services().await?;
        info!(address = %peripheral.address(), "GATT link up");

        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&mut self) -> std::result::Result<(), TransportError> {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        let Some(peripheral) = self.peripheral.take() else {
            self.subscribed.clear();
            return Err(TransportError::NotConnected);
        };

        for c in self.subscribed.drain(..) {
            if let Err(e) = peripheral.unsubscribe(&c).await {
                warn!(uuid = %c.uuid, error = %e, "unsubscribe failed");
            }
        }
        peripheral.disconnect().await?;
        debug!(address = %peripheral.address(), "GATT link down");
        Ok(())
    }

    async fn write(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> std::result::Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        let peripheral = self.peripheral()?;
        trace!(uuid = %characteristic, len = data.len(), "GATT write");
        peripheral
            .write(&c, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| match e {
                btleplug::Error::NotConnected => TransportError::Disconnected,
                btleplug::Error::NotSupported(msg) | btleplug::Error::RuntimeError(msg) => {
                    TransportError::WriteRejected(msg)
                }
                other => TransportError::Ble(other),
            })
    }

    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        on_notify: NotifyCallback,
    ) -> std::result::Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        let peripheral = self.peripheral()?.clone();

        peripheral.subscribe(&c).await?;
        let mut stream = peripheral.notifications().await?;
        self.subscribed.push(c);

        if let Some(old) = self.notify_task.take() {
            old.abort();
        }
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(n) = stream.next().await {
                if n.uuid == characteristic {
                    on_notify(&n.value);
                }
            }
            debug!("notification stream closed");
        }));
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}
