use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result, TransportError};
use crate::protocol::{self, Command, Notification};

/// Write-only characteristic that accepts command frames.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ae01_0000_1000_8000_00805f9b34fb);

/// Notify-only characteristic that carries device replies.
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ae02_0000_1000_8000_00805f9b34fb);

/// Spacing the firmware needs between consecutive writes.
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(10);

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw notification bytes callback installed on the transport.
pub type NotifyCallback = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Link to the printer. Implement this for a BLE stack or a simulator.
#[async_trait]
pub trait Transport: Send {
    /// Discover and connect to the device. Fails with
    /// [`TransportError::DeviceNotFound`] once `discovery_timeout` elapses.
    async fn connect(
        &mut self,
        address: &str,
        discovery_timeout: Duration,
    ) -> std::result::Result<(), TransportError>;

    async fn disconnect(&mut self) -> std::result::Result<(), TransportError>;

    /// Write one frame to a characteristic, without waiting for a response.
    async fn write(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> std::result::Result<(), TransportError>;

    /// Route every notification from `characteristic` to `on_notify`.
    ///
    /// The callback runs on the delivery path and must not block.
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        on_notify: NotifyCallback,
    ) -> std::result::Result<(), TransportError>;
}

/// Receiver of decoded notifications.
pub trait StatusHandler: Send + Sync {
    fn handle(&self, notification: Notification);
}

impl<F> StatusHandler for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn handle(&self, notification: Notification) {
        self(notification)
    }
}

impl StatusHandler for UnboundedSender<Notification> {
    fn handle(&self, notification: Notification) {
        if self.send(notification).is_err() {
            trace!("status receiver dropped");
        }
    }
}

type HandlerSlot = Arc<RwLock<Option<Arc<dyn StatusHandler>>>>;

/// Where and how to reach the printer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub address: String,
    pub command_characteristic: Uuid,
    pub notify_characteristic: Uuid,
    /// Pause after every write before the command returns.
    pub write_delay: Duration,
    pub discovery_timeout: Duration,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            command_characteristic: COMMAND_CHARACTERISTIC,
            notify_characteristic: NOTIFY_CHARACTERISTIC,
            write_delay: DEFAULT_WRITE_DELAY,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_characteristics(mut self, command: Uuid, notify: Uuid) -> Self {
        self.command_characteristic = command;
        self.notify_characteristic = notify;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// One logical connection to an MX10 printer.
///
/// Commands take `&mut self`, so callers sharing a session must serialize
/// access themselves (e.g. behind a `tokio::sync::Mutex`). Each command
/// returns after its frame is written and the settling delay has elapsed;
/// the device never acknowledges writes directly.
///
/// ```no_run
/// use mx10::{BleTransport, DeviceSession, Notification, SessionConfig};
///
/// # async fn run() -> mx10::Result<()> {
/// let config = SessionConfig::new("A1:11:02:23:64:0D");
/// let mut session = DeviceSession::new(BleTransport::new(), config);
/// session.set_status_handler(|n: Notification| println!("{n:?}"));
/// session.connect().await?;
/// session.feed(0x20).await?;
/// session.get_status().await?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    handler: HandlerSlot,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Disconnected,
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Install the single receiver for decoded notifications, replacing any
    /// previous one. Takes effect immediately, also while connected.
    pub fn set_status_handler(&mut self, handler: impl StatusHandler + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_status_handler(&mut self) {
        *self.handler.write() = None;
    }

    /// Connect and subscribe to notifications.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let address = self.config.address.clone();
        info!(%address, "connecting to printer");

        self.transport
            .connect(&address, self.config.discovery_timeout)
            .await
            .map_err(|source| Error::Connection {
                address: address.clone(),
                source,
            })?;

        let slot = Arc::clone(&self.handler);
        let on_notify: NotifyCallback = Box::new(move |raw| dispatch(&slot, raw));

        if let Err(source) = self
            .transport
            .subscribe(self.config.notify_characteristic, on_notify)
            .await
        {
            if let Err(e) = self.transport.disconnect().await {
                debug!(error = %e, "disconnect after failed subscribe");
            }
            return Err(Error::Connection { address, source });
        }

        self.state = SessionState::Connected;
        info!(%address, "printer connected");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.state = SessionState::Disconnected;
        self.transport.disconnect().await?;
        info!(address = %self.config.address, "printer disconnected");
        Ok(())
    }

    /// Frame and write one command, then wait out the settling delay.
    pub async fn send_raw(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let frame = protocol::encode(command, payload);
        debug!(
            command = format!("0x{command:02X}"),
            len = payload.len(),
            "sending command"
        );

        if let Err(e) = self
            .transport
            .write(self.config.command_characteristic, &frame)
            .await
        {
            if e.is_disconnect() {
                warn!(error = %e, "link lost during write");
                self.state = SessionState::Disconnected;
                if let Err(e) = self.transport.disconnect().await {
                    debug!(error = %e, "disconnect after link loss");
                }
            }
            return Err(e.into());
        }

        tokio::time::sleep(self.config.write_delay).await;
        Ok(())
    }

    async fn send(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        self.send_raw(command.code(), payload).await
    }

    /// Advance the paper.
    ///
    /// - `steps`: step count, sent as 16-bit little-endian
    pub async fn feed(&mut self, steps: u16) -> Result<()> {
        self.send(Command::Feed, &steps.to_le_bytes()).await
    }

    /// Pull the paper back.
    ///
    /// - `steps`: step count, sent as 16-bit little-endian
    pub async fn retract(&mut self, steps: u16) -> Result<()> {
        self.send(Command::Retract, &steps.to_le_bytes()).await
    }

    /// Send one MSB-first bitmap row; the bit order is mirrored here.
    pub async fn print_bitmap_row(&mut self, row: &[u8]) -> Result<()> {
        self.send(Command::PrintRow, &protocol::reverse_row(row)).await
    }

    /// Send every row in order, then feed past the print head.
    pub async fn print_bitmap<R: AsRef<[u8]> + Sync>(&mut self, rows: &[R]) -> Result<()> {
        debug!(rows = rows.len(), "printing bitmap");
        for row in rows {
            self.print_bitmap_row(row.as_ref()).await?;
        }
        self.feed(protocol::TRAILING_FEED_STEPS).await
    }

    /// Commit the accumulated heat energy to the print head.
    pub async fn apply_energy(&mut self) -> Result<()> {
        self.send(Command::ApplyEnergy, &[0x01]).await
    }

    /// Request a status notification; the reply arrives on the status handler.
    pub async fn get_status(&mut self) -> Result<()> {
        self.send(Command::GetStatus, &[]).await
    }

    /// Request an info notification; the reply arrives on the status handler.
    pub async fn get_info(&mut self) -> Result<()> {
        self.send(Command::GetInfo, &[]).await
    }

    /// Set print density.
    ///
    /// - `dpi`: single byte, e.g. [`DEFAULT_DPI`](crate::protocol::DEFAULT_DPI)
    pub async fn set_dpi(&mut self, dpi: u8) -> Result<()> {
        self.send(Command::SetDpi, &[dpi]).await
    }

    /// Set print speed.
    ///
    /// - `speed`: single byte, passed through unchanged
    pub async fn set_speed(&mut self, speed: u8) -> Result<()> {
        self.send(Command::SetSpeed, &[speed]).await
    }

    /// Set heating energy.
    ///
    /// - `energy`: sent as 16-bit little-endian
    pub async fn set_energy(&mut self, energy: u16) -> Result<()> {
        self.send(Command::SetEnergy, &energy.to_le_bytes()).await
    }
}

fn dispatch(slot: &HandlerSlot, raw: &[u8]) {
    trace!(raw = %hex::encode(raw), "notification");
    let notification = Notification::from_raw(raw);

    let handler = slot.read().clone();
    match handler {
        Some(handler) => handler.handle(notification),
        None => trace!("no status handler installed, dropping notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use std::sync::Mutex;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(config.write_delay, Duration::from_millis(10));
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(
            config.command_characteristic.to_string(),
            "0000ae01-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            config.notify_characteristic.to_string(),
            "0000ae02-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_config_builders() {
        let config = SessionConfig::new("x")
            .with_write_delay(Duration::ZERO)
            .with_discovery_timeout(Duration::from_secs(1))
            .with_characteristics(Uuid::nil(), Uuid::from_u128(1));
        assert_eq!(config.write_delay, Duration::ZERO);
        assert_eq!(config.discovery_timeout, Duration::from_secs(1));
        assert_eq!(config.command_characteristic, Uuid::nil());
        assert_eq!(config.notify_characteristic, Uuid::from_u128(1));
    }

    #[test]
    fn test_dispatch_without_handler_is_noop() {
        let slot: HandlerSlot = Arc::new(RwLock::new(None));
        dispatch(&slot, &[0x51, 0x78]);
    }

    #[test]
    fn test_dispatch_routes_to_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn StatusHandler> =
            Arc::new(move |n: Notification| sink.lock().unwrap().push(n));
        let slot: HandlerSlot = Arc::new(RwLock::new(Some(handler)));

        dispatch(&slot, &encode(Command::GetStatus.code(), &[0x00, 0x01, 0x02]));
        dispatch(&slot, &[0xFF; 3]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            seen[0],
            Notification::Status { status, .. } if !status.paper_present
        ));
        assert!(matches!(seen[1], Notification::DecodeFailed { .. }));
    }

    #[test]
    fn test_channel_handler() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.handle(Notification::from_raw(&encode(Command::GetInfo.code(), &[])));
        assert!(matches!(rx.try_recv(), Ok(Notification::Frame(_))));

        drop(rx);
        // closed receiver must not panic the delivery path
        tx.handle(Notification::from_raw(&[]));
    }
}
