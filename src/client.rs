use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::command;
use crate::config::{
    clamp_scan_interval, ControllerConfig, ReconnectConfig, DEFAULT_PORT, DEFAULT_SCAN_INTERVAL,
};
use crate::connection::{ConnectionManager, ConnectionOptions};
use crate::diff::device_events;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::packet::Packet;
use crate::registry::DeviceRegistry;
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&DeviceSnapshot) + Send + Sync>;

pub struct OrkliClientBuilder {
    host: String,
    port: u16,
    name: Option<String>,
    devices: Vec<Device>,
    scan_interval: Duration,
    options: ConnectionOptions,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl OrkliClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            name: None,
            devices: Vec::new(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            options: ConnectionOptions::default(),
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    /// Start from settings persisted by the host application.
    pub fn from_config(config: &ControllerConfig) -> Self {
        let mut builder = Self::new(config.host.clone())
            .port(config.port)
            .devices(config.devices.clone())
            .scan_interval(config.scan_interval());
        builder.name = config.name.clone();
        builder
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn controller_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Polling period. Values under the minimum are raised to it.
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = clamp_scan_interval(interval);
        self
    }

    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.options.reconnect = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.options.idle_backoff = backoff;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&DeviceSnapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<OrkliClient> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        let name = self.name.unwrap_or_else(|| controller_name(&self.host));
        let shared = Arc::new(Shared {
            registry: DeviceRegistry::new(DeviceSnapshot::new(name, self.devices)),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        });

        let connection = ConnectionManager::with_options(
            format!("{}:{}", self.host, self.port),
            self.options,
        );
        let inbound = Arc::clone(&shared);
        connection.set_inbound_callback(move |packet| inbound.handle_packet(packet));

        Ok(OrkliClient {
            connection,
            shared,
            scan_interval: self.scan_interval,
        })
    }
}

struct Shared {
    registry: DeviceRegistry,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<Mutex<MessageLogger>>,
}

impl Shared {
    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            let mut guard = logger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard);
        }
    }

    fn handle_packet(&self, packet: Packet) {
        trace!(%packet, "inbound packet");
        self.with_logger(|l| l.log_rx(&packet));

        let (previous, current) = self.registry.apply(&packet);
        if Arc::ptr_eq(&previous, &current) {
            return;
        }

        let events = device_events(&previous, &current);
        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        if !events.is_empty() {
            debug!(count = events.len(), "device state changed");
        }
        self.publish(&current);
    }

    fn publish(&self, snapshot: &DeviceSnapshot) {
        self.with_logger(|l| l.log_snapshot(snapshot));
        for cb in &self.snapshot_callbacks {
            cb(snapshot);
        }
    }
}

/// Facade over one controller: keeps the device snapshot current from the
/// pushed packets and turns caller intents into commands.
pub struct OrkliClient {
    connection: ConnectionManager,
    shared: Arc<Shared>,
    scan_interval: Duration,
}

impl OrkliClient {
    pub fn builder(host: impl Into<String>) -> OrkliClientBuilder {
        OrkliClientBuilder::new(host)
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn controller_name(&self) -> String {
        self.shared.registry.snapshot().controller_name.clone()
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.shared.registry.snapshot()
    }

    pub fn device(&self, device_id: u32) -> Option<Device> {
        self.shared.registry.device(device_id)
    }

    /// Initial load. A controller that cannot be reached is reported as
    /// [`Error::NotReady`] so the caller can retry setup later.
    pub async fn first_refresh(&self) -> Result<Arc<DeviceSnapshot>> {
        self.refresh().await.map_err(|e| {
            if e.is_retryable() {
                Error::NotReady(Box::new(e))
            } else {
                e
            }
        })
    }

    /// One polling cycle: keepalive sequence, a read request per device,
    /// then publish the current snapshot. Answers to the reads arrive later
    /// through the receive loop.
    pub async fn refresh(&self) -> Result<Arc<DeviceSnapshot>> {
        if !self.connection.is_connected() {
            self.connection.connect().await?;
        }

        // Send failures are already logged; the cycle carries on regardless.
        for packet in command::keepalive() {
            self.send_logged("keepalive", None, &packet).await.ok();
        }

        let snapshot = self.snapshot();
        for device in &snapshot.devices {
            match command::read(device) {
                Ok(packet) => {
                    self.send_logged("read", Some(device.device_id), &packet).await.ok();
                }
                Err(e) => warn!(device_id = device.device_id, error = %e, "cannot address device"),
            }
        }

        let current = self.snapshot();
        self.shared.publish(&current);
        debug!(devices = current.devices.len(), "poll cycle complete");
        Ok(current)
    }

    /// Poll every scan interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "poll cycle failed");
                    }
                }
            }
        }
        debug!("polling stopped");
    }

    // -- Command methods --

    /// Send a prepared packet as-is.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        self.send_logged("raw", None, packet).await
    }

    /// Switch a zone on or off. The snapshot changes when the controller
    /// echoes the new state.
    pub async fn set_power(&self, device_id: u32, on: bool) -> Result<()> {
        let device = self.find_device(device_id)?;
        let packet = command::toggle(&device, on)?;
        self.send_logged("toggle", Some(device_id), &packet).await
    }

    /// Set a zone's target temperature in degrees, then request a read-back.
    pub async fn set_temperature(&self, device_id: u32, temperature: f64) -> Result<()> {
        let device = self.find_device(device_id)?;
        let [write, read_back] = command::set_temperature(&device, temperature)?;
        self.send_logged("set_temperature", Some(device_id), &write).await?;
        self.send_logged("read", Some(device_id), &read_back).await
    }

    pub async fn request_read(&self, device_id: u32) -> Result<()> {
        let device = self.find_device(device_id)?;
        let packet = command::read(&device)?;
        self.send_logged("read", Some(device_id), &packet).await
    }

    // -- Helpers --

    fn find_device(&self, device_id: u32) -> Result<Device> {
        self.device(device_id).ok_or(Error::UnknownDevice(device_id))
    }

    async fn send_logged(&self, action: &str, device: Option<u32>, packet: &Packet) -> Result<()> {
        self.shared.with_logger(|l| l.log_tx(action, device, packet));
        debug!(action, ?device, %packet, "sending command");
        let result = self.connection.send(packet).await;
        if let Err(e) = &result {
            warn!(action, ?device, error = %e, "command failed");
        }
        result
    }
}
