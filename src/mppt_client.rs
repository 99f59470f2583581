use anyhow::anyhow;
use bluest::btuuid::bluetooth_uuid_from_u16;
use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::StreamExt;
use log::{error, info, trace, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::poller::{Event, LinkState, Poller, RequestWriter};

/// Connection to a charge controller over its BLE serial service.
///
/// The controller exposes a single characteristic that is both written with requests
/// and notifies with responses.
pub struct MpptClient {
    adapter: Adapter,
    device: Device,
    characteristic: Characteristic,
    config: Config,
}

impl MpptClient {
    const MODBUS_SERVICE_UUID: u16 = 0xffe0;
    const MODBUS_CHARACTERISTIC_UUID: u16 = 0xffe1;
    const EVENT_QUEUE_LEN: usize = 32;

    /// Disconnect from the controller
    pub async fn stop(self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    /// Create a new `MpptClient`, which includes attempting to discover the device.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let adapter = bluest::Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        let device = timeout(
            config.discovery_timeout,
            Self::discover_device(config.device_name.as_deref(), &adapter),
        )
        .await
        .map_err(|_| anyhow!("Device not found"))??;

        adapter.connect_device(&device.device).await?;
        info!("Connected to {}", device.device.name_async().await.unwrap_or_default());

        let service = device
            .device
            .discover_services_with_uuid(Self::modbus_service_id())
            .await?
            .first()
            .ok_or(anyhow!("No notify service found at device, not a compatible MPPT..?"))?
            .clone();
        let characteristic = service
            .discover_characteristics_with_uuid(Self::modbus_characteristic_id())
            .await?
            .first()
            .ok_or_else(|| {
                error!("Modbus characteristic not found");
                anyhow!("The specified device does not support the modbus characteristic.")
            })?
            .clone();
        trace!("Found modbus characteristic");

        Ok(Self { adapter: adapter.clone(), device: device.device, characteristic, config })
    }

    /// Poll the controller until `shutdown` completes.
    ///
    /// Ticks are produced for the whole call, whatever the link is doing, so the poller
    /// keeps counting missed responses while the link is down. A lost link is reconnected
    /// and resubscribed on the next poll interval; failures are only logged.
    pub async fn run(&self, poller: Poller, shutdown: impl Future<Output = ()>) -> Poller {
        let (tx, rx) = mpsc::channel(Self::EVENT_QUEUE_LEN);
        let period = self.config.poll_interval;

        let producers = async move {
            tokio::select! {
                _ = shutdown => info!("Shutting down"),
                _ = Self::tick(tx.clone(), period) => {}
                _ = self.supervise(tx.clone()) => {}
            }
        };

        let writer = BleWriter { characteristic: self.characteristic.clone() };
        let ((), poller) = tokio::join!(producers, poller.run(rx, writer));
        poller
    }

    async fn tick(tx: mpsc::Sender<Event>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(Event::Tick).await.is_err() {
                return;
            }
        }
    }

    /// Keep the link up and forward notifications, retrying after every failure.
    async fn supervise(&self, tx: mpsc::Sender<Event>) {
        loop {
            match self.try_connect().await {
                Ok(()) => {
                    if let Err(err) = self.forward_notifications(&tx).await {
                        warn!("Notification subscription failed: {err}");
                    }
                }
                Err(err) => warn!("Reconnect failed: {err}"),
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Subscribe and forward notifications until the stream ends.
    async fn forward_notifications(&self, tx: &mpsc::Sender<Event>) -> anyhow::Result<()> {
        tx.send(Event::Link(LinkState::Connected)).await?;

        let mut notifications = match self.characteristic.notify().await {
            Ok(notifications) => notifications,
            Err(err) => {
                tx.send(Event::Link(LinkState::Disconnected)).await?;
                return Err(err.into());
            }
        };
        trace!("Registered for notify");
        tx.send(Event::Link(LinkState::Ready)).await?;

        while let Some(read_result) = notifications.next().await {
            match read_result {
                Ok(data) => tx.send(Event::Notification(data)).await?,
                Err(err) => {
                    warn!("Notification error: {err}");
                    break;
                }
            }
        }
        info!("End of notification stream");
        tx.send(Event::Link(LinkState::Disconnected)).await?;
        Ok(())
    }

    async fn discover_device(name: Option<&str>, adapter: &Adapter) -> anyhow::Result<AdvertisingDevice> {
        let required_services = [Self::modbus_service_id()];
        let mut adapter_events = adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            let device_name = device.device.name_async().await?;
            match name {
                Some(name) if device_name != name => {
                    trace!("Skipping {device_name}");
                }
                _ => return Ok(device),
            }
        }

        Err(anyhow!("Device not found"))
    }

    fn modbus_service_id() -> Uuid {
        bluetooth_uuid_from_u16(Self::MODBUS_SERVICE_UUID)
    }

    fn modbus_characteristic_id() -> Uuid {
        bluetooth_uuid_from_u16(Self::MODBUS_CHARACTERISTIC_UUID)
    }

    /// Reconnect if the link dropped, retrying a couple of times
    async fn try_connect(&self) -> anyhow::Result<()> {
        if !self.device.is_connected().await {
            let mut retries = 2;
            loop {
                match self.adapter.connect_device(&self.device).await {
                    Ok(()) => return Ok(()),
                    Err(err) if retries > 0 => {
                        warn!("Failed to connect: {err}");
                        retries -= 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }
}

/// Fire-and-forget writes to the modbus characteristic
struct BleWriter {
    characteristic: Characteristic,
}

impl RequestWriter for BleWriter {
    fn submit(&mut self, request: &[u8]) -> anyhow::Result<()> {
        let characteristic = self.characteristic.clone();
        let request = request.to_vec();
        tokio::spawn(async move {
            if let Err(err) = characteristic.write(&request).await {
                warn!("Characteristic write failed: {err}");
            }
        });
        Ok(())
    }
}

#[test]
fn test_uuids_expand_onto_bluetooth_base() {
    assert_eq!(
        MpptClient::modbus_service_id().to_string(),
        "0000ffe0-0000-1000-8000-00805f9b34fb"
    );
    assert_eq!(
        MpptClient::modbus_characteristic_id().to_string(),
        "0000ffe1-0000-1000-8000-00805f9b34fb"
    );
}
