use crate::error::GloveError;
use crate::prelude::App;
use crate::session::{
    CharacteristicSummary, ConnectionState, Link, LinkEvent, ServiceSummary, EVENT_QUEUE_LEN,
};
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

const PROPERTY_NAMES: [(CharPropFlags, &str); 8] = [
    (CharPropFlags::BROADCAST, "broadcast"),
    (CharPropFlags::READ, "read"),
    (CharPropFlags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
    (CharPropFlags::WRITE, "write"),
    (CharPropFlags::NOTIFY, "notify"),
    (CharPropFlags::INDICATE, "indicate"),
    (CharPropFlags::AUTHENTICATED_SIGNED_WRITES, "authenticated-signed-writes"),
    (CharPropFlags::EXTENDED_PROPERTIES, "extended-properties"),
];

/// How to pick the glove out of the peripherals an adapter knows about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Name(String),
    Address(String),
}

impl Target {
    fn matches(&self, properties: &PeripheralProperties) -> bool {
        match self {
            Target::Name(wanted) => properties.local_name.as_deref() == Some(wanted.as_str()),
            Target::Address(wanted) => properties.address.to_string().eq_ignore_ascii_case(wanted),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => write!(f, "'{name}'"),
            Target::Address(address) => write!(f, "{address}"),
        }
    }
}

#[derive(Clone)]
pub struct Device {
    pub name: String,
    pub address: String,
    peripheral: Peripheral,
    adapter: Adapter,
}

async fn adapters(app: App) -> Result<Vec<Adapter>, GloveError> {
    let manager = Manager::new().await?;
    let adapter_list = manager.adapters().await?;
    if adapter_list.is_empty() {
        return Err(GloveError::NoAdapter);
    }
    if app.verbose > 0 {
        for adapter in adapter_list.iter() {
            println!("Using bluetooth adapter {}...", adapter.adapter_info().await?);
        }
    }
    Ok(adapter_list)
}

fn scan_window(app: App) -> Result<Duration, GloveError> {
    Duration::try_from_secs_f32(app.scantime)
        .map_err(|_| GloveError::InvalidScanTime(app.scantime))
}

async fn stop_scans(adapter_list: &[Adapter]) {
    for adapter in adapter_list {
        if let Err(e) = adapter.stop_scan().await {
            debug!("Stopping scan failed: {e}");
        }
    }
}

/// Lists every named peripheral seen within the scan window.
pub async fn scan(app: App, glove_name: &str) -> Result<(), GloveError> {
    let window = scan_window(app)?;
    println!("Scanning for {:.1}s...", app.scantime);

    let adapter_list = adapters(app).await?;
    for adapter in adapter_list.iter() {
        adapter.start_scan(ScanFilter::default()).await?;
    }
    time::sleep(window).await;
    stop_scans(&adapter_list).await;

    for adapter in adapter_list.iter() {
        let peripherals = adapter.peripherals().await?;
        if peripherals.is_empty() {
            eprintln!("No BLE peripheral devices found.");
            continue;
        }
        for peripheral in peripherals.iter() {
            let properties = peripheral.properties().await?;
            if app.verbose > 2 {
                dbg!(&properties);
            }
            if let Some(PeripheralProperties {
                address,
                local_name: Some(name),
                rssi,
                ..
            }) = &properties
            {
                let marker = if name == glove_name { "  <- glove" } else { "" };
                let rssi = rssi.map(|r| format!("{r} dBm")).unwrap_or_default();
                println!("  - {name:<24} {address}  {rssi}{marker}");
            }
        }
    }
    Ok(())
}

async fn find_on(adapter: &Adapter, target: &Target) -> Result<Option<Device>, GloveError> {
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        if target.matches(&properties) {
            return Ok(Some(Device {
                name: properties.local_name.unwrap_or_default(),
                address: properties.address.to_string(),
                peripheral,
                adapter: adapter.clone(),
            }));
        }
    }
    Ok(None)
}

/// Finds the glove, scanning for at most `app.scantime` seconds.
///
/// An address target that the adapter already knows (paired or cached) is
/// returned without scanning.
pub async fn find_peripheral(app: App, target: &Target) -> Result<Device, GloveError> {
    let window = scan_window(app)?;
    debug!("Session {}", ConnectionState::Scanning);
    let adapter_list = adapters(app).await?;

    if let Target::Address(_) = target {
        for adapter in adapter_list.iter() {
            if let Some(device) = find_on(adapter, target).await? {
                println!("Found known device {} @ {}", device.name, device.address);
                return Ok(device);
            }
        }
    }

    println!("Scanning for {target} for {:.1}s...", app.scantime);
    for adapter in adapter_list.iter() {
        adapter.start_scan(ScanFilter::default()).await?;
    }

    let deadline = time::Instant::now() + window;
    let mut found = None;
    'search: while time::Instant::now() < deadline {
        time::sleep(Duration::from_millis(100)).await;
        for adapter in adapter_list.iter() {
            if let Some(device) = find_on(adapter, target).await? {
                found = Some(device);
                break 'search;
            }
        }
    }

    stop_scans(&adapter_list).await;

    match found {
        Some(device) => {
            println!("Found target: {} @ {}", device.name, device.address);
            Ok(device)
        }
        None => {
            debug!("Session {}", ConnectionState::Failed);
            Err(GloveError::DeviceNotFound(target.to_string()))
        }
    }
}

/// A connected glove, delivering its notifications and disconnects as [`LinkEvent`]s.
pub struct BtleLink {
    peripheral: Peripheral,
    forwarders: Vec<JoinHandle<()>>,
}

impl BtleLink {
    pub async fn connect(
        device: Device,
        characteristic: Uuid,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<LinkEvent>), GloveError> {
        println!("Connecting...");
        match time::timeout(timeout, device.peripheral.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("Session {}", ConnectionState::Failed);
                return Err(GloveError::ConnectTimeout(timeout));
            }
        }
        let connected = device.peripheral.is_connected().await.unwrap_or(false);
        println!("Connected: {connected}");
        debug!("Session {}", ConnectionState::Connected);

        if let Err(e) = device.peripheral.discover_services().await {
            warn!("Service discovery failed: {e}");
        }

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let mut forwarders = Vec::with_capacity(2);

        let notifications = device.peripheral.notifications().await?;
        forwarders.push(tokio::spawn(forward_notifications(
            notifications,
            characteristic,
            tx.clone(),
        )));

        match device.adapter.events().await {
            Ok(events) => {
                let id = device.peripheral.id();
                forwarders.push(tokio::spawn(watch_disconnect(events, id, tx)));
            }
            Err(e) => warn!("Could not watch adapter events: {e}"),
        }

        Ok((
            Self {
                peripheral: device.peripheral,
                forwarders,
            },
            rx,
        ))
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    /// Reads the characteristic's current value.
    pub async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, GloveError> {
        let Some(chr) = self.characteristic(uuid) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Characteristic {uuid} not found"),
            )
            .into());
        };
        Ok(self.peripheral.read(&chr).await?)
    }
}

/// Passes on the characteristic's notifications, waiting whenever the session
/// falls behind. A finished stream counts as a disconnect.
async fn forward_notifications<S>(
    mut notifications: S,
    characteristic: Uuid,
    tx: mpsc::Sender<LinkEvent>,
) where
    S: Stream<Item = ValueNotification> + Unpin,
{
    while let Some(notification) = notifications.next().await {
        if notification.uuid != characteristic {
            debug!("Ignoring notification from {}", notification.uuid);
            continue;
        }
        if tx.send(LinkEvent::Notification(notification.value)).await.is_err() {
            debug!("Session gone, dropping notifications");
            return;
        }
    }
    info!("Notification stream ended");
    if let Err(e) = tx.send(LinkEvent::Disconnected).await {
        debug!("Could not report end of notifications: {e}");
    }
}

async fn watch_disconnect<S>(mut events: S, id: PeripheralId, tx: mpsc::Sender<LinkEvent>)
where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event {
            if gone == id {
                info!("Device {gone:?} disconnected");
                if let Err(e) = tx.send(LinkEvent::Disconnected).await {
                    debug!("Could not report disconnect: {e}");
                }
                return;
            }
        }
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

impl Link for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn services(&self) -> Vec<ServiceSummary> {
        self.peripheral
            .services()
            .into_iter()
            .map(|service| ServiceSummary {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|chr| CharacteristicSummary {
                        uuid: chr.uuid,
                        properties: property_names(chr.properties),
                    })
                    .collect(),
            })
            .collect()
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<(), GloveError> {
        let chr = self.characteristic(uuid).ok_or_else(|| {
            GloveError::SubscribeFailure(format!("characteristic {uuid} not found"))
        })?;
        self.peripheral
            .subscribe(&chr)
            .await
            .map_err(|e| GloveError::SubscribeFailure(e.to_string()))
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), GloveError> {
        let chr = self.characteristic(uuid).ok_or_else(|| {
            GloveError::UnsubscribeFailure(format!("characteristic {uuid} not found"))
        })?;
        self.peripheral
            .unsubscribe(&chr)
            .await
            .map_err(|e| GloveError::UnsubscribeFailure(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), GloveError> {
        Ok(self.peripheral.disconnect().await?)
    }
}

fn property_names(flags: CharPropFlags) -> Vec<&'static str> {
    PROPERTY_NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::BDAddr;

    fn properties(name: Option<&str>, address: [u8; 6]) -> PeripheralProperties {
        PeripheralProperties {
            address: BDAddr::from(address),
            local_name: name.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_by_name() {
        let target = Target::Name("ASL Glove Testing".into());
        assert!(target.matches(&properties(Some("ASL Glove Testing"), [0; 6])));
        assert!(!target.matches(&properties(Some("ASL Glove"), [0; 6])));
        assert!(!target.matches(&properties(None, [0; 6])));
    }

    #[test]
    fn test_target_by_address_ignores_case() {
        let target = Target::Address("e4:7c:2a:9b:51:0d".into());
        let glove = properties(None, [0xe4, 0x7c, 0x2a, 0x9b, 0x51, 0x0d]);
        assert!(target.matches(&glove));
        assert!(!target.matches(&properties(None, [0xe4, 0x7c, 0x2a, 0x9b, 0x51, 0x0e])));
    }

    #[test]
    fn test_property_names() {
        assert_eq!(
            property_names(CharPropFlags::READ | CharPropFlags::NOTIFY),
            ["read", "notify"]
        );
        assert!(property_names(CharPropFlags::empty()).is_empty());
    }

    #[test]
    fn test_scan_window() {
        let app = |scantime| App {
            verbose: 0,
            scantime,
        };
        assert_eq!(scan_window(app(3.0)).unwrap(), Duration::from_secs(3));
        assert_eq!(scan_window(app(0.0)).unwrap(), Duration::ZERO);
        for bad in [-1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                scan_window(app(bad)),
                Err(GloveError::InvalidScanTime(_))
            ));
        }
    }

    #[test]
    fn test_not_found_message() {
        let target = Target::Name("ASL Glove Testing".into());
        assert_eq!(
            GloveError::DeviceNotFound(target.to_string()).to_string(),
            "Device 'ASL Glove Testing' not found"
        );
        let target = Target::Address("E4:7C:2A:9B:51:0D".into());
        assert_eq!(
            GloveError::DeviceNotFound(target.to_string()).to_string(),
            "Device E4:7C:2A:9B:51:0D not found"
        );
    }

    #[tokio::test]
    async fn test_forwarder_waits_for_slow_session() {
        let wanted = Uuid::from_u128(1);
        let mut notifications: Vec<ValueNotification> = (0..5u8)
            .map(|i| ValueNotification {
                uuid: wanted,
                value: vec![i],
            })
            .collect();
        notifications.insert(
            2,
            ValueNotification {
                uuid: Uuid::from_u128(2),
                value: vec![0xff],
            },
        );

        let (tx, mut rx) = mpsc::channel(2);
        let task = tokio::spawn(forward_notifications(
            futures::stream::iter(notifications),
            wanted,
            tx,
        ));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // Two queued, the third send is parked until something is received.
        assert!(!task.is_finished());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let mut expected: Vec<LinkEvent> =
            (0..5u8).map(|i| LinkEvent::Notification(vec![i])).collect();
        expected.push(LinkEvent::Disconnected);
        assert_eq!(events, expected);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_session_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let endless = futures::stream::repeat(ValueNotification {
            uuid: Uuid::from_u128(1),
            value: vec![0],
        });
        forward_notifications(endless, Uuid::from_u128(1), tx).await;
    }
}
