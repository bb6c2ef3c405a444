//! BLE central side: find the simulator and talk GATT to it

use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::matches_target;

/// A device seen during a scan
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_camera: bool,
}

pub async fn get_adapter() -> Result<Adapter, Box<dyn std::error::Error>> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or_else(|| "No Bluetooth adapter found".into())
}

pub async fn scan(adapter: &Adapter, duration_secs: u64) -> Result<Vec<Device>, Box<dyn std::error::Error>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            devices.push(Device {
                is_camera: crate::is_camera(&name),
                name,
                address: peripheral.address().to_string(),
                rssi: props.rssi,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Scan until a matching device shows up, then connect and discover services
pub async fn connect(adapter: &Adapter, target: Option<&str>) -> Result<Peripheral, Box<dyn std::error::Error>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut found = None;
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let address = peripheral.address().to_string();
            if matches_target(&name, &address, target) {
                println!("Found device: {name} ({address})");
                found = Some(peripheral);
                break;
            }
        }
    }
    adapter.stop_scan().await?;

    let device = found.ok_or("No camera found")?;
    device.connect().await?;
    device.discover_services().await?;
    debug!("discovered {} characteristics", device.characteristics().len());
    Ok(device)
}

fn find_characteristic(
    device: &Peripheral,
    service: Option<Uuid>,
    characteristic: Uuid,
) -> Result<Characteristic, Box<dyn std::error::Error>> {
    device
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic && service.is_none_or(|s| c.service_uuid == s))
        .ok_or_else(|| format!("characteristic {characteristic} not found").into())
}

pub async fn send(
    device: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
    command: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let c = find_characteristic(device, Some(service), characteristic)?;
    device.write(&c, command.as_bytes(), WriteType::WithResponse).await?;
    Ok(())
}

pub async fn read(device: &Peripheral, characteristic: Uuid) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let c = find_characteristic(device, None, characteristic)?;
    Ok(device.read(&c).await?)
}

/// Subscribe and hand each notification to `on_value`; stops after `count` values if given
pub async fn listen(
    device: &Peripheral,
    characteristic: Uuid,
    count: Option<usize>,
    mut on_value: impl FnMut(&[u8]),
) -> Result<(), Box<dyn std::error::Error>> {
    let c = find_characteristic(device, None, characteristic)?;
    let mut notifications = device.notifications().await?;
    device.subscribe(&c).await?;

    let mut received = 0;
    while let Some(n) = notifications.next().await {
        if n.uuid != characteristic {
            continue;
        }
        on_value(&n.value);
        received += 1;
        if count.is_some_and(|limit| received >= limit) {
            break;
        }
    }

    device.unsubscribe(&c).await?;
    Ok(())
}
