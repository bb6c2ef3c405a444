//! BlueZ platform adapter
//!
//! Declares the GATT application and advertisement over D-Bus through
//! `bluer`. Every GATT callback is forwarded to the dispatcher with the
//! (service, characteristic) identity it was declared with.

use std::collections::BTreeSet;
use std::sync::Arc;

use bluer::adv::Advertisement;
use bluer::gatt::WriteOp;
use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotifier, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicRead, CharacteristicReadRequest, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, ReqError, Service,
};
use camsim_gatt::platform::{BlePlatform, CharacteristicInfo, ServiceInfo};
use camsim_gatt::{BleUuid, CancellationToken, Dispatcher, Flags, GattError, PlatformError, WriteOptions};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct BluezPlatform {
    session: Option<bluer::Session>,
}

pub struct BluezPeripheral {
    adapter: bluer::Adapter,
    name: String,
    appearance: u16,
    services: Vec<(ServiceInfo, Vec<CharacteristicInfo>)>,
}

impl BluezPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&mut self) -> Result<&bluer::Session, PlatformError> {
        if self.session.is_none() {
            let session = bluer::Session::new()
                .await
                .map_err(|e| PlatformError::Unavailable(format!("cannot reach bluetoothd: {e}")))?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| PlatformError::Unavailable("no D-Bus session".to_string()))
    }
}

#[async_trait::async_trait]
impl BlePlatform for BluezPlatform {
    type Adapter = bluer::Adapter;
    type Peripheral = BluezPeripheral;

    async fn list_adapters(&mut self) -> Result<Vec<bluer::Adapter>, PlatformError> {
        let session = self.session().await?;
        let names = session
            .adapter_names()
            .await
            .map_err(|e| PlatformError::Unavailable(format!("cannot enumerate adapters: {e}")))?;

        names
            .iter()
            .map(|name| session.adapter(name).map_err(other))
            .collect()
    }

    fn adapter_name(&self, adapter: &bluer::Adapter) -> String {
        adapter.name().to_string()
    }

    async fn create_peripheral(
        &mut self,
        adapter: bluer::Adapter,
        name: &str,
        appearance: u16,
    ) -> Result<BluezPeripheral, PlatformError> {
        if !adapter.is_powered().await.map_err(other)? {
            info!("Powering on Bluetooth adapter {}", adapter.name());
            adapter.set_powered(true).await.map_err(other)?;
        }
        adapter.set_alias(name.to_string()).await.map_err(other)?;

        Ok(BluezPeripheral {
            adapter,
            name: name.to_string(),
            appearance,
            services: Vec::new(),
        })
    }

    fn add_service(&mut self, peripheral: &mut BluezPeripheral, service: &ServiceInfo) -> Result<(), PlatformError> {
        peripheral.services.push((service.clone(), Vec::new()));
        Ok(())
    }

    fn add_characteristic(
        &mut self,
        peripheral: &mut BluezPeripheral,
        characteristic: &CharacteristicInfo,
    ) -> Result<(), PlatformError> {
        let Some((_, characteristics)) = peripheral
            .services
            .iter_mut()
            .find(|(s, _)| s.id == characteristic.service_id)
        else {
            return Err(PlatformError::Other(format!(
                "characteristic {} refers to undeclared service {}",
                characteristic.uuid, characteristic.service_id
            )));
        };
        characteristics.push(characteristic.clone());
        Ok(())
    }

    async fn publish(
        &mut self,
        peripheral: BluezPeripheral,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Result<(), PlatformError> {
        let app = Application {
            services: peripheral
                .services
                .iter()
                .map(|(service, characteristics)| Service {
                    uuid: service.uuid.as_uuid(),
                    primary: service.primary,
                    characteristics: characteristics.iter().map(|c| characteristic(c, &dispatcher)).collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let _app_handle = peripheral.adapter.serve_gatt_application(app).await.map_err(other)?;
        info!("GATT application registered");

        let service_uuids: BTreeSet<_> = peripheral
            .services
            .iter()
            .filter(|(s, _)| s.advertised)
            .map(|(s, _)| s.uuid.as_uuid())
            .collect();
        let adv = Advertisement {
            service_uuids,
            discoverable: Some(true),
            local_name: Some(peripheral.name.clone()),
            appearance: Some(peripheral.appearance),
            ..Default::default()
        };
        let _adv_handle = peripheral.adapter.advertise(adv).await.map_err(other)?;
        info!("Advertisement registered");

        shutdown.cancelled().await;
        info!("Shutting down, withdrawing advertisement");
        Ok(())
    }
}

fn characteristic(info: &CharacteristicInfo, dispatcher: &Arc<Dispatcher>) -> Characteristic {
    let mut c = Characteristic {
        uuid: info.uuid.as_uuid(),
        ..Default::default()
    };

    if info.flags.contains(Flags::READ) {
        let (dispatcher, service, uuid) = (dispatcher.clone(), info.service.clone(), info.uuid.clone());
        c.read = Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |req: CharacteristicReadRequest| {
                let result = dispatcher
                    .dispatch_read(&service, &uuid)
                    .map_err(req_error)
                    .and_then(|value| from_offset(&value, req.offset));
                Box::pin(async move { result })
            }),
            ..Default::default()
        });
    }

    if info.flags.is_writable() {
        let (dispatcher, service, uuid) = (dispatcher.clone(), info.service.clone(), info.uuid.clone());
        c.write = Some(CharacteristicWrite {
            write: info.flags.contains(Flags::WRITE),
            write_without_response: info.flags.contains(Flags::WRITE_WITHOUT_RESPONSE),
            method: CharacteristicWriteMethod::Fun(Box::new(move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                let options = WriteOptions {
                    offset: req.offset,
                    mtu: req.mtu,
                    without_response: req.op_type == WriteOp::Command,
                };
                let result = dispatcher
                    .dispatch_write(&service, &uuid, &value, options)
                    .map_err(req_error);
                Box::pin(async move { result })
            })),
            ..Default::default()
        });
    }

    if info.flags.contains(Flags::NOTIFY) {
        let (dispatcher, service, uuid) = (dispatcher.clone(), info.service.clone(), info.uuid.clone());
        c.notify = Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                let (dispatcher, service, uuid) = (dispatcher.clone(), service.clone(), uuid.clone());
                Box::pin(forward_notifications(dispatcher, service, uuid, notifier))
            })),
            ..Default::default()
        });
    }

    c
}

/// Runs for as long as the client keeps notifications enabled
async fn forward_notifications(
    dispatcher: Arc<Dispatcher>,
    service: BleUuid,
    characteristic: BleUuid,
    mut notifier: CharacteristicNotifier,
) {
    let subscription = match dispatcher.subscribe(&service, &characteristic) {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot subscribe to {characteristic}: {e}");
            return;
        }
    };
    let mut receiver = subscription.receiver;

    if !subscription.initial.is_empty() {
        info!(
            "Sending {} on {characteristic}",
            String::from_utf8_lossy(&subscription.initial)
        );
        if let Err(e) = notifier.notify(subscription.initial).await {
            debug!("notification session on {characteristic} ended: {e}");
        }
    }

    while !notifier.is_stopped() {
        let value = tokio::select! {
            _ = notifier.stopped() => break,
            value = receiver.recv() => value,
        };
        match value {
            Ok(value) => {
                debug!("notifying {} bytes on {characteristic}", value.len());
                if let Err(e) = notifier.notify(value).await {
                    debug!("notification session on {characteristic} ended: {e}");
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => warn!("{characteristic}: subscriber lagged, {n} notifications dropped"),
            Err(RecvError::Closed) => break,
        }
    }

    if let Err(e) = dispatcher.set_notifying(&service, &characteristic, false) {
        warn!("{characteristic}: {e}");
    }
    info!("Notifications disabled on {characteristic}");
}

/// Long reads arrive as successive requests with a growing offset
fn from_offset(value: &[u8], offset: u16) -> Result<Vec<u8>, ReqError> {
    value
        .get(usize::from(offset)..)
        .map(<[u8]>::to_vec)
        .ok_or(ReqError::InvalidOffset)
}

fn req_error(e: GattError) -> ReqError {
    match e {
        GattError::CapabilityDenied { .. } => ReqError::NotPermitted,
        GattError::NotFound { .. } => ReqError::NotSupported,
        _ => ReqError::Failed,
    }
}

fn other(e: bluer::Error) -> PlatformError {
    PlatformError::Other(e.to_string())
}
