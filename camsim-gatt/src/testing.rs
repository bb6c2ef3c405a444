//! In-memory platform adapter
//!
//! Records every call the lifecycle manager makes and, once published,
//! replays scripted client events against the dispatcher the way a radio
//! would deliver them. Publishing then waits for the shutdown token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::platform::{BlePlatform, CharacteristicInfo, ServiceInfo};
use crate::{BleUuid, Dispatcher, PlatformError, WriteOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ListAdapters,
    CreatePeripheral {
        adapter: String,
        name: String,
        appearance: u16,
    },
    AddService(ServiceInfo),
    AddCharacteristic(CharacteristicInfo),
    Publish,
}

/// Client operation delivered after publish
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Write {
        service: BleUuid,
        characteristic: BleUuid,
        value: Vec<u8>,
        options: WriteOptions,
    },
    Read {
        service: BleUuid,
        characteristic: BleUuid,
    },
}

impl ClientEvent {
    pub fn write(service: BleUuid, characteristic: BleUuid, value: &[u8]) -> Self {
        Self::Write {
            service,
            characteristic,
            value: value.to_vec(),
            options: WriteOptions::default(),
        }
    }

    pub fn read(service: BleUuid, characteristic: BleUuid) -> Self {
        Self::Read { service, characteristic }
    }
}

/// Outcome of one client event; writes yield an empty byte vector on success
pub type EventResult = Result<Vec<u8>, String>;

#[derive(Debug, Default)]
pub struct LoopbackPlatform {
    adapters: Vec<String>,
    unavailable: Option<String>,
    events: Vec<ClientEvent>,
    calls: Vec<PlatformCall>,
    results: Vec<EventResult>,
}

#[derive(Debug)]
pub struct LoopbackPeripheral {
    pub adapter: String,
    pub services: Vec<ServiceInfo>,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl LoopbackPlatform {
    pub fn new(adapters: &[&str]) -> Self {
        Self {
            adapters: adapters.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    /// A platform whose Bluetooth stack cannot be reached at all
    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn with_events(mut self, events: Vec<ClientEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.clone()
    }

    pub fn results(&self) -> Vec<EventResult> {
        self.results.clone()
    }
}

#[async_trait::async_trait]
impl BlePlatform for LoopbackPlatform {
    type Adapter = String;
    type Peripheral = LoopbackPeripheral;

    async fn list_adapters(&mut self) -> Result<Vec<String>, PlatformError> {
        if let Some(reason) = &self.unavailable {
            return Err(PlatformError::Unavailable(reason.clone()));
        }
        self.calls.push(PlatformCall::ListAdapters);
        Ok(self.adapters.clone())
    }

    fn adapter_name(&self, adapter: &String) -> String {
        adapter.clone()
    }

    async fn create_peripheral(
        &mut self,
        adapter: String,
        name: &str,
        appearance: u16,
    ) -> Result<LoopbackPeripheral, PlatformError> {
        self.calls.push(PlatformCall::CreatePeripheral {
            adapter: adapter.clone(),
            name: name.to_string(),
            appearance,
        });
        Ok(LoopbackPeripheral {
            adapter,
            services: Vec::new(),
            characteristics: Vec::new(),
        })
    }

    fn add_service(&mut self, peripheral: &mut LoopbackPeripheral, service: &ServiceInfo) -> Result<(), PlatformError> {
        self.calls.push(PlatformCall::AddService(service.clone()));
        peripheral.services.push(service.clone());
        Ok(())
    }

    fn add_characteristic(
        &mut self,
        peripheral: &mut LoopbackPeripheral,
        characteristic: &CharacteristicInfo,
    ) -> Result<(), PlatformError> {
        if !peripheral.services.iter().any(|s| s.id == characteristic.service_id) {
            return Err(PlatformError::Other(format!(
                "service {} not declared",
                characteristic.service_id
            )));
        }
        self.calls.push(PlatformCall::AddCharacteristic(characteristic.clone()));
        peripheral.characteristics.push(characteristic.clone());
        Ok(())
    }

    async fn publish(
        &mut self,
        _peripheral: LoopbackPeripheral,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Result<(), PlatformError> {
        self.calls.push(PlatformCall::Publish);

        for event in std::mem::take(&mut self.events) {
            let result = match event {
                ClientEvent::Write {
                    service,
                    characteristic,
                    value,
                    options,
                } => dispatcher
                    .dispatch_write(&service, &characteristic, &value, options)
                    .map(|()| Vec::new()),
                ClientEvent::Read { service, characteristic } => dispatcher.dispatch_read(&service, &characteristic),
            };
            self.results.push(result.map_err(|e| e.to_string()));
        }

        shutdown.cancelled().await;
        Ok(())
    }
}
