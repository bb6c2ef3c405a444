//! Platform BLE adapter abstraction
//!
//! The radio, link layer and Bluetooth daemon live behind this trait. The
//! core only enumerates adapters, declares the GATT table, and hands over a
//! [`Dispatcher`] when publishing; the adapter calls back into it for every
//! read, write and subscription, keyed by (service, characteristic) identity.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{BleUuid, Dispatcher, Flags, PlatformError};

/// Service declaration passed to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: u16,
    pub uuid: BleUuid,
    pub primary: bool,
    /// Carried in the advertisement payload
    pub advertised: bool,
}

/// Characteristic declaration passed to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service_id: u16,
    pub id: u16,
    pub service: BleUuid,
    pub uuid: BleUuid,
    pub value: Vec<u8>,
    pub notifying: bool,
    pub flags: Flags,
}

#[async_trait::async_trait]
pub trait BlePlatform: Send {
    type Adapter: Send;
    type Peripheral: Send;

    /// Local BLE radios; the lifecycle manager uses the first one
    async fn list_adapters(&mut self) -> Result<Vec<Self::Adapter>, PlatformError>;

    /// Human readable adapter name, for logs
    fn adapter_name(&self, adapter: &Self::Adapter) -> String;

    async fn create_peripheral(
        &mut self,
        adapter: Self::Adapter,
        name: &str,
        appearance: u16,
    ) -> Result<Self::Peripheral, PlatformError>;

    fn add_service(&mut self, peripheral: &mut Self::Peripheral, service: &ServiceInfo) -> Result<(), PlatformError>;

    fn add_characteristic(
        &mut self,
        peripheral: &mut Self::Peripheral,
        characteristic: &CharacteristicInfo,
    ) -> Result<(), PlatformError>;

    /// Start advertising and serve GATT requests until `shutdown` is cancelled
    async fn publish(
        &mut self,
        peripheral: Self::Peripheral,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Result<(), PlatformError>;
}
