//! Peripheral lifecycle: Idle -> Registered -> Advertising
//!
//! Transitions only move forward. `build_topology` acquires the first
//! adapter, validates and registers every service and characteristic, and
//! declares them to the platform. `publish` hands control to the platform's
//! event loop for the rest of the process, or until the cancellation token
//! fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::platform::{BlePlatform, CharacteristicInfo, ServiceInfo};
use crate::{CommandSink, Dispatcher, GattError, PlatformError, Registry, ServiceDef, policy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Registered,
    Advertising,
}

/// What the peripheral advertises itself as
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String,
    pub appearance: u16,
}

pub struct Peripheral<P: BlePlatform> {
    platform: P,
    identity: DeviceIdentity,
    sink: Arc<dyn CommandSink>,
    handle: Option<P::Peripheral>,
    dispatcher: Option<Arc<Dispatcher>>,
    state: LifecycleState,
}

impl<P: BlePlatform> Peripheral<P> {
    pub fn new(platform: P, identity: DeviceIdentity, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            platform,
            identity,
            sink,
            handle: None,
            dispatcher: None,
            state: LifecycleState::Idle,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Available once registered
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.clone()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Idle -> Registered. Any error leaves the peripheral Idle and is fatal
    /// for startup.
    pub async fn build_topology(&mut self, services: Vec<ServiceDef>) -> Result<(), GattError> {
        if self.state != LifecycleState::Idle {
            return Err(GattError::InvalidTransition {
                action: "build topology",
                state: self.state,
            });
        }

        let registry = build_registry(services)?;

        let adapters = self.platform.list_adapters().await.map_err(adapter_error)?;
        for adapter in &adapters {
            info!("found BLE adapter {}", self.platform.adapter_name(adapter));
        }
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(GattError::AdapterUnavailable("no BLE adapter present".to_string()));
        };
        info!("using BLE adapter {}", self.platform.adapter_name(&adapter));

        let mut handle = self
            .platform
            .create_peripheral(adapter, &self.identity.name, self.identity.appearance)
            .await
            .map_err(adapter_error)?;

        for (service_id, service) in (1u16..).zip(registry.services()) {
            self.platform.add_service(
                &mut handle,
                &ServiceInfo {
                    id: service_id,
                    uuid: service.uuid.clone(),
                    primary: service.primary,
                    advertised: service.advertised,
                },
            )?;

            for (id, uuid) in (1u16..).zip(&service.characteristics) {
                let info = {
                    let c = registry.lookup(&service.uuid, uuid)?;
                    let c = c.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    CharacteristicInfo {
                        service_id,
                        id,
                        service: c.service().clone(),
                        uuid: c.uuid().clone(),
                        value: c.value().to_vec(),
                        notifying: c.notifying(),
                        flags: c.flags(),
                    }
                };
                self.platform.add_characteristic(&mut handle, &info)?;
            }
        }

        info!(
            "GATT application registered: {} services, {} characteristics",
            registry.services().len(),
            registry.len()
        );

        self.dispatcher = Some(Arc::new(Dispatcher::new(registry, self.sink.clone())));
        self.handle = Some(handle);
        self.state = LifecycleState::Registered;
        Ok(())
    }

    /// Registered -> Advertising. Returns when the platform's event loop
    /// ends, which normally only happens through `shutdown`.
    pub async fn publish(&mut self, shutdown: CancellationToken) -> Result<(), GattError> {
        let (Some(handle), Some(dispatcher)) = (self.handle.take(), self.dispatcher.clone()) else {
            return Err(GattError::InvalidTransition {
                action: "publish",
                state: self.state,
            });
        };

        self.state = LifecycleState::Advertising;
        info!("Advertising as {}", self.identity.name);
        self.platform.publish(handle, dispatcher, shutdown).await?;
        info!("publish loop finished");
        Ok(())
    }
}

/// Validate the whole topology and build the registry, all or nothing
fn build_registry(services: Vec<ServiceDef>) -> Result<Registry, GattError> {
    let advertised = services.iter().filter(|s| s.advertised).count();
    if advertised != 1 {
        return Err(GattError::InvalidTopology(format!(
            "expected exactly one advertisement service, found {advertised}"
        )));
    }

    let mut registry = Registry::new();
    for service in services {
        if service.advertised && !service.primary {
            return Err(GattError::InvalidTopology(format!(
                "advertisement service {} must be primary",
                service.uuid
            )));
        }

        registry.add_service(service.uuid.clone(), service.primary, service.advertised)?;
        for characteristic in service.characteristics {
            policy::validate_wiring(&characteristic)?;
            registry.register(&service.uuid, characteristic)?;
        }
    }
    Ok(registry)
}

fn adapter_error(e: PlatformError) -> GattError {
    match e {
        PlatformError::Unavailable(msg) => GattError::AdapterUnavailable(msg),
        other => GattError::Platform(other),
    }
}
