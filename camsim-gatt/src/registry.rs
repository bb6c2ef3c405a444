//! Characteristic registry
//!
//! Holds services in declaration order and every characteristic keyed by its
//! (service UUID, characteristic UUID) pair. The topology is static once the
//! peripheral is registered, so there is no removal.
//!
//! Each characteristic sits behind its own mutex: operations on the same
//! characteristic are serialised, different characteristics never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::{BleUuid, CharacteristicDef, Flags, GattError, Handler};

/// Pending notifications buffered per subscriber before it starts lagging
const NOTIFY_CHANNEL_CAPACITY: usize = 16;

/// Registered characteristic and its current state
#[derive(Debug)]
pub struct Characteristic {
    service: BleUuid,
    uuid: BleUuid,
    flags: Flags,
    value: Vec<u8>,
    notifying: bool,
    handler: Handler,
    subscribers: Option<broadcast::Sender<Vec<u8>>>,
}

impl Characteristic {
    pub fn from_def(service: BleUuid, def: CharacteristicDef) -> Self {
        let notify = def.flags.contains(Flags::NOTIFY);
        Self {
            service,
            uuid: def.uuid,
            flags: def.flags,
            value: def.value,
            notifying: notify,
            handler: def.handler,
            subscribers: notify.then(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0),
        }
    }

    pub fn service(&self) -> &BleUuid {
        &self.service
    }

    pub fn uuid(&self) -> &BleUuid {
        &self.uuid
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn notifying(&self) -> bool {
        self.notifying
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        self.value = value;
    }

    pub(crate) fn set_notifying(&mut self, notifying: bool) {
        self.notifying = notifying;
    }

    pub(crate) fn subscribers(&self) -> Option<&broadcast::Sender<Vec<u8>>> {
        self.subscribers.as_ref()
    }
}

pub type CharacteristicRef = Arc<Mutex<Characteristic>>;

/// Registered service; characteristics are listed in declaration order
#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: BleUuid,
    pub primary: bool,
    pub advertised: bool,
    pub characteristics: Vec<BleUuid>,
}

#[derive(Debug, Default)]
pub struct Registry {
    services: Vec<Service>,
    characteristics: HashMap<(BleUuid, BleUuid), CharacteristicRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, uuid: BleUuid, primary: bool, advertised: bool) -> Result<(), GattError> {
        if self.service(&uuid).is_some() {
            return Err(GattError::DuplicateIdentifier(format!("service {uuid}")));
        }

        self.services.push(Service {
            uuid,
            primary,
            advertised,
            characteristics: Vec::new(),
        });
        Ok(())
    }

    /// Fails with `DuplicateIdentifier` if the pair is already present; the
    /// registry is left untouched on any failure.
    pub fn register(&mut self, service: &BleUuid, def: CharacteristicDef) -> Result<CharacteristicRef, GattError> {
        let Some(index) = self.services.iter().position(|s| &s.uuid == service) else {
            return Err(GattError::ServiceNotFound(service.clone()));
        };

        let key = (self.services[index].uuid.clone(), def.uuid.clone());
        if self.characteristics.contains_key(&key) {
            return Err(GattError::DuplicateIdentifier(format!(
                "characteristic {} in service {}",
                key.1, key.0
            )));
        }

        let characteristic = Arc::new(Mutex::new(Characteristic::from_def(key.0.clone(), def)));
        self.services[index].characteristics.push(key.1.clone());
        self.characteristics.insert(key, characteristic.clone());
        Ok(characteristic)
    }

    pub fn lookup(&self, service: &BleUuid, characteristic: &BleUuid) -> Result<&CharacteristicRef, GattError> {
        self.characteristics
            .get(&(service.clone(), characteristic.clone()))
            .ok_or_else(|| GattError::NotFound {
                service: service.clone(),
                characteristic: characteristic.clone(),
            })
    }

    pub fn service(&self, uuid: &BleUuid) -> Option<&Service> {
        self.services.iter().find(|s| &s.uuid == uuid)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Number of registered characteristics
    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::{BleUuid, CharacteristicDef, Flags, GattError};

    fn uuid(s: &str) -> BleUuid {
        BleUuid::parse(s).unwrap()
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_service(uuid("FFE0"), true, false).unwrap();
        registry
    }

    #[test]
    fn lookup_finds_registered_pair() {
        let mut registry = registry();
        registry
            .register(&uuid("FFE0"), CharacteristicDef::new(uuid("FFEB"), Flags::NOTIFY).value(b"m".to_vec()))
            .unwrap();

        let c = registry.lookup(&uuid("0000ffe0-0000-1000-8000-00805f9b34fb"), &uuid("ffeb")).unwrap();
        let c = c.lock().unwrap();
        assert_eq!(c.value(), b"m");
        assert!(c.notifying());
        assert_eq!(c.service().to_string(), "FFE0");
    }

    #[test]
    fn unknown_pair_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.lookup(&uuid("FFE0"), &uuid("0000")),
            Err(GattError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_pair_is_rejected_atomically() {
        let mut registry = registry();
        registry
            .register(&uuid("FFE0"), CharacteristicDef::new(uuid("FFF3"), Flags::NOTIFY).value(b"first".to_vec()))
            .unwrap();

        let err = registry
            .register(&uuid("FFE0"), CharacteristicDef::new(uuid("fff3"), Flags::NOTIFY).value(b"second".to_vec()))
            .unwrap_err();
        assert!(matches!(err, GattError::DuplicateIdentifier(_)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.services()[0].characteristics.len(), 1);
        let c = registry.lookup(&uuid("FFE0"), &uuid("FFF3")).unwrap();
        assert_eq!(c.lock().unwrap().value(), b"first");
    }

    #[test]
    fn same_characteristic_uuid_in_two_services_is_allowed() {
        let mut registry = registry();
        registry.add_service(uuid("FFE5"), true, false).unwrap();
        registry.register(&uuid("FFE0"), CharacteristicDef::new(uuid("FFF3"), Flags::NOTIFY)).unwrap();
        registry.register(&uuid("FFE5"), CharacteristicDef::new(uuid("FFF3"), Flags::NOTIFY)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let mut registry = registry();
        assert!(matches!(
            registry.add_service(uuid("ffe0"), true, false),
            Err(GattError::DuplicateIdentifier(_))
        ));
        assert_eq!(registry.services().len(), 1);
    }

    #[test]
    fn register_into_unknown_service_fails() {
        let mut registry = registry();
        assert!(matches!(
            registry.register(&uuid("FFFF"), CharacteristicDef::new(uuid("FFF3"), Flags::NOTIFY)),
            Err(GattError::ServiceNotFound(_))
        ));
        assert!(registry.is_empty());
    }
}
