//! Command dispatcher
//!
//! Routes inbound GATT operations from the platform adapter to the handler
//! registered for the (service, characteristic) pair. Nothing escapes this
//! boundary: unknown targets, denied operations, handler errors and handler
//! panics all come back as a [`GattError`] after being logged, and the caller
//! drops the event.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::policy::{self, Access};
use crate::registry::{Characteristic, CharacteristicRef, Registry};
use crate::{BleUuid, CommandRecord, CommandSink, GattError, HandlerError, WriteCommand, WriteOptions};

/// Live notification feed handed to the platform adapter
#[derive(Debug)]
pub struct Subscription {
    /// Value at subscription time
    pub initial: Vec<u8>,
    pub receiver: broadcast::Receiver<Vec<u8>>,
}

pub struct Dispatcher {
    registry: Registry,
    sink: Arc<dyn CommandSink>,
}

impl Dispatcher {
    pub fn new(registry: Registry, sink: Arc<dyn CommandSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle a write from a client.
    ///
    /// On success the payload becomes the characteristic's value, and exactly
    /// one command record has been appended to the sink when this returns.
    pub fn dispatch_write(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
        raw: &[u8],
        options: WriteOptions,
    ) -> Result<(), GattError> {
        let result = self.write(service, characteristic, raw, options);
        if let Err(e) = &result {
            log_dropped("write", e);
        }
        result
    }

    fn write(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
        raw: &[u8],
        options: WriteOptions,
    ) -> Result<(), GattError> {
        let command = decode(raw, service, characteristic);
        let slot = self.registry.lookup(service, characteristic)?;

        let outcome = {
            let mut c = lock(slot);
            policy::check(&c, Access::Write)?;
            let handler = c
                .handler()
                .write()
                .cloned()
                .ok_or_else(|| missing_handler(c.uuid(), "write"))?;

            info!(
                "Received command: {command} on Service UUID: {}, Characteristic UUID: {}",
                c.service(),
                c.uuid()
            );

            let outcome = guarded(c.uuid(), || {
                handler(&WriteCommand {
                    service: c.service(),
                    characteristic: c.uuid(),
                    command: &command,
                    raw,
                    options,
                })
            });

            // appended under the characteristic lock, so records of one
            // characteristic land in the order the writes were applied
            let record = CommandRecord::new(c.service().clone(), c.uuid().clone(), command.into_owned(), raw);
            let appended = self.sink.append(&record);

            // a write is committed only once it is both handled and recorded
            let outcome = match (outcome, appended) {
                (Ok(outcome), Ok(())) => outcome,
                (Err(e), Ok(())) => return Err(e),
                (Err(e), Err(sink)) => {
                    error!("command record for {} lost: {sink}", c.uuid());
                    return Err(e);
                }
                (Ok(outcome), Err(sink)) => {
                    if !outcome.notifications.is_empty() {
                        warn!(
                            "{} follow-up notification(s) from {} not sent, write not recorded",
                            outcome.notifications.len(),
                            c.uuid()
                        );
                    }
                    return Err(GattError::LogSink(sink));
                }
            };
            c.set_value(raw.to_vec());
            outcome
        };

        for n in outcome.notifications {
            if let Err(e) = self.notify(&n.service, &n.characteristic, n.value) {
                warn!("follow-up notification on {} dropped: {e}", n.characteristic);
            }
        }
        Ok(())
    }

    /// Serve a read from a client with the handler's bytes, unmodified.
    ///
    /// Does not change any state, two reads without a write in between
    /// return the same bytes as long as the handler is deterministic.
    pub fn dispatch_read(&self, service: &BleUuid, characteristic: &BleUuid) -> Result<Vec<u8>, GattError> {
        let result = self.read(service, characteristic);
        match &result {
            Ok(value) => info!("Sending response: {}", String::from_utf8_lossy(value)),
            Err(e) => log_dropped("read", e),
        }
        result
    }

    fn read(&self, service: &BleUuid, characteristic: &BleUuid) -> Result<Vec<u8>, GattError> {
        let slot = self.registry.lookup(service, characteristic)?;
        let c = lock(slot);
        policy::check(&c, Access::Read)?;
        let handler = c
            .handler()
            .read()
            .cloned()
            .ok_or_else(|| missing_handler(c.uuid(), "read"))?;
        guarded(c.uuid(), || handler())
    }

    /// Set a notify characteristic's value and push it to subscribers.
    ///
    /// Returns how many subscribers received it; zero when notifications are
    /// disabled or nobody is listening.
    pub fn notify(&self, service: &BleUuid, characteristic: &BleUuid, value: Vec<u8>) -> Result<usize, GattError> {
        let slot = self.registry.lookup(service, characteristic)?;
        let mut c = lock(slot);
        policy::check(&c, Access::Notify)?;
        c.set_value(value.clone());

        if !c.notifying() {
            debug!("{} not notifying, value stored only", c.uuid());
            return Ok(0);
        }

        let delivered = c
            .subscribers()
            .map(|tx| tx.send(value).unwrap_or(0))
            .unwrap_or(0);
        debug!("notified {} subscriber(s) on {}", delivered, c.uuid());
        Ok(delivered)
    }

    /// Start a notification feed; enables notifying on the characteristic
    pub fn subscribe(&self, service: &BleUuid, characteristic: &BleUuid) -> Result<Subscription, GattError> {
        let slot = self.registry.lookup(service, characteristic)?;
        let mut c = lock(slot);
        policy::check(&c, Access::Notify)?;
        let receiver = c
            .subscribers()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| missing_handler(c.uuid(), "notify"))?;
        c.set_notifying(true);
        info!("Notifications enabled on {}", c.uuid());

        Ok(Subscription {
            initial: c.value().to_vec(),
            receiver,
        })
    }

    pub fn set_notifying(&self, service: &BleUuid, characteristic: &BleUuid, notifying: bool) -> Result<(), GattError> {
        let slot = self.registry.lookup(service, characteristic)?;
        let mut c = lock(slot);
        policy::check(&c, Access::Notify)?;
        c.set_notifying(notifying);
        Ok(())
    }

    /// Current stored value, regardless of flags
    pub fn value(&self, service: &BleUuid, characteristic: &BleUuid) -> Result<Vec<u8>, GattError> {
        let slot = self.registry.lookup(service, characteristic)?;
        Ok(lock(slot).value().to_vec())
    }
}

fn lock(slot: &CharacteristicRef) -> MutexGuard<'_, Characteristic> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lossy UTF-8; malformed input never aborts a dispatch
fn decode<'a>(raw: &'a [u8], service: &BleUuid, characteristic: &BleUuid) -> Cow<'a, str> {
    let text = String::from_utf8_lossy(raw);
    if let Cow::Owned(_) = text {
        warn!("invalid UTF-8 in write to {service}/{characteristic}, decoded with replacement characters");
    }
    text
}

fn guarded<T>(
    characteristic: &BleUuid,
    f: impl FnOnce() -> Result<T, HandlerError>,
) -> Result<T, GattError> {
    let source = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => return Ok(v),
        Ok(Err(e)) => e,
        Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
    };
    Err(GattError::HandlerFailure {
        characteristic: characteristic.clone(),
        source,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn missing_handler(characteristic: &BleUuid, kind: &str) -> GattError {
    GattError::HandlerFailure {
        characteristic: characteristic.clone(),
        source: HandlerError::failed(format!("no {kind} handler wired")),
    }
}

fn log_dropped(operation: &str, e: &GattError) {
    match e {
        GattError::HandlerFailure { .. } | GattError::LogSink(_) => error!("{operation} dropped: {e}"),
        _ => warn!("{operation} dropped: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::Dispatcher;
    use crate::{
        Access, BleUuid, CharacteristicDef, CommandRecord, CommandSink, Flags, GattError, HandlerError, MemorySink,
        Registry, WriteOptions, WriteOutcome,
    };

    fn uuid(s: &str) -> BleUuid {
        BleUuid::parse(s).unwrap()
    }

    struct Fixture {
        dispatcher: Dispatcher,
        sink: Arc<MemorySink>,
        received: Received,
    }

    type Received = Arc<Mutex<Vec<(String, String, String)>>>;

    fn fixture() -> Fixture {
        let received = Received::default();
        let sink = Arc::new(MemorySink::new());
        Fixture {
            dispatcher: Dispatcher::new(table(&received), sink.clone()),
            sink,
            received,
        }
    }

    fn table(received: &Received) -> Registry {
        let mut registry = Registry::new();
        registry.add_service(uuid("FFE0"), true, false).unwrap();

        let seen = received.clone();
        registry
            .register(
                &uuid("FFE0"),
                CharacteristicDef::new(uuid("FFE9"), Flags::WRITE | Flags::WRITE_WITHOUT_RESPONSE).on_write(
                    move |cmd| {
                        seen.lock().unwrap().push((
                            cmd.service.to_string(),
                            cmd.characteristic.to_string(),
                            cmd.command.to_string(),
                        ));
                        let outcome = WriteOutcome::done();
                        if cmd.command.starts_with("GPIO3") {
                            return Ok(outcome.notify(uuid("FFE0"), uuid("FFEA"), vec![0xab, 0xcd]));
                        }
                        Ok(outcome)
                    },
                ),
            )
            .unwrap();
        registry
            .register(
                &uuid("FFE0"),
                CharacteristicDef::new(uuid("FFEA"), Flags::READ | Flags::NOTIFY)
                    .value(b"v27".to_vec())
                    .on_read(|| Ok(b"Response from simulated camera".to_vec())),
            )
            .unwrap();
        registry
            .register(&uuid("FFE0"), CharacteristicDef::new(uuid("FFEB"), Flags::NOTIFY))
            .unwrap();
        registry
            .register(
                &uuid("FFE0"),
                CharacteristicDef::new(uuid("FFF4"), Flags::WRITE)
                    .on_write(|cmd| Err(HandlerError::failed(format!("refusing {}", cmd.command)))),
            )
            .unwrap();
        registry
            .register(
                &uuid("FFE0"),
                CharacteristicDef::new(uuid("FFF5"), Flags::WRITE).on_write(|_| panic!("handler blew up")),
            )
            .unwrap();
        registry
    }

    struct FullDisk;

    impl CommandSink for FullDisk {
        fn append(&self, _record: &CommandRecord) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[test]
    fn write_reaches_handler_and_logs_one_record() {
        let f = fixture();
        f.dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFE9"), b"GPIO3 on", WriteOptions::default())
            .unwrap();

        assert_eq!(
            f.received.lock().unwrap().as_slice(),
            &[("FFE0".to_string(), "FFE9".to_string(), "GPIO3 on".to_string())]
        );
        assert_eq!(
            f.sink.lines(),
            vec!["Service UUID: FFE0, Characteristic UUID: FFE9, Command: GPIO3 on\n".to_string()]
        );
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFE9")).unwrap(), b"GPIO3 on");
    }

    #[test]
    fn records_use_declared_uuid_text() {
        let f = fixture();
        f.dispatcher
            .dispatch_write(
                &uuid("0000ffe0-0000-1000-8000-00805f9b34fb"),
                &uuid("ffe9"),
                b"GETSD",
                WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(f.sink.records()[0].service.to_string(), "FFE0");
        assert_eq!(f.sink.records()[0].characteristic.to_string(), "FFE9");
    }

    #[test]
    fn write_to_unknown_characteristic_is_not_found() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("0000"), b"GPIO3 on", WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, GattError::NotFound { .. }));
        assert!(f.sink.records().is_empty());
    }

    #[test]
    fn write_to_read_only_characteristic_is_denied_without_record() {
        let f = fixture();
        for target in ["FFEA", "FFEB"] {
            let err = f
                .dispatcher
                .dispatch_write(&uuid("FFE0"), &uuid(target), b"x", WriteOptions::default())
                .unwrap_err();
            assert!(matches!(err, GattError::CapabilityDenied { access: Access::Write, .. }));
        }
        assert!(f.sink.records().is_empty());
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFEA")).unwrap(), b"v27");
    }

    #[test]
    fn invalid_utf8_is_decoded_with_replacement() {
        let f = fixture();
        f.dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFE9"), &[b'G', 0xff, 0xfe, b'O'], WriteOptions::default())
            .unwrap();
        assert_eq!(f.received.lock().unwrap()[0].2, "G\u{fffd}\u{fffd}O");
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFE9")).unwrap(), vec![b'G', 0xff, 0xfe, b'O']);
        assert_eq!(f.sink.records()[0].raw, vec![b'G', 0xff, 0xfe, b'O']);
    }

    #[test]
    fn arbitrary_bytes_never_escape_the_boundary() {
        let f = fixture();
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0xc3],
            vec![0xed, 0xa0, 0x80],
            (0..=255).collect(),
            b"\n\r\t".to_vec(),
        ];
        for payload in payloads {
            for target in ["FFE9", "FFEA", "FFF4", "FFF5", "1234"] {
                let result = f
                    .dispatcher
                    .dispatch_write(&uuid("FFE0"), &uuid(target), &payload, WriteOptions::default());
                assert!(
                    matches!(
                        result,
                        Ok(())
                            | Err(GattError::NotFound { .. })
                            | Err(GattError::CapabilityDenied { .. })
                            | Err(GattError::HandlerFailure { .. })
                    ),
                    "{target} {payload:02x?}: {result:?}"
                );
            }
        }
    }

    #[test]
    fn handler_error_is_reported_and_command_still_logged() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFF4"), b"boom", WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, GattError::HandlerFailure { source: HandlerError::Failed(_), .. }));
        assert_eq!(f.sink.records().len(), 1);
        assert!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFF4")).unwrap().is_empty());
    }

    #[test]
    fn handler_panic_is_caught() {
        let f = fixture();
        let err = f
            .dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFF5"), b"x", WriteOptions::default())
            .unwrap_err();
        match err {
            GattError::HandlerFailure {
                source: HandlerError::Panicked(msg),
                ..
            } => assert_eq!(msg, "handler blew up"),
            other => panic!("unexpected {other:?}"),
        }

        // the characteristic stays usable after a panic
        let err = f
            .dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFF5"), b"y", WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, GattError::HandlerFailure { .. }));
    }

    #[test]
    fn read_returns_handler_bytes_unmodified_and_is_idempotent() {
        let f = fixture();
        let first = f.dispatcher.dispatch_read(&uuid("FFE0"), &uuid("FFEA")).unwrap();
        let second = f.dispatcher.dispatch_read(&uuid("FFE0"), &uuid("FFEA")).unwrap();
        assert_eq!(first, b"Response from simulated camera");
        assert_eq!(first, second);
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFEA")).unwrap(), b"v27");
        assert!(f.sink.records().is_empty());
    }

    #[test]
    fn read_without_read_flag_is_denied() {
        let f = fixture();
        assert!(matches!(
            f.dispatcher.dispatch_read(&uuid("FFE0"), &uuid("FFE9")),
            Err(GattError::CapabilityDenied { access: Access::Read, .. })
        ));
        assert!(matches!(
            f.dispatcher.dispatch_read(&uuid("FFE1"), &uuid("FFEA")),
            Err(GattError::NotFound { .. })
        ));
    }

    #[test]
    fn write_outcome_notifications_reach_subscribers() {
        let f = fixture();
        let mut sub = f.dispatcher.subscribe(&uuid("FFE0"), &uuid("FFEA")).unwrap();
        assert_eq!(sub.initial, b"v27");

        f.dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFE9"), b"GPIO3", WriteOptions::default())
            .unwrap();
        assert_eq!(sub.receiver.try_recv().unwrap(), vec![0xab, 0xcd]);
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFEA")).unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn notify_respects_flags_and_notifying_state() {
        let f = fixture();
        assert!(matches!(
            f.dispatcher.notify(&uuid("FFE0"), &uuid("FFE9"), vec![1]),
            Err(GattError::CapabilityDenied { access: Access::Notify, .. })
        ));

        let mut sub = f.dispatcher.subscribe(&uuid("FFE0"), &uuid("FFEB")).unwrap();
        assert_eq!(f.dispatcher.notify(&uuid("FFE0"), &uuid("FFEB"), vec![1]).unwrap(), 1);
        assert_eq!(sub.receiver.try_recv().unwrap(), vec![1]);

        f.dispatcher.set_notifying(&uuid("FFE0"), &uuid("FFEB"), false).unwrap();
        assert_eq!(f.dispatcher.notify(&uuid("FFE0"), &uuid("FFEB"), vec![2]).unwrap(), 0);
        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(f.dispatcher.value(&uuid("FFE0"), &uuid("FFEB")).unwrap(), vec![2]);
    }

    #[test]
    fn concurrent_writes_on_different_characteristics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.add_service(uuid("FFE0"), true, false).unwrap();
        for c in ["FFF4", "FFE9"] {
            let calls = calls.clone();
            registry
                .register(
                    &uuid("FFE0"),
                    CharacteristicDef::new(uuid(c), Flags::WRITE).on_write(move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(WriteOutcome::done())
                    }),
                )
                .unwrap();
        }
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Arc::new(Dispatcher::new(registry, sink.clone()));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    let target = if t % 2 == 0 { "FFF4" } else { "FFE9" };
                    for i in 0..25 {
                        dispatcher
                            .dispatch_write(&uuid("FFE0"), &uuid(target), format!("{t}-{i}").as_bytes(), WriteOptions::default())
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 100);
        assert_eq!(sink.records().len(), 100);
    }

    #[test]
    fn unrecorded_write_is_not_committed() {
        let received = Received::default();
        let dispatcher = Dispatcher::new(table(&received), Arc::new(FullDisk));

        // handler failure wins over the lost record
        let err = dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFF4"), b"boom", WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, GattError::HandlerFailure { source: HandlerError::Failed(_), .. }));

        let mut sub = dispatcher.subscribe(&uuid("FFE0"), &uuid("FFEA")).unwrap();
        let err = dispatcher
            .dispatch_write(&uuid("FFE0"), &uuid("FFE9"), b"GPIO3", WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, GattError::LogSink(_)));
        assert_eq!(received.lock().unwrap().len(), 1);
        assert!(dispatcher.value(&uuid("FFE0"), &uuid("FFE9")).unwrap().is_empty());
        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(dispatcher.value(&uuid("FFE0"), &uuid("FFEA")).unwrap(), b"v27");
    }

    #[test]
    fn reads_and_writes_on_one_characteristic_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let enter = {
            let (active, overlaps) = (active.clone(), overlaps.clone());
            move || {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                active.fetch_sub(1, Ordering::SeqCst);
            }
        };
        let on_read = enter.clone();

        let mut registry = Registry::new();
        registry.add_service(uuid("FFE0"), true, false).unwrap();
        registry
            .register(
                &uuid("FFE0"),
                CharacteristicDef::new(uuid("FFEA"), Flags::READ | Flags::WRITE)
                    .on_write(move |_| {
                        enter();
                        Ok(WriteOutcome::done())
                    })
                    .on_read(move || {
                        on_read();
                        Ok(b"ok".to_vec())
                    }),
            )
            .unwrap();
        let sink = Arc::new(MemorySink::new());
        let dispatcher = Arc::new(Dispatcher::new(registry, sink.clone()));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        dispatcher
                            .dispatch_write(&uuid("FFE0"), &uuid("FFEA"), format!("{t}-{i}").as_bytes(), WriteOptions::default())
                            .unwrap();
                        assert_eq!(dispatcher.dispatch_read(&uuid("FFE0"), &uuid("FFEA")).unwrap(), b"ok");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        let records = sink.records();
        assert_eq!(records.len(), 800);
        for t in 0..8 {
            let order: Vec<usize> = records
                .iter()
                .filter_map(|r| r.command.split_once('-').filter(|(thread, _)| *thread == t.to_string()))
                .map(|(_, i)| i.parse().unwrap())
                .collect();
            assert_eq!(order, (0..100).collect::<Vec<_>>());
        }
    }
}
