use crate::BleUuid;

/// Errors of the GATT core
///
/// Registration-time variants abort startup; dispatch-time variants are
/// logged by the dispatcher and returned to the platform adapter, which drops
/// the offending event.
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    #[error("unknown characteristic {characteristic} in service {service}")]
    NotFound {
        service: BleUuid,
        characteristic: BleUuid,
    },
    #[error("unknown service {0}")]
    ServiceNotFound(BleUuid),
    #[error("{access} not permitted on characteristic {characteristic}")]
    CapabilityDenied {
        characteristic: BleUuid,
        access: crate::Access,
    },
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("no usable BLE adapter: {0}")]
    AdapterUnavailable(String),
    #[error("handler for {characteristic} failed: {source}")]
    HandlerFailure {
        characteristic: BleUuid,
        #[source]
        source: HandlerError,
    },
    #[error("invalid BLE UUID {0:?}")]
    InvalidUuid(String),
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: crate::LifecycleState,
    },
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("failed to append command record: {0}")]
    LogSink(#[from] std::io::Error),
}

/// Failure raised by a read or write handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors reported by a platform BLE adapter
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The Bluetooth stack itself is unreachable (daemon down, no permission)
    #[error("bluetooth stack unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}
