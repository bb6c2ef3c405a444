//! camsim GATT core
//!
//! The server side model of the simulated camera:
//! - [`Registry`] of services and characteristics, keyed by
//!   (service UUID, characteristic UUID)
//! - access policy checks in [`policy`]
//! - [`Dispatcher`] routing reads, writes and notifications to handlers
//! - [`Peripheral`] lifecycle, driving a [`BlePlatform`] adapter
//!
//! # Example
//!
//! ```ignore
//! use camsim_gatt::{BleUuid, CharacteristicDef, Flags, ServiceDef, WriteOutcome};
//!
//! let service = ServiceDef::primary(BleUuid::parse("FFE0")?)
//!     .characteristic(
//!         CharacteristicDef::new(BleUuid::parse("FFE9")?, Flags::WRITE)
//!             .on_write(|cmd| {
//!                 println!("got {}", cmd.command);
//!                 Ok(WriteOutcome::done())
//!             }),
//!     );
//!
//! let mut peripheral = Peripheral::new(platform, identity, sink);
//! peripheral.build_topology(vec![advertised, service]).await?;
//! peripheral.publish(shutdown).await?;
//! ```

mod ble_uuid;
mod characteristic;
mod dispatch;
mod error;
mod peripheral;
pub mod platform;
pub mod policy;
mod registry;
mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use ble_uuid::BleUuid;
pub use characteristic::{
    CharacteristicDef, Flags, Handler, Notification, ReadHandler, ServiceDef, WriteCommand, WriteHandler,
    WriteOptions, WriteOutcome,
};
pub use dispatch::{Dispatcher, Subscription};
pub use error::{GattError, HandlerError, PlatformError};
pub use peripheral::{DeviceIdentity, LifecycleState, Peripheral};
pub use platform::BlePlatform;
pub use policy::Access;
pub use registry::{Characteristic, CharacteristicRef, Registry, Service};
pub use sink::{CommandRecord, CommandSink, FileSink, MemorySink};

// Re-exported so platform adapters do not need their own tokio-util dependency
pub use tokio_util::sync::CancellationToken;
