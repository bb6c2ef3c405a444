//! Service and characteristic declarations
//!
//! A topology is declared as a list of [`ServiceDef`]s, each owning an ordered
//! list of [`CharacteristicDef`]s. Handlers are stored as a tagged
//! [`Handler`] value next to the declaration; the dispatcher resolves them by
//! (service, characteristic) lookup.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::{BleUuid, HandlerError};

/// Capability flags of a characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const READ: Flags = Flags(1 << 0);
    pub const WRITE: Flags = Flags(1 << 1);
    pub const WRITE_WITHOUT_RESPONSE: Flags = Flags(1 << 2);
    pub const NOTIFY: Flags = Flags(1 << 3);

    const NAMES: [(Flags, &'static str); 4] = [
        (Flags::READ, "read"),
        (Flags::WRITE, "write"),
        (Flags::WRITE_WITHOUT_RESPONSE, "write-without-response"),
        (Flags::NOTIFY, "notify"),
    ];

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Either `write` or `write-without-response`
    pub const fn is_writable(self) -> bool {
        self.intersects(Flags(Flags::WRITE.0 | Flags::WRITE_WITHOUT_RESPONSE.0))
    }

    /// Flag names in declaration order, e.g. `["read", "notify"]`
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// Options the platform adapter passes along with a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub offset: u16,
    pub mtu: u16,
    /// The client used write-without-response (ATT command)
    pub without_response: bool,
}

/// A decoded write, as seen by a write handler
#[derive(Debug)]
pub struct WriteCommand<'a> {
    pub service: &'a BleUuid,
    pub characteristic: &'a BleUuid,
    /// Payload decoded as UTF-8, invalid sequences replaced with U+FFFD
    pub command: &'a str,
    pub raw: &'a [u8],
    pub options: WriteOptions,
}

/// Value to push on a notify characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub service: BleUuid,
    pub characteristic: BleUuid,
    pub value: Vec<u8>,
}

/// What a write handler asks the dispatcher to do once the write is complete
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub notifications: Vec<Notification>,
}

impl WriteOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn notify(mut self, service: BleUuid, characteristic: BleUuid, value: Vec<u8>) -> Self {
        self.notifications.push(Notification {
            service,
            characteristic,
            value,
        });
        self
    }
}

pub type WriteHandler =
    Arc<dyn Fn(&WriteCommand<'_>) -> Result<WriteOutcome, HandlerError> + Send + Sync>;

pub type ReadHandler = Arc<dyn Fn() -> Result<Vec<u8>, HandlerError> + Send + Sync>;

/// Handler wired to a characteristic
#[derive(Clone, Default)]
pub enum Handler {
    #[default]
    None,
    Write(WriteHandler),
    Read(ReadHandler),
    ReadWrite {
        read: ReadHandler,
        write: WriteHandler,
    },
}

impl Handler {
    pub fn write(&self) -> Option<&WriteHandler> {
        match self {
            Handler::Write(w) | Handler::ReadWrite { write: w, .. } => Some(w),
            Handler::None | Handler::Read(_) => None,
        }
    }

    pub fn read(&self) -> Option<&ReadHandler> {
        match self {
            Handler::Read(r) | Handler::ReadWrite { read: r, .. } => Some(r),
            Handler::None | Handler::Write(_) => None,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::None => "None",
            Handler::Write(_) => "Write",
            Handler::Read(_) => "Read",
            Handler::ReadWrite { .. } => "ReadWrite",
        };
        f.write_str(kind)
    }
}

/// Declaration of one characteristic
#[derive(Debug, Clone)]
pub struct CharacteristicDef {
    pub uuid: BleUuid,
    pub flags: Flags,
    pub value: Vec<u8>,
    pub handler: Handler,
}

impl CharacteristicDef {
    pub fn new(uuid: BleUuid, flags: Flags) -> Self {
        Self {
            uuid,
            flags,
            value: Vec::new(),
            handler: Handler::None,
        }
    }

    pub fn value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn on_write<F>(mut self, f: F) -> Self
    where
        F: Fn(&WriteCommand<'_>) -> Result<WriteOutcome, HandlerError> + Send + Sync + 'static,
    {
        let write: WriteHandler = Arc::new(f);
        self.handler = match std::mem::take(&mut self.handler) {
            Handler::Read(read) | Handler::ReadWrite { read, .. } => Handler::ReadWrite { read, write },
            Handler::None | Handler::Write(_) => Handler::Write(write),
        };
        self
    }

    pub fn on_read<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
    {
        let read: ReadHandler = Arc::new(f);
        self.handler = match std::mem::take(&mut self.handler) {
            Handler::Write(write) | Handler::ReadWrite { write, .. } => Handler::ReadWrite { read, write },
            Handler::None | Handler::Read(_) => Handler::Read(read),
        };
        self
    }
}

/// Declaration of one service
#[derive(Debug, Clone)]
pub struct ServiceDef {
    pub uuid: BleUuid,
    pub primary: bool,
    /// The advertisement/identity service; exactly one per peripheral
    pub advertised: bool,
    pub characteristics: Vec<CharacteristicDef>,
}

impl ServiceDef {
    pub fn primary(uuid: BleUuid) -> Self {
        Self {
            uuid,
            primary: true,
            advertised: false,
            characteristics: Vec::new(),
        }
    }

    pub fn advertised(mut self) -> Self {
        self.advertised = true;
        self
    }

    pub fn characteristic(mut self, characteristic: CharacteristicDef) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}
