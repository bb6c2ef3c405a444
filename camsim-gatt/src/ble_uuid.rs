//! BLE UUID identity
//!
//! Services and characteristics are declared with the textual UUID the client
//! app expects (`FFE0`, `5833FF01-...`). Identity is the expanded 128-bit
//! value, so `FFE0`, `ffe0` and `0000ffe0-0000-1000-8000-00805f9b34fb` are the
//! same key, while `Display` keeps the declared text for log records.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use uuid::Uuid;

use crate::GattError;

/// Bluetooth base UUID: 00000000-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

#[derive(Debug, Clone)]
pub struct BleUuid {
    uuid: Uuid,
    text: String,
}

impl BleUuid {
    /// Parse a 16-bit, 32-bit or 128-bit BLE UUID, case-insensitive
    pub fn parse(s: &str) -> Result<Self, GattError> {
        let text = s.trim();
        let short = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);

        let uuid = if matches!(short.len(), 4 | 8) && short.chars().all(|c| c.is_ascii_hexdigit()) {
            let alias = u32::from_str_radix(short, 16)
                .map_err(|_| GattError::InvalidUuid(s.to_string()))?;
            Uuid::from_u128(BASE_UUID | (u128::from(alias) << 96))
        } else {
            Uuid::parse_str(text).map_err(|_| GattError::InvalidUuid(s.to_string()))?
        };

        Ok(Self {
            uuid,
            text: text.to_string(),
        })
    }

    /// The expanded 128-bit UUID
    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }

    /// The 16-bit alias, if this UUID lives on the Bluetooth base
    pub fn short(&self) -> Option<u16> {
        let value = self.uuid.as_u128();
        let alias = value >> 96;
        if value & !(0xffff_u128 << 96) == BASE_UUID && alias <= 0xffff {
            Some(alias as u16)
        } else {
            None
        }
    }
}

impl PartialEq for BleUuid {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for BleUuid {}

impl Hash for BleUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for BleUuid {
    type Err = GattError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for BleUuid {
    fn from(uuid: Uuid) -> Self {
        Self {
            uuid,
            text: uuid.to_string(),
        }
    }
}
