//! Access policy: which operations a characteristic's flags permit
//!
//! Pure functions, no state. Checked by the dispatcher before a handler runs
//! and by the lifecycle manager before a characteristic is wired to the
//! platform adapter.

use std::fmt;

use crate::{Characteristic, CharacteristicDef, Flags, GattError};

/// Operation kind requested on a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Satisfied by either `write` or `write-without-response`
    Write,
    Notify,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Notify => "notify",
        })
    }
}

pub fn permits(flags: Flags, access: Access) -> bool {
    match access {
        Access::Read => flags.contains(Flags::READ),
        Access::Write => flags.is_writable(),
        Access::Notify => flags.contains(Flags::NOTIFY),
    }
}

/// Allowed, or `CapabilityDenied` when the flag is absent
pub fn check(characteristic: &Characteristic, access: Access) -> Result<(), GattError> {
    if permits(characteristic.flags(), access) {
        Ok(())
    } else {
        Err(GattError::CapabilityDenied {
            characteristic: characteristic.uuid().clone(),
            access,
        })
    }
}

/// Handlers must match flags exactly: a writable characteristic needs a write
/// handler and a read-only one must not carry one, same for reads.
pub fn validate_wiring(def: &CharacteristicDef) -> Result<(), GattError> {
    if def.flags.is_empty() {
        return Err(GattError::InvalidTopology(format!(
            "characteristic {} declares no capability",
            def.uuid
        )));
    }

    let checks = [
        (Access::Write, def.handler.write().is_some()),
        (Access::Read, def.handler.read().is_some()),
    ];

    for (access, wired) in checks {
        match (permits(def.flags, access), wired) {
            (true, false) => {
                return Err(GattError::InvalidTopology(format!(
                    "characteristic {} allows {access} but has no {access} handler",
                    def.uuid
                )));
            }
            (false, true) => {
                return Err(GattError::InvalidTopology(format!(
                    "characteristic {} has a {access} handler but does not allow {access}",
                    def.uuid
                )));
            }
            _ => {}
        }
    }

    Ok(())
}
