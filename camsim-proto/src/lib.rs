//! camsim protocol - the identity a real camera client expects to see
//!
//! Everything here must match the camera bit-for-bit, otherwise the mobile
//! app will not recognise the simulator.

pub mod ble;

/// Name the peripheral advertises as
pub const DEVICE_NAME: &str = "HTC-12345678";

/// GAP appearance code (0x0340, generic sensor)
pub const APPEARANCE: u16 = 0x0340;

/// Default path of the received-commands log, relative to the working directory
pub const COMMAND_LOG_FILE: &str = "received_commands.log";
