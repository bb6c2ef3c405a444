//! BLE GATT table of the simulated camera
//!
//! UUIDs are kept in the textual form the camera app uses; short forms expand
//! onto the Bluetooth base UUID.

/// Service carried in the advertisement payload, it has no characteristics
pub const ADVERTISEMENT_SERVICE_UUID: &str = "FEFF";

/// First application service (vendor 128-bit)
pub const SERVICE_1_UUID: &str = "5833FF01-9B8B-5191-6142-22A4536EF123";

/// Service 1 command characteristic (write)
pub const CHARACTERISTIC_1_1_UUID: &str = "5833FF02-9B8B-5191-6142-22A4536EF123";

/// Service 1 event characteristic (notify)
pub const CHARACTERISTIC_1_2_UUID: &str = "5833FF03-9B8B-5191-6142-22A4536EF123";

/// Second application service
pub const SERVICE_2_UUID: &str = "FFE0";

/// Notify
pub const CHARACTERISTIC_2_1_UUID: &str = "FFF3";

/// Write
pub const CHARACTERISTIC_2_2_UUID: &str = "FFF4";

/// Write, write-without-response. The app sends `GETSD` and `GPIO3` here.
pub const CHARACTERISTIC_2_3_UUID: &str = "FFE9";

/// Read, notify. Firmware version.
pub const CHARACTERISTIC_2_4_UUID: &str = "FFEA";

/// Notify. Camera model.
pub const CHARACTERISTIC_2_5_UUID: &str = "FFEB";

/// Fixed reply of the read handler
pub const READ_RESPONSE: &str = "Response from simulated camera";

/// Predefined characteristic values
pub mod values {
    /// Initial value of the plain notify characteristics (ASCII, not hex)
    pub const NOTIFY: &[u8] = b"01000000";

    /// `v27 240813#565\0`, pushed on FFEA when notifications are enabled
    pub const FIRMWARE_VERSION: &[u8] = &[
        0x76, 0x32, 0x37, 0x20, 0x32, 0x34, 0x30, 0x38, 0x31, 0x33, 0x23, 0x35, 0x36, 0x35, 0x00,
    ];

    /// `[SD]RD7010PRO-\0\0`, pushed on FFEB when notifications are enabled
    pub const MODEL: &[u8] = &[
        0x5b, 0x53, 0x44, 0x5d, 0x52, 0x44, 0x37, 0x30, 0x31, 0x30, 0x50, 0x52, 0x4f, 0x2d, 0x00,
        0x00,
    ];

    /// Pushed on FFEA in reply to a `GPIO3` command
    pub const GPIO3_REPLY: &[u8] = &[0xab, 0xcd, 0x12, 0x34];
}

/// Command prefixes understood by the simulated camera
pub mod commands {
    /// Turn on GPIO 3; answered with a notification on FFEA
    pub const GPIO3: &str = "GPIO3";

    /// Query SD card state
    pub const GETSD: &str = "GETSD";
}

#[cfg(test)]
mod tests {
    use super::values;

    #[test]
    fn predefined_values_match_capture() {
        assert_eq!(values::FIRMWARE_VERSION, b"v27 240813#565\0");
        assert_eq!(values::MODEL, b"[SD]RD7010PRO-\0\0");
    }
}
