//! BLE client for the camsim camera simulator
//!
//! Scans for the simulator, writes commands, reads characteristics and
//! prints notifications, the way the camera app talks to a real camera.

pub mod client;

use uuid::Uuid;

/// Accepts the same UUID forms the simulator declares its table with
pub fn parse_uuid(s: &str) -> Result<Uuid, camsim_gatt::GattError> {
    camsim_gatt::BleUuid::parse(s).map(|u| u.as_uuid())
}

/// Camera names look like `HTC-12345678`
pub fn is_camera(name: &str) -> bool {
    name.starts_with("HTC-")
}

/// Match by name or address pattern, or any camera when no pattern is given
pub fn matches_target(name: &str, address: &str, target: Option<&str>) -> bool {
    match target {
        Some(t) => name.contains(t) || address.eq_ignore_ascii_case(t) || address.contains(t),
        None => is_camera(name),
    }
}

/// Printable form of a characteristic value: trailing NULs dropped, lossy UTF-8
pub fn printable(value: &[u8]) -> String {
    let end = value.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

pub fn hex(value: &[u8]) -> String {
    value.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}
