//! The simulated camera: its identity, GATT table and command handlers
//!
//! Mirrors what the real camera exposes to the mobile app. Writes are only
//! recorded (the dispatcher logs and persists them); a `GPIO3` command is
//! answered on FFEA the way the camera acknowledges it.

use camsim_gatt::{
    BleUuid, CharacteristicDef, DeviceIdentity, Flags, GattError, HandlerError, ServiceDef, WriteCommand,
    WriteOutcome,
};
use camsim_proto::ble::{self, commands, values};
use tracing::{debug, info};

pub fn identity() -> DeviceIdentity {
    DeviceIdentity {
        name: camsim_proto::DEVICE_NAME.to_string(),
        appearance: camsim_proto::APPEARANCE,
    }
}

pub fn topology() -> Result<Vec<ServiceDef>, GattError> {
    let service_2 = uuid(ble::SERVICE_2_UUID)?;
    let gpio_reply_target = uuid(ble::CHARACTERISTIC_2_4_UUID)?;

    Ok(vec![
        ServiceDef::primary(uuid(ble::ADVERTISEMENT_SERVICE_UUID)?).advertised(),
        ServiceDef::primary(uuid(ble::SERVICE_1_UUID)?)
            .characteristic(CharacteristicDef::new(uuid(ble::CHARACTERISTIC_1_1_UUID)?, Flags::WRITE).on_write(record))
            .characteristic(
                CharacteristicDef::new(uuid(ble::CHARACTERISTIC_1_2_UUID)?, Flags::NOTIFY).value(values::NOTIFY),
            ),
        ServiceDef::primary(service_2.clone())
            .characteristic(
                CharacteristicDef::new(uuid(ble::CHARACTERISTIC_2_1_UUID)?, Flags::NOTIFY).value(values::NOTIFY),
            )
            .characteristic(CharacteristicDef::new(uuid(ble::CHARACTERISTIC_2_2_UUID)?, Flags::WRITE).on_write(record))
            .characteristic(
                CharacteristicDef::new(
                    uuid(ble::CHARACTERISTIC_2_3_UUID)?,
                    Flags::WRITE | Flags::WRITE_WITHOUT_RESPONSE,
                )
                .on_write(move |cmd| control(cmd, &service_2, &gpio_reply_target)),
            )
            .characteristic(
                CharacteristicDef::new(uuid(ble::CHARACTERISTIC_2_4_UUID)?, Flags::READ | Flags::NOTIFY)
                    .value(values::FIRMWARE_VERSION)
                    .on_read(read_response),
            )
            .characteristic(
                CharacteristicDef::new(uuid(ble::CHARACTERISTIC_2_5_UUID)?, Flags::NOTIFY).value(values::MODEL),
            ),
    ])
}

fn uuid(s: &str) -> Result<BleUuid, GattError> {
    BleUuid::parse(s)
}

fn record(cmd: &WriteCommand<'_>) -> Result<WriteOutcome, HandlerError> {
    debug!("{} raw payload {:02x?}", cmd.characteristic, cmd.raw);
    Ok(WriteOutcome::done())
}

/// FFE9: the app's control channel
fn control(cmd: &WriteCommand<'_>, service: &BleUuid, reply_on: &BleUuid) -> Result<WriteOutcome, HandlerError> {
    record(cmd)?;

    let outcome = WriteOutcome::done();
    if cmd.command.starts_with(commands::GPIO3) {
        info!("GPIO3 command, answering on {reply_on}");
        return Ok(outcome.notify(service.clone(), reply_on.clone(), values::GPIO3_REPLY.to_vec()));
    }
    if cmd.command.starts_with(commands::GETSD) {
        info!("SD card status requested");
    }
    Ok(outcome)
}

fn read_response() -> Result<Vec<u8>, HandlerError> {
    Ok(ble::READ_RESPONSE.as_bytes().to_vec())
}
