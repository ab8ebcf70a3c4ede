//! Outbound command packets.
//!
//! Commands address a zone by its bus `address` and select the register
//! with the same `id*4 + n` layout the controller uses when reporting.

use crate::packet::Packet;
use crate::types::Device;
use crate::{Error, Result};

/// Origin address used for commands issued by this client.
pub const CLIENT_ORIGIN: u8 = 255;

/// Command code for register writes and reads.
pub const CMD_REGISTER: u8 = 4;

const POWER_ON: u8 = 3;
const POWER_OFF: u8 = 2;

/// Highest setpoint the value byte can carry, in degrees.
pub const MAX_TEMPERATURE: f64 = 127.5;

fn register_packet(device: &Device, offset: u32, value: u8) -> Result<Packet> {
    let data1 = device
        .device_id
        .checked_mul(4)
        .and_then(|base| base.checked_add(offset))
        .unwrap_or(u32::MAX);
    Packet::encode(
        device.address.into(),
        CLIENT_ORIGIN.into(),
        CMD_REGISTER.into(),
        data1,
        value.into(),
    )
}

/// Switch a zone on or off.
pub fn toggle(device: &Device, on: bool) -> Result<Packet> {
    register_packet(device, 0, if on { POWER_ON } else { POWER_OFF })
}

/// Setpoint write followed by a read-back request, in sending order.
/// `temperature` is in degrees and is sent in half-degree steps.
pub fn set_temperature(device: &Device, temperature: f64) -> Result<[Packet; 2]> {
    if !temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(Error::InvalidTemperature(temperature));
    }
    let raw = (temperature * 2.0).round() as u8;
    Ok([register_packet(device, 2, raw)?, read(device)?])
}

/// Ask a zone to report its current temperature.
pub fn read(device: &Device) -> Result<Packet> {
    register_packet(device, 3, 0)
}

/// Fixed sequence sent at the start of every polling cycle to keep the
/// controller's bus session alive.
pub fn keepalive() -> [Packet; 3] {
    [
        Packet::new(1, 254, CMD_REGISTER, 35, 0),
        Packet::new(1, CLIENT_ORIGIN, 10, 0, 0),
        Packet::new(255, CLIENT_ORIGIN, 10, 0, 0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u32, address: u8) -> Device {
        Device::new("ctrl", id, address)
    }

    #[test]
    fn toggle_on_bytes() {
        let packet = toggle(&device(3, 7), true).unwrap();
        assert_eq!(
            packet.to_bytes(),
            [0x3B, 7, 255, 4, 12, 3, ((7u32 + 255 + 4 + 12 + 3) & 0xFF) as u8]
        );
    }

    #[test]
    fn toggle_off_uses_value_two() {
        let packet = toggle(&device(3, 7), false).unwrap();
        assert_eq!(packet.data1(), 12);
        assert_eq!(packet.data2(), 2);
    }

    #[test]
    fn set_temperature_writes_then_reads_back() {
        let [write, read_back] = set_temperature(&device(5, 10), 21.5).unwrap();
        assert_eq!(write.dst(), 10);
        assert_eq!(write.data1(), 22);
        assert_eq!(write.data2(), 43);
        assert_eq!(read_back.data1(), 23);
        assert_eq!(read_back.data2(), 0);
    }

    #[test]
    fn set_temperature_rounds_to_half_degrees() {
        let [write, _] = set_temperature(&device(0, 1), 20.3).unwrap();
        assert_eq!(write.data2(), 41);
        let [write, _] = set_temperature(&device(0, 1), 20.2).unwrap();
        assert_eq!(write.data2(), 40);
    }

    #[test]
    fn set_temperature_rejects_unencodable_values() {
        assert!(matches!(
            set_temperature(&device(0, 1), 200.0),
            Err(Error::InvalidTemperature(_))
        ));
        assert!(matches!(
            set_temperature(&device(0, 1), f64::NAN),
            Err(Error::InvalidTemperature(_))
        ));
        assert!(matches!(
            set_temperature(&device(0, 1), -1.0),
            Err(Error::InvalidTemperature(_))
        ));
    }

    #[test]
    fn read_request_targets_current_temperature() {
        let packet = read(&device(2, 9)).unwrap();
        assert_eq!(packet, Packet::new(9, 255, 4, 11, 0));
    }

    #[test]
    fn device_id_beyond_register_range_is_an_encoding_error() {
        assert!(matches!(
            toggle(&device(64, 1), true),
            Err(Error::Encoding { field: "data1", .. })
        ));
        assert!(matches!(
            read(&device(u32::MAX, 1)),
            Err(Error::Encoding { field: "data1", .. })
        ));
    }

    #[test]
    fn keepalive_sequence() {
        let packets = keepalive();
        assert_eq!(packets[0], Packet::new(1, 254, 4, 35, 0));
        assert_eq!(packets[1], Packet::new(1, 255, 10, 0, 0));
        assert_eq!(packets[2], Packet::new(255, 255, 10, 0, 0));
    }
}
