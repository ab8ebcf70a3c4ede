//! Parsing of the controller's device list (`Instal.dat`).
//!
//! The file holds one record per zone, eight lines each:
//! map, name label, x, y, bus address, output, type, icon.
//! The output number doubles as the zone's device id. Fetching the file
//! from the controller is left to the caller.

use std::str::FromStr;

use crate::types::Device;
use crate::{Error, Result};

const RECORD_LINES: usize = 8;

pub fn device_name(label: &str) -> String {
    format!("Climate {label}")
}

/// Parse the device list into roster entries. A trailing partial record is
/// ignored.
pub fn parse_roster(text: &str, controller_name: &str) -> Result<Vec<Device>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut devices = Vec::with_capacity(lines.len() / RECORD_LINES);

    for (record, chunk) in lines.chunks_exact(RECORD_LINES).enumerate() {
        let first = record * RECORD_LINES;
        let field = |offset: usize| Field {
            line: first + offset + 1,
            value: chunk[offset].trim(),
        };

        let output: u32 = field(5).parse()?;
        let mut device = Device::new(controller_name, output, field(4).parse()?);
        device.map = field(0).parse()?;
        device.name = device_name(field(1).value);
        device.pos_x = field(2).parse()?;
        device.pos_y = field(3).parse()?;
        device.kind = field(6).parse()?;
        device.icon = field(7).parse()?;
        devices.push(device);
    }

    Ok(devices)
}

struct Field<'a> {
    line: usize,
    value: &'a str,
}

impl Field<'_> {
    fn parse<T: FromStr>(&self) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        self.value.parse().map_err(|e: T::Err| Error::Roster {
            line: self.line,
            message: format!("{:?}: {e}", self.value),
        })
    }
}
