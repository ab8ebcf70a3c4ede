use serde::{Deserialize, Serialize};

/// Operating mode reported by a zone. The controller encodes it in the low
/// nibble of the value byte: even is heat, odd is cool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Heat,
    Cool,
}

impl Mode {
    pub fn from_raw(raw: u8) -> Self {
        match (raw & 0x0F) % 2 {
            0 => Mode::Heat,
            _ => Mode::Cool,
        }
    }
}

/// One thermostat zone known to the controller.
///
/// Temperatures and humidity are kept in the controller's raw byte units;
/// `None` means the zone has not reported a usable value yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: u32,
    pub unique_id: String,
    pub name: String,
    pub map: u32,
    pub pos_x: i32,
    pub pos_y: i32,
    pub address: u8,
    pub output: u32,
    #[serde(rename = "type")]
    pub kind: u32,
    pub icon: u32,
    pub dato1: u8,
    pub dato2: u8,
    pub current_temperature: Option<u8>,
    pub target_temperature: Option<u8>,
    pub current_humidity: Option<u8>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub on: bool,
}

pub const DEFAULT_DEVICE_TYPE: u32 = 49;

impl Device {
    /// A device with the roster defaults: no readings, heat mode, off.
    pub fn new(controller_name: &str, device_id: u32, address: u8) -> Self {
        Self {
            device_id,
            unique_id: unique_id(controller_name, device_id),
            name: String::new(),
            map: 0,
            pos_x: 0,
            pos_y: 0,
            address,
            output: device_id,
            kind: DEFAULT_DEVICE_TYPE,
            icon: 0,
            dato1: 2,
            dato2: 0,
            current_temperature: None,
            target_temperature: None,
            current_humidity: None,
            mode: Mode::Heat,
            on: false,
        }
    }
}

pub fn unique_id(controller_name: &str, device_id: u32) -> String {
    format!("{controller_name}_{device_id}")
}

/// Controller name derived from its host: dots become underscores.
pub fn controller_name(host: &str) -> String {
    host.replace('.', "_")
}

/// A complete, immutable view of every device on one controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub controller_name: String,
    pub devices: Vec<Device>,
}

impl DeviceSnapshot {
    pub fn new(controller_name: impl Into<String>, devices: Vec<Device>) -> Self {
        Self {
            controller_name: controller_name.into(),
            devices,
        }
    }

    pub fn device(&self, device_id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}

/// Changes detected when a packet is reconciled into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PowerChanged { device_id: u32, name: String, on: bool },
    ModeChanged { device_id: u32, name: String, mode: Mode },
    TargetTemperatureChanged { device_id: u32, name: String, raw: u8 },
    CurrentTemperatureChanged { device_id: u32, name: String, raw: u8 },
    HumidityChanged { device_id: u32, name: String, raw: u8 },
}
