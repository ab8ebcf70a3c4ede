//! Applying inbound packets to the device roster.
//!
//! Each zone exposes five registers, selected by `data1`:
//!
//! | data1       | field                 |
//! |-------------|-----------------------|
//! | `id*4`      | power (`data2 == 3`)  |
//! | `id*4 + 1`  | mode                  |
//! | `id*4 + 2`  | target temperature    |
//! | `id*4 + 3`  | current temperature   |
//! | `id + 100`  | current humidity      |
//!
//! A zero value byte means the zone has nothing to report yet and never
//! overwrites a known value.

use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::packet::Packet;
use crate::types::{Device, DeviceSnapshot, Mode};

const HUMIDITY_OFFSET: u32 = 100;
const POWER_ON: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Register {
    Power,
    Mode,
    TargetTemperature,
    CurrentTemperature,
    Humidity,
}

impl Register {
    fn locate(device_id: u32, data1: u8) -> Option<Self> {
        let data1 = u32::from(data1);
        let base = device_id.checked_mul(4)?;
        match data1.checked_sub(base) {
            Some(0) => Some(Register::Power),
            Some(1) => Some(Register::Mode),
            Some(2) => Some(Register::TargetTemperature),
            Some(3) => Some(Register::CurrentTemperature),
            _ if device_id.checked_add(HUMIDITY_OFFSET) == Some(data1) => {
                Some(Register::Humidity)
            }
            _ => None,
        }
    }

    fn apply(self, device: &Device, value: u8) -> Device {
        let mut next = device.clone();
        match self {
            Register::Power => next.on = value == POWER_ON,
            Register::Mode => next.mode = Mode::from_raw(value),
            Register::TargetTemperature => next.target_temperature = Some(value),
            Register::CurrentTemperature => next.current_temperature = Some(value),
            Register::Humidity => next.current_humidity = Some(value),
        }
        next
    }
}

/// Derive the roster that results from one inbound packet.
///
/// Only the first device whose register matches is touched, and only one
/// of its fields. Packets not addressed to the listener, or carrying a zero
/// value, return an unchanged copy.
pub fn reconcile(packet: &Packet, devices: &[Device]) -> Vec<Device> {
    let mut next = devices.to_vec();
    if !packet.is_for_listener() || packet.data2() == 0 {
        return next;
    }

    let hit = devices.iter().enumerate().find_map(|(idx, device)| {
        Register::locate(device.device_id, packet.data1()).map(|reg| (idx, reg))
    });
    if let Some((idx, register)) = hit {
        trace!(device_id = devices[idx].device_id, ?register, value = packet.data2(), "register update");
        next[idx] = register.apply(&devices[idx], packet.data2());
    }
    next
}

/// Holder of the current snapshot. Readers get an `Arc` to a complete
/// snapshot and never see a half-applied update.
#[derive(Debug)]
pub struct DeviceRegistry {
    current: RwLock<Arc<DeviceSnapshot>>,
}

impl DeviceRegistry {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn device(&self, device_id: u32) -> Option<Device> {
        self.snapshot().device(device_id).cloned()
    }

    /// Reconcile `packet` into a new snapshot and make it current.
    /// Returns the previous and the new snapshot.
    pub fn apply(&self, packet: &Packet) -> (Arc<DeviceSnapshot>, Arc<DeviceSnapshot>) {
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = Arc::clone(&guard);
        if !packet.is_for_listener() {
            debug!(dst = packet.dst(), "packet not addressed to listener, dropped");
            return (Arc::clone(&previous), previous);
        }
        let next = Arc::new(DeviceSnapshot {
            controller_name: previous.controller_name.clone(),
            devices: reconcile(packet, &previous.devices),
        });
        *guard = Arc::clone(&next);
        (previous, next)
    }
}
