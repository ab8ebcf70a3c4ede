use serde_json::Value;

use crate::types::*;

/// Recursively collect `(path, old, new)` for every leaf that differs.
/// Arrays are compared element by element, paths use `.` separators.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    let join = |key: &str| {
        if path_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{path_prefix}.{key}")
        }
    };

    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join(key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) if prev_arr.len() == curr_arr.len() => {
            for (idx, (prev_val, curr_val)) in prev_arr.iter().zip(curr_arr).enumerate() {
                diff_json(prev_val, curr_val, &join(&idx.to_string()), changes);
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Typed events for every reconciled field that changed between two
/// snapshots of the same roster.
pub(crate) fn device_events(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> Vec<Event> {
    let mut events = Vec::new();
    for (old, new) in previous.devices.iter().zip(&current.devices) {
        if old.device_id != new.device_id {
            continue;
        }
        let device_id = new.device_id;
        let name = || new.name.clone();

        if old.on != new.on {
            events.push(Event::PowerChanged {
                device_id,
                name: name(),
                on: new.on,
            });
        }
        if old.mode != new.mode {
            events.push(Event::ModeChanged {
                device_id,
                name: name(),
                mode: new.mode,
            });
        }
        if let Some(raw) = changed(old.target_temperature, new.target_temperature) {
            events.push(Event::TargetTemperatureChanged {
                device_id,
                name: name(),
                raw,
            });
        }
        if let Some(raw) = changed(old.current_temperature, new.current_temperature) {
            events.push(Event::CurrentTemperatureChanged {
                device_id,
                name: name(),
                raw,
            });
        }
        if let Some(raw) = changed(old.current_humidity, new.current_humidity) {
            events.push(Event::HumidityChanged {
                device_id,
                name: name(),
                raw,
            });
        }
    }
    events
}

fn changed(old: Option<u8>, new: Option<u8>) -> Option<u8> {
    match (old, new) {
        (o, Some(n)) if o != Some(n) => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(devices: Vec<Device>) -> DeviceSnapshot {
        DeviceSnapshot::new("ctrl", devices)
    }

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"devices": [{"on": false}]});
        let curr = json!({"devices": [{"on": true}]});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "devices.0.on");
        assert_eq!(changes[0].1, json!(false));
        assert_eq!(changes[0].2, json!(true));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"controller_name": "c", "devices": [{"target_temperature": 44}]});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_key() {
        let prev = json!({"status": {}});
        let curr = json!({"status": {"humidity": 140}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "status.humidity");
        assert_eq!(changes[0].1, Value::Null);
    }

    #[test]
    fn target_temperature_event() {
        let before = snapshot(vec![Device::new("ctrl", 5, 10)]);
        let mut after = before.clone();
        after.devices[0].name = "Climate Salon".into();
        after.devices[0].target_temperature = Some(44);

        let events = device_events(&before, &after);
        assert_eq!(
            events,
            vec![Event::TargetTemperatureChanged {
                device_id: 5,
                name: "Climate Salon".into(),
                raw: 44
            }]
        );
    }

    #[test]
    fn power_and_mode_events() {
        let before = snapshot(vec![Device::new("ctrl", 1, 10), Device::new("ctrl", 2, 11)]);
        let mut after = before.clone();
        after.devices[1].on = true;
        after.devices[0].mode = Mode::Cool;

        let events = device_events(&before, &after);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::ModeChanged { device_id: 1, mode: Mode::Cool, .. }));
        assert!(matches!(events[1], Event::PowerChanged { device_id: 2, on: true, .. }));
    }

    #[test]
    fn identical_snapshots_emit_nothing() {
        let before = snapshot(vec![Device::new("ctrl", 1, 10)]);
        assert!(device_events(&before, &before.clone()).is_empty());
    }
}
