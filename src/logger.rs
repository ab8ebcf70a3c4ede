use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::diff::diff_json;
use crate::packet::Packet;
use crate::types::DeviceSnapshot;

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// Appends one JSON object per line for every frame in either direction
/// and every published snapshot.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_snapshot: Option<Value>,
}

fn packet_fields(packet: &Packet) -> Value {
    let raw: String = packet
        .to_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    json!({
        "dst": packet.dst(),
        "ori": packet.ori(),
        "cmd": packet.cmd(),
        "data1": packet.data1(),
        "data2": packet.data2(),
        "raw": raw,
    })
}

fn stamped(dir: &str, mut fields: Value) -> Value {
    if let Value::Object(map) = &mut fields {
        map.insert("ts".into(), Value::String(Utc::now().to_rfc3339()));
        map.insert("dir".into(), Value::String(dir.into()));
    }
    fields
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_snapshot: None,
        })
    }

    pub fn log_rx(&mut self, packet: &Packet) {
        self.write_line(&stamped("rx", json!({ "packet": packet_fields(packet) })));
    }

    pub fn log_tx(&mut self, action: &str, device: Option<u32>, packet: &Packet) {
        let fields = json!({
            "action": action,
            "device": device,
            "packet": packet_fields(packet),
        });
        self.write_line(&stamped("tx", fields));
    }

    /// Full mode writes every snapshot. Diffed mode writes the first one in
    /// full and only `{path, old, new}` changes after that.
    pub fn log_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        let body = match serde_json::to_value(snapshot) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to serialize snapshot: {e}");
                return;
            }
        };

        let fields = match self.mode {
            MessageLogMode::Full => json!({ "body": body }),
            MessageLogMode::Diffed => {
                let fields = match self.previous_snapshot.take() {
                    None => json!({ "full": true, "body": &body }),
                    Some(prev) => {
                        let mut changes = Vec::new();
                        diff_json(&prev, &body, "", &mut changes);
                        let changes: Vec<Value> = changes
                            .into_iter()
                            .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                            .collect();
                        json!({ "changes": changes })
                    }
                };
                self.previous_snapshot = Some(body);
                fields
            }
        };
        self.write_line(&stamped("snapshot", fields));
    }

    fn write_line(&mut self, entry: &Value) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to encode log entry: {e}");
                return;
            }
        };
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(error = %e, "failed to write log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Device;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_rx_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_rx(&Packet::new(1, 255, 4, 22, 44));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["dir"], "rx");
        assert_eq!(lines[0]["packet"]["data1"], 22);
        assert_eq!(lines[0]["packet"]["raw"], "3b01ff04162c46");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn log_tx_captures_action_and_device() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_tx("toggle", Some(3), &Packet::new(7, 255, 4, 12, 3));
        logger.log_tx("keepalive", None, &Packet::new(1, 255, 10, 0, 0));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "tx");
        assert_eq!(lines[0]["action"], "toggle");
        assert_eq!(lines[0]["device"], 3);
        assert!(lines[1]["device"].is_null());
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let first = DeviceSnapshot::new("c", vec![Device::new("c", 5, 10)]);
        let mut second = first.clone();
        second.devices[0].target_temperature = Some(44);
        logger.log_snapshot(&first);
        logger.log_snapshot(&second);

        let lines = read_lines(path);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["body"].is_object());
        let changes = lines[1]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "devices.0.target_temperature");
        assert_eq!(changes[0]["new"], 44);
    }

    #[test]
    fn full_mode_always_writes_body() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();

        let snapshot = DeviceSnapshot::new("c", vec![Device::new("c", 5, 10)]);
        logger.log_snapshot(&snapshot);
        logger.log_snapshot(&snapshot);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert!(lines[1]["body"]["devices"].is_array());
    }

    #[test]
    fn diffed_mode_no_changes_logs_empty_array() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let snapshot = DeviceSnapshot::new("c", vec![Device::new("c", 5, 10)]);
        logger.log_snapshot(&snapshot);
        logger.log_snapshot(&snapshot);

        let lines = read_lines(path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["changes"].as_array().unwrap().len(), 0);
    }
}
