use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SESSIONS_LOG_FILE: &str = "sessions.log";
pub const ROUTER_LOG_FILE: &str = "router.log";

pub fn log_path(state_root: &Path, file: &str) -> PathBuf {
    state_root.join("logs").join(file)
}

/// Appends one JSON object per line. Logging never fails the caller.
pub fn append_json_log(
    state_root: &Path,
    file: &str,
    timestamp: i64,
    level: &str,
    event: &str,
    fields: Map<String, Value>,
) {
    let mut payload = Map::new();
    payload.insert("timestamp".to_string(), Value::from(timestamp));
    payload.insert("level".to_string(), Value::String(level.to_string()));
    payload.insert("event".to_string(), Value::String(event.to_string()));
    payload.extend(fields);

    let Ok(line) = serde_json::to_string(&Value::Object(payload)) else {
        return;
    };

    let path = log_path(state_root, file);
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}
