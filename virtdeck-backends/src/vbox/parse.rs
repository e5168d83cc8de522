//! Parsers for VBoxManage output.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::InstanceState;

/// `list vms` prints one line per machine: `"My VM" {uuid}`.
pub fn parse_list_line(line: &str) -> Option<(String, String)> {
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINE_RE.get_or_init(|| {
        Regex::new(r#"^"([^"]+)"\s+\{([^}]+)\}$"#).expect("list line regex")
    });

    let caps = re.captures(line.trim())?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Parse `--machinereadable` output into a key/value map.
///
/// Values are quoted; some keys (storage attachment slots) are quoted too.
pub fn parse_machine_readable(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            map.insert(
                key.trim().trim_matches('"').to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    map
}

/// One storage attachment as reported by `showvminfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttachment {
    pub controller: String,
    pub port: u32,
    pub device: u32,
    pub drive_type: String,
    pub medium: String,
}

/// Parser context while scanning attachment lines.
enum ControllerContext {
    NoController,
    HaveController(String),
}

/// Single-pass scan of `--machinereadable` output for storage attachments.
///
/// Controller-name lines establish context for the attachment lines that
/// follow them; attachment lines do not repeat the controller name, so line
/// order is load-bearing. An attachment seen before any controller line is
/// dropped.
pub fn parse_disk_attachments(output: &str) -> Vec<RawAttachment> {
    let mut context = ControllerContext::NoController;
    let mut attachments = Vec::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_matches('"').to_ascii_lowercase();
        let value = value.trim().trim_matches('"');

        if key.starts_with("storagecontrollername") {
            context = ControllerContext::HaveController(value.to_string());
        } else if key.starts_with("storageattach") {
            let controller = match &context {
                ControllerContext::HaveController(name) => name.clone(),
                ControllerContext::NoController => continue,
            };

            let parts: Vec<&str> = value.split(',').collect();
            if parts.len() < 4 {
                continue;
            }
            let port = match parts[0].trim().parse::<u32>() {
                Ok(p) => p,
                Err(_) => continue,
            };
            let device = match parts[1].trim().parse::<u32>() {
                Ok(d) => d,
                Err(_) => continue,
            };

            attachments.push(RawAttachment {
                controller,
                port,
                device,
                drive_type: parts[2].trim().to_string(),
                medium: parts[3].trim().to_string(),
            });
        }
    }

    attachments
}

/// Parse `showhdinfo` colon-separated lines into (size in MiB, format).
///
/// Capacity is reported as `20480 MBytes`; an unparseable value degrades to
/// 0 rather than failing the listing.
pub fn parse_hdinfo(output: &str) -> (u64, String) {
    let mut size_mb = 0;
    let mut format = "Unknown".to_string();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Capacity" => {
                size_mb = value
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
            }
            "Format" => format = value.to_string(),
            _ => {}
        }
    }

    (size_mb, format)
}

/// Map a VirtualBox `VMState` value into the shared vocabulary.
pub fn map_vm_state(state: &str) -> InstanceState {
    match state {
        "running" => InstanceState::Running,
        "poweroff" => InstanceState::Stopped,
        "paused" => InstanceState::Paused,
        "saved" => InstanceState::Suspended,
        _ => InstanceState::Unknown,
    }
}
