use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use modsync_core::SyncError;
use tracing::debug;

pub(crate) const DEVICE_VOLUME_NAME: &str = "CIRCUITPY";

/// `--path` when given, otherwise the first mounted volume named
/// `CIRCUITPY`.
pub(crate) fn locate_device(path_override: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = path_override {
        if !path.is_dir() {
            return Err(SyncError::DeviceNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        return Ok(path.to_path_buf());
    }

    let candidates = device_candidates();
    debug!(candidates = candidates.len(), "searched mounted volumes");

    candidates
        .into_iter()
        .find(|mount| mount.is_dir())
        .ok_or_else(|| {
            SyncError::DeviceNotLocated {
                volume: DEVICE_VOLUME_NAME.to_string(),
            }
            .into()
        })
}

fn is_device_volume(mount: &Path) -> bool {
    mount
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == DEVICE_VOLUME_NAME)
}

fn device_candidates() -> Vec<PathBuf> {
    if cfg!(windows) {
        return windows_drive_roots();
    }

    let mounts = match std::fs::read_to_string("/proc/mounts") {
        Ok(contents) => parse_proc_mounts(&contents),
        Err(_) => match Command::new("mount").output() {
            Ok(output) if output.status.success() => {
                parse_mount_output(&String::from_utf8_lossy(&output.stdout))
            }
            _ => Vec::new(),
        },
    };
    mounts
        .into_iter()
        .filter(|mount| is_device_volume(mount))
        .collect()
}

/// Mount points from `/proc/mounts`. Spaces in paths are octal-escaped.
pub(crate) fn parse_proc_mounts(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|raw| PathBuf::from(unescape_mount_path(raw)))
        .collect()
}

/// Mount points from `mount` output lines such as
/// `/dev/disk4s1 on /Volumes/CIRCUITPY (msdos, local, nodev)`.
pub(crate) fn parse_mount_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(" on ")?;
            let end = rest
                .find(" (")
                .or_else(|| rest.find(" type "))
                .unwrap_or(rest.len());
            Some(PathBuf::from(rest[..end].trim()))
        })
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let digits = chars.clone().take(3).collect::<String>();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => {
                out.push(char::from(byte));
                for _ in 0..3 {
                    chars.next();
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Windows has no mount table; a drive root whose volume holds
/// `boot_out.txt` is treated as a device.
fn windows_drive_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for letter in b'D'..=b'Z' {
        let root = PathBuf::from(format!("{}:\\", char::from(letter)));
        if root.join("boot_out.txt").is_file() {
            roots.push(root);
        }
    }
    roots
}
