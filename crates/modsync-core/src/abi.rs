use std::fmt;

use serde::{Deserialize, Serialize};

/// Directory name of the source-form variant inside a cached bundle.
pub const SOURCE_PLATFORM_DIR: &str = "py";

/// Runtime major version a compiled variant is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetAbi {
    pub major: u32,
}

impl TargetAbi {
    pub fn new(major: u32) -> Self {
        Self { major }
    }

    /// Platform directory used by upstream release archives, e.g. `9.x-mpy`.
    pub fn dir_name(self) -> String {
        format!("{}.x-mpy", self.major)
    }

    pub fn parse_dir_name(input: &str) -> Option<Self> {
        let major = input.trim().strip_suffix(".x-mpy")?;
        major.parse::<u32>().ok().map(Self::new)
    }
}

impl fmt::Display for TargetAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRuntime {
    pub version: String,
    pub board_id: Option<String>,
}

impl DeviceRuntime {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            board_id: None,
        }
    }

    /// Parses the device's `boot_out.txt`. The first line reads like
    /// `Adafruit CircuitPython 9.2.1 on 2024-11-20; Board Name with mcu`,
    /// the optional second line `Board ID:board_name`.
    pub fn parse_boot_out(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let version_line = lines.next()?;
        let head = version_line.split(';').next().unwrap_or(version_line);
        let words = head.split_whitespace().collect::<Vec<_>>();
        if words.len() < 3 {
            return None;
        }
        let version = words[words.len() - 3];
        if !version.starts_with(|ch: char| ch.is_ascii_digit()) {
            return None;
        }

        let board_id = lines
            .next()
            .and_then(|line| line.strip_prefix("Board ID:"))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Some(Self {
            version: version.to_string(),
            board_id,
        })
    }

    pub fn major(&self) -> Option<u32> {
        self.version.split('.').next()?.trim().parse().ok()
    }

    pub fn target_abi(&self) -> Option<TargetAbi> {
        self.major().map(TargetAbi::new)
    }
}
