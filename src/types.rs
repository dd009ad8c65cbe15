use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::catalog::{FirmwareRecord, PlatformRecord, RomRecord};

/// Which existing catalog items are eligible for a metadata re-scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ScanMode {
    NewPlatforms,
    #[default]
    Quick,
    Unidentified,
    Partial,
    Complete,
    NoScan,
}

impl ScanMode {
    pub const ALL: [ScanMode; 6] = [
        ScanMode::NewPlatforms,
        ScanMode::Quick,
        ScanMode::Unidentified,
        ScanMode::Partial,
        ScanMode::Complete,
        ScanMode::NoScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::NewPlatforms => "NEW_PLATFORMS",
            ScanMode::Quick => "QUICK",
            ScanMode::Unidentified => "UNIDENTIFIED",
            ScanMode::Partial => "PARTIAL",
            ScanMode::Complete => "COMPLETE",
            ScanMode::NoScan => "NO_SCAN",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        ScanMode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown scan type '{}'", s))
    }
}

impl TryFrom<String> for ScanMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Parameters of one scan run, as received from the triggering boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Platform ids to scan; empty means every platform found on disk.
    #[serde(default)]
    pub platforms: Vec<i64>,
    #[serde(default, rename = "type")]
    pub mode: ScanMode,
    /// Rom ids that are re-scanned whatever the mode says.
    #[serde(default)]
    pub roms: Vec<i64>,
    /// Provider names; empty means every enabled provider.
    #[serde(default)]
    pub apis: Vec<String>,
}

impl ScanRequest {
    pub fn new(mode: ScanMode) -> Self {
        Self { mode, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub scanned_platforms: u64,
    pub added_platforms: u64,
    pub identified_platforms: u64,
    pub scanned_roms: u64,
    pub added_roms: u64,
    pub identified_roms: u64,
    pub scanned_firmware: u64,
    pub added_firmware: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomEvent {
    pub platform_name: String,
    pub platform_slug: String,
    #[serde(flatten)]
    pub rom: RomRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareEvent {
    pub platform_name: String,
    pub platform_slug: String,
    #[serde(flatten)]
    pub firmware: FirmwareRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoProviders,
    Structure,
    Cancelled,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub reason: FailureReason,
    pub message: String,
}

/// Progress of a scan run, published to every subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanningPlatform(PlatformRecord),
    ScanningFirmware(FirmwareEvent),
    ScanningRom(RomEvent),
    Done(ScanStatistics),
    DoneKo(ScanFailure),
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::ScanningPlatform(_) => "scanning_platform",
            ScanEvent::ScanningFirmware(_) => "scanning_firmware",
            ScanEvent::ScanningRom(_) => "scanning_rom",
            ScanEvent::Done(_) => "done",
            ScanEvent::DoneKo(_) => "done_ko",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Done(_) | ScanEvent::DoneKo(_))
    }
}
