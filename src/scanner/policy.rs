//! Reconciliation policy: which items a scan run (re-)scans.

use crate::catalog::RomRecord;
use crate::types::ScanMode;

/// Platforms are only skipped by NEW_PLATFORMS, and only when already known.
pub fn should_scan_platform(mode: ScanMode, exists: bool) -> bool {
    !(mode == ScanMode::NewPlatforms && exists)
}

/// Decides whether a rom gets a metadata lookup in this run.
///
/// | mode          | new rom | existing rom                  |
/// |---------------|---------|-------------------------------|
/// | NEW_PLATFORMS | yes     | no                            |
/// | QUICK         | yes     | no                            |
/// | UNIDENTIFIED  | yes     | if it has no external id      |
/// | PARTIAL       | yes     | if it misses any external id  |
/// | COMPLETE      | yes     | yes                           |
/// | NO_SCAN       | no      | no                            |
///
/// An existing rom whose id is in `selected` is always scanned.
pub fn should_scan_rom(mode: ScanMode, existing: Option<&RomRecord>, selected: &[i64]) -> bool {
    if existing.is_some_and(|rom| selected.contains(&rom.id)) {
        return true;
    }
    match (mode, existing) {
        (ScanMode::NoScan, _) => false,
        (ScanMode::Complete, _) => true,
        (_, None) => true,
        (ScanMode::NewPlatforms | ScanMode::Quick, Some(_)) => false,
        (ScanMode::Unidentified, Some(rom)) => !rom.external_ids().has_any(),
        (ScanMode::Partial, Some(rom)) => !rom.external_ids().has_all(),
    }
}
