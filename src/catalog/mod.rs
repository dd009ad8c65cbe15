//! Catalog records and the persistence seam used by the scanner.
//!
//! The scanner only talks to [`CatalogStore`]; [`SqliteCatalog`] is the
//! implementation backed by the application's SQLite pool. Records are keyed
//! by an internal id and by a natural key (`fs_slug` for platforms,
//! `(platform_id, file_name)` for roms and firmware). Upserts go through the
//! natural key, so re-scanning an item keeps its internal id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::providers::{ExternalIds, ProviderKind, ProviderMatch};

mod sqlite;

pub use sqlite::SqliteCatalog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub id: i64,
    pub fs_slug: String,
    pub slug: String,
    pub name: String,
    #[serde(flatten)]
    pub external_ids: ExternalIds,
}

/// Platform as derived from disk, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPlatform {
    pub fs_slug: String,
    pub slug: String,
    pub name: String,
    pub external_ids: ExternalIds,
}

/// One optional match per provider. The two are never merged into each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMatches {
    pub igdb_metadata: Option<ProviderMatch>,
    pub moby_metadata: Option<ProviderMatch>,
}

impl ProviderMatches {
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderMatch> {
        match kind {
            ProviderKind::Igdb => self.igdb_metadata.as_ref(),
            ProviderKind::Moby => self.moby_metadata.as_ref(),
        }
    }

    pub fn set(&mut self, kind: ProviderKind, value: ProviderMatch) {
        match kind {
            ProviderKind::Igdb => self.igdb_metadata = Some(value),
            ProviderKind::Moby => self.moby_metadata = Some(value),
        }
    }

    pub fn external_ids(&self) -> ExternalIds {
        ExternalIds {
            igdb_id: self.igdb_metadata.as_ref().map(|m| m.id),
            moby_id: self.moby_metadata.as_ref().map(|m| m.id),
        }
    }

    /// First available match, igdb preferred.
    pub fn primary(&self) -> Option<&ProviderMatch> {
        self.igdb_metadata.as_ref().or(self.moby_metadata.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RomTags {
    pub regions: Vec<String>,
    pub languages: Vec<String>,
    pub revision: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RomRecord {
    pub id: i64,
    pub platform_id: i64,
    pub file_name: String,
    pub file_name_no_tags: String,
    pub file_name_no_ext: String,
    pub file_extension: String,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub name: String,
    #[serde(flatten)]
    pub tags: RomTags,
    pub multi: bool,
    pub files: Vec<String>,
    #[serde(flatten)]
    pub metadata: ProviderMatches,
}

impl RomRecord {
    pub fn external_ids(&self) -> ExternalIds {
        self.metadata.external_ids()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRom {
    pub platform_id: i64,
    pub file_name: String,
    pub file_name_no_tags: String,
    pub file_name_no_ext: String,
    pub file_extension: String,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub name: String,
    pub tags: RomTags,
    pub multi: bool,
    pub files: Vec<String>,
    pub metadata: ProviderMatches,
}

impl ScannedRom {
    pub fn external_ids(&self) -> ExternalIds {
        self.metadata.external_ids()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareRecord {
    pub id: i64,
    pub platform_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFirmware {
    pub platform_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_size_bytes: i64,
}

/// Keyed persistence for platforms, roms and firmware.
///
/// Implementations are expected to serialize concurrent writes per record;
/// the scanner never holds a transaction across items.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_platform(&self, id: i64) -> anyhow::Result<Option<PlatformRecord>>;
    async fn get_platform_by_fs_slug(&self, fs_slug: &str) -> anyhow::Result<Option<PlatformRecord>>;
    async fn list_platforms(&self) -> anyhow::Result<Vec<PlatformRecord>>;
    async fn upsert_platform(&self, platform: &ScannedPlatform) -> anyhow::Result<PlatformRecord>;
    /// Deletes every platform whose `fs_slug` is not in `keep`; returns the count.
    async fn purge_platforms(&self, keep_fs_slugs: &[String]) -> anyhow::Result<u64>;

    async fn get_rom(&self, id: i64) -> anyhow::Result<Option<RomRecord>>;
    async fn get_rom_by_file_name(&self, platform_id: i64, file_name: &str) -> anyhow::Result<Option<RomRecord>>;
    async fn list_roms(&self, platform_id: i64) -> anyhow::Result<Vec<RomRecord>>;
    async fn upsert_rom(&self, rom: &ScannedRom) -> anyhow::Result<RomRecord>;
    async fn purge_roms(&self, platform_id: i64, keep_file_names: &[String]) -> anyhow::Result<u64>;

    async fn get_firmware(&self, id: i64) -> anyhow::Result<Option<FirmwareRecord>>;
    async fn get_firmware_by_file_name(
        &self,
        platform_id: i64,
        file_name: &str,
    ) -> anyhow::Result<Option<FirmwareRecord>>;
    async fn list_firmware(&self, platform_id: i64) -> anyhow::Result<Vec<FirmwareRecord>>;
    async fn upsert_firmware(&self, firmware: &ScannedFirmware) -> anyhow::Result<FirmwareRecord>;
    async fn purge_firmware(&self, platform_id: i64, keep_file_names: &[String]) -> anyhow::Result<u64>;
}
