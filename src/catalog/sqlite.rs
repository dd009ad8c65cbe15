use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

use super::{
    CatalogStore, FirmwareRecord, PlatformRecord, ProviderMatches, RomRecord, RomTags, ScannedFirmware,
    ScannedPlatform, ScannedRom,
};
use crate::providers::{ExternalIds, ProviderMatch};

// SQLite's default bound-variable limit; purge deletes are chunked below it.
const SQLITE_MAX_VARS: usize = 999;

const PLATFORM_COLUMNS: &str = "id, fs_slug, slug, name, igdb_id, moby_id";
const ROM_COLUMNS: &str = "id, platform_id, file_name, file_name_no_tags, file_name_no_ext, file_extension, \
     file_path, file_size_bytes, name, regions, languages, revision, tags, multi, files, igdb_metadata, moby_metadata";
const FIRMWARE_COLUMNS: &str = "id, platform_id, file_name, file_path, file_size_bytes";

/// [`CatalogStore`] backed by the application's SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn delete_ids(&self, table: &str, ids: &[i64]) -> anyhow::Result<u64> {
        let mut deleted = 0u64;
        for chunk in ids.chunks(SQLITE_MAX_VARS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("DELETE FROM {} WHERE id IN (", table));
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
            sep.push_unseparated(")");
            deleted += qb.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(deleted)
    }

    /// Ids of `table` rows for `platform_id` whose file name is not in `keep`.
    async fn stale_file_ids(&self, table: &str, platform_id: i64, keep: &[String]) -> anyhow::Result<Vec<i64>> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let rows = sqlx::query(&format!("SELECT id, file_name FROM {} WHERE platform_id=?1", table))
            .bind(platform_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| !keep.contains(r.get::<String, _>("file_name").as_str()))
            .map(|r| r.get::<i64, _>("id"))
            .collect())
    }
}

fn platform_from_row(r: &SqliteRow) -> PlatformRecord {
    PlatformRecord {
        id: r.get("id"),
        fs_slug: r.get("fs_slug"),
        slug: r.get("slug"),
        name: r.get("name"),
        external_ids: ExternalIds { igdb_id: r.get("igdb_id"), moby_id: r.get("moby_id") },
    }
}

fn json_list(r: &SqliteRow, column: &str) -> anyhow::Result<Vec<String>> {
    Ok(serde_json::from_str(&r.get::<String, _>(column))?)
}

fn json_match(r: &SqliteRow, column: &str) -> anyhow::Result<Option<ProviderMatch>> {
    match r.get::<Option<String>, _>(column) {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn rom_from_row(r: &SqliteRow) -> anyhow::Result<RomRecord> {
    Ok(RomRecord {
        id: r.get("id"),
        platform_id: r.get("platform_id"),
        file_name: r.get("file_name"),
        file_name_no_tags: r.get("file_name_no_tags"),
        file_name_no_ext: r.get("file_name_no_ext"),
        file_extension: r.get("file_extension"),
        file_path: r.get("file_path"),
        file_size_bytes: r.get("file_size_bytes"),
        name: r.get("name"),
        tags: RomTags {
            regions: json_list(r, "regions")?,
            languages: json_list(r, "languages")?,
            revision: r.get("revision"),
            tags: json_list(r, "tags")?,
        },
        multi: r.get::<i64, _>("multi") != 0,
        files: json_list(r, "files")?,
        metadata: ProviderMatches {
            igdb_metadata: json_match(r, "igdb_metadata")?,
            moby_metadata: json_match(r, "moby_metadata")?,
        },
    })
}

fn firmware_from_row(r: &SqliteRow) -> FirmwareRecord {
    FirmwareRecord {
        id: r.get("id"),
        platform_id: r.get("platform_id"),
        file_name: r.get("file_name"),
        file_path: r.get("file_path"),
        file_size_bytes: r.get("file_size_bytes"),
    }
}

fn to_json_opt(m: Option<&ProviderMatch>) -> anyhow::Result<Option<String>> {
    m.map(serde_json::to_string).transpose().map_err(Into::into)
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn get_platform(&self, id: i64) -> anyhow::Result<Option<PlatformRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM platforms WHERE id=?1", PLATFORM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(platform_from_row))
    }

    async fn get_platform_by_fs_slug(&self, fs_slug: &str) -> anyhow::Result<Option<PlatformRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM platforms WHERE fs_slug=?1", PLATFORM_COLUMNS))
            .bind(fs_slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(platform_from_row))
    }

    async fn list_platforms(&self) -> anyhow::Result<Vec<PlatformRecord>> {
        let rows = sqlx::query(&format!("SELECT {} FROM platforms ORDER BY fs_slug ASC", PLATFORM_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(platform_from_row).collect())
    }

    async fn upsert_platform(&self, p: &ScannedPlatform) -> anyhow::Result<PlatformRecord> {
        sqlx::query(
            r#"INSERT INTO platforms (fs_slug, slug, name, igdb_id, moby_id)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(fs_slug) DO UPDATE SET
                 slug=excluded.slug,
                 name=excluded.name,
                 igdb_id=excluded.igdb_id,
                 moby_id=excluded.moby_id,
                 updated_at=strftime('%Y-%m-%dT%H:%M:%SZ','now')"#,
        )
        .bind(&p.fs_slug)
        .bind(&p.slug)
        .bind(&p.name)
        .bind(p.external_ids.igdb_id)
        .bind(p.external_ids.moby_id)
        .execute(&self.pool)
        .await?;

        self.get_platform_by_fs_slug(&p.fs_slug)
            .await?
            .ok_or_else(|| anyhow::anyhow!("platform {} missing after upsert", p.fs_slug))
    }

    async fn purge_platforms(&self, keep_fs_slugs: &[String]) -> anyhow::Result<u64> {
        let keep: HashSet<&str> = keep_fs_slugs.iter().map(String::as_str).collect();
        let rows = sqlx::query("SELECT id, fs_slug FROM platforms").fetch_all(&self.pool).await?;
        let stale: Vec<i64> = rows
            .into_iter()
            .filter(|r| !keep.contains(r.get::<String, _>("fs_slug").as_str()))
            .map(|r| r.get::<i64, _>("id"))
            .collect();
        self.delete_ids("platforms", &stale).await
    }

    async fn get_rom(&self, id: i64) -> anyhow::Result<Option<RomRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM roms WHERE id=?1", ROM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rom_from_row).transpose()
    }

    async fn get_rom_by_file_name(&self, platform_id: i64, file_name: &str) -> anyhow::Result<Option<RomRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM roms WHERE platform_id=?1 AND file_name=?2", ROM_COLUMNS))
            .bind(platform_id)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rom_from_row).transpose()
    }

    async fn list_roms(&self, platform_id: i64) -> anyhow::Result<Vec<RomRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM roms WHERE platform_id=?1 ORDER BY file_name ASC",
            ROM_COLUMNS
        ))
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rom_from_row).collect()
    }

    async fn upsert_rom(&self, rom: &ScannedRom) -> anyhow::Result<RomRecord> {
        let ids = rom.external_ids();
        sqlx::query(
            r#"INSERT INTO roms (platform_id, file_name, file_name_no_tags, file_name_no_ext, file_extension,
                   file_path, file_size_bytes, name, regions, languages, revision, tags, multi, files,
                   igdb_id, moby_id, igdb_metadata, moby_metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
               ON CONFLICT(platform_id, file_name) DO UPDATE SET
                 file_name_no_tags=excluded.file_name_no_tags,
                 file_name_no_ext=excluded.file_name_no_ext,
                 file_extension=excluded.file_extension,
                 file_path=excluded.file_path,
                 file_size_bytes=excluded.file_size_bytes,
                 name=excluded.name,
                 regions=excluded.regions,
                 languages=excluded.languages,
                 revision=excluded.revision,
                 tags=excluded.tags,
                 multi=excluded.multi,
                 files=excluded.files,
                 igdb_id=excluded.igdb_id,
                 moby_id=excluded.moby_id,
                 igdb_metadata=excluded.igdb_metadata,
                 moby_metadata=excluded.moby_metadata,
                 updated_at=strftime('%Y-%m-%dT%H:%M:%SZ','now')"#,
        )
        .bind(rom.platform_id)
        .bind(&rom.file_name)
        .bind(&rom.file_name_no_tags)
        .bind(&rom.file_name_no_ext)
        .bind(&rom.file_extension)
        .bind(&rom.file_path)
        .bind(rom.file_size_bytes)
        .bind(&rom.name)
        .bind(serde_json::to_string(&rom.tags.regions)?)
        .bind(serde_json::to_string(&rom.tags.languages)?)
        .bind(rom.tags.revision.as_deref())
        .bind(serde_json::to_string(&rom.tags.tags)?)
        .bind(if rom.multi { 1i64 } else { 0i64 })
        .bind(serde_json::to_string(&rom.files)?)
        .bind(ids.igdb_id)
        .bind(ids.moby_id)
        .bind(to_json_opt(rom.metadata.igdb_metadata.as_ref())?)
        .bind(to_json_opt(rom.metadata.moby_metadata.as_ref())?)
        .execute(&self.pool)
        .await?;

        self.get_rom_by_file_name(rom.platform_id, &rom.file_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("rom {} missing after upsert", rom.file_name))
    }

    async fn purge_roms(&self, platform_id: i64, keep_file_names: &[String]) -> anyhow::Result<u64> {
        let stale = self.stale_file_ids("roms", platform_id, keep_file_names).await?;
        self.delete_ids("roms", &stale).await
    }

    async fn get_firmware(&self, id: i64) -> anyhow::Result<Option<FirmwareRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM firmware WHERE id=?1", FIRMWARE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(firmware_from_row))
    }

    async fn get_firmware_by_file_name(
        &self,
        platform_id: i64,
        file_name: &str,
    ) -> anyhow::Result<Option<FirmwareRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM firmware WHERE platform_id=?1 AND file_name=?2",
            FIRMWARE_COLUMNS
        ))
        .bind(platform_id)
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(firmware_from_row))
    }

    async fn list_firmware(&self, platform_id: i64) -> anyhow::Result<Vec<FirmwareRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM firmware WHERE platform_id=?1 ORDER BY file_name ASC",
            FIRMWARE_COLUMNS
        ))
        .bind(platform_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(firmware_from_row).collect())
    }

    async fn upsert_firmware(&self, fw: &ScannedFirmware) -> anyhow::Result<FirmwareRecord> {
        sqlx::query(
            r#"INSERT INTO firmware (platform_id, file_name, file_path, file_size_bytes)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(platform_id, file_name) DO UPDATE SET
                 file_path=excluded.file_path,
                 file_size_bytes=excluded.file_size_bytes,
                 updated_at=strftime('%Y-%m-%dT%H:%M:%SZ','now')"#,
        )
        .bind(fw.platform_id)
        .bind(&fw.file_name)
        .bind(&fw.file_path)
        .bind(fw.file_size_bytes)
        .execute(&self.pool)
        .await?;

        self.get_firmware_by_file_name(fw.platform_id, &fw.file_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("firmware {} missing after upsert", fw.file_name))
    }

    async fn purge_firmware(&self, platform_id: i64, keep_file_names: &[String]) -> anyhow::Result<u64> {
        let stale = self.stale_file_ids("firmware", platform_id, keep_file_names).await?;
        self.delete_ids("firmware", &stale).await
    }
}
