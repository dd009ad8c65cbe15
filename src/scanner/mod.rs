//! Library scan engine.
//!
//! One [`Scanner::run`] call is one full pass over the library: platforms are
//! visited in name order, their firmware and roms are reconciled against the
//! catalog, providers are queried for the roms the [`policy`] selects, and
//! catalog entries without a file on disk are purged. Progress is published on
//! a broadcast channel as each mutation is committed; the pass ends with
//! exactly one `done` or `done_ko` event.
//!
//! Cancellation is cooperative: the token is polled between items, after every
//! provider round trip and before every catalog write. Work already committed
//! stays committed.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use futures::future::join_all;
use tokio::{sync::broadcast, task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{
    CatalogStore, FirmwareRecord, PlatformRecord, ProviderMatches, ScannedFirmware, ScannedPlatform, ScannedRom,
};
use crate::inventory::{names::RomName, FsInventory, FsRom, InventoryError};
use crate::providers::{best_candidate, ExternalIds, MetadataProvider, ProviderRegistry};
use crate::types::{
    FailureReason, FirmwareEvent, RomEvent, ScanEvent, ScanFailure, ScanMode, ScanRequest, ScanStatistics,
};

pub mod policy;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("No metadata providers enabled")]
    NoProviders,
    #[error(transparent)]
    Structure(InventoryError),
    #[error("manually stopped")]
    Cancelled,
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

impl ScanError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ScanError::NoProviders => FailureReason::NoProviders,
            ScanError::Structure(_) => FailureReason::Structure,
            ScanError::Cancelled => FailureReason::Cancelled,
            ScanError::Failed(_) => FailureReason::Error,
        }
    }

    pub fn failure(&self) -> ScanFailure {
        ScanFailure { reason: self.reason(), message: self.to_string() }
    }
}

/// Everything a scan pass needs; cheap to clone.
#[derive(Clone)]
pub struct Scanner {
    store: Arc<dyn CatalogStore>,
    inventory: FsInventory,
    providers: ProviderRegistry,
    bindings: Arc<HashMap<String, String>>,
}

impl Scanner {
    pub fn new(store: Arc<dyn CatalogStore>, inventory: FsInventory, providers: ProviderRegistry) -> Self {
        Self { store, inventory, providers, bindings: Arc::new(HashMap::new()) }
    }

    /// Folder name -> canonical slug used for provider platform lookups.
    pub fn with_platform_bindings(mut self, bindings: HashMap<String, String>) -> Self {
        self.bindings = Arc::new(bindings);
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Runs one scan pass and publishes its completion event.
    pub async fn run(
        &self,
        request: &ScanRequest,
        events: &broadcast::Sender<ScanEvent>,
        cancel: &CancellationToken,
    ) -> Result<ScanStatistics, ScanError> {
        let result = self.scan(request, events, cancel).await;
        match &result {
            Ok(stats) => {
                info!(
                    "Scan completed: {} platforms, {} roms ({} added, {} identified), {} firmware",
                    stats.scanned_platforms,
                    stats.scanned_roms,
                    stats.added_roms,
                    stats.identified_roms,
                    stats.scanned_firmware
                );
                let _ = events.send(ScanEvent::Done(*stats));
            }
            Err(e) => {
                match e {
                    ScanError::Cancelled => info!("Scan stopped"),
                    _ => error!("Scan failed: {}", e),
                }
                let _ = events.send(ScanEvent::DoneKo(e.failure()));
            }
        }
        result
    }

    async fn scan(
        &self,
        request: &ScanRequest,
        events: &broadcast::Sender<ScanEvent>,
        cancel: &CancellationToken,
    ) -> Result<ScanStatistics, ScanError> {
        let providers = self.providers.select(&request.apis);
        if providers.is_empty() {
            return Err(ScanError::NoProviders);
        }

        let mut run = Run { scanner: self, request, providers, events, cancel, stats: ScanStatistics::default() };

        let fs_platforms = run.inventory(|inv| inv.list_platforms()).await?.map_err(ScanError::Structure)?;
        let platform_list = run.resolve_platforms(&fs_platforms).await?;
        if platform_list.is_empty() {
            warn!("No platforms found, verify that the folder structure is right and the volume is mounted correctly");
        } else {
            info!("Found {} platforms in file system", platform_list.len());
        }

        for fs_slug in &platform_list {
            run.checkpoint()?;
            run.scan_platform(fs_slug).await?;
        }

        run.checkpoint()?;
        let purged = self.store.purge_platforms(&fs_platforms).await?;
        if purged > 0 {
            info!("Purged {} platforms no longer on disk", purged);
        }

        Ok(run.stats)
    }
}

/// State of one pass.
struct Run<'a> {
    scanner: &'a Scanner,
    request: &'a ScanRequest,
    providers: Vec<Arc<dyn MetadataProvider>>,
    events: &'a broadcast::Sender<ScanEvent>,
    cancel: &'a CancellationToken,
    stats: ScanStatistics,
}

impl Run<'_> {
    fn checkpoint(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: ScanEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn inventory<T, F>(&self, f: F) -> anyhow::Result<Result<T, InventoryError>>
    where
        F: FnOnce(&FsInventory) -> Result<T, InventoryError> + Send + 'static,
        T: Send + 'static,
    {
        let inv = self.scanner.inventory.clone();
        task::spawn_blocking(move || f(&inv)).await.context("filesystem listing task failed")
    }

    /// Explicit platform ids win over "everything on disk". Ids that are
    /// unknown or whose folder is gone are skipped.
    async fn resolve_platforms(&self, fs_platforms: &[String]) -> Result<Vec<String>, ScanError> {
        if self.request.platforms.is_empty() {
            return Ok(fs_platforms.to_vec());
        }
        let mut out: Vec<String> = Vec::with_capacity(self.request.platforms.len());
        for id in &self.request.platforms {
            self.checkpoint()?;
            match self.scanner.store.get_platform(*id).await? {
                Some(p) if fs_platforms.contains(&p.fs_slug) => {
                    if !out.contains(&p.fs_slug) {
                        out.push(p.fs_slug);
                    }
                }
                Some(p) => warn!("Platform {} ({}) is no longer on disk, skipping", p.id, p.fs_slug),
                None => warn!("Unknown platform id {}, skipping", id),
            }
        }
        out.sort();
        Ok(out)
    }

    async fn scan_platform(&mut self, fs_slug: &str) -> Result<(), ScanError> {
        let scanner = self.scanner;
        let store = &scanner.store;
        let existing = store.get_platform_by_fs_slug(fs_slug).await?;
        if !policy::should_scan_platform(self.request.mode, existing.is_some()) {
            debug!("Platform {} already in catalog, skipping", fs_slug);
            return Ok(());
        }

        let scanned = self.identify_platform(fs_slug, existing.as_ref()).await?;
        self.checkpoint()?;
        let platform = store.upsert_platform(&scanned).await?;

        self.stats.scanned_platforms += 1;
        if existing.is_none() {
            self.stats.added_platforms += 1;
        }
        if platform.external_ids.has_any() {
            self.stats.identified_platforms += 1;
        }
        info!("Identified platform {} ({})", platform.name, platform.fs_slug);
        self.emit(ScanEvent::ScanningPlatform(platform.clone()));

        let firmware_names = self.scan_firmware(&platform).await?;

        let slug = platform.fs_slug.clone();
        let fs_roms = match self.inventory(move |inv| inv.list_roms(&slug)).await? {
            Ok(list) => list,
            Err(e) => {
                // leave this platform's catalog entries alone
                error!("{}", e);
                return Ok(());
            }
        };
        if fs_roms.is_empty() {
            warn!("No roms found for {}, verify that the folder structure is correct", platform.fs_slug);
        } else {
            info!("{} roms found for {}", fs_roms.len(), platform.fs_slug);
        }

        for fs_rom in &fs_roms {
            self.checkpoint()?;
            self.scan_rom(&platform, fs_rom).await?;
        }

        self.checkpoint()?;
        let keep: Vec<String> = fs_roms.into_iter().map(|r| r.file_name).collect();
        let purged = store.purge_roms(platform.id, &keep).await?;
        if purged > 0 {
            info!("Purged {} roms from {}", purged, platform.fs_slug);
        }
        if let Some(keep) = firmware_names {
            let purged = store.purge_firmware(platform.id, &keep).await?;
            if purged > 0 {
                info!("Purged {} firmware files from {}", purged, platform.fs_slug);
            }
        }
        Ok(())
    }

    /// Builds the platform candidate. Ids already on the record are kept;
    /// providers can only fill the missing ones.
    async fn identify_platform(
        &self,
        fs_slug: &str,
        existing: Option<&PlatformRecord>,
    ) -> Result<ScannedPlatform, ScanError> {
        let slug = self.scanner.bindings.get(fs_slug).cloned().unwrap_or_else(|| fs_slug.to_string());
        let mut found = ExternalIds::default();
        let mut name: Option<String> = None;

        if self.request.mode != ScanMode::NoScan {
            let slug_ref = slug.as_str();
            let lookups =
                join_all(self.providers.iter().map(|p| async move { (p.kind(), p.lookup_platform(slug_ref).await) }))
                    .await;
            self.checkpoint()?;
            for (kind, res) in lookups {
                match res {
                    Ok(Some(m)) => {
                        found.set(kind, Some(m.id));
                        name.get_or_insert(m.name);
                    }
                    Ok(None) => debug!("{} has no platform for {}", kind, slug),
                    Err(e) => warn!("Platform lookup failed for {}: {}", fs_slug, e),
                }
            }
        }

        let external_ids = match existing {
            Some(p) => p.external_ids.fill_from(found),
            None => found,
        };
        let name = name.or_else(|| existing.map(|p| p.name.clone())).unwrap_or_else(|| display_name(&slug));
        Ok(ScannedPlatform { fs_slug: fs_slug.to_string(), slug, name, external_ids })
    }

    /// Returns the firmware file names to keep, or `None` when the listing
    /// failed and purging would be unsafe.
    async fn scan_firmware(&mut self, platform: &PlatformRecord) -> Result<Option<Vec<String>>, ScanError> {
        let slug = platform.fs_slug.clone();
        let fs_firmware = match self.inventory(move |inv| inv.list_firmware(&slug)).await? {
            Ok(list) => list,
            Err(InventoryError::FirmwareNotFound(_)) => Vec::new(),
            Err(e) => {
                warn!("Firmware listing failed for {}: {}", platform.fs_slug, e);
                return Ok(None);
            }
        };
        if fs_firmware.is_empty() {
            debug!("No firmware found for {}, skipping firmware scan", platform.fs_slug);
        } else {
            info!("{} firmware files found for {}", fs_firmware.len(), platform.fs_slug);
        }

        let scanner = self.scanner;
        let store = &scanner.store;
        let mut names = Vec::with_capacity(fs_firmware.len());
        for fw in fs_firmware {
            self.checkpoint()?;
            let existing = store.get_firmware_by_file_name(platform.id, &fw.file_name).await?;
            let scanned = ScannedFirmware {
                platform_id: platform.id,
                file_name: fw.file_name.clone(),
                file_path: fw.file_path,
                file_size_bytes: fw.file_size_bytes as i64,
            };
            self.checkpoint()?;
            let firmware: FirmwareRecord = store.upsert_firmware(&scanned).await?;

            self.stats.scanned_firmware += 1;
            if existing.is_none() {
                self.stats.added_firmware += 1;
            }
            self.emit(ScanEvent::ScanningFirmware(FirmwareEvent {
                platform_name: platform.name.clone(),
                platform_slug: platform.slug.clone(),
                firmware,
            }));
            names.push(fw.file_name);
        }
        Ok(Some(names))
    }

    async fn scan_rom(&mut self, platform: &PlatformRecord, fs_rom: &FsRom) -> Result<(), ScanError> {
        let scanner = self.scanner;
        let store = &scanner.store;
        let existing = store.get_rom_by_file_name(platform.id, &fs_rom.file_name).await?;
        if !policy::should_scan_rom(self.request.mode, existing.as_ref(), &self.request.roms) {
            debug!("Skipping rom {}", fs_rom.file_name);
            return Ok(());
        }

        let previous = existing.as_ref().map(|r| r.metadata.clone()).unwrap_or_default();
        let mut scanned = scanned_rom(platform.id, fs_rom, previous);
        self.identify_rom(platform, &mut scanned).await?;
        self.checkpoint()?;
        let rom = store.upsert_rom(&scanned).await?;

        self.stats.scanned_roms += 1;
        if existing.is_none() {
            self.stats.added_roms += 1;
        }
        if rom.external_ids().has_any() {
            self.stats.identified_roms += 1;
        }
        debug!("Scanned rom {} -> {}", rom.file_name, rom.name);
        self.emit(ScanEvent::ScanningRom(RomEvent {
            platform_name: platform.name.clone(),
            platform_slug: platform.slug.clone(),
            rom,
        }));
        Ok(())
    }

    /// Queries every selected provider concurrently and keeps each provider's
    /// best candidate. A provider that finds nothing leaves its previous match.
    async fn identify_rom(&self, platform: &PlatformRecord, rom: &mut ScannedRom) -> Result<(), ScanError> {
        let known = rom.external_ids();
        let term = rom.file_name_no_tags.clone();
        let term_ref = term.as_str();
        let lookups = join_all(self.providers.iter().map(|p| async move {
            let kind = p.kind();
            let res = if let Some(id) = known.get(kind) {
                p.search_by_id(id).await
            } else if let Some(platform_id) = platform.external_ids.get(kind) {
                p.search_by_name(term_ref, platform_id).await
            } else {
                Ok(Vec::new())
            };
            (kind, res)
        }))
        .await;
        self.checkpoint()?;

        for (kind, res) in lookups {
            match res {
                Ok(candidates) => match best_candidate(candidates) {
                    Some(best) => {
                        debug!("{} matched {} as {} ({:.2})", kind, rom.file_name, best.game.name, best.confidence);
                        rom.metadata.set(kind, best.game);
                    }
                    None => debug!("{} has no match for {}", kind, rom.file_name),
                },
                Err(e) => warn!("{} lookup failed for {}: {}", kind, rom.file_name, e),
            }
        }
        rom.name = rom.metadata.primary().map(|m| m.name.clone()).unwrap_or_else(|| rom.file_name_no_tags.clone());
        Ok(())
    }
}

fn scanned_rom(platform_id: i64, fs_rom: &FsRom, metadata: ProviderMatches) -> ScannedRom {
    let parsed = RomName::parse(&fs_rom.file_name, fs_rom.multi);
    let name = metadata.primary().map(|m| m.name.clone()).unwrap_or_else(|| parsed.file_name_no_tags.clone());
    ScannedRom {
        platform_id,
        file_name: fs_rom.file_name.clone(),
        file_name_no_tags: parsed.file_name_no_tags,
        file_name_no_ext: parsed.file_name_no_ext,
        file_extension: parsed.file_extension,
        file_path: fs_rom.file_path.clone(),
        file_size_bytes: fs_rom.file_size_bytes as i64,
        name,
        tags: parsed.tags,
        multi: fs_rom.multi,
        files: fs_rom.files.clone(),
        metadata,
    }
}

/// `"super-nintendo"` -> `"Super Nintendo"`.
fn display_name(slug: &str) -> String {
    slug.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
