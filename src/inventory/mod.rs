//! Filesystem inventory of the rom library.
//!
//! Two layouts are recognised below the library base path:
//!
//! - `roms/<platform>/...` and `bios/<platform>/...` (checked first)
//! - `<platform>/roms/...` and `<platform>/bios/...`
//!
//! All listings are sorted by name so that scans visit items in a
//! deterministic order regardless of the platform's directory ordering.
//! Listing is blocking I/O; async callers should go through
//! `tokio::task::spawn_blocking`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::{ExcludeConfig, LibraryConfig};

pub mod names;

const ROMS_FOLDER: &str = "roms";
const FIRMWARE_FOLDER: &str = "bios";

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Platforms not found: the library at {0} does not match any supported folder structure")]
    StructureNotFound(String),
    #[error("Roms not found for platform {0}: {1} is not a directory")]
    RomsNotFound(String, String),
    #[error("Firmware not found for platform {0}")]
    FirmwareNotFound(String),
    #[error("Invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A rom as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FsRom {
    pub file_name: String,
    /// Directory of the rom relative to the library base, `/`-separated.
    pub file_path: String,
    pub file_size_bytes: u64,
    pub multi: bool,
    /// Constituent files of a multi-file rom, relative to its folder.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsFirmware {
    pub file_name: String,
    pub file_path: String,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `roms/<platform>`
    RomsFirst,
    /// `<platform>/roms`
    PlatformFirst,
}

#[derive(Debug)]
struct Excludes {
    platforms: GlobSet,
    single_file_names: GlobSet,
    single_file_extensions: Vec<String>,
    multi_file_names: GlobSet,
    firmware_names: GlobSet,
    firmware_extensions: Vec<String>,
}

impl Excludes {
    fn build(cfg: &ExcludeConfig) -> Result<Self, InventoryError> {
        Ok(Self {
            platforms: build_globset(&cfg.platforms)?,
            single_file_names: build_globset(&cfg.single_file_names)?,
            single_file_extensions: normalize_extensions(&cfg.single_file_extensions),
            multi_file_names: build_globset(&cfg.multi_file_names)?,
            firmware_names: build_globset(&cfg.firmware_names)?,
            firmware_extensions: normalize_extensions(&cfg.firmware_extensions),
        })
    }
}

/// Cheap to clone; the exclusion sets are shared.
#[derive(Debug, Clone)]
pub struct FsInventory {
    base: PathBuf,
    excludes: Arc<Excludes>,
}

impl FsInventory {
    pub fn new(base: impl Into<PathBuf>, excludes: &ExcludeConfig) -> Result<Self, InventoryError> {
        Ok(Self { base: base.into(), excludes: Arc::new(Excludes::build(excludes)?) })
    }

    pub fn from_config(cfg: &LibraryConfig) -> Result<Self, InventoryError> {
        Self::new(&cfg.base_path, &cfg.exclude)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn layout(&self) -> Result<Layout, InventoryError> {
        if self.base.join(ROMS_FOLDER).is_dir() {
            Ok(Layout::RomsFirst)
        } else if self.base.is_dir() {
            Ok(Layout::PlatformFirst)
        } else {
            Err(InventoryError::StructureNotFound(self.base.display().to_string()))
        }
    }

    /// Relative directory holding `folder` ("roms" or "bios") items of a platform.
    fn relative_dir(&self, layout: Layout, platform: &str, folder: &str) -> String {
        match layout {
            Layout::RomsFirst => format!("{}/{}", folder, platform),
            Layout::PlatformFirst => format!("{}/{}", platform, folder),
        }
    }

    /// Platform folder names, sorted.
    pub fn list_platforms(&self) -> Result<Vec<String>, InventoryError> {
        let dir = match self.layout()? {
            Layout::RomsFirst => self.base.join(ROMS_FOLDER),
            Layout::PlatformFirst => self.base.clone(),
        };
        let mut out: Vec<String> = read_entries(&dir)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .map(|(name, _)| name)
            .filter(|name| !self.excludes.platforms.is_match(name))
            .collect();
        out.sort();
        Ok(out)
    }

    pub fn list_firmware(&self, platform: &str) -> Result<Vec<FsFirmware>, InventoryError> {
        let rel = self.relative_dir(self.layout()?, platform, FIRMWARE_FOLDER);
        let dir = self.base.join(&rel);
        if !dir.is_dir() {
            return Err(InventoryError::FirmwareNotFound(platform.to_string()));
        }
        let mut out = Vec::new();
        for (name, is_dir) in read_entries(&dir)? {
            if is_dir
                || self.excludes.firmware_names.is_match(&name)
                || has_excluded_extension(&name, &self.excludes.firmware_extensions)
            {
                continue;
            }
            let file_size_bytes = file_size(&dir.join(&name))?;
            out.push(FsFirmware { file_name: name, file_path: rel.clone(), file_size_bytes });
        }
        out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(out)
    }

    /// Files are single-file roms, folders are multi-file roms.
    pub fn list_roms(&self, platform: &str) -> Result<Vec<FsRom>, InventoryError> {
        let rel = self.relative_dir(self.layout()?, platform, ROMS_FOLDER);
        let dir = self.base.join(&rel);
        if !dir.is_dir() {
            return Err(InventoryError::RomsNotFound(platform.to_string(), dir.display().to_string()));
        }
        let mut out = Vec::new();
        for (name, is_dir) in read_entries(&dir)? {
            if is_dir {
                if self.excludes.multi_file_names.is_match(&name) {
                    continue;
                }
                let (files, size) = collect_multi_file(&dir.join(&name))?;
                out.push(FsRom { file_name: name, file_path: rel.clone(), file_size_bytes: size, multi: true, files });
            } else {
                if self.excludes.single_file_names.is_match(&name)
                    || has_excluded_extension(&name, &self.excludes.single_file_extensions)
                {
                    continue;
                }
                let file_size_bytes = file_size(&dir.join(&name))?;
                out.push(FsRom {
                    file_name: name,
                    file_path: rel.clone(),
                    file_size_bytes,
                    multi: false,
                    files: Vec::new(),
                });
            }
        }
        out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(out)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> InventoryError {
    InventoryError::Io { path: path.display().to_string(), source }
}

/// `(name, is_dir)` for each entry; names that are not valid UTF-8 are skipped.
fn read_entries(dir: &Path) -> Result<Vec<(String, bool)>, InventoryError> {
    let rd = fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping non UTF-8 entry in {}", dir.display());
            continue;
        };
        let is_dir = entry.file_type().map_err(|e| io_err(&entry.path(), e))?.is_dir();
        out.push((name, is_dir));
    }
    Ok(out)
}

fn file_size(path: &Path) -> Result<u64, InventoryError> {
    fs::metadata(path).map(|m| m.len()).map_err(|e| io_err(path, e))
}

/// Relative file paths (sorted, `/`-separated) and their total size.
fn collect_multi_file(dir: &Path) -> Result<(Vec<String>, u64), InventoryError> {
    let mut files = Vec::new();
    let mut total: u64 = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            io_err(&path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let md = entry.metadata().map_err(|e| io_err(entry.path(), e.into()))?;
        total = total.saturating_add(md.len());
        files.push(rel.to_string_lossy().replace('\\', "/"));
    }
    files.sort();
    Ok((files, total))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        if p.trim().is_empty() {
            continue;
        }
        b.add(Glob::new(p.trim())?);
    }
    b.build()
}

fn normalize_extensions(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn has_excluded_extension(name: &str, excluded: &[String]) -> bool {
    if excluded.is_empty() {
        return false;
    }
    let (_, ext) = names::split_extension(name);
    !ext.is_empty() && excluded.iter().any(|e| e.eq_ignore_ascii_case(&ext))
}
