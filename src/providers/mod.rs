//! Metadata provider seam.
//!
//! A provider is an opaque lookup service: it resolves a platform folder to
//! its own platform id and returns ranked game candidates by name or by id.
//! Providers are independent of each other; a rom can carry a match from
//! either, both or neither.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod dataset;

pub use dataset::{Dataset, DatasetGame, DatasetPlatform, DatasetProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Igdb,
    Moby,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Igdb, ProviderKind::Moby];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Igdb => "igdb",
            ProviderKind::Moby => "moby",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "igdb" => Ok(ProviderKind::Igdb),
            "moby" | "mobygames" => Ok(ProviderKind::Moby),
            other => Err(ProviderError::Unknown(other.to_string())),
        }
    }
}

/// External ids, one per provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub igdb_id: Option<i64>,
    pub moby_id: Option<i64>,
}

impl ExternalIds {
    pub fn get(&self, kind: ProviderKind) -> Option<i64> {
        match kind {
            ProviderKind::Igdb => self.igdb_id,
            ProviderKind::Moby => self.moby_id,
        }
    }

    pub fn set(&mut self, kind: ProviderKind, id: Option<i64>) {
        match kind {
            ProviderKind::Igdb => self.igdb_id = id,
            ProviderKind::Moby => self.moby_id = id,
        }
    }

    pub fn has_any(&self) -> bool {
        self.igdb_id.is_some() || self.moby_id.is_some()
    }

    pub fn has_all(&self) -> bool {
        self.igdb_id.is_some() && self.moby_id.is_some()
    }

    /// Keeps every id already set here and fills the unset ones from `other`.
    pub fn fill_from(self, other: ExternalIds) -> ExternalIds {
        ExternalIds { igdb_id: self.igdb_id.or(other.igdb_id), moby_id: self.moby_id.or(other.moby_id) }
    }
}

/// A provider's view of a game, stored verbatim on the rom record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMatch {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url_cover: Option<String>,
    /// Free-form provider attributes (genres, companies, release dates, ...).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// 0.0..=1.0, higher is better.
    pub confidence: f32,
    #[serde(flatten)]
    pub game: ProviderMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMatch {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown metadata provider '{0}'")]
    Unknown(String),
    #[error("{provider} unavailable: {message}")]
    Unavailable { provider: ProviderKind, message: String },
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse { provider: ProviderKind, message: String },
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Resolves a platform slug to this provider's platform.
    async fn lookup_platform(&self, slug: &str) -> Result<Option<PlatformMatch>, ProviderError>;

    /// Candidates whose name matches `term` on the given provider platform.
    async fn search_by_name(&self, term: &str, platform_id: i64) -> Result<Vec<Candidate>, ProviderError>;

    async fn search_by_id(&self, id: i64) -> Result<Vec<Candidate>, ProviderError>;
}

/// The set of enabled providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing an earlier one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.providers.retain(|p| p.kind() != provider.kind());
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Enabled providers restricted to `requested` names; an empty request
    /// selects every enabled provider. Unknown names are ignored.
    pub fn select(&self, requested: &[String]) -> Vec<Arc<dyn MetadataProvider>> {
        if requested.is_empty() {
            return self.providers.clone();
        }
        let mut wanted = Vec::with_capacity(requested.len());
        for name in requested {
            match name.parse::<ProviderKind>() {
                Ok(kind) => wanted.push(kind),
                Err(e) => tracing::warn!("Ignoring requested provider: {}", e),
            }
        }
        self.providers.iter().filter(|p| wanted.contains(&p.kind())).cloned().collect()
    }
}

/// Highest-confidence candidate; the earliest one wins a tie.
pub fn best_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().reduce(|best, c| if c.confidence > best.confidence { c } else { best })
}

/// Builds the registry from configuration. A provider that is disabled, has no
/// dataset configured or fails to load is left out with a warning.
pub async fn load_registry(cfg: &crate::config::ProvidersConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (kind, provider_cfg) in [(ProviderKind::Igdb, &cfg.igdb), (ProviderKind::Moby, &cfg.moby)] {
        if !provider_cfg.enabled {
            tracing::info!("{} provider disabled", kind);
            continue;
        }
        let Some(path) = provider_cfg.dataset.as_deref() else {
            tracing::warn!("{} provider enabled but no dataset configured, skipping", kind);
            continue;
        };
        match DatasetProvider::load(kind, path).await {
            Ok(provider) => registry.register(Arc::new(provider)),
            Err(e) => tracing::warn!("{} provider not available: {}", kind, e),
        }
    }
    registry
}
