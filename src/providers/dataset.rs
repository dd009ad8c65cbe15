use std::{collections::HashSet, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Candidate, MetadataProvider, PlatformMatch, ProviderError, ProviderKind, ProviderMatch};

/// Name-search results below this score are dropped.
const MIN_CONFIDENCE: f32 = 0.5;
const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetPlatform {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetGame {
    pub platform_id: i64,
    #[serde(flatten)]
    pub game: ProviderMatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub platforms: Vec<DatasetPlatform>,
    #[serde(default)]
    pub games: Vec<DatasetGame>,
}

/// Offline provider answering lookups from a JSON dump of a game database.
#[derive(Debug, Clone)]
pub struct DatasetProvider {
    kind: ProviderKind,
    data: Dataset,
}

impl DatasetProvider {
    pub fn new(kind: ProviderKind, data: Dataset) -> Self {
        Self { kind, data }
    }

    pub async fn load(kind: ProviderKind, path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| ProviderError::Unavailable {
            provider: kind,
            message: format!("cannot read dataset {}: {}", path.display(), e),
        })?;
        let data: Dataset = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::InvalidResponse { provider: kind, message: e.to_string() })?;
        tracing::info!(
            "{} dataset loaded: {} platforms, {} games",
            kind,
            data.platforms.len(),
            data.games.len()
        );
        Ok(Self::new(kind, data))
    }
}

/// Lowercase alphanumeric words, everything else is a separator.
pub(crate) fn normalize(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 1.0 for identical word sequences, otherwise the Jaccard index of the word sets.
pub(crate) fn similarity(a: &str, b: &str) -> f32 {
    let (wa, wb) = (normalize(a), normalize(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    if wa == wb {
        return 1.0;
    }
    let sa: HashSet<&String> = wa.iter().collect();
    let sb: HashSet<&String> = wb.iter().collect();
    let inter = sa.intersection(&sb).count() as f32;
    let union = sa.union(&sb).count() as f32;
    // never let a partial overlap tie with an exact match
    (inter / union).min(0.99)
}

#[async_trait]
impl MetadataProvider for DatasetProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn lookup_platform(&self, slug: &str) -> Result<Option<PlatformMatch>, ProviderError> {
        Ok(self
            .data
            .platforms
            .iter()
            .find(|p| p.slug.eq_ignore_ascii_case(slug))
            .map(|p| PlatformMatch { id: p.id, slug: p.slug.clone(), name: p.name.clone() }))
    }

    async fn search_by_name(&self, term: &str, platform_id: i64) -> Result<Vec<Candidate>, ProviderError> {
        let mut out: Vec<Candidate> = self
            .data
            .games
            .iter()
            .filter(|g| g.platform_id == platform_id)
            .map(|g| Candidate { confidence: similarity(term, &g.game.name), game: g.game.clone() })
            .filter(|c| c.confidence >= MIN_CONFIDENCE)
            .collect();
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out.truncate(MAX_CANDIDATES);
        Ok(out)
    }

    async fn search_by_id(&self, id: i64) -> Result<Vec<Candidate>, ProviderError> {
        Ok(self
            .data
            .games
            .iter()
            .filter(|g| g.game.id == id)
            .map(|g| Candidate { confidence: 1.0, game: g.game.clone() })
            .collect())
    }
}
