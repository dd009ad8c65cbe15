use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogStore, SqliteCatalog};
use crate::config::ExcludeConfig;
use crate::inventory::FsInventory;
use crate::providers::{
    Candidate, MetadataProvider, PlatformMatch, ProviderError, ProviderKind, ProviderMatch, ProviderRegistry,
};
use crate::scanner::Scanner;
use crate::types::ScanEvent;

pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
    crate::db::init_db(&pool).await.unwrap();
    pool
}

pub async fn memory_catalog() -> Arc<SqliteCatalog> {
    Arc::new(SqliteCatalog::new(memory_pool().await))
}

/// Creates `rel` (and its parents) under `base` with `size` bytes.
pub fn touch(base: &Path, rel: &str, size: usize) {
    let path = base.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![0u8; size]).unwrap();
}

pub fn game(id: i64, name: &str) -> ProviderMatch {
    ProviderMatch {
        id,
        name: name.to_string(),
        slug: None,
        summary: None,
        url_cover: None,
        attributes: serde_json::Map::new(),
    }
}

/// Provider answering from fixed tables, with call counters.
pub struct StubProvider {
    kind: ProviderKind,
    platforms: HashMap<String, i64>,
    games: HashMap<String, i64>,
    fail: bool,
    cancel_on_search: Option<CancellationToken>,
    pub name_calls: AtomicUsize,
    pub id_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            platforms: HashMap::new(),
            games: HashMap::new(),
            fail: false,
            cancel_on_search: None,
            name_calls: AtomicUsize::new(0),
            id_calls: AtomicUsize::new(0),
        }
    }

    pub fn platform(mut self, slug: &str, id: i64) -> Self {
        self.platforms.insert(slug.to_string(), id);
        self
    }

    /// `term` resolves to a game named `term` with `id`.
    pub fn game(mut self, term: &str, id: i64) -> Self {
        self.games.insert(term.to_string(), id);
        self
    }

    /// Every search fails; platform lookups still work.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Trips `token` on the first search.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_search = Some(token);
        self
    }

    pub fn searches(&self) -> usize {
        self.name_calls.load(Ordering::SeqCst) + self.id_calls.load(Ordering::SeqCst)
    }

    fn before_search(&self) -> Result<(), ProviderError> {
        if let Some(token) = &self.cancel_on_search {
            token.cancel();
        }
        if self.fail {
            return Err(ProviderError::Unavailable { provider: self.kind, message: "stub failure".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for StubProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn lookup_platform(&self, slug: &str) -> Result<Option<PlatformMatch>, ProviderError> {
        Ok(self.platforms.get(slug).map(|id| PlatformMatch { id: *id, slug: slug.to_string(), name: slug.to_uppercase() }))
    }

    async fn search_by_name(&self, term: &str, _platform_id: i64) -> Result<Vec<Candidate>, ProviderError> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        self.before_search()?;
        Ok(self.games.get(term).map(|id| Candidate { confidence: 1.0, game: game(*id, term) }).into_iter().collect())
    }

    async fn search_by_id(&self, id: i64) -> Result<Vec<Candidate>, ProviderError> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        self.before_search()?;
        Ok(self
            .games
            .iter()
            .filter(|(_, gid)| **gid == id)
            .map(|(term, gid)| Candidate { confidence: 1.0, game: game(*gid, term) })
            .collect())
    }
}

pub fn registry(providers: Vec<Arc<StubProvider>>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for p in providers {
        registry.register(p);
    }
    registry
}

pub fn scanner(catalog: Arc<dyn CatalogStore>, base: &Path, providers: Vec<Arc<StubProvider>>) -> Scanner {
    let inventory = FsInventory::new(base, &ExcludeConfig::default()).unwrap();
    Scanner::new(catalog, inventory, registry(providers))
}

pub fn drain(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
