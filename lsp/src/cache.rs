//! Per-root compiled state, shared across validation passes.
//!
//! Each package root owns one [`RootHandle`]: the model and logic registries
//! behind an async mutex, plus per-document generations used to drop a pass
//! that a newer edit of the same document has superseded. Handles live in a
//! bounded LRU keyed by root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, Weak};

use lru::LruCache;
use stencil_types::CacheSettings;
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

use crate::toolchain::{LogicRegistry, ModelRegistry, Toolchain};

/// The registries one package compiles against.
pub struct CompiledState {
    pub models: Box<dyn ModelRegistry>,
    pub logic: Box<dyn LogicRegistry>,
}

/// Proof that a pass for one document registered itself with a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassTicket {
    document: Url,
    generation: u64,
}

#[derive(Default)]
struct Generations {
    issued: u64,
    latest: HashMap<Url, u64>,
}

pub struct RootHandle {
    root: PathBuf,
    generations: std::sync::Mutex<Generations>,
    state: Mutex<CompiledState>,
}

impl RootHandle {
    fn new(root: PathBuf, toolchain: &dyn Toolchain) -> Self {
        Self {
            root,
            generations: std::sync::Mutex::new(Generations::default()),
            state: Mutex::new(CompiledState {
                models: toolchain.new_model_registry(),
                logic: toolchain.new_logic_registry(),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generations(&self) -> std::sync::MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new pass for `document`.
    ///
    /// Earlier tickets for the same document stop being current; passes for
    /// other documents in this root are unaffected.
    pub fn issue_ticket(&self, document: &Url) -> PassTicket {
        let mut generations = self.generations();
        generations.issued += 1;
        let generation = generations.issued;
        generations.latest.insert(document.clone(), generation);
        PassTicket {
            document: document.clone(),
            generation,
        }
    }

    #[must_use]
    pub fn is_current(&self, ticket: &PassTicket) -> bool {
        self.generations().latest.get(&ticket.document) == Some(&ticket.generation)
    }

    /// Wait for exclusive access to the registries.
    pub async fn lock(&self) -> MutexGuard<'_, CompiledState> {
        self.state.lock().await
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHandle")
            .field("root", &self.root)
            .field("issued", &self.generations().issued)
            .finish_non_exhaustive()
    }
}

struct Entries {
    cached: LruCache<PathBuf, Arc<RootHandle>>,
    /// Evicted handles, reinstated while an in-flight pass still holds them
    /// so a root never has two live handles.
    evicted: HashMap<PathBuf, Weak<RootHandle>>,
}

impl Entries {
    fn retire(&mut self, root: PathBuf, handle: &Arc<RootHandle>) {
        self.evicted.retain(|_, weak| weak.strong_count() > 0);
        self.evicted.insert(root, Arc::downgrade(handle));
    }

    fn insert(&mut self, root: &Path, handle: Arc<RootHandle>) {
        if let Some((evicted, old)) = self.cached.push(root.to_path_buf(), handle)
            && evicted != root
        {
            tracing::info!(root = %evicted.display(), "Evicted least recently used compiled state");
            self.retire(evicted, &old);
        }
    }
}

/// Bounded map from package root to its compiled state.
///
/// Evicted handles stay valid for any pass that still holds them.
pub struct LogicCache {
    entries: Mutex<Entries>,
}

impl LogicCache {
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: Mutex::new(Entries {
                cached: LruCache::new(settings.max_roots()),
                evicted: HashMap::new(),
            }),
        }
    }

    /// The handle for `root`, created with fresh registries on first use.
    pub async fn get_or_create(&self, root: &Path, toolchain: &dyn Toolchain) -> Arc<RootHandle> {
        let mut entries = self.entries.lock().await;
        if let Some(handle) = entries.cached.get(root) {
            return Arc::clone(handle);
        }

        let handle = match entries.evicted.remove(root).and_then(|weak| weak.upgrade()) {
            Some(handle) => {
                tracing::debug!(root = %root.display(), "Reinstating evicted compiled state still in use");
                handle
            }
            None => {
                tracing::debug!(root = %root.display(), "Creating compiled state");
                Arc::new(RootHandle::new(root.to_path_buf(), toolchain))
            }
        };
        entries.insert(root, Arc::clone(&handle));
        handle
    }

    pub async fn evict(&self, root: &Path) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(handle) = entries.cached.pop(root) else {
            return false;
        };
        tracing::debug!(root = %root.display(), "Evicted compiled state");
        entries.retire(root.to_path_buf(), &handle);
        true
    }

    /// Evict every root at or below `folder`. Returns how many were removed.
    pub async fn evict_under(&self, folder: &Path) -> usize {
        let mut entries = self.entries.lock().await;
        let doomed: Vec<PathBuf> = entries
            .cached
            .iter()
            .map(|(root, _)| root)
            .filter(|root| root.starts_with(folder))
            .cloned()
            .collect();
        for root in &doomed {
            if let Some(handle) = entries.cached.pop(root) {
                tracing::debug!(root = %root.display(), "Evicted compiled state for removed folder");
                entries.retire(root.clone(), &handle);
            }
        }
        doomed.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.cached.len()
    }

    pub async fn contains(&self, root: &Path) -> bool {
        self.entries.lock().await.cached.contains(root)
    }
}
