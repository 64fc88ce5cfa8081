//
// declaration/expansion.rs
//
// Macro-expansion cache with one in-flight expansion per source file
//

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::watch;

use super::path_resolve::normalize_path;
use super::types::ResolveError;

/// External preprocessor producing the macro-expanded text of a source file.
///
/// Expanded lines that correspond to original source carry a trailing
/// `*> <opts> <line> [<file> (<n>)]` annotation.
#[async_trait]
pub trait MacroExpander: Send + Sync {
    async fn expand(&self, path: &Path) -> anyhow::Result<String>;
}

/// Expanded text of one source file
#[derive(Debug, Clone)]
pub struct Expansion {
    pub text: Arc<str>,
    /// Produced by the request that returned it (or one it joined) rather
    /// than served from an earlier one
    pub fresh: bool,
}

/// `None` while the expansion is still running
type Outcome = Option<Result<Arc<str>, String>>;

struct State {
    ready: LruCache<PathBuf, Arc<str>>,
    pending: HashMap<PathBuf, watch::Receiver<Outcome>>,
}

/// Expansion results keyed by normalized source path.
///
/// A second request for a file whose expansion is running joins it instead
/// of spawning the expander again. Failed expansions are not cached.
pub struct ExpansionCache {
    state: Mutex<State>,
    busy: watch::Sender<usize>,
}

impl std::fmt::Debug for ExpansionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ExpansionCache")
            .field("ready", &state.ready.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

const DEFAULT_EXPANSION_CACHE_CAPACITY: usize = 64;

fn cache_key(path: &Path) -> PathBuf {
    normalize_path(path).unwrap_or_else(|| path.to_path_buf())
}

/// Removes the pending entry and lowers the busy count when the request
/// driving an expansion completes or is dropped.
struct PendingGuard<'a> {
    cache: &'a ExpansionCache,
    key: PathBuf,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock().pending.remove(&self.key);
        self.cache.busy.send_modify(|n| *n = n.saturating_sub(1));
    }
}

enum Role {
    Driver(watch::Sender<Outcome>),
    Waiter(watch::Receiver<Outcome>),
}

impl Default for ExpansionCache {
    fn default() -> Self {
        Self::new(DEFAULT_EXPANSION_CACHE_CAPACITY)
    }
}

impl ExpansionCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (busy, _) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                ready: LruCache::new(cap),
                pending: HashMap::new(),
            }),
            busy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panicking holder; every update is a
        // single map operation
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of expansions currently running
    pub fn busy(&self) -> watch::Receiver<usize> {
        self.busy.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().ready.contains(&cache_key(path))
    }

    /// Drop the cached expansion of one file
    pub fn invalidate(&self, path: &Path) {
        self.lock().ready.pop(&cache_key(path));
    }

    /// Drop every cached expansion; running expansions are unaffected
    pub fn invalidate_all(&self) {
        self.lock().ready.clear();
    }

    /// Return the expansion of `path`, running `expander` if needed.
    ///
    /// With `force`, a cached result is discarded and the file is expanded
    /// again, unless an expansion is already running, which is joined.
    pub async fn get_or_expand(
        &self,
        path: &Path,
        expander: &dyn MacroExpander,
        force: bool,
    ) -> Result<Expansion, ResolveError> {
        let key = cache_key(path);

        let role = {
            let mut state = self.lock();
            if force {
                state.ready.pop(&key);
            } else if let Some(text) = state.ready.get(&key) {
                log::trace!("Expansion cache hit for '{}'", path.display());
                return Ok(Expansion {
                    text: text.clone(),
                    fresh: false,
                });
            }
            match state.pending.get(&key) {
                Some(receiver) => Role::Waiter(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    state.pending.insert(key.clone(), receiver);
                    Role::Driver(sender)
                }
            }
        };

        match role {
            Role::Waiter(receiver) => {
                log::trace!("Joining running expansion of '{}'", path.display());
                wait_for_outcome(receiver).await
            }
            Role::Driver(sender) => {
                self.busy.send_modify(|n| *n += 1);
                let _guard = PendingGuard {
                    cache: self,
                    key: key.clone(),
                };
                log::trace!("Expanding '{}'", path.display());

                match expander.expand(path).await {
                    Ok(text) => {
                        let text: Arc<str> = Arc::from(text);
                        self.lock().ready.put(key, text.clone());
                        let _ = sender.send(Some(Ok(text.clone())));
                        Ok(Expansion { text, fresh: true })
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        log::warn!("Macro expansion of '{}' failed: {}", path.display(), message);
                        let _ = sender.send(Some(Err(message.clone())));
                        Err(ResolveError::ExpansionFailed(message))
                    }
                }
            }
        }
    }
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Outcome>) -> Result<Expansion, ResolveError> {
    loop {
        let outcome = receiver.borrow_and_update().clone();
        if let Some(outcome) = outcome {
            return outcome
                .map(|text| Expansion { text, fresh: true })
                .map_err(ResolveError::ExpansionFailed);
        }
        if receiver.changed().await.is_err() {
            // The driving request went away without an outcome
            return match receiver.borrow().clone() {
                Some(Ok(text)) => Ok(Expansion { text, fresh: true }),
                Some(Err(message)) => Err(ResolveError::ExpansionFailed(message)),
                None => Err(ResolveError::ExpansionUnavailable),
            };
        }
    }
}
