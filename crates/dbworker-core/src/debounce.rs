//! Keyed debounce for async producers.
//!
//! Every call registers under a reference key. A newer call with the same key
//! cancels the pending one, which then resolves with its own fallback value
//! instead of the producer's output. Only the last call in a burst runs its
//! producer.

use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Delay used when none is given.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

static GLOBAL: OnceLock<Debouncer> = OnceLock::new();

/// Options for a single debounced call.
#[derive(Debug, Clone)]
pub struct DebounceOptions<T> {
    /// Reference key. Defaults to the producer's type identity.
    pub reference: Option<String>,
    /// Wait before the producer runs.
    pub delay: Duration,
    /// Value returned if a newer call with the same key supersedes this one.
    pub fallback: T,
}

impl<T> DebounceOptions<T> {
    /// Options with the default delay and no explicit key.
    #[must_use]
    pub const fn new(fallback: T) -> Self {
        Self {
            reference: None,
            delay: DEFAULT_DELAY,
            fallback,
        }
    }

    /// Set the reference key.
    #[must_use]
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set the delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl<T: Default> Default for DebounceOptions<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Debounce error.
#[derive(Debug, Error)]
pub enum DebounceError<E> {
    #[error("Debounced producer failed: {0}")]
    Producer(#[source] E),
    #[error("Debounced producer panicked")]
    Panicked,
    #[error("Debounced task aborted before completion")]
    Aborted,
}

/// Registry key: an explicit reference or the producer's closure type.
#[derive(Clone, PartialEq, Eq, Hash)]
enum Key {
    Ref(String),
    Producer(TypeId),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ref(reference) => f.write_str(reference),
            Self::Producer(type_id) => write!(f, "{type_id:?}"),
        }
    }
}

struct Entry {
    id: u64,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<Key, Entry>,
}

/// Registry of pending debounced calls.
///
/// Cloning shares the same registry. `Debouncer::global()` is the
/// process-wide instance; tests and scoped callers can build their own.
#[derive(Clone, Default)]
pub struct Debouncer {
    registry: Arc<Mutex<Registry>>,
}

impl Debouncer {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Schedule `producer` to run after `options.delay`.
    ///
    /// Registration happens before this returns, so the timer runs whether or
    /// not the returned future is awaited. If a newer call with the same key
    /// arrives first, the returned future resolves to `Ok(options.fallback)`
    /// and `producer` is never invoked.
    ///
    /// # Errors
    /// Returns the producer's own error, or `Panicked`/`Aborted` if its task
    /// did not finish.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn debounce<F, Fut, T, E>(
        &self,
        producer: F,
        options: DebounceOptions<T>,
    ) -> BoxFuture<'static, Result<T, DebounceError<E>>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let DebounceOptions {
            reference,
            delay,
            fallback,
        } = options;
        let key = reference.map_or_else(|| Key::Producer(TypeId::of::<F>()), Key::Ref);

        let (cancel, cancelled) = oneshot::channel();
        let id = self.install(&key, cancel);
        let timer = tokio::time::sleep(delay);
        let registry = self.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled => return Ok(fallback),
                () = timer => {}
            }

            // A newer call may have replaced us between the timer firing and here.
            if !registry.retire(&key, id) {
                return Ok(fallback);
            }

            debug!(key = %key, "Debounce timer fired");
            producer().await.map_err(DebounceError::Producer)
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(DebounceError::Panicked),
                Err(_) => Err(DebounceError::Aborted),
            }
        }
        .boxed()
    }

    /// Cancel the pending call for `key`, resolving it with its fallback.
    ///
    /// Returns `false` if nothing is pending (including after the timer fired).
    pub fn cancel(&self, key: &str) -> bool {
        let Some(entry) = self.lock().entries.remove(&Key::Ref(key.to_owned())) else {
            return false;
        };
        let _ = entry.cancel.send(());
        debug!(key, "Debounced call cancelled");
        true
    }

    /// Cancel every pending call.
    pub fn clear(&self) {
        let entries: Vec<_> = self.lock().entries.drain().collect();
        for (_, entry) in entries {
            let _ = entry.cancel.send(());
        }
    }

    /// Whether a call is pending for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.lock().entries.contains_key(&Key::Ref(key.to_owned()))
    }

    /// Number of keys with a pending call.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().entries.len()
    }

    fn install(&self, key: &Key, cancel: oneshot::Sender<()>) -> u64 {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;

        if let Some(previous) = registry.entries.insert(key.clone(), Entry { id, cancel }) {
            let _ = previous.cancel.send(());
            debug!(key = %key, "Superseded pending debounced call");
        }
        id
    }

    fn retire(&self, key: &Key, id: u64) -> bool {
        let mut registry = self.lock();
        if registry.entries.get(key).is_some_and(|entry| entry.id == id) {
            registry.entries.remove(key);
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Debounce through the process-wide registry.
///
/// # Errors
/// See [`Debouncer::debounce`].
///
/// # Panics
/// Panics if called outside a Tokio runtime.
pub fn debounce<F, Fut, T, E>(
    producer: F,
    options: DebounceOptions<T>,
) -> BoxFuture<'static, Result<T, DebounceError<E>>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    Debouncer::global().debounce(producer, options)
}
