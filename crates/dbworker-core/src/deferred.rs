//! Nested deferred values.

use std::fmt;

use futures::{FutureExt, future::BoxFuture};

/// A value that is either available now or will be produced by a future,
/// which may itself yield another deferred value.
pub enum Deferred<T> {
    /// Concrete value.
    Ready(T),
    /// Future resolving to the next link in the chain.
    Pending(BoxFuture<'static, Deferred<T>>),
}

impl<T> Deferred<T> {
    /// Wrap a concrete value.
    #[must_use]
    pub const fn ready(value: T) -> Self {
        Self::Ready(value)
    }

    /// Wrap a future that yields another deferred value.
    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Self> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }

    /// Wrap a future that yields a concrete value.
    #[must_use]
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self::Pending(future.map(Self::Ready).boxed())
    }

    /// Whether another await is needed to reach a concrete value.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl<T> From<T> for Deferred<T> {
    fn from(value: T) -> Self {
        Self::Ready(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Await every link of a deferred chain and return the first concrete value.
///
/// A chain that keeps yielding pending values never completes.
pub async fn flatten<T>(mut value: Deferred<T>) -> T {
    loop {
        match value {
            Deferred::Ready(inner) => return inner,
            Deferred::Pending(next) => value = next.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test]
    async fn test_plain_value_unchanged() {
        assert_eq!(flatten(Deferred::from(7)).await, 7);
        assert_eq!(flatten(Deferred::ready("db")).await, "db");
    }

    #[tokio::test]
    async fn test_doubly_deferred_value() {
        let nested = Deferred::pending(async {
            Deferred::pending(async { Deferred::ready(String::from("rows")) })
        });
        assert!(nested.is_pending());
        assert_eq!(flatten(nested).await, "rows");
    }

    #[tokio::test]
    async fn test_from_future() {
        let value = Deferred::from_future(async { 40 + 2 });
        assert_eq!(flatten(value).await, 42);
    }

    #[test]
    fn test_waits_for_inner_link() {
        let (tx, rx) = oneshot::channel::<u32>();
        let chain = Deferred::pending(async move {
            Deferred::from_future(async move { rx.await.unwrap_or_default() })
        });

        let mut flattened = task::spawn(flatten(chain));
        assert_pending!(flattened.poll());

        tx.send(9).unwrap();
        assert!(flattened.is_woken());
        assert_eq!(assert_ready!(flattened.poll()), 9);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Deferred::ready(1)), "Ready(1)");
        let pending = Deferred::<u8>::from_future(async { 1 });
        assert_eq!(format!("{pending:?}"), "Pending(..)");
    }
}
