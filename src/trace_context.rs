//! Trace id resolution for a client.
//!
//! Two sources, checked in order:
//! - a scoped id installed by [`TraceContext::with_trace_id`] or
//!   [`TraceContext::scope`], held in a task-local so overlapping scopes on
//!   different tasks never see each other;
//! - the id set with [`TraceContext::set`], shared by every caller of the
//!   client.
//!
//! Scoped ids are keyed by context, so scopes opened for one client do not
//! leak into another. Tasks spawned inside a scope do not inherit it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

type ScopedIds = HashMap<u64, String>;

tokio::task_local! {
    static SCOPED_TRACE_IDS: ScopedIds;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Holder of the active trace id.
#[derive(Debug)]
pub struct TraceContext {
    id: u64,
    current: Mutex<Option<String>>,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            current: Mutex::new(None),
        }
    }
}

impl TraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set or clear the shared trace id, returning the previous one.
    ///
    /// An enclosing scope still takes precedence until it exits.
    pub fn set(&self, trace_id: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.lock(), trace_id)
    }

    /// The innermost scoped id for this context, else the shared one.
    pub fn get(&self) -> Option<String> {
        let scoped = SCOPED_TRACE_IDS
            .try_with(|ids| ids.get(&self.id).cloned())
            .ok()
            .flatten();
        scoped.or_else(|| self.lock().clone())
    }

    fn scoped_ids(&self, trace_id: String) -> ScopedIds {
        let mut ids = SCOPED_TRACE_IDS
            .try_with(|ids| ids.clone())
            .unwrap_or_default();
        ids.insert(self.id, trace_id);
        ids
    }

    /// Run `body` with `trace_id` active on the current thread.
    ///
    /// The previous id is back in effect once `body` returns or unwinds.
    pub fn with_trace_id<R>(&self, trace_id: impl Into<String>, body: impl FnOnce() -> R) -> R {
        SCOPED_TRACE_IDS.sync_scope(self.scoped_ids(trace_id.into()), body)
    }

    /// Run `body` with a freshly generated trace id active.
    pub fn with_new_trace_id<R>(&self, body: impl FnOnce() -> R) -> R {
        self.with_trace_id(generate_trace_id(), body)
    }

    /// Await `body` with `trace_id` active for this task only.
    ///
    /// Ends on completion, error or cancellation of `body`.
    pub async fn scope<F>(&self, trace_id: impl Into<String>, body: F) -> F::Output
    where
        F: Future,
    {
        SCOPED_TRACE_IDS
            .scope(self.scoped_ids(trace_id.into()), body)
            .await
    }
}

/// A new random trace id.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_set_and_clear() {
        let context = TraceContext::new();
        assert!(context.get().is_none());

        context.set(Some("trace-123".to_string()));
        assert_eq!(context.get().as_deref(), Some("trace-123"));

        context.set(None);
        assert!(context.get().is_none());
    }

    #[test]
    fn test_nested_scopes_restore() {
        let context = TraceContext::new();

        context.with_trace_id("Y", || {
            assert_eq!(context.get().as_deref(), Some("Y"));
            context.with_trace_id("X", || {
                assert_eq!(context.get().as_deref(), Some("X"));
            });
            assert_eq!(context.get().as_deref(), Some("Y"));
        });

        assert!(context.get().is_none());
    }

    #[test]
    fn test_scope_shadows_shared_id() {
        let context = TraceContext::new();
        context.set(Some("shared".to_string()));

        context.with_trace_id("scoped", || {
            assert_eq!(context.get().as_deref(), Some("scoped"));
        });
        assert_eq!(context.get().as_deref(), Some("shared"));
    }

    #[test]
    fn test_restores_after_panic() {
        let context = TraceContext::new();
        context.set(Some("outer".to_string()));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            context.with_trace_id("inner", || panic!("boom"));
        }));

        assert!(result.is_err());
        assert_eq!(context.get().as_deref(), Some("outer"));
    }

    #[test]
    fn test_restores_after_error_return() {
        let context = TraceContext::new();

        let result: Result<(), &str> = context.with_trace_id("req-1", || Err("failed"));

        assert!(result.is_err());
        assert!(context.get().is_none());
    }

    #[test]
    fn test_new_trace_id_is_unique() {
        let context = TraceContext::new();
        let first = context.with_new_trace_id(|| context.get().unwrap());
        let second = context.with_new_trace_id(|| context.get().unwrap());

        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
        assert!(context.get().is_none());
    }

    #[test]
    fn test_scopes_are_per_context() {
        let first = TraceContext::new();
        let second = TraceContext::new();

        first.with_trace_id("first-only", || {
            assert_eq!(first.get().as_deref(), Some("first-only"));
            assert!(second.get().is_none());

            second.with_trace_id("second-only", || {
                assert_eq!(first.get().as_deref(), Some("first-only"));
                assert_eq!(second.get().as_deref(), Some("second-only"));
            });
        });
    }

    #[tokio::test]
    async fn test_async_scope() {
        let context = TraceContext::new();

        let seen = context
            .scope("async-1", async {
                tokio::task::yield_now().await;
                context.get()
            })
            .await;

        assert_eq!(seen.as_deref(), Some("async-1"));
        assert!(context.get().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_scope_restores() {
        let context = TraceContext::new();
        context.set(Some("outer".to_string()));

        let pending = context.scope("inner", std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(timed_out.is_err());
        assert_eq!(context.get().as_deref(), Some("outer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_scopes_stay_isolated() {
        let context = Arc::new(TraceContext::new());

        let scoped = |trace_id: &'static str, work: Duration| {
            let context = context.clone();
            async move {
                context
                    .scope(trace_id, async {
                        tokio::time::sleep(work).await;
                        context.get()
                    })
                    .await
            }
        };

        // req-a exits first while req-b is still open
        let (a, b) = tokio::join!(
            scoped("req-a", Duration::from_millis(10)),
            scoped("req-b", Duration::from_millis(20)),
        );

        assert_eq!(a.as_deref(), Some("req-a"));
        assert_eq!(b.as_deref(), Some("req-b"));
        assert!(context.get().is_none());
    }
}
