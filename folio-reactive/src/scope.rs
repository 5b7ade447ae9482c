//! Entity lifecycle: cancellation plus a commit gate.
//!
//! Every state write performed by a pipeline goes through [`Gate::commit`],
//! which re-checks the invocation's cancellation token while holding the
//! gate's read side. [`Gate::close`] cancels a token and then takes the write
//! side once, so when it returns no commit for that token is running and none
//! will run again. A late network response can therefore never land in a
//! disposed entity's state.

use std::cell::Cell;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

thread_local! {
    static COMMIT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Serializes state commits against cancellation.
#[derive(Clone, Default)]
pub struct Gate {
    lock: Arc<RwLock<()>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless `token` is cancelled. Returns `None` when skipped.
    ///
    /// Nested commits on the same thread reuse the outer read guard.
    pub fn commit<R>(&self, token: &CancellationToken, f: impl FnOnce() -> R) -> Option<R> {
        if COMMIT_DEPTH.with(|d| d.get()) > 0 {
            return if token.is_cancelled() { None } else { Some(run_nested(f)) };
        }

        let _guard = self.lock.read().unwrap_or_else(|p| p.into_inner());
        if token.is_cancelled() {
            return None;
        }
        Some(run_nested(f))
    }

    /// Cancel `token` and wait for in-progress commits to drain.
    ///
    /// When called from inside a commit on this thread the wait is skipped;
    /// the surrounding commit finishes right after.
    pub fn close(&self, token: &CancellationToken) {
        token.cancel();
        if COMMIT_DEPTH.with(|d| d.get()) == 0 {
            drop(self.lock.write().unwrap_or_else(|p| p.into_inner()));
        }
    }
}

fn run_nested<R>(f: impl FnOnce() -> R) -> R {
    struct Depth;
    impl Drop for Depth {
        fn drop(&mut self) {
            COMMIT_DEPTH.with(|d| d.set(d.get() - 1));
        }
    }
    COMMIT_DEPTH.with(|d| d.set(d.get() + 1));
    let _depth = Depth;
    f()
}

/// Lifecycle owner for one entity.
///
/// Pipelines created against a scope derive their tokens from it, so
/// [`dispose`](Self::dispose) cancels all of them at once.
#[derive(Clone)]
pub struct Scope {
    name: Arc<str>,
    token: CancellationToken,
    gate: Gate,
}

impl Scope {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            gate: Gate::new(),
        }
    }

    /// A nested scope: disposed with its parent, or on its own.
    pub fn child(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            token: self.token.child_token(),
            gate: self.gate.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Apply `f` if the scope is still live.
    pub fn commit<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.gate.commit(&self.token, f)
    }

    /// Cancel every pipeline in this scope and wait for pending commits.
    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            log::debug!("disposing scope {}", self.name);
        }
        self.gate.close(&self.token);
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_runs_while_live() {
        let scope = Scope::new("test");
        assert_eq!(scope.commit(|| 7), Some(7));
    }

    #[test]
    fn test_commit_skipped_after_dispose() {
        let scope = Scope::new("test");
        scope.dispose();
        assert!(scope.is_disposed());
        assert_eq!(scope.commit(|| 7), None);
    }

    #[test]
    fn test_child_disposed_with_parent() {
        let parent = Scope::new("parent");
        let child = parent.child("child");
        parent.dispose();
        assert!(child.is_disposed());
    }

    #[test]
    fn test_child_dispose_leaves_parent_live() {
        let parent = Scope::new("parent");
        let child = parent.child("child");
        child.dispose();
        assert!(!parent.is_disposed());
        assert_eq!(parent.commit(|| 1), Some(1));
    }

    #[test]
    fn test_nested_commit_and_close_inside_commit() {
        let scope = Scope::new("test");
        let inner = scope.child("inner");
        let result = scope.commit(|| {
            let nested = scope.commit(|| 2);
            inner.dispose();
            nested
        });
        assert_eq!(result, Some(Some(2)));
        assert!(inner.is_disposed());
    }

    #[test]
    fn test_dispose_waits_for_running_commit() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let scope = Scope::new("test");
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (scope.clone(), finished.clone());
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = std::thread::spawn(move || {
            s.commit(|| {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
                f.store(true, Ordering::SeqCst);
            });
        });

        started_rx.recv().unwrap();
        scope.dispose();
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
