//! Release actions for acquired resources.
//!
//! Every acquisition pushes the action that undoes it. Teardown pops and runs
//! them newest first; a failing action never stops the ones after it.

use crate::error::{BridgeError, Result};
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

type ReleaseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

enum Action {
    Sync(Box<dyn FnOnce() -> Result<()> + Send>),
    Async(Box<dyn FnOnce() -> ReleaseFuture + Send>),
}

struct Release {
    label: String,
    action: Action,
}

/// Stack of release actions, executed in reverse order of acquisition.
#[derive(Default)]
pub struct ReleaseStack {
    actions: Vec<Release>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a synchronous release action.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.actions.push(Release {
            label: label.into(),
            action: Action::Sync(Box::new(action)),
        });
    }

    /// Push an asynchronous release action.
    pub fn push_async<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.actions.push(Release {
            label: label.into(),
            action: Action::Async(Box::new(move || Box::pin(action()))),
        });
    }

    /// Drop the newest pending action labelled `label` without running it.
    /// Returns whether one was found.
    pub fn remove(&mut self, label: &str) -> bool {
        match self.actions.iter().rposition(|r| r.label == label) {
            Some(index) => {
                self.actions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Move all pending actions into a new stack, leaving this one empty.
    pub fn take(&mut self) -> ReleaseStack {
        std::mem::take(self)
    }

    /// Run every action newest first and collect the failures.
    pub async fn release_all(self) -> Result<()> {
        let mut failures = Vec::new();
        for release in self.actions.into_iter().rev() {
            let outcome = match release.action {
                Action::Sync(f) => f(),
                Action::Async(f) => f().await,
            };
            if let Err(e) = outcome {
                warn!(step = %release.label, error = %e, "Release step failed");
                failures.push(format!("{}: {}", release.label, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Cleanup(failures))
        }
    }
}

impl std::fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.actions.iter().map(|r| &r.label))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn runs_in_reverse_order() {
        let log = recorder();
        let mut stack = ReleaseStack::new();
        for name in ["first", "second", "third"] {
            let log = log.clone();
            stack.push(name, move || {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        stack.release_all().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failures_do_not_stop_remaining_steps() {
        let log = recorder();
        let mut stack = ReleaseStack::new();
        let l1 = log.clone();
        stack.push("socket", move || {
            l1.lock().unwrap().push("socket");
            Ok(())
        });
        stack.push("unexport", || Err(BridgeError::IllegalState("gone".into())));
        let l2 = log.clone();
        stack.push_async("notify", move || async move {
            l2.lock().unwrap().push("notify");
            Err(BridgeError::Codec("closed".into()))
        });

        let err = stack.release_all().await.unwrap_err();
        match err {
            BridgeError::Cleanup(failures) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("notify"));
                assert!(failures[1].starts_with("unexport"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["notify", "socket"]);
    }

    #[tokio::test]
    async fn take_leaves_an_empty_stack() {
        let mut stack = ReleaseStack::new();
        stack.push("a", || Ok(()));
        let taken = stack.take();
        assert!(stack.is_empty());
        assert_eq!(taken.len(), 1);
        stack.release_all().await.unwrap();
        taken.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn removed_actions_never_run() {
        let log = recorder();
        let mut stack = ReleaseStack::new();
        for name in ["keep", "drop"] {
            let log = log.clone();
            stack.push(name, move || {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        assert!(stack.remove("drop"));
        assert!(!stack.remove("drop"));
        assert_eq!(stack.len(), 1);
        stack.release_all().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    }
}
