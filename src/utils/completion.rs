use tokio::sync::watch;

use crate::error::{AvError, Result};

/// Resolving side of an outcome that is delivered exactly once.
#[derive(Debug)]
pub struct Completion<T> {
    tx: watch::Sender<Option<Result<T>>>,
}

/// Awaiting side of a [`Completion`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Waiter<T> {
    rx: watch::Receiver<Option<Result<T>>>,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// An already resolved completion.
    pub fn resolved(value: Result<T>) -> Self {
        let (tx, _) = watch::channel(Some(value));
        Self { tx }
    }

    /// Stores the outcome. Returns false if one was already stored.
    pub fn resolve(&self, value: Result<T>) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn waiter(&self) -> Waiter<T> {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Waiter<T> {
    /// Returns the outcome if it is already known.
    pub fn peek(&self) -> Option<Result<T>> {
        self.rx.borrow().clone()
    }

    /// Waits for the outcome. A completion dropped before resolving yields `Closed`.
    pub async fn wait(mut self) -> Result<T> {
        loop {
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return value;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| Err(AvError::Closed("dropped before completion".into())));
            }
        }
    }
}
