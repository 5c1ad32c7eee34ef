//! Counting rendezvous for concurrently dispatched targets.
//!
//! Each task gets a clone of `CompletionSignal` and sends exactly one
//! completion. The barrier releases after `expected` completions; if every
//! signal is dropped before that, the barrier reports how many arrived
//! instead of waiting forever.

use async_channel::{Receiver, Sender};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("only {received} of {expected} targets signalled completion")]
pub struct BarrierError {
    pub received: usize,
    pub expected: usize,
}

/// A finished target and whatever its task produced.
#[derive(Debug)]
pub struct Completion<T> {
    pub database: String,
    pub outcome: T,
}

pub struct CompletionSignal<T> {
    tx: Sender<Completion<T>>,
}

impl<T> Clone for CompletionSignal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> CompletionSignal<T> {
    pub fn complete(&self, database: impl Into<String>, outcome: T) {
        let completion = Completion {
            database: database.into(),
            outcome,
        };
        // Unbounded, so this only fails once the barrier is gone.
        if self.tx.try_send(completion).is_err() {
            tracing::debug!("Completion signalled after the barrier was dropped");
        }
    }
}

pub struct CompletionBarrier<T> {
    expected: usize,
    received: usize,
    rx: Receiver<Completion<T>>,
}

impl<T> CompletionBarrier<T> {
    pub fn new(expected: usize) -> (Self, CompletionSignal<T>) {
        let (tx, rx) = async_channel::unbounded();
        let barrier = Self {
            expected,
            received: 0,
            rx,
        };
        (barrier, CompletionSignal { tx })
    }

    pub fn is_released(&self) -> bool {
        self.received >= self.expected
    }

    /// The next completion, or `None` once every expected completion has
    /// been received.
    pub async fn next(&mut self) -> Option<Result<Completion<T>, BarrierError>> {
        if self.is_released() {
            return None;
        }
        match self.rx.recv().await {
            Ok(completion) => {
                self.received += 1;
                Some(Ok(completion))
            }
            Err(_) => {
                let err = BarrierError {
                    received: self.received,
                    expected: self.expected,
                };
                // Report the shortfall once, then stay released.
                self.expected = self.received;
                Some(Err(err))
            }
        }
    }

    /// Block until all expected completions arrived and return them in
    /// arrival order.
    pub async fn wait(mut self) -> Result<Vec<Completion<T>>, BarrierError> {
        let mut completions = Vec::with_capacity(self.expected);
        while let Some(completion) = self.next().await {
            completions.push(completion?);
        }
        Ok(completions)
    }
}
