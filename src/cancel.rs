//! Cancellation tokens for refresh tasks.
//!
//! A refresh observes its token at every directory boundary while scanning
//! and once more before splicing. Once cancelled, a token never resets; a new
//! refresh gets a fresh token.
//!
//! ## Sparse Checking
//!
//! For loops over many files, `is_cancelled_sparse()` only reads the flag
//! every 4,096 iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How often per-file loops should check whether execution was cancelled.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x1000; // 4,096

/// A cloneable cancellation token shared between a task and its owner.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks if this token is still active.
    ///
    /// Returns `Some(())` if still active, `None` if cancelled.
    /// This enables use with the `?` operator for early returns.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            None
        } else {
            Some(())
        }
    }

    /// Sparse cancellation check - only checks every `CANCEL_CHECK_INTERVAL` iterations.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }

    /// Returns true once cancellation was requested.
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.is_cancelled().is_none()
    }
}
