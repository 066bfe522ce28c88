//! High-availability role of this process.
//!
//! In an active/passive deployment only the active instance runs background
//! reconciliation. Followers keep running but skip every rekey tick.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::Result;

/// Reports whether this process is a passive replica.
#[async_trait]
pub trait HaRole: Send + Sync {
    /// Returns true if this instance is a follower.
    async fn is_follower(&self) -> Result<bool>;
}

/// Role fixed at startup and flipped on failover.
#[derive(Debug, Default)]
pub struct StaticHaRole {
    follower: AtomicBool,
}

impl StaticHaRole {
    /// Creates an active (non-follower) role.
    #[must_use]
    pub fn active() -> Self {
        Self::default()
    }

    /// Creates a follower role.
    #[must_use]
    pub fn follower() -> Self {
        Self {
            follower: AtomicBool::new(true),
        }
    }

    /// Promotes or demotes this instance.
    pub fn set_follower(&self, follower: bool) {
        self.follower.store(follower, Ordering::SeqCst);
    }
}

#[async_trait]
impl HaRole for StaticHaRole {
    async fn is_follower(&self) -> Result<bool> {
        Ok(self.follower.load(Ordering::SeqCst))
    }
}
