//! Tunnel permission brokering
//!
//! Mobile platforms gate tunnel creation behind a user-facing permission
//! prompt. The broker serializes prompts (at most one in flight), remembers a
//! grant so reconnects skip the prompt, and forgets it when the platform
//! revokes the permission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Presents the tunnel permission prompt to the user or platform
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Ask for the tunnel permission; `true` means granted
    async fn request(&self) -> bool;
}

/// Prompt that answers the same way every time
///
/// Deployments without a user-facing prompt (already-privileged processes,
/// tests) use this in place of a real dialog.
pub struct StaticPrompt {
    grant: bool,
}

impl StaticPrompt {
    /// A prompt that always grants
    pub fn granting() -> Self {
        Self { grant: true }
    }

    /// A prompt that always denies
    pub fn denying() -> Self {
        Self { grant: false }
    }
}

#[async_trait]
impl PermissionPrompt for StaticPrompt {
    async fn request(&self) -> bool {
        self.grant
    }
}

/// Serializes permission prompts and caches the grant
pub struct PermissionBroker {
    prompt: Arc<dyn PermissionPrompt>,
    pending: AtomicBool,
    granted: AtomicBool,
}

impl PermissionBroker {
    /// Create a broker over the given prompt
    pub fn new(prompt: Arc<dyn PermissionPrompt>) -> Self {
        Self {
            prompt,
            pending: AtomicBool::new(false),
            granted: AtomicBool::new(false),
        }
    }

    /// Ensure the tunnel permission is granted, prompting if needed
    ///
    /// A cached grant short-circuits the prompt. While a prompt is in flight
    /// every further request fails with [`Error::RequestAlreadyPending`];
    /// callers retry after the first prompt resolves.
    pub async fn request(&self) -> Result<()> {
        if self.granted.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.pending.swap(true, Ordering::SeqCst) {
            return Err(Error::RequestAlreadyPending);
        }

        let granted = self.prompt.request().await;
        self.pending.store(false, Ordering::SeqCst);

        if granted {
            self.granted.store(true, Ordering::SeqCst);
            log::info!("tunnel permission granted");
            Ok(())
        } else {
            log::warn!("tunnel permission denied");
            Err(Error::PermissionDenied)
        }
    }

    /// Whether a grant is currently cached
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    /// Forget the cached grant
    ///
    /// Called when the platform revokes the permission; the next connect
    /// prompts again.
    pub fn clear_grant(&self) {
        self.granted.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowPrompt;

    #[async_trait]
    impl PermissionPrompt for SlowPrompt {
        async fn request(&self) -> bool {
            tokio::time::sleep(Duration::from_millis(50)).await;
            true
        }
    }

    #[tokio::test]
    async fn test_grant_is_cached() {
        let broker = PermissionBroker::new(Arc::new(StaticPrompt::granting()));
        assert!(!broker.is_granted());

        broker.request().await.unwrap();
        assert!(broker.is_granted());

        // second request resolves from the cache
        broker.request().await.unwrap();
    }

    #[tokio::test]
    async fn test_denied() {
        let broker = PermissionBroker::new(Arc::new(StaticPrompt::denying()));
        let err = broker.request().await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert!(!broker.is_granted());
    }

    #[tokio::test]
    async fn test_concurrent_request_rejected() {
        let broker = Arc::new(PermissionBroker::new(Arc::new(SlowPrompt)));

        let first = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = broker.request().await.unwrap_err();
        assert!(matches!(err, Error::RequestAlreadyPending));

        first.await.unwrap().unwrap();
        assert!(broker.is_granted());
    }

    #[tokio::test]
    async fn test_clear_grant() {
        let broker = PermissionBroker::new(Arc::new(StaticPrompt::granting()));
        broker.request().await.unwrap();
        broker.clear_grant();
        assert!(!broker.is_granted());
    }
}
