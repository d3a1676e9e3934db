//! One-way player notifications.
//!
//! Notifications are sent after the state change they describe has been
//! committed. Delivery failures are logged and dropped.

use crate::models::PlayerId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Delivery failure
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound message channel to players
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, player_id: PlayerId, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, player_id: PlayerId, message: &str) -> Result<(), NotifyError> {
        log::info!("Notify player {player_id}: {message}");
        Ok(())
    }
}

/// Send messages in the background without waiting for delivery
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, messages: Vec<(PlayerId, String)>) {
    if messages.is_empty() {
        return;
    }

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("No runtime available, dropping {} notification(s)", messages.len());
        return;
    };

    runtime.spawn(async move {
        for (player_id, message) in messages {
            if let Err(e) = notifier.notify(player_id, &message).await {
                log::warn!("Failed to notify player {player_id}: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<(PlayerId, String)>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn notify(&self, player_id: PlayerId, message: &str) -> Result<(), NotifyError> {
            let _ = self.0.send((player_id, message.to_string()));
            Err(NotifyError("bot offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_and_swallows_failures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(
            Arc::new(ChannelNotifier(tx)),
            vec![(1, "one".to_string()), (2, "two".to_string())],
        );

        assert_eq!(rx.recv().await, Some((1, "one".to_string())));
        assert_eq!(rx.recv().await, Some((2, "two".to_string())));
    }

    #[test]
    fn test_dispatch_without_runtime_is_a_no_op() {
        dispatch(Arc::new(LogNotifier), vec![(1, "lost".to_string())]);
    }
}
