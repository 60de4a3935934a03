//! Telegram inbound receive loop.
//!
//! Long-polls `getUpdates` starting from the persisted offset. Every update
//! advances the offset (saved before the message is handled, so a crash
//! never replays an update) and each message is handled in its own tracked
//! task. The supervisor restarts the loop after failures with a backoff that
//! depends on why it stopped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channels::inbound::InboundHandler;
use crate::channels::telegram::TelegramClient;
use crate::channels::telegram_inbound::TelegramUpdate;
use crate::channels::ChannelError;
use crate::sessions::ChatStateStore;

/// Backoff after a generic receive failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(10);
/// Backoff after another instance took over polling (HTTP 409).
const CONFLICT_BACKOFF: Duration = Duration::from_secs(30);
/// Backoff after the loop stopped without an error.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(
        &self,
        offset: i64,
        poll_timeout_secs: u64,
    ) -> Result<Vec<TelegramUpdate>, ChannelError>;
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn get_updates(
        &self,
        offset: i64,
        poll_timeout_secs: u64,
    ) -> Result<Vec<TelegramUpdate>, ChannelError> {
        TelegramClient::get_updates(self, offset, poll_timeout_secs).await
    }
}

pub struct Intake {
    source: Arc<dyn UpdateSource>,
    handler: Arc<InboundHandler>,
    store: Arc<ChatStateStore>,
    poll_timeout_secs: u64,
    tracker: TaskTracker,
    consecutive_errors: AtomicU32,
}

impl Intake {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        handler: Arc<InboundHandler>,
        store: Arc<ChatStateStore>,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            source,
            handler,
            store,
            poll_timeout_secs,
            tracker: TaskTracker::new(),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// Supervise the receive loop until `shutdown` flips, then wait for
    /// inbound tasks still running.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let result = self.receive_loop(&mut shutdown).await;
            if *shutdown.borrow() {
                break;
            }

            let backoff = restart_backoff(&result);
            match &result {
                Ok(()) => {
                    info!(backoff_secs = backoff.as_secs(), "Telegram receive loop stopped, restarting");
                }
                Err(e) => {
                    let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if errors <= 3 {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "Telegram receive loop failed");
                    } else if errors == 4 {
                        warn!("Telegram receive errors continuing (suppressing further logs until recovery)");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.tracker.len(), "Telegram intake stopping, waiting for inbound tasks");
        self.tracker.close();
        self.tracker.wait().await;
        info!("Telegram intake stopped");
    }

    /// Poll until an error (returned) or shutdown (`Ok`).
    pub async fn receive_loop(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ChannelError> {
        let mut offset = self.store.load_update_offset();
        info!(offset, "Telegram receive loop started");

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let updates = tokio::select! {
                result = self.source.get_updates(offset, self.poll_timeout_secs) => result?,
                _ = shutdown.changed() => return Ok(()),
            };

            let errors = self.consecutive_errors.swap(0, Ordering::Relaxed);
            if errors > 0 {
                info!("Telegram receive loop recovered after {} errors", errors);
            }
            if updates.is_empty() {
                debug!("Telegram long-poll returned no updates");
                continue;
            }

            for update in updates {
                offset = next_offset_after_update(offset, update.update_id);
                self.store.save_update_offset(offset);
                let Some(message) = update.message else {
                    debug!(update_id = update.update_id, "non-message update skipped");
                    continue;
                };
                let handler = Arc::clone(&self.handler);
                self.tracker.spawn(async move {
                    handler.handle(&message).await;
                });
            }
        }
    }
}

fn restart_backoff(result: &Result<(), ChannelError>) -> Duration {
    match result {
        Ok(()) => RESTART_BACKOFF,
        Err(e) if e.is_conflict() => CONFLICT_BACKOFF,
        Err(_) => ERROR_BACKOFF,
    }
}

fn next_offset_after_update(current: i64, update_id: i64) -> i64 {
    current.max(update_id.saturating_add(1))
}
