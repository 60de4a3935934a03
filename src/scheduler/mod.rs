//! Reply engine
//!
//! A single tick loop walks every known chat. Each chat that is not already
//! being worked on gets its own task which, in order:
//!
//! 1. distills memory if enough new messages piled up ([`distill`]),
//! 2. decides whether to speak ([`decision`]),
//! 3. generates a reply with fallbacks ([`responder`]),
//! 4. hands the reply to the paced delivery pipeline.
//!
//! The store lock is never held across an await; every step reads what it
//! needs, releases, calls out, then writes back.

pub mod decision;
pub mod distill;
pub mod responder;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::agent::{ContentSanitizer, Generator};
use crate::channels::Transport;
use crate::config::Settings;
use crate::messages::{DeliveryPipeline, DeliveryReport, RandomSource};
use crate::sessions::ChatStateStore;
use decision::decide;
use distill::Distiller;
use responder::{ReplyOutcome, Responder};

/// What one chat cycle ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No messages, or the decision was to stay quiet.
    Idle,
    /// The transport could not show the typing indicator; nothing was generated.
    TransportDown,
    Delivered(DeliveryReport),
    /// Generation ended without a reply (silence, quota, timeout, failure).
    NoReply(ReplyOutcome),
}

pub struct Engine {
    store: Arc<ChatStateStore>,
    transport: Arc<dyn Transport>,
    responder: Responder,
    distiller: Distiller,
    delivery: DeliveryPipeline,
    history_window: usize,
    in_flight: Mutex<HashSet<i64>>,
    tracker: TaskTracker,
}

impl Engine {
    pub fn new(
        store: Arc<ChatStateStore>,
        transport: Arc<dyn Transport>,
        generator: Arc<dyn Generator>,
        rng: Arc<dyn RandomSource>,
        settings: &Settings,
    ) -> Arc<Self> {
        let engine = &settings.engine;
        let sanitizer = Arc::new(ContentSanitizer::new(&settings.sanitizer.extra_terms));
        let responder = Responder::new(
            store.clone(),
            generator.clone(),
            sanitizer.clone(),
            engine.generation_timeout(),
            engine.history_window,
        );
        let distiller = Distiller::new(
            store.clone(),
            generator,
            sanitizer,
            engine.generation_timeout(),
            engine.distill_backlog,
            engine.history_window,
        );
        let delivery = DeliveryPipeline::new(
            transport.clone(),
            store.clone(),
            rng,
            settings.persona.name.clone(),
        );
        Arc::new(Self {
            store,
            transport,
            responder,
            distiller,
            delivery,
            history_window: engine.history_window,
            in_flight: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
        })
    }

    /// Run ticks every `interval` until `shutdown` flips, then wait for chat
    /// tasks already running. Deliveries in progress are not interrupted.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "reply engine started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            if *shutdown.borrow() {
                break;
            }

            self.tick();
        }

        info!(in_flight = self.in_flight.lock().len(), "reply engine stopping, waiting for chat tasks");
        self.drain().await;
        info!("reply engine stopped");
    }

    /// Spawn a cycle for every chat not already in flight. Returns how many
    /// were spawned.
    pub fn tick(self: &Arc<Self>) -> usize {
        let mut spawned = 0;
        for chat_id in self.store.list_chat_ids() {
            if !self.in_flight.lock().insert(chat_id) {
                debug!(chat_id, "chat still in flight, skipping");
                continue;
            }
            let engine = Arc::clone(self);
            self.tracker.spawn(async move {
                let _guard = InFlightGuard {
                    engine: &engine,
                    chat_id,
                };
                let outcome = engine.run_cycle(chat_id).await;
                debug!(chat_id, ?outcome, "chat cycle finished");
            });
            spawned += 1;
        }
        spawned
    }

    /// Stop accepting work and wait for running chat tasks.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// One full cycle for `chat_id`.
    pub async fn run_cycle(&self, chat_id: i64) -> CycleOutcome {
        let distilled = self.distiller.run_if_due(chat_id).await;
        if distilled != distill::DistillOutcome::NotDue {
            debug!(chat_id, outcome = ?distilled, "distillation pass");
        }

        let Some(view) = self.store.view(chat_id, self.history_window) else {
            return CycleOutcome::Idle;
        };
        let Some(last) = view.last_message() else {
            return CycleOutcome::Idle;
        };
        let now = Local::now();
        let verdict = decide(last, &view.recent, now);
        if !verdict.respond {
            return CycleOutcome::Idle;
        }
        let last_message_id = last.message_id;
        if !self.store.has_daily_quota(chat_id) {
            debug!(chat_id, message_id = last_message_id, "daily quota spent, staying quiet");
            self.store.set_suppressed(chat_id, last_message_id);
            return CycleOutcome::NoReply(ReplyOutcome::QuotaExceeded);
        }
        info!(chat_id, message_id = last_message_id, story = verdict.story, "responding");

        if let Err(e) = self.transport.send_typing(chat_id).await {
            warn!(chat_id, error = %e, "typing indicator failed, skipping reply");
            return CycleOutcome::TransportDown;
        }

        match self
            .responder
            .respond(chat_id, last_message_id, verdict.story, now)
            .await
        {
            ReplyOutcome::Reply(text) => CycleOutcome::Delivered(self.delivery.deliver(chat_id, &text).await),
            other => CycleOutcome::NoReply(other),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

struct InFlightGuard<'a> {
    engine: &'a Engine,
    chat_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.engine.in_flight.lock().remove(&self.chat_id);
    }
}
