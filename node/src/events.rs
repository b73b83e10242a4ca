//! This module implements the domain event bus of the judge node.
//!
//! Events are fanned out to registered subscribers on a best-effort,
//! at-least-once basis. For a single submission the lifecycle events are
//! published from one worker's straight-line code, so subscribers observe
//! `submission.created` before `judge.started` before `judge.completed` or
//! `judge.error`; across submissions no ordering is promised.
//!

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grading::{Language, Verdict};

use crate::utils::now_millis;

/// The typed payload of a domain event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A submission entered the queue, either fresh or through a rejudge.
    SubmissionCreated {
        submission_id: Uuid,
        user_id: Uuid,
        problem_id: Uuid,
        language: Language,
        rejudge: bool,
    },

    /// A worker claimed the submission and started grading.
    JudgeStarted {
        submission_id: Uuid,
        worker_id: String,
    },

    /// Grading ran to completion.
    JudgeCompleted {
        submission_id: Uuid,
        result: Verdict,
        total_points: u32,
        max_points: u32,
        execution_time_ms: u64,
        memory_usage_kb: u64,
    },

    /// Grading failed irrecoverably.
    JudgeError {
        submission_id: Uuid,
        error_kind: String,
        message: String,
    },

    /// An ad-hoc execution started.
    ExecutionStarted {
        execution_id: Uuid,
        language: Language,
    },

    /// An ad-hoc execution finished.
    ExecutionCompleted {
        execution_id: Uuid,
        status: String,
        wall_time_ms: u64,
        memory_used_kb: u64,
    },
}

impl EventPayload {
    /// Get the dotted kind name of the event.
    pub fn kind(&self) -> &'static str {
        use EventPayload::*;
        match self {
            SubmissionCreated { .. } => "submission.created",
            JudgeStarted { .. } => "judge.started",
            JudgeCompleted { .. } => "judge.completed",
            JudgeError { .. } => "judge.error",
            ExecutionStarted { .. } => "execution.started",
            ExecutionCompleted { .. } => "execution.completed",
        }
    }
}

/// The envelope every published event is wrapped in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Identity of this event emission.
    pub event_id: Uuid,

    /// When the event occurred, in epoch milliseconds.
    pub occurred_at: u64,

    /// The entity the event is about: the submission id for lifecycle
    /// events, the execution id for ad-hoc events.
    pub correlation_id: Uuid,

    /// The typed payload.
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload into a new envelope.
    pub fn new(correlation_id: Uuid, payload: EventPayload) -> Self {
        Event {
            event_id: Uuid::new_v4(),
            occurred_at: now_millis(),
            correlation_id,
            payload,
        }
    }
}

/// A subscriber callback registered on the event bus.
pub type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Fans domain events out to registered subscribers.
///
/// There is no module level bus instance; the composition root owns the bus
/// and threads it to every component that publishes.
pub struct EventBus {
    /// The registered subscribers.
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    /// Create a new `EventBus` with no subscribers.
    pub fn new() -> Self {
        EventBus { subscribers: RwLock::new(Vec::new()) }
    }

    /// Register a subscriber. Subscribers are invoked in registration order
    /// on the publishing thread.
    pub fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers
            .write()
            .expect("failed to lock the event bus subscriber list")
            .push(subscriber);
    }

    /// Publish the given payload to all subscribers. Delivery is
    /// best-effort: a panicking subscriber is caught and logged so that it
    /// cannot take the publishing worker down with it.
    pub fn publish(&self, correlation_id: Uuid, payload: EventPayload) {
        let event = Event::new(correlation_id, payload);
        log::trace!("publishing event {} for {}", event.payload.kind(), correlation_id);

        let subscribers = self.subscribers
            .read()
            .expect("failed to lock the event bus subscriber list");
        for subscriber in subscribers.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(&event)
            }));
            if outcome.is_err() {
                log::error!("event subscriber panicked on {}", event.payload.kind());
            }
        }
    }
}
