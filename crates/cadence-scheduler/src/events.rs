use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use crate::types::{ExecutionEvent, Outcome, TriggerErrorEvent};

/// Per-job history cap for the [`ResultLog`].
pub const RESULT_HISTORY_LIMIT: usize = 50;

/// Typed subscriber for scheduler events.
///
/// Called synchronously on the coordinator task, so implementations must be
/// cheap and must not block.
pub trait EventListener: Send + Sync {
    fn on_success(&self, event: &ExecutionEvent);

    fn on_failure(&self, event: &ExecutionEvent);

    /// Misfired and coalesced occurrences.
    fn on_skipped(&self, _event: &ExecutionEvent) {}

    /// A job's trigger broke and the job was unscheduled.
    fn on_trigger_error(&self, _event: &TriggerErrorEvent) {}
}

/// Fan-out point between the coordinator and its listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Deliver `event` to every listener, in subscription order.
    pub fn publish(&self, event: &ExecutionEvent) {
        let listeners = self.listeners.read().expect("listener registry poisoned");
        for listener in listeners.iter() {
            match event.outcome {
                Outcome::Success { .. } => listener.on_success(event),
                Outcome::Failure { .. } => listener.on_failure(event),
                Outcome::Missed { .. } | Outcome::Coalesced { .. } => listener.on_skipped(event),
            }
        }
    }

    pub fn publish_trigger_error(&self, event: &TriggerErrorEvent) {
        let listeners = self.listeners.read().expect("listener registry poisoned");
        for listener in listeners.iter() {
            listener.on_trigger_error(event);
        }
    }
}

/// Bounded, per-job execution history.
///
/// Keeps the most recent [`RESULT_HISTORY_LIMIT`] events per job id in
/// arrival order. Has its own locking, independent of the job store.
pub struct ResultLog {
    entries: DashMap<String, VecDeque<ExecutionEvent>>,
    limit: usize,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::with_limit(RESULT_HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn append(&self, event: ExecutionEvent) {
        let mut history = self.entries.entry(event.job_id.clone()).or_default();
        if history.len() == self.limit {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Chronological history for `job_id`; empty for unknown ids.
    pub fn get(&self, job_id: &str) -> Vec<ExecutionEvent> {
        self.entries
            .get(job_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, job_id: &str) {
        if self.entries.remove(job_id).is_some() {
            debug!(job_id = %job_id, "result history cleared");
        }
    }
}

impl Default for ResultLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListener for ResultLog {
    fn on_success(&self, event: &ExecutionEvent) {
        self.append(event.clone());
    }

    fn on_failure(&self, event: &ExecutionEvent) {
        self.append(event.clone());
    }

    fn on_skipped(&self, event: &ExecutionEvent) {
        self.append(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoalesceReason;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn event(job_id: &str, n: u64) -> ExecutionEvent {
        ExecutionEvent {
            job_id: job_id.to_string(),
            job_name: job_id.to_string(),
            scheduled_time: Utc::now(),
            execution_time: Utc::now(),
            duration_secs: 0.0,
            outcome: Outcome::Success { value: json!(n) },
        }
    }

    #[test]
    fn keeps_the_fifty_most_recent_in_order() {
        let log = ResultLog::new();
        for n in 0..73 {
            log.append(event("a", n));
        }
        let history = log.get("a");
        assert_eq!(history.len(), 50);
        let values: Vec<u64> = history
            .iter()
            .map(|e| match &e.outcome {
                Outcome::Success { value } => value.as_u64().unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, (23..73).collect::<Vec<_>>());
    }

    #[test]
    fn unknown_job_is_empty() {
        let log = ResultLog::new();
        assert!(log.get("ghost").is_empty());
        log.clear("ghost");
    }

    #[test]
    fn histories_are_per_job() {
        let log = ResultLog::with_limit(2);
        log.append(event("a", 1));
        log.append(event("b", 2));
        log.append(event("a", 3));
        log.append(event("a", 4));
        assert_eq!(log.get("a").len(), 2);
        assert_eq!(log.get("b").len(), 1);
        log.clear("a");
        assert!(log.get("a").is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl EventListener for Recorder {
        fn on_success(&self, _: &ExecutionEvent) {
            self.seen.lock().unwrap().push("success");
        }
        fn on_failure(&self, _: &ExecutionEvent) {
            self.seen.lock().unwrap().push("failure");
        }
        fn on_skipped(&self, _: &ExecutionEvent) {
            self.seen.lock().unwrap().push("skipped");
        }
        fn on_trigger_error(&self, _: &TriggerErrorEvent) {
            self.seen.lock().unwrap().push("trigger_error");
        }
    }

    #[test]
    fn bus_routes_by_outcome() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        let log = Arc::new(ResultLog::new());
        bus.subscribe(recorder.clone());
        bus.subscribe(log.clone());

        let mut e = event("a", 1);
        bus.publish(&e);
        e.outcome = Outcome::Failure {
            error: "x".to_string(),
            trace: None,
        };
        bus.publish(&e);
        e.outcome = Outcome::Coalesced {
            reason: CoalesceReason::MaxInstances,
        };
        bus.publish(&e);
        bus.publish_trigger_error(&TriggerErrorEvent {
            job_id: "a".to_string(),
            job_name: "a".to_string(),
            error: "overflow".to_string(),
            at: Utc::now(),
        });

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["success", "failure", "skipped", "trigger_error"]
        );
        assert_eq!(log.get("a").len(), 3);
    }
}
