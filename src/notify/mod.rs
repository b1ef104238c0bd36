// src/notify/mod.rs

//! Hand-off point for due notifications.
//!
//! The tracker decides *when* a user action is due; a trigger decides what
//! to do with it. Script execution stays outside this crate.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;

use tracing::{info, warn};

pub use crate::workflow::rules::Notification;

pub trait NotificationTrigger: Send + Debug {
    /// Queue one due action.
    fn dispatch(&mut self, notification: Notification);
    /// Give queued actions a chance to progress; called once per pass.
    fn service(&mut self);
    /// Drain everything before shutdown.
    fn finish(&mut self);
}

/// Reports due actions through tracing, at most `max_pending` per pass.
#[derive(Debug)]
pub struct LoggingTrigger {
    pending: VecDeque<Notification>,
    max_pending: usize,
    timeout: Option<Duration>,
    delivered: usize,
}

impl LoggingTrigger {
    pub fn new(max_pending: usize, timeout: Option<Duration>) -> Self {
        Self {
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            timeout,
            delivered: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    fn deliver(&mut self, notification: Notification) {
        let event = notification.env.get("WF_EVENT").map(String::as_str).unwrap_or("unknown");
        info!(
            action = %notification.action,
            event,
            timeout_secs = self.timeout.map(|t| t.as_secs()),
            "notification due"
        );
        self.delivered += 1;
    }
}

impl NotificationTrigger for LoggingTrigger {
    fn dispatch(&mut self, notification: Notification) {
        self.pending.push_back(notification);
    }

    fn service(&mut self) {
        for _ in 0..self.max_pending {
            let Some(next) = self.pending.pop_front() else { break };
            self.deliver(next);
        }
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "notifications waiting for the next pass");
        }
    }

    fn finish(&mut self) {
        while let Some(next) = self.pending.pop_front() {
            self.deliver(next);
        }
    }
}

/// Trigger that drops everything, used when notifications are off.
#[derive(Debug, Default)]
pub struct NoopTrigger;

impl NotificationTrigger for NoopTrigger {
    fn dispatch(&mut self, _notification: Notification) {}
    fn service(&mut self) {}
    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn note(action: &str) -> Notification {
        Notification {
            action: action.into(),
            env: BTreeMap::from([("WF_EVENT".to_string(), "start".to_string())]),
        }
    }

    #[test]
    fn service_is_bounded_and_finish_drains() {
        let mut trigger = LoggingTrigger::new(2, None);
        for i in 0..5 {
            trigger.dispatch(note(&format!("/bin/n{i}")));
        }
        trigger.service();
        assert_eq!(trigger.delivered(), 2);
        assert_eq!(trigger.pending(), 3);
        trigger.finish();
        assert_eq!(trigger.delivered(), 5);
        assert_eq!(trigger.pending(), 0);
    }
}
