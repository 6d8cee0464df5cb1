//! Test doubles for dispatch scenarios
#![allow(dead_code)] // Not every helper is used by every test binary

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use courier_dispatch::{
    DeliveryError, DispatchEvent, EventKind, EventSink, Message, Provider, Status,
    TemporaryError,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Provider that follows a script of results and records when it was called.
///
/// Once the script runs out, `fallback` decides every further call.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<(Instant, Message)>>,
}

impl ScriptedProvider {
    pub fn always_failing(name: &str) -> Arc<Self> {
        Self::scripted(name, &[], false)
    }

    pub fn always_succeeding(name: &str) -> Arc<Self> {
        Self::scripted(name, &[], true)
    }

    pub fn scripted(name: &str, script: &[bool], fallback: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: Mutex::default(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.calls.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        self.calls.lock().push((Instant::now(), message.clone()));

        let succeed = self.script.lock().pop_front().unwrap_or(self.fallback);
        if succeed {
            Ok(())
        } else {
            Err(TemporaryError::Unavailable(format!("{} is down", self.name)).into())
        }
    }
}

/// Sink that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DispatchEvent>>,
    statuses: Mutex<Vec<Status>>,
    logs: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub fn last_status(&self) -> Option<Status> {
        self.statuses.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.statuses.lock().clear();
        self.logs.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn on_status(&self, status: &Status) {
        self.statuses.lock().push(status.clone());
    }

    fn on_log(&self, line: &str) {
        self.logs.lock().push(line.to_string());
    }

    fn on_event(&self, event: &DispatchEvent) {
        self.events.lock().push(event.clone());
        self.on_status(&event.status());
        self.on_log(&event.log_line());
    }
}
