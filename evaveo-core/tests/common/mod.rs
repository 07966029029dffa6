//! Shared helpers for evaveo-core integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evaveo_core::delivery::Transport;
use evaveo_core::{Config, Error, EventRecord, Result};

/// In-memory transport with scripted failures
///
/// Tracks every attempt, every accepted record and the highest number of
/// sends observed in flight at once.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    delay: Mutex<Duration>,
    attempts: Mutex<Vec<String>>,
    delivered: Mutex<Vec<EventRecord>>,
    fail_times: Mutex<HashMap<String, usize>>,
    always_fail: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each send open for `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;
        self
    }

    /// Fail the next `times` attempts for records named `event_name`
    pub fn fail_times(self, event_name: &str, times: usize) -> Self {
        self.inner
            .fail_times
            .lock()
            .unwrap()
            .insert(event_name.to_string(), times);
        self
    }

    /// Fail every attempt for records named `event_name`
    pub fn always_fail(self, event_name: &str) -> Self {
        self.inner
            .always_fail
            .lock()
            .unwrap()
            .insert(event_name.to_string());
        self
    }

    /// Event names in attempt order, failures included
    pub fn attempts(&self) -> Vec<String> {
        self.inner.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.attempts.lock().unwrap().len()
    }

    /// Accepted records in delivery order
    pub fn delivered(&self) -> Vec<EventRecord> {
        self.inner.delivered.lock().unwrap().clone()
    }

    pub fn delivered_names(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .map(|r| r.event_name)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, event_name: &str) -> bool {
        if self.inner.always_fail.lock().unwrap().contains(event_name) {
            return true;
        }
        let mut fail_times = self.inner.fail_times.lock().unwrap();
        match fail_times.get_mut(event_name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, record: &EventRecord) -> Result<()> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.inner.delay.lock().unwrap();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        self.inner
            .attempts
            .lock()
            .unwrap()
            .push(record.event_name.clone());
        let result = if self.should_fail(&record.event_name) {
            Err(Error::Delivery("API error (503 Service Unavailable): down".to_string()))
        } else {
            self.inner.delivered.lock().unwrap().push(record.clone());
            Ok(())
        };

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Config with a key, the given URL and no periodic performance records
pub fn quiet_config(api_key: &str, api_url: &str) -> Config {
    let mut config = Config::default();
    config.sdk.api_key = Some(api_key.to_string());
    config.sdk.api_url = api_url.to_string();
    config.sdk.app_name = Some("Safety Training".to_string());
    config.performance.enabled = false;
    config
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
