//! External collaborators: the measurement source and the permission gate.
//!
//! Both are traits so the core never depends on a concrete platform. The
//! module also ships small in-process implementations used by the demo
//! binary and tests: [`ReplaySource`] and [`StaticPermission`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::controller::PermissionSignal;
use crate::error::SourceError;
use crate::snapshot::Reading;

/// Accuracy preference for continuous updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    High,
    Balanced,
    Low,
}

/// Parameters for a continuous subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub accuracy: Accuracy,
}

/// Callback a source invokes for every reading.
#[derive(Clone)]
pub struct ReadingSink(Arc<dyn Fn(Reading) + Send + Sync>);

impl ReadingSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Reading) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Hand one reading to the core.
    pub fn push(&self, reading: Reading) {
        (self.0)(reading);
    }
}

impl std::fmt::Debug for ReadingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadingSink")
    }
}

/// A provider of timestamped readings.
///
/// Readings may be pushed from any thread, including synchronously from
/// inside `subscribe`.
pub trait MeasurementSource: Send + Sync {
    /// The most recent cached reading, if the provider has one.
    fn last_known_reading(&self) -> Option<Reading>;

    /// Start continuous delivery into `sink` until [`Self::unsubscribe`].
    ///
    /// # Errors
    ///
    /// `SubscribeFailed` if the provider refuses, `AlreadySubscribed` if a
    /// subscription is already running.
    fn subscribe(&self, request: LocationRequest, sink: ReadingSink) -> Result<(), SourceError>;

    /// Stop continuous delivery. No-op when not subscribed.
    fn unsubscribe(&self);
}

/// Runtime permission check plus the hook that starts the external
/// permission-request flow.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self) -> bool;

    /// Start the request flow. Implementations call `signal.grant()` once the
    /// user has granted access; on refusal they simply never signal.
    fn request(&self, signal: PermissionSignal);
}

/// Permission gate backed by a flag.
///
/// With `grant_on_request` set, a request flips the flag and emits the
/// signal, standing in for a user who accepts the dialog.
#[derive(Debug, Default)]
pub struct StaticPermission {
    granted: AtomicBool,
    grant_on_request: bool,
    requests: AtomicUsize,
}

impl StaticPermission {
    #[must_use]
    pub fn granted() -> Self {
        Self {
            granted: AtomicBool::new(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn denied() -> Self {
        Self::default()
    }

    /// Denied until requested, then granted.
    #[must_use]
    pub fn grant_on_request() -> Self {
        Self {
            grant_on_request: true,
            ..Self::default()
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::Release);
    }

    /// Number of times the request flow was started.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl PermissionGate for StaticPermission {
    fn is_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }

    fn request(&self, signal: PermissionSignal) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if self.grant_on_request {
            self.set_granted(true);
            signal.grant();
        } else {
            tracing::info!("location permission denied");
        }
    }
}

struct Playback {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Replays a fixed track of readings on a background thread.
pub struct ReplaySource {
    track: Arc<Vec<Reading>>,
    repeat: bool,
    live_clock: bool,
    last_known: Option<Reading>,
    playback: Mutex<Option<Playback>>,
    subscribe_calls: AtomicUsize,
}

impl std::fmt::Debug for ReplaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySource")
            .field("track_len", &self.track.len())
            .field("repeat", &self.repeat)
            .field("live_clock", &self.live_clock)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl ReplaySource {
    #[must_use]
    pub fn new(track: Vec<Reading>) -> Self {
        Self {
            track: Arc::new(track),
            repeat: false,
            live_clock: false,
            last_known: None,
            playback: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Loop over the track forever instead of stopping at the end.
    #[must_use]
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Stamp each reading with the current wall clock instead of its own time.
    #[must_use]
    pub fn live_clock(mut self, live_clock: bool) -> Self {
        self.live_clock = live_clock;
        self
    }

    #[must_use]
    pub fn with_last_known(mut self, reading: Reading) -> Self {
        self.last_known = Some(reading);
        self
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.playback.lock().is_some()
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }
}

impl MeasurementSource for ReplaySource {
    fn last_known_reading(&self) -> Option<Reading> {
        self.last_known.clone()
    }

    fn subscribe(&self, request: LocationRequest, sink: ReadingSink) -> Result<(), SourceError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        let mut playback = self.playback.lock();
        if playback.is_some() {
            return Err(SourceError::AlreadySubscribed);
        }
        if self.track.is_empty() {
            return Err(SourceError::SubscribeFailed {
                reason: "replay track is empty".to_string(),
            });
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let track = Arc::clone(&self.track);
        let repeat = self.repeat;
        let live_clock = self.live_clock;

        let join = thread::Builder::new()
            .name("carstats-replay".to_string())
            .spawn(move || {
                let mut idx = 0usize;
                loop {
                    let Some(base) = track.get(idx) else {
                        if repeat {
                            idx = 0;
                            continue;
                        }
                        break;
                    };
                    let mut reading = base.clone();
                    if live_clock {
                        reading.timestamp = Utc::now().timestamp_millis();
                    }
                    sink.push(reading);
                    idx += 1;

                    match stop_rx.recv_timeout(request.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| SourceError::SubscribeFailed {
                reason: format!("failed to spawn replay thread: {e}"),
            })?;

        *playback = Some(Playback { stop_tx, join });
        Ok(())
    }

    fn unsubscribe(&self) {
        let Some(Playback { stop_tx, join }) = self.playback.lock().take() else {
            return;
        };
        drop(stop_tx);
        // The sink may unsubscribe from the replay thread itself.
        if join.thread().id() != thread::current().id() {
            let _ = join.join();
        }
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
