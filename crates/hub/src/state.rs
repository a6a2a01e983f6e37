use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};

use crate::dispatch::{dispatch, DropReason};
use crate::feeds::{spawn_feed, FeedEvent, FeedEventKind, FeedHandle, FeedInstance, FeedSettings};
use crate::history::{HistorySample, HistorySeries, RollingHistory};
use crate::reading::{Actuators, Reading, SourceKind};
use crate::status::{auto_irrigation, classify, EdgeDetector, SystemStatus};
use crate::synthetic;
use crate::thresholds::ThresholdConfig;
use crate::wire::Command;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    thresholds: Arc<ThresholdConfig>,
    plantations: BTreeMap<String, PlantationState>,
    pub events: VecDeque<SystemEvent>,
    feeds: FeedSettings,
    feed_tx: mpsc::Sender<FeedEvent>,
}

pub struct PlantationState {
    pub id: String,
    pub name: String,
    pub source: SourceKind,
    pub current: Reading,
    pub actuators: Actuators,
    pub history: RollingHistory,
    pub connected: bool,
    auto: EdgeDetector,
    feed: FeedHandle,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Command,
    Connection,
    Error,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Irrigation,
    Illumination,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlantationError {
    #[error("plantation '{0}' already exists")]
    Duplicate(String),
    #[error("plantation id is empty")]
    EmptyId,
    #[error("plantation name is empty")]
    EmptyName,
}

/// What the aggregator did with a feed event.
#[derive(Debug, PartialEq)]
pub enum Applied {
    /// Unknown plantation or a feed that has since been replaced.
    Ignored,
    Connection,
    Reading { plantation_id: String, reading: Reading },
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct PlantationSnapshot {
    pub id: String,
    pub name: String,
    pub source: SourceKind,
    pub reading: Reading,
    pub status: SystemStatus,
    pub auto_irrigation: bool,
    pub connected: bool,
    pub link_open: bool,
    pub history: HistorySeries,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub thresholds: ThresholdConfig,
    pub plantations: Vec<PlantationSnapshot>,
    pub events: Vec<SystemEvent>,
}

#[derive(Serialize)]
pub struct ToggleOutcome {
    pub plantation: PlantationSnapshot,
    /// `None` when the command reached the device's send slot, otherwise
    /// why it was not sent.
    pub dropped: Option<String>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(thresholds: ThresholdConfig, feeds: FeedSettings, feed_tx: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            started_at: Instant::now(),
            thresholds: Arc::new(thresholds),
            plantations: BTreeMap::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
            feeds,
            feed_tx,
        }
    }

    pub fn thresholds(&self) -> Arc<ThresholdConfig> {
        Arc::clone(&self.thresholds)
    }

    /// Swap in a new threshold snapshot. Every plantation's chart history
    /// starts over; status is derived against the new snapshot from now on.
    pub fn replace_thresholds(&mut self, cfg: ThresholdConfig) {
        self.thresholds = Arc::new(cfg);
        for p in self.plantations.values_mut() {
            p.history.reset();
        }
        self.record_system("thresholds updated, history reset".to_string());
    }

    pub fn plantation(&self, id: &str) -> Option<&PlantationState> {
        self.plantations.get(id)
    }

    pub fn plantation_ids(&self) -> impl Iterator<Item = &str> {
        self.plantations.keys().map(String::as_str)
    }

    /// Register a plantation and start its feed.
    pub fn add_plantation(&mut self, id: &str, name: &str, source: SourceKind) -> Result<PlantationSnapshot, PlantationError> {
        if id.trim().is_empty() {
            return Err(PlantationError::EmptyId);
        }
        if name.trim().is_empty() {
            return Err(PlantationError::EmptyName);
        }
        if self.plantations.contains_key(id) {
            return Err(PlantationError::Duplicate(id.to_string()));
        }

        let actuators = Actuators::default();
        let now = OffsetDateTime::now_utc();
        let current = match source {
            SourceKind::Live => Reading::zeroed(actuators, now),
            SourceKind::Synthetic => synthetic::sample_reading(actuators, now),
        };
        let feed = spawn_feed(source, id, &self.feeds, actuators, self.feed_tx.clone());
        let p = PlantationState {
            id: id.to_string(),
            name: name.to_string(),
            source,
            current,
            actuators,
            history: RollingHistory::new(),
            connected: false,
            auto: EdgeDetector::default(),
            feed,
        };
        let snapshot = p.snapshot(&self.thresholds);
        self.plantations.insert(id.to_string(), p);
        self.record_system(format!("plantation {id} added ({source})"));
        Ok(snapshot)
    }

    /// Tear down a plantation. Its feed is stopped and anything it already
    /// emitted is discarded on arrival.
    pub fn remove_plantation(&mut self, id: &str) -> bool {
        match self.plantations.remove(id) {
            Some(p) => {
                p.feed.shutdown();
                self.record_system(format!("plantation {id} removed"));
                true
            }
            None => false,
        }
    }

    /// Stop every feed, e.g. on process shutdown.
    pub fn shutdown_all(&mut self) {
        let ids: Vec<String> = self.plantation_ids().map(str::to_string).collect();
        for id in ids {
            self.remove_plantation(&id);
        }
    }

    /// Apply one feed event.
    pub fn apply(&mut self, ev: FeedEvent) -> Applied {
        let thresholds = self.thresholds();
        let Some(p) = self.plantations.get_mut(&ev.plantation_id) else {
            tracing::debug!(plantation = %ev.plantation_id, "event for unknown plantation dropped");
            return Applied::Ignored;
        };
        if p.feed_instance() != ev.instance {
            tracing::debug!(
                plantation = %ev.plantation_id,
                stale = ?ev.instance,
                current = ?p.feed_instance(),
                "event from a retired feed dropped"
            );
            return Applied::Ignored;
        }

        match ev.kind {
            FeedEventKind::Connected => {
                p.connected = true;
                let detail = format!("{} connected", p.id);
                self.push_event(EventKind::Connection, detail);
                Applied::Connection
            }
            FeedEventKind::Disconnected(reason) => {
                p.connected = false;
                let detail = format!("{} disconnected: {reason}", p.id);
                self.push_event(EventKind::Connection, detail);
                Applied::Connection
            }
            FeedEventKind::Reading(reading) => {
                p.history.push(HistorySample::from(&reading));
                p.actuators = reading.actuators();
                p.feed.set_actuators(p.actuators);
                let status = classify(&reading, &thresholds);

                let mut details = vec![format!(
                    "{}: humidity={:.1} light={:.0} temp={} status={status}",
                    p.id,
                    reading.humidity,
                    reading.light,
                    reading
                        .temperature
                        .map(|t| format!("{t:.1}"))
                        .unwrap_or_else(|| "-".to_string()),
                )];

                let mut command_event = None;
                if let Some(on) = p.auto.update(auto_irrigation(&reading, &thresholds)) {
                    let cmd = if on { Command::AutoOn } else { Command::AutoOff };
                    let result = dispatch(p.feed.link.as_ref(), &p.id, cmd);
                    command_event = Some(command_detail(&p.id, cmd, result));
                    details.push(format!(
                        "{}: automatic irrigation condition {}",
                        p.id,
                        if on { "met" } else { "cleared" }
                    ));
                }

                p.current = reading.clone();
                let plantation_id = p.id.clone();

                for d in details {
                    self.push_event(EventKind::Reading, d);
                }
                if let Some((kind, detail)) = command_event {
                    self.push_event(kind, detail);
                }

                Applied::Reading {
                    plantation_id,
                    reading,
                }
            }
        }
    }

    /// Manual irrigation / illumination switch. The command always carries
    /// "leave automatic mode". Local state follows the request even when
    /// the command cannot be delivered.
    pub fn toggle(&mut self, id: &str, switch: Switch, on: bool) -> Option<ToggleOutcome> {
        let thresholds = self.thresholds();
        let p = self.plantations.get_mut(id)?;

        let cmd = match switch {
            Switch::Irrigation => {
                p.actuators.irrigation = on;
                Command::Irrigation(on)
            }
            Switch::Illumination => {
                p.actuators.illumination = on;
                Command::Illumination(on)
            }
        };
        let result = dispatch(p.feed.link.as_ref(), &p.id, cmd);
        p.feed.set_actuators(p.actuators);
        p.current = p.current.with_actuators(p.actuators, OffsetDateTime::now_utc());

        let outcome = ToggleOutcome {
            plantation: p.snapshot(&thresholds),
            dropped: result.err().map(|r| r.to_string()),
        };
        let (kind, detail) = command_detail(id, cmd, result);
        self.push_event(kind, detail);
        Some(outcome)
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    pub fn snapshot(&self, id: &str) -> Option<PlantationSnapshot> {
        self.plantations.get(id).map(|p| p.snapshot(&self.thresholds))
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            thresholds: *self.thresholds,
            plantations: self
                .plantations
                .values()
                .map(|p| p.snapshot(&self.thresholds))
                .collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

fn command_detail(id: &str, cmd: Command, result: Result<(), DropReason>) -> (EventKind, String) {
    match result {
        Ok(()) => (EventKind::Command, format!("{id}: sent {}", cmd.encode())),
        Err(DropReason::NoLink) => (
            EventKind::Command,
            format!("{id}: {} not sent ({})", cmd.encode(), DropReason::NoLink),
        ),
        Err(reason) => (
            EventKind::Error,
            format!("{id}: {} dropped ({reason})", cmd.encode()),
        ),
    }
}

impl PlantationState {
    pub fn feed_instance(&self) -> FeedInstance {
        self.feed.instance
    }

    pub fn link_open(&self) -> bool {
        self.feed.link.as_ref().is_some_and(|l| l.is_open())
    }

    /// Derived on every call, never cached.
    pub fn status(&self, cfg: &ThresholdConfig) -> SystemStatus {
        classify(&self.current, cfg)
    }

    pub fn snapshot(&self, cfg: &ThresholdConfig) -> PlantationSnapshot {
        PlantationSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            source: self.source,
            reading: self.current.clone(),
            status: self.status(cfg),
            auto_irrigation: self.auto.level(),
            connected: self.connected,
            link_open: self.link_open(),
            history: self.history.series(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
