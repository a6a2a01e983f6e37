//! Feed lifecycle: one running source (live connection or synthetic timer)
//! per plantation, each stamped with a unique instance id.
//!
//! Every event a feed emits carries its instance id. The aggregator only
//! accepts events whose id matches the plantation's current feed, so once a
//! feed is shut down nothing it already put in flight can land.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::UtcOffset;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::dispatch::{self, CommandLink};
use crate::light::LdrPolicy;
use crate::reading::{Actuators, Reading, SourceKind};
use crate::{live, synthetic};

/// Capacity of the feed -> aggregator channel.
pub const EVENT_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedInstance(u64);

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

impl FeedInstance {
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub enum FeedEventKind {
    Reading(Reading),
    Connected,
    Disconnected(String),
}

#[derive(Debug)]
pub struct FeedEvent {
    pub plantation_id: String,
    pub instance: FeedInstance,
    pub kind: FeedEventKind,
}

/// Where a feed task sends its events.
#[derive(Clone)]
pub struct FeedContext {
    pub plantation_id: String,
    pub instance: FeedInstance,
    tx: mpsc::Sender<FeedEvent>,
}

impl FeedContext {
    pub fn new(plantation_id: &str, instance: FeedInstance, tx: mpsc::Sender<FeedEvent>) -> Self {
        Self {
            plantation_id: plantation_id.to_string(),
            instance,
            tx,
        }
    }

    /// Returns `false` once the aggregator is gone.
    pub async fn emit(&self, kind: FeedEventKind) -> bool {
        self.tx
            .send(FeedEvent {
                plantation_id: self.plantation_id.clone(),
                instance: self.instance,
                kind,
            })
            .await
            .is_ok()
    }
}

/// Hub-wide feed parameters (from the config file).
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub device_url: String,
    pub synthetic_interval: Duration,
    pub ldr_policy: LdrPolicy,
    /// Zone of the device clock that stamps live frames.
    pub device_offset: UtcOffset,
}

/// The aggregator's grip on a running feed.
pub struct FeedHandle {
    pub instance: FeedInstance,
    pub link: Option<CommandLink>,
    actuators: watch::Sender<Actuators>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn set_actuators(&self, a: Actuators) {
        self.actuators.send_replace(a);
    }

    /// Stop the feed. Its connection is closed (a live feed sends a close
    /// frame on the way out) and it is never restarted.
    pub fn shutdown(mut self) {
        if let Some(link) = &self.link {
            link.close();
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tracing::debug!(instance = ?self.instance, finished = self.task.is_finished(), "feed shut down");
    }
}

pub fn spawn_feed(
    source: SourceKind,
    plantation_id: &str,
    settings: &FeedSettings,
    initial: Actuators,
    tx: mpsc::Sender<FeedEvent>,
) -> FeedHandle {
    let instance = FeedInstance::next();
    let ctx = FeedContext::new(plantation_id, instance, tx);
    let (actuators, actuators_rx) = watch::channel(initial);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let (link, task) = match source {
        SourceKind::Live => {
            let (link, end) = dispatch::link();
            let task = tokio::spawn(live::run(
                ctx,
                settings.device_url.clone(),
                settings.ldr_policy,
                settings.device_offset,
                end,
                actuators_rx,
                shutdown_rx,
            ));
            (Some(link), task)
        }
        SourceKind::Synthetic => {
            let task = tokio::spawn(synthetic::run(
                ctx,
                settings.synthetic_interval,
                actuators_rx,
                shutdown_rx,
            ));
            (None, task)
        }
    };

    tracing::info!(plantation = %plantation_id, %source, ?instance, "feed started");

    FeedHandle {
        instance,
        link,
        actuators,
        shutdown: Some(shutdown_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_are_unique() {
        let a = FeedInstance::next();
        let b = FeedInstance::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn emit_reports_closed_aggregator() {
        let (tx, rx) = mpsc::channel(1);
        let ctx = FeedContext::new("p1", FeedInstance::next(), tx);
        drop(rx);
        assert!(!ctx.emit(FeedEventKind::Connected).await);
    }
}
