//! Simulated readings for plantations without hardware.

use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::feeds::{FeedContext, FeedEventKind};
use crate::reading::{Actuators, Reading};

const HUMIDITY_SPAN: f64 = 100.0;
const LIGHT_SPAN: f64 = 3000.0;
const TEMP_LOW: f64 = 15.0;
const TEMP_SPAN: f64 = 15.0;

/// One uniform random reading. Actuator flags are carried over untouched;
/// only the user changes them.
pub fn sample_reading(actuators: Actuators, at: OffsetDateTime) -> Reading {
    Reading {
        temperature: Some(TEMP_LOW + fastrand::f64() * TEMP_SPAN),
        humidity: fastrand::f64() * HUMIDITY_SPAN,
        light: fastrand::f64() * LIGHT_SPAN,
        irrigation_active: actuators.irrigation,
        illumination_active: actuators.illumination,
        timestamp: at,
    }
}

/// Emit a reading every `period` until shut down. The first reading comes
/// one full period after start.
pub async fn run(
    ctx: FeedContext,
    period: Duration,
    actuators: watch::Receiver<Actuators>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let reading = sample_reading(*actuators.borrow(), OffsetDateTime::now_utc());
                if !ctx.emit(FeedEventKind::Reading(reading)).await {
                    break;
                }
            }
        }
    }

    tracing::debug!(plantation = %ctx.plantation_id, "synthetic feed stopped");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{FeedEvent, FeedInstance};
    use tokio::sync::mpsc;

    #[test]
    fn samples_stay_in_range() {
        let at = OffsetDateTime::now_utc();
        for _ in 0..1000 {
            let r = sample_reading(Actuators::default(), at);
            assert!((0.0..100.0).contains(&r.humidity), "humidity {}", r.humidity);
            assert!((0.0..3000.0).contains(&r.light), "light {}", r.light);
            let t = r.temperature.unwrap();
            assert!((15.0..30.0).contains(&t), "temperature {t}");
        }
    }

    #[test]
    fn samples_keep_actuator_flags() {
        let a = Actuators {
            irrigation: true,
            illumination: true,
        };
        let r = sample_reading(a, OffsetDateTime::now_utc());
        assert!(r.irrigation_active);
        assert!(r.illumination_active);
    }

    fn start(
        period: Duration,
    ) -> (
        mpsc::Receiver<FeedEvent>,
        watch::Sender<Actuators>,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let ctx = FeedContext::new("sim-1", FeedInstance::next(), tx);
        let (a_tx, a_rx) = watch::channel(Actuators::default());
        let (s_tx, s_rx) = oneshot::channel();
        let task = tokio::spawn(run(ctx, period, a_rx, s_rx));
        (rx, a_tx, s_tx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn emits_once_per_period() {
        let (mut rx, _a, _s, _task) = start(Duration::from_secs(5));
        let started = Instant::now();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.plantation_id, "sim-1");
        assert!(matches!(first.kind, FeedEventKind::Reading(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_new_actuator_state() {
        let (mut rx, a_tx, _s, _task) = start(Duration::from_secs(5));
        a_tx.send_replace(Actuators {
            irrigation: true,
            illumination: false,
        });
        match rx.recv().await.unwrap().kind {
            FeedEventKind::Reading(r) => assert!(r.irrigation_active),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_timer() {
        let (mut rx, _a, s_tx, task) = start(Duration::from_secs(5));
        s_tx.send(()).unwrap();
        task.await.unwrap();
        // sender side is gone with the task, nothing more arrives
        assert!(rx.recv().await.is_none());
    }
}
