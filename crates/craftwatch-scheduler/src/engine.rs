//! Reminder engine: per-channel steel and silk decisions, deduplicated
//! through the ledger and handed to the notifier with a send deadline.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use craftwatch_core::{
    ChannelId, Clock, CraftConfig, JobKind, JobStore, Notifier, Result, SilkStage, SilkState,
    SteelState,
};

use crate::clock::{SilkPhase, StagePosition, derive_silk_stage, derive_steel_fuel_deadline};
use crate::ledger::{DedupKey, DedupLedger};
use crate::notify::{Alert, AlertHistory};

/// What the steel read-modify-write left us with.
enum SteelOutcome {
    Idle,
    Finished,
    Running { fuel_deadline: Option<DateTime<Utc>> },
}

/// What the silk read-modify-write left us with.
enum SilkOutcome {
    Idle,
    Completed,
    InStage {
        cycle_start: DateTime<Utc>,
        position: StagePosition,
        acked: bool,
    },
}

/// The notification scheduler.
///
/// Holds the only mutable in-process state (the dedup ledger and alert
/// history); job state lives in the store. `tick` must not run concurrently
/// with itself.
pub struct Scheduler {
    config: Arc<CraftConfig>,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    ledger: DedupLedger,
    history: Mutex<AlertHistory>,
}

impl Scheduler {
    pub fn new(
        config: Arc<CraftConfig>,
        store: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            ledger: DedupLedger::new(),
            history: Mutex::new(AlertHistory::new()),
        }
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Recently emitted alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.history
            .lock()
            .map(|h| h.recent())
            .unwrap_or_default()
    }

    /// One tick: evaluate every channel, then hand the alerts to the notifier.
    /// Returns the alerts emitted on this tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let alerts = self.evaluate(now)?;
        self.deliver(&alerts).await;
        Ok(alerts)
    }

    /// Decide due alerts and write back job-state changes, without delivering.
    ///
    /// Fails only if the store cannot enumerate channels; a failing channel is
    /// logged and skipped.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let channels = self.store.active_channels()?;
        let mut alerts = Vec::new();

        for channel in &channels {
            match self.evaluate_steel(*channel, now) {
                Ok(mut fired) => alerts.append(&mut fired),
                Err(e) => tracing::warn!("⚠️ Steel check failed for channel {channel}: {e}"),
            }
            match self.evaluate_silk(*channel, now) {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(e) => tracing::warn!("⚠️ Silk check failed for channel {channel}: {e}"),
            }
        }

        tracing::debug!(
            "⏱️ Tick at {}: {} channel(s), {} alert(s)",
            now.to_rfc3339(),
            channels.len(),
            alerts.len()
        );

        if !alerts.is_empty() {
            if let Ok(mut history) = self.history.lock() {
                for alert in &alerts {
                    history.record(alert.clone());
                }
            }
        }
        Ok(alerts)
    }

    /// Steel: reset a finished job, otherwise warn ahead of the fuel deadline.
    fn evaluate_steel(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let steel = &self.config.steel;
        let mut outcome = SteelOutcome::Idle;
        self.store
            .update_steel(channel, &mut |state: &mut SteelState| {
                outcome = SteelOutcome::Idle;
                let Some((start, last_refuel)) = state.running() else {
                    return;
                };
                let outlook = derive_steel_fuel_deadline(steel, start, last_refuel, now);
                if outlook.finished {
                    *state = SteelState::default();
                    outcome = SteelOutcome::Finished;
                } else {
                    outcome = SteelOutcome::Running {
                        fuel_deadline: outlook.fuel_deadline,
                    };
                }
            })?;

        let deadline = match outcome {
            SteelOutcome::Idle | SteelOutcome::Running { fuel_deadline: None } => {
                return Ok(Vec::new());
            }
            SteelOutcome::Finished => {
                let pruned = self.ledger.forget(channel, JobKind::Steel);
                tracing::info!("🏁 Steel job finished in channel {channel} ({pruned} key(s) pruned)");
                return Ok(Vec::new());
            }
            SteelOutcome::Running {
                fuel_deadline: Some(deadline),
            } => deadline,
        };

        let tolerance = self.config.scheduler.tolerance();
        let due: Vec<DateTime<Utc>> = steel
            .warn_offsets()
            .map(|offset| deadline - offset)
            .filter(|fire_time| within(now, *fire_time, tolerance))
            .collect();
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let targets = self.store.get_targets(channel, JobKind::Steel)?;
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut alerts = Vec::new();
        for fire_time in due {
            let key = DedupKey::Steel {
                channel,
                fire_at: fire_time.timestamp(),
            };
            if !self.ledger.record(key) {
                continue;
            }
            tracing::info!(
                "🔔 Steel refuel warning for channel {channel} (deadline {})",
                deadline.to_rfc3339()
            );
            alerts.push(Alert::new(
                channel,
                JobKind::Steel,
                None,
                &targets,
                &self.config.messages.steel_refuel,
                fire_time,
                now,
            ));
        }
        Ok(alerts)
    }

    /// Silk: track the derived stage, reset a finished cycle, and repeat the
    /// current stage's reminder on its interval unless acknowledged.
    fn evaluate_silk(&self, channel: ChannelId, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let silk = &self.config.silk;
        let mut outcome = SilkOutcome::Idle;
        let mut advanced: Option<(SilkStage, SilkStage)> = None;
        self.store
            .update_silk(channel, &mut |state: &mut SilkState| {
                outcome = SilkOutcome::Idle;
                advanced = None;
                let Some(cycle_start) = state.cycle_start() else {
                    return;
                };
                match derive_silk_stage(silk, cycle_start, now) {
                    SilkPhase::CycleComplete { .. } => {
                        *state = SilkState::default();
                        outcome = SilkOutcome::Completed;
                    }
                    SilkPhase::Stage(position) => {
                        if state.stage != position.stage {
                            advanced = Some((state.stage, position.stage));
                            state.stage = position.stage;
                        }
                        outcome = SilkOutcome::InStage {
                            cycle_start,
                            position,
                            acked: state.ack_stage == Some(position.stage),
                        };
                    }
                }
            })?;

        if let Some((from, to)) = advanced {
            tracing::info!("🐛 Silk in channel {channel} advanced {from} → {to}");
        }

        let (cycle_start, position) = match outcome {
            SilkOutcome::Idle => return Ok(None),
            SilkOutcome::Completed => {
                let pruned = self.ledger.forget(channel, JobKind::Silk);
                tracing::info!("🏁 Silk cycle finished in channel {channel} ({pruned} key(s) pruned)");
                return Ok(None);
            }
            SilkOutcome::InStage { acked: true, .. } => return Ok(None),
            SilkOutcome::InStage {
                cycle_start,
                position,
                acked: false,
            } => (cycle_start, position),
        };

        let (Some(interval), Some(message)) = (
            silk.repeat_interval(position.stage),
            self.config.messages.silk_stage(position.stage),
        ) else {
            return Ok(None);
        };

        let Some((occurrence, fire_time)) = repeat_occurrence(position.stage_start, interval, now)
        else {
            return Ok(None);
        };
        if !within(now, fire_time, self.config.scheduler.tolerance()) {
            return Ok(None);
        }

        let targets = self.store.get_targets(channel, JobKind::Silk)?;
        if targets.is_empty() {
            return Ok(None);
        }

        let key = DedupKey::Silk {
            channel,
            cycle_start: cycle_start.timestamp(),
            stage: position.stage,
            occurrence,
        };
        if !self.ledger.record(key) {
            return Ok(None);
        }

        tracing::info!(
            "🔔 Silk {} reminder #{occurrence} for channel {channel}",
            position.stage
        );
        Ok(Some(Alert::new(
            channel,
            JobKind::Silk,
            Some(position.stage),
            &targets,
            message,
            fire_time,
            now,
        )))
    }

    /// Send every alert concurrently, each bounded by the send timeout.
    /// Failures are logged and dropped; the ledger keeps them as handled.
    async fn deliver(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        let timeout = self.config.scheduler.send_timeout();
        let notifier = self.notifier.as_ref();
        let sends = alerts.iter().map(move |alert| async move {
            match tokio::time::timeout(timeout, notifier.send(alert.channel, &alert.text)).await {
                Ok(Ok(())) => {
                    tracing::debug!("📣 [{}] {} alert sent to {}", notifier.name(), alert.kind, alert.channel);
                }
                Ok(Err(e)) => {
                    tracing::warn!("⚠️ [{}] Delivery to {} failed: {e}", notifier.name(), alert.channel);
                }
                Err(_) => {
                    tracing::warn!(
                        "⚠️ [{}] Delivery to {} timed out after {}s",
                        notifier.name(),
                        alert.channel,
                        timeout.as_secs()
                    );
                }
            }
        });
        futures::future::join_all(sends).await;
    }
}

/// `|now - fire_time| <= tolerance`.
fn within(now: DateTime<Utc>, fire_time: DateTime<Utc>, tolerance: Duration) -> bool {
    (now - fire_time).num_milliseconds().abs() <= tolerance.num_milliseconds()
}

/// Latest repeat boundary at or before `now`: `(n, begin + n * interval)`.
/// `None` before `begin` or for a non-positive interval.
fn repeat_occurrence(
    begin: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<(i64, DateTime<Utc>)> {
    let elapsed = (now - begin).num_milliseconds();
    let step = interval.num_milliseconds();
    if elapsed < 0 || step <= 0 {
        return None;
    }
    let n = elapsed / step;
    Some((n, begin + Duration::milliseconds(n * step)))
}

/// Run the scheduler loop: one tick per interval, forever.
///
/// Ticks run one after another inside this task, so they never overlap;
/// a tick that overruns makes the loop skip the missed slots.
pub async fn spawn_scheduler(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) {
    let every = scheduler.config.scheduler.tick_interval();
    tracing::info!("⏰ Scheduler started (check every {}s)", every.as_secs());

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if let Err(e) = scheduler.tick(clock.now()).await {
            tracing::warn!("⚠️ Tick failed, retrying next interval: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use craftwatch_core::{CraftError, UserId};
    use std::collections::BTreeSet;

    /// Notifier that records what it was asked to send.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(ChannelId, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, channel: ChannelId, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((channel, text.to_string()));
            if self.fail {
                return Err(CraftError::UnknownChannel(channel));
            }
            Ok(())
        }
    }

    const CH: ChannelId = ChannelId(100);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn hm(h: i64, m: i64) -> Duration {
        Duration::hours(h) + Duration::minutes(m)
    }

    fn setup(fail: bool) -> (Scheduler, Arc<MemoryStore>, Arc<Recorder>) {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder {
            fail,
            ..Default::default()
        });
        store
            .add_targets(CH, JobKind::Steel, &[UserId(1), UserId(2)])
            .unwrap();
        store.add_targets(CH, JobKind::Silk, &[UserId(3)]).unwrap();
        let scheduler = Scheduler::new(
            Arc::new(CraftConfig::default()),
            store.clone(),
            recorder.clone(),
        );
        (scheduler, store, recorder)
    }

    // ─── Steel ──────────────────────────────────────────────

    #[test]
    fn test_steel_quiet_between_offsets() {
        let (scheduler, store, _) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        // Fuel deadline at 7h30m; 6h40m is 50m before it.
        let alerts = scheduler.evaluate(t0() + hm(6, 40)).unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_steel_fires_one_hour_before_deadline() {
        let (scheduler, store, _) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        let alerts = scheduler.evaluate(t0() + hm(6, 30)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, JobKind::Steel);
        assert_eq!(alerts[0].fire_time, t0() + hm(6, 30));
        assert!(alerts[0].text.starts_with("<@1> <@2> "));
    }

    #[test]
    fn test_steel_fires_once_per_window() {
        let (scheduler, store, _) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        let boundary = t0() + hm(4, 30); // 3h before the deadline

        let mut fired = 0;
        for secs in (-20..=20).step_by(5) {
            fired += scheduler
                .evaluate(boundary + Duration::seconds(secs))
                .unwrap()
                .len();
        }
        assert_eq!(fired, 1);
        assert!(scheduler.evaluate(boundary - Duration::seconds(21)).unwrap().is_empty());
    }

    #[test]
    fn test_steel_every_offset_fires_once() {
        let (scheduler, store, _) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();

        let mut fire_times = Vec::new();
        let mut now = t0() + hm(4, 0);
        while now < t0() + hm(7, 30) {
            for alert in scheduler.evaluate(now).unwrap() {
                fire_times.push(alert.fire_time);
            }
            now += Duration::seconds(15);
        }
        assert_eq!(
            fire_times,
            vec![
                t0() + hm(4, 30),
                t0() + hm(5, 30),
                t0() + hm(6, 30),
                t0() + hm(7, 0),
            ]
        );
    }

    #[test]
    fn test_steel_refuel_moves_deadline() {
        let (scheduler, store, _) = setup(false);
        let mut st = SteelState::started(t0());
        st.last_refuel_ts = Some(t0() + hm(2, 0));
        store.set_steel(CH, &st).unwrap();

        // The old 2h boundary no longer applies.
        assert!(scheduler.evaluate(t0() + hm(5, 30)).unwrap().is_empty());
        assert_eq!(scheduler.evaluate(t0() + hm(8, 30)).unwrap().len(), 1);
    }

    #[test]
    fn test_steel_no_warning_when_fuel_covers_job() {
        let (scheduler, store, _) = setup(false);
        let mut st = SteelState::started(t0());
        st.last_refuel_ts = Some(t0() + hm(27, 0));
        store.set_steel(CH, &st).unwrap();
        // Would be the 1h boundary of a 34h30m deadline; the job ends at 34h.
        assert!(scheduler.evaluate(t0() + hm(33, 30)).unwrap().is_empty());
    }

    #[test]
    fn test_steel_job_end_resets_silently() {
        let (scheduler, store, _) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        scheduler.evaluate(t0() + hm(6, 30)).unwrap();
        assert_eq!(scheduler.ledger().len(), 1);

        let alerts = scheduler.evaluate(t0() + hm(34, 0)).unwrap();
        assert!(alerts.is_empty());
        assert_eq!(store.get_steel(CH).unwrap(), SteelState::default());
        assert!(scheduler.ledger().is_empty());
        assert!(store.active_channels().unwrap().is_empty());
    }

    #[test]
    fn test_steel_without_targets_stays_unrecorded() {
        let (scheduler, store, _) = setup(false);
        store.remove_targets(CH, JobKind::Steel, &[UserId(1), UserId(2)]).unwrap();
        store.set_steel(CH, &SteelState::started(t0())).unwrap();

        let at = t0() + hm(6, 30);
        assert!(scheduler.evaluate(at).unwrap().is_empty());
        assert!(scheduler.ledger().is_empty());

        // Audience added while the window is still open.
        store.add_targets(CH, JobKind::Steel, &[UserId(5)]).unwrap();
        assert_eq!(scheduler.evaluate(at + Duration::seconds(10)).unwrap().len(), 1);
    }

    #[test]
    fn test_steel_partial_state_is_ignored() {
        let (scheduler, store, _) = setup(false);
        let broken = SteelState {
            active: true,
            start_ts: Some(t0()),
            last_refuel_ts: None,
        };
        store.set_steel(CH, &broken).unwrap();
        assert!(scheduler.evaluate(t0() + hm(40, 0)).unwrap().is_empty());
        assert_eq!(store.get_steel(CH).unwrap(), broken);
    }

    // ─── Silk ───────────────────────────────────────────────

    #[test]
    fn test_silk_larva_scenario() {
        let (scheduler, store, _) = setup(false);
        store.set_silk(CH, &SilkState::started(t0())).unwrap();

        let first = t0() + hm(5, 22);
        let alerts = scheduler.evaluate(first).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].stage, Some(SilkStage::Larva));
        assert_eq!(alerts[0].text, "<@3> The silkworm eggs have hatched.");
        assert_eq!(store.get_silk(CH).unwrap().stage, SilkStage::Larva);

        assert!(scheduler.evaluate(first + Duration::seconds(5)).unwrap().is_empty());
    }

    #[test]
    fn test_silk_egg_stage_has_no_reminders() {
        let (scheduler, store, _) = setup(false);
        store.set_silk(CH, &SilkState::started(t0())).unwrap();
        for minutes in [0, 30, 60, 120, 291] {
            assert!(scheduler.evaluate(t0() + Duration::minutes(minutes)).unwrap().is_empty());
        }
        assert_eq!(store.get_silk(CH).unwrap().stage, SilkStage::Egg);
    }

    #[test]
    fn test_silk_occurrences_increase() {
        let (scheduler, store, _) = setup(false);
        store.set_silk(CH, &SilkState::started(t0())).unwrap();

        let larva = t0() + Duration::minutes(292);
        let mut fire_times = Vec::new();
        let mut now = larva;
        while now < larva + Duration::minutes(95) {
            for alert in scheduler.evaluate(now).unwrap() {
                fire_times.push(alert.fire_time);
            }
            now += Duration::seconds(30);
        }
        let expected: Vec<_> = (0..4).map(|n| larva + Duration::minutes(30 * n)).collect();
        assert_eq!(fire_times, expected);
    }

    #[test]
    fn test_silk_ack_suppresses_only_that_stage() {
        let (scheduler, store, _) = setup(false);
        let mut st = SilkState::started(t0());
        st.stage = SilkStage::Larva;
        st.ack_stage = Some(SilkStage::Larva);
        store.set_silk(CH, &st).unwrap();

        let larva = t0() + Duration::minutes(292);
        assert!(scheduler.evaluate(larva + Duration::minutes(30)).unwrap().is_empty());
        assert!(scheduler.evaluate(larva + Duration::minutes(60)).unwrap().is_empty());

        // Pupa starts 584m later; its first reminder is not silenced.
        let pupa = larva + Duration::minutes(584);
        let alerts = scheduler.evaluate(pupa).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].stage, Some(SilkStage::Pupa));
        assert_eq!(store.get_silk(CH).unwrap().stage, SilkStage::Pupa);
    }

    #[test]
    fn test_silk_stage_persisted_without_targets() {
        let (scheduler, store, _) = setup(false);
        store.remove_targets(CH, JobKind::Silk, &[UserId(3)]).unwrap();
        store.set_silk(CH, &SilkState::started(t0())).unwrap();

        let adult = t0() + Duration::minutes(292 + 584 + 584);
        assert!(scheduler.evaluate(adult).unwrap().is_empty());
        assert_eq!(store.get_silk(CH).unwrap().stage, SilkStage::Adult);
        assert!(scheduler.ledger().is_empty());
    }

    #[test]
    fn test_silk_cycle_end_resets_and_new_cycle_fires_again() {
        let (scheduler, store, _) = setup(false);
        store.set_silk(CH, &SilkState::started(t0())).unwrap();
        let larva = t0() + Duration::minutes(292);
        assert_eq!(scheduler.evaluate(larva).unwrap().len(), 1);

        let end = t0() + Duration::minutes(292 + 584 + 584 + 330);
        assert!(scheduler.evaluate(end).unwrap().is_empty());
        assert_eq!(store.get_silk(CH).unwrap(), SilkState::default());

        // A second cycle in the same channel gets its own reminders.
        store.set_silk(CH, &SilkState::started(end)).unwrap();
        let alerts = scheduler.evaluate(end + Duration::minutes(292)).unwrap();
        assert_eq!(alerts.len(), 1);
    }

    // ─── Tick ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let (scheduler, store, recorder) = setup(false);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        store.set_silk(CH, &SilkState::started(t0() + hm(1, 38))).unwrap();

        // Steel 1h boundary and silk larva start coincide at 6h30m.
        let now = t0() + hm(6, 30);
        assert_eq!(scheduler.tick(now).await.unwrap().len(), 2);
        assert!(scheduler.tick(now).await.unwrap().is_empty());

        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
        assert_eq!(scheduler.recent_alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_counts_as_handled() {
        let (scheduler, store, recorder) = setup(true);
        store.set_steel(CH, &SteelState::started(t0())).unwrap();

        let now = t0() + hm(6, 30);
        assert_eq!(scheduler.tick(now).await.unwrap().len(), 1);
        assert!(scheduler.tick(now + Duration::seconds(10)).await.unwrap().is_empty());
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scheduler_over_sqlite_store() {
        let store = Arc::new(crate::persistence::JobDb::open_in_memory().unwrap());
        store.add_targets(CH, JobKind::Silk, &[UserId(3)]).unwrap();
        store.set_silk(CH, &SilkState::started(t0())).unwrap();
        let scheduler = Scheduler::new(
            Arc::new(CraftConfig::default()),
            store.clone(),
            Arc::new(Recorder::default()),
        );

        let larva = t0() + Duration::minutes(292);
        assert_eq!(scheduler.evaluate(larva).unwrap().len(), 1);
        assert_eq!(store.get_silk(CH).unwrap().stage, SilkStage::Larva);

        let end = larva + Duration::minutes(584 + 584 + 330);
        assert!(scheduler.evaluate(end).unwrap().is_empty());
        assert!(store.active_channels().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_without_jobs() {
        let (scheduler, _, recorder) = setup(false);
        assert!(scheduler.tick(t0()).await.unwrap().is_empty());
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    /// Notifier whose sends never complete.
    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn send(&self, _channel: ChannelId, _text: &str) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_is_cut_off_by_timeout() {
        let store = Arc::new(MemoryStore::new());
        store.add_targets(CH, JobKind::Steel, &[UserId(1)]).unwrap();
        store.set_steel(CH, &SteelState::started(t0())).unwrap();
        let config = CraftConfig::default();
        let limit = config.scheduler.send_timeout();
        let scheduler = Scheduler::new(Arc::new(config), store, Arc::new(Stalled));

        let started = tokio::time::Instant::now();
        let alerts = scheduler.tick(t0() + hm(6, 30)).await.unwrap();
        let waited = started.elapsed();

        assert_eq!(alerts.len(), 1);
        assert!(waited >= limit);
        assert!(waited < limit + std::time::Duration::from_secs(1));
        assert!(scheduler.ledger().contains(&DedupKey::Steel {
            channel: CH,
            fire_at: (t0() + hm(6, 30)).timestamp(),
        }));
    }

    /// Store whose steel updates fail for one channel.
    struct BrokenChannel {
        inner: MemoryStore,
        broken: ChannelId,
    }

    impl JobStore for BrokenChannel {
        fn active_channels(&self) -> Result<Vec<ChannelId>> {
            self.inner.active_channels()
        }
        fn get_steel(&self, channel: ChannelId) -> Result<SteelState> {
            self.inner.get_steel(channel)
        }
        fn set_steel(&self, channel: ChannelId, state: &SteelState) -> Result<()> {
            self.inner.set_steel(channel, state)
        }
        fn update_steel(
            &self,
            channel: ChannelId,
            f: &mut dyn FnMut(&mut SteelState),
        ) -> Result<SteelState> {
            if channel == self.broken {
                return Err(CraftError::Store("disk I/O error".into()));
            }
            self.inner.update_steel(channel, f)
        }
        fn get_silk(&self, channel: ChannelId) -> Result<SilkState> {
            self.inner.get_silk(channel)
        }
        fn set_silk(&self, channel: ChannelId, state: &SilkState) -> Result<()> {
            self.inner.set_silk(channel, state)
        }
        fn update_silk(
            &self,
            channel: ChannelId,
            f: &mut dyn FnMut(&mut SilkState),
        ) -> Result<SilkState> {
            self.inner.update_silk(channel, f)
        }
        fn get_targets(&self, channel: ChannelId, kind: JobKind) -> Result<BTreeSet<UserId>> {
            self.inner.get_targets(channel, kind)
        }
        fn add_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
            self.inner.add_targets(channel, kind, users)
        }
        fn remove_targets(
            &self,
            channel: ChannelId,
            kind: JobKind,
            users: &[UserId],
        ) -> Result<()> {
            self.inner.remove_targets(channel, kind, users)
        }
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let broken = ChannelId(1);
        let healthy = ChannelId(2);
        let store = Arc::new(BrokenChannel {
            inner: MemoryStore::new(),
            broken,
        });
        for channel in [broken, healthy] {
            store.add_targets(channel, JobKind::Steel, &[UserId(9)]).unwrap();
            store.set_steel(channel, &SteelState::started(t0())).unwrap();
        }
        store.add_targets(broken, JobKind::Silk, &[UserId(9)]).unwrap();
        store.set_silk(broken, &SilkState::started(t0() - hm(4, 52))).unwrap();
        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(
            Arc::new(CraftConfig::default()),
            store,
            recorder.clone(),
        );

        let alerts = scheduler.tick(t0() + hm(6, 30)).await.unwrap();
        let fired: Vec<(ChannelId, JobKind)> =
            alerts.iter().map(|a| (a.channel, a.kind)).collect();
        assert_eq!(fired, vec![(broken, JobKind::Silk), (healthy, JobKind::Steel)]);
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_repeat_occurrence() {
        let begin = t0();
        let every = Duration::minutes(30);
        assert_eq!(repeat_occurrence(begin, every, begin - Duration::seconds(1)), None);
        assert_eq!(repeat_occurrence(begin, every, begin), Some((0, begin)));
        assert_eq!(
            repeat_occurrence(begin, every, begin + Duration::minutes(75)),
            Some((2, begin + Duration::minutes(60)))
        );
        assert_eq!(repeat_occurrence(begin, Duration::zero(), begin), None);
    }

    #[test]
    fn test_within_is_symmetric_and_inclusive() {
        let tol = Duration::seconds(20);
        assert!(within(t0(), t0() + Duration::seconds(20), tol));
        assert!(within(t0() + Duration::seconds(20), t0(), tol));
        assert!(!within(t0(), t0() + Duration::seconds(21), tol));
    }
}
