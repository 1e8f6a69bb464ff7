//! The transition engine: owns the active trigger and its single wake
//! timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

use dynlog_core::{
    resolve, BaseConfig, ConfigHash, EffectiveConfig, LogConfig, Trigger,
};

use crate::applier::Applier;
use crate::error::SchedulerError;
use crate::select::{next_wake, NextWake};
use crate::store::TriggerStore;
use crate::timer::DelayedTask;

/// Identity of a trigger, as reported by [`Scheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRef {
    pub id: Uuid,
    pub name: String,
}

impl From<&Trigger> for TriggerRef {
    fn from(trigger: &Trigger) -> Self {
        Self {
            id: trigger.id,
            name: trigger.name.clone(),
        }
    }
}

/// A wake that is armed but has not fired yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingWake {
    pub trigger: TriggerRef,
    pub at: DateTime<Utc>,
}

/// Operator-facing snapshot of scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub current: TriggerRef,
    pub next_wake: Option<PendingWake>,
}

struct ArmedWake {
    task: DelayedTask,
    trigger: Trigger,
    at: DateTime<Utc>,
}

struct State {
    enabled: bool,
    current: Trigger,
    current_hash: Option<ConfigHash>,
    wake: Option<ArmedWake>,
    reload_timer: Option<DelayedTask>,
    /// Bumped on every arm; a wake callback carrying an older value lost a
    /// race against a reload or disable and must stand down.
    generation: u64,
}

/// Owns "which trigger is active" and the timers that move it forward.
///
/// All state lives behind one mutex. Range queries run before the lock is
/// taken, so a slow store never stalls a concurrent wake; a window-set
/// mutation racing an in-flight reload is converged by the next reload the
/// propagator delivers. Construct once at the composition root and share
/// the `Arc` with the propagator and the operator surface.
pub struct Scheduler {
    store: Arc<dyn TriggerStore>,
    applier: Arc<dyn Applier>,
    base: BaseConfig,
    default_effective: EffectiveConfig,
    state: Mutex<State>,
    applied_tx: watch::Sender<u64>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TriggerStore>,
        applier: Arc<dyn Applier>,
        base: BaseConfig,
    ) -> Arc<Self> {
        let default_effective = EffectiveConfig::default_for(&base);
        let (applied_tx, _) = watch::channel(0);
        Arc::new(Self {
            store,
            applier,
            base,
            default_effective,
            state: Mutex::new(State {
                enabled: true,
                current: Trigger::fallback(),
                current_hash: None,
                wake: None,
                reload_timer: None,
                generation: 0,
            }),
            applied_tx,
        })
    }

    /// Recompute the active trigger and re-arm the wake timer.
    ///
    /// Applies the trigger valid right now (if different from the active
    /// one), then asks the selector when the next transition is due and
    /// arms a single timer for it. Applier failures are logged and the
    /// timer is still armed, so the system keeps trying at the next
    /// boundary; store failures surface as `Err` and leave the previous
    /// trigger and timer in effect.
    pub async fn reload(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if !self.is_enabled().await {
            debug!("reload skipped, scheduler disabled");
            return Ok(());
        }

        let now = Utc::now();
        let current = self
            .store
            .highest_priority_valid_at(now)
            .await?
            .unwrap_or_else(Trigger::fallback);
        let NextWake { winner, due_at } =
            next_wake(self.store.as_ref(), Some(&current), now).await?;

        let mut state = self.state.lock().await;
        if !state.enabled {
            return Ok(());
        }
        // Cancel-then-rearm: dropping the armed wake aborts its task. The
        // generation bump retires a callback that already fired and is
        // waiting on the mutex, which an abort cannot reach.
        state.wake = None;
        state.generation += 1;

        if let Err(err) = self.apply_locked(&mut state, &current).await {
            error!(trigger = %current, error = %err, "failed to apply active trigger");
        }

        match due_at {
            Some(at) => self.arm_wake(&mut state, winner, at),
            None => {
                if let Err(err) = self.apply_locked(&mut state, &winner).await {
                    error!(trigger = %winner, error = %err, "failed to apply trigger");
                }
            }
        }
        Ok(())
    }

    /// Debounced reload: cancel any pending deferred reload and arm a new
    /// one `delay` from now. Coalesces bursts of window-set mutations into
    /// a single recomputation.
    pub async fn reload_after(self: &Arc<Self>, delay: Duration) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }
        let scheduler = Arc::clone(self);
        state.reload_timer = Some(DelayedTask::schedule(delay, move || async move {
            if let Err(err) = scheduler.reload().await {
                error!(error = %err, "deferred reload failed");
            }
        }));
    }

    /// Timer callback: activate `winner`, then chain the next wake.
    ///
    /// The follow-up selection uses the expected due instant rather than
    /// wall clock, so a timer firing a few millis early cannot skip a
    /// transition.
    async fn wake(self: Arc<Self>, winner: Trigger, expected_at: DateTime<Utc>, generation: u64) {
        debug!(trigger = %winner, at = %expected_at, "wake");
        let next = match next_wake(self.store.as_ref(), Some(&winner), expected_at).await {
            Ok(next) => next,
            Err(err) => {
                error!(error = %err, "store query failed during wake, awaiting next reload");
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    if let Some(armed) = state.wake.take() {
                        // This callback is the armed task; detach instead
                        // of abort so it can finish unwinding.
                        armed.task.detach();
                    }
                }
                return;
            }
        };

        let mut state = self.state.lock().await;
        if !state.enabled || state.generation != generation {
            // A reload or disable raced us and already recomputed; it owns
            // the current state now.
            debug!(trigger = %winner, "stale wake discarded");
            return;
        }
        if let Some(armed) = state.wake.take() {
            // The entry being retired is this very callback's task;
            // aborting it would cancel the apply below at its next
            // suspension point.
            armed.task.detach();
        }

        if let Err(err) = self.apply_locked(&mut state, &winner).await {
            error!(trigger = %winner, error = %err, "failed to apply trigger on wake");
        }
        if let NextWake {
            winner: next_trigger,
            due_at: Some(at),
        } = next
        {
            self.arm_wake(&mut state, next_trigger, at);
        }
    }

    /// Arm the single wake timer. The caller already cleared any previous
    /// timer.
    fn arm_wake(self: &Arc<Self>, state: &mut State, winner: Trigger, at: DateTime<Utc>) {
        state.generation += 1;
        let generation = state.generation;
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(trigger = %winner, %at, ?delay, "arming wake timer");

        let scheduler = Arc::clone(self);
        let task_winner = winner.clone();
        let task = DelayedTask::schedule(delay, move || async move {
            scheduler.wake(task_winner, at, generation).await;
        });
        state.wake = Some(ArmedWake {
            task,
            trigger: winner,
            at,
        });
    }

    /// Resolve a trigger's config and push it through the applier; commit
    /// only on success. Identical content hashes skip the applier call but
    /// still move `current`.
    async fn apply_locked(
        &self,
        state: &mut State,
        trigger: &Trigger,
    ) -> Result<(), SchedulerError> {
        let (effective, hash) = self.resolve_trigger(trigger).await?;
        if state.current_hash == Some(hash) {
            debug!(trigger = %trigger, "config already active, applier skipped");
        } else {
            self.applier.apply(&effective).await?;
            info!(trigger = %trigger, applier = self.applier.name(), "applied config");
            state.current_hash = Some(hash);
        }
        state.current = trigger.clone();
        self.applied_tx.send_modify(|n| *n += 1);
        Ok(())
    }

    async fn resolve_trigger(
        &self,
        trigger: &Trigger,
    ) -> Result<(EffectiveConfig, ConfigHash), SchedulerError> {
        if trigger.is_fallback() {
            return Ok((self.default_effective.clone(), LogConfig::fallback_hash()));
        }
        let config = self
            .store
            .config(trigger.config_id)
            .await?
            .ok_or(SchedulerError::ConfigMissing(trigger.config_id))?;
        let spec = config.spec()?;
        Ok((resolve(&self.base, &spec), config.content_hash()))
    }

    /// Stop automatic transitions: cancel both timers and point `current`
    /// back at the fallback, without touching the live subsystem.
    pub async fn disable(&self) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }
        state.enabled = false;
        state.wake = None;
        state.reload_timer = None;
        state.generation += 1;
        state.current = Trigger::fallback();
        info!("scheduler disabled");
    }

    /// Resume automatic transitions and recompute immediately.
    pub async fn enable(self: &Arc<Self>) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().await;
            if state.enabled {
                return Ok(());
            }
            state.enabled = true;
        }
        info!("scheduler enabled");
        self.reload().await
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// The trigger currently considered active.
    pub async fn current_trigger(&self) -> Trigger {
        self.state.lock().await.current.clone()
    }

    /// Operator-facing snapshot: enabled flag, current trigger, pending
    /// wake.
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            enabled: state.enabled,
            current: TriggerRef::from(&state.current),
            next_wake: state.wake.as_ref().map(|wake| PendingWake {
                trigger: TriggerRef::from(&wake.trigger),
                at: wake.at,
            }),
        }
    }

    /// Watch channel bumped every time a trigger is activated (applied or
    /// hash-skipped). Lets hosts and tests await quiescence instead of
    /// sleeping.
    pub fn applied(&self) -> watch::Receiver<u64> {
        self.applied_tx.subscribe()
    }
}
