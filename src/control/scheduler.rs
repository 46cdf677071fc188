//! # Scheduler loop
//!
//! A countdown in seconds, decremented once per tick. When it reaches zero a
//! fresh-session run is started in the background and the countdown is reset,
//! whether or not the previous run has finished. Pausing freezes the countdown
//! only; an in-flight run carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::control::protocol::ControlError;
use crate::crawling::orchestrator::Orchestrator;
use crate::domain::events::{BotEvent, EventSink, EventTarget};
use crate::infrastructure::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Paused,
    Counting(u64),
    Triggered,
}

pub struct SchedulerLoop {
    interval: AtomicU64,
    countdown: AtomicU64,
    paused: AtomicBool,
    tick: Duration,
    orchestrator: Arc<Orchestrator>,
    events: Arc<dyn EventSink>,
}

impl SchedulerLoop {
    pub fn new(config: &SchedulerConfig, orchestrator: Arc<Orchestrator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            interval: AtomicU64::new(config.interval_seconds),
            countdown: AtomicU64::new(config.interval_seconds),
            paused: AtomicBool::new(config.paused),
            tick: Duration::from_millis(config.tick_millis),
            orchestrator,
            events,
        }
    }

    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn countdown(&self) -> u64 {
        self.countdown.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Set the interval and restart the countdown from it.
    ///
    /// # Errors
    /// [`ControlError::Configuration`] for an interval of zero.
    pub fn set_interval(&self, seconds: u64) -> Result<(), ControlError> {
        if seconds == 0 {
            return Err(ControlError::Configuration("scheduler interval must be at least 1 second".to_string()));
        }
        self.interval.store(seconds, Ordering::SeqCst);
        self.countdown.store(seconds, Ordering::SeqCst);
        self.events.emit(BotEvent::SchedulerInterval(seconds));
        self.events.log_forced(format!("Scheduler interval set to {seconds}."));
        Ok(())
    }

    /// Flip pause and return the new value.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        self.events.emit(BotEvent::PauseTimer(paused));
        let message = if paused { "Timer has been paused." } else { "Timer has been resumed." };
        self.events.log_forced(message.to_string());
        paused
    }

    pub fn report(&self, target: EventTarget) {
        self.events.emit_to(target, BotEvent::SchedulerInterval(self.interval()));
        self.events.emit_to(target, BotEvent::PauseTimer(self.is_paused()));
    }

    /// One countdown step.
    pub fn tick(&self) -> TickOutcome {
        self.events.emit(BotEvent::Timer(self.countdown()));
        if self.is_paused() {
            return TickOutcome::Paused;
        }

        let previous = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .unwrap_or_default();
        let remaining = previous.saturating_sub(1);
        if remaining > 0 {
            return TickOutcome::Counting(remaining);
        }

        self.countdown.store(self.interval(), Ordering::SeqCst);
        self.trigger();
        TickOutcome::Triggered
    }

    fn trigger(&self) {
        debug!("scheduler countdown elapsed, starting a fresh session");
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_cycle(true).await {
                debug!("scheduled run did not start: {e}");
            }
        });
    }

    /// Tick until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        ticker.tick().await;

        info!("scheduler started: interval {}s, tick {:?}", self.interval(), self.tick);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        info!("scheduler stopped");
    }
}
