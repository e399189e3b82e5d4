//! Phase timing for a population job
//!
//! The job moves between SCAN, WRITE, APPLY_EXTERNAL and FLIP. Each stint
//! in a phase is one report; per phase we keep total/min/max and the
//! report count. A periodic `TIME/PHASE Total` record is logged while the
//! job runs and a single `TIME/PHASE Final` record when it stops.

use crate::logging::PopulationLog;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Pulling entities from the store
    Scan,
    /// Handing batches to populators
    Write,
    /// Applying queued concurrent updates
    ApplyExternal,
    /// Final drain, verification, sampling and the swap itself
    Flip,
}

impl Phase {
    const ALL: [Phase; 4] = [Phase::Scan, Phase::Write, Phase::ApplyExternal, Phase::Flip];

    fn slot(self) -> usize {
        match self {
            Phase::Scan => 0,
            Phase::Write => 1,
            Phase::ApplyExternal => 2,
            Phase::Flip => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Scan => write!(f, "SCAN"),
            Phase::Write => write!(f, "WRITE"),
            Phase::ApplyExternal => write!(f, "APPLY_EXTERNAL"),
            Phase::Flip => write!(f, "FLIP"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PhaseStats {
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    reports: u64,
}

impl PhaseStats {
    fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
        self.reports += 1;
    }

    fn avg(&self) -> Duration {
        if self.reports == 0 {
            return Duration::ZERO;
        }
        self.total / self.reports as u32
    }
}

fn summary(stats: &[PhaseStats; 4]) -> String {
    Phase::ALL
        .iter()
        .map(|phase| {
            let s = &stats[phase.slot()];
            format!(
                "{}[totalTime={}ms, avgTime={}ms, minTime={}ms, maxTime={}ms, nbrOfReports={}]",
                phase,
                s.total.as_millis(),
                s.avg().as_millis(),
                s.min.unwrap_or_default().as_millis(),
                s.max.as_millis(),
                s.reports
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

struct TrackerState {
    current: Option<(Phase, Instant)>,
    totals: [PhaseStats; 4],
    period: [PhaseStats; 4],
    last_period_log: Instant,
    stopped: bool,
}

/// Per-phase timing with periodic and final log records
pub struct PhaseTracker {
    state: Mutex<TrackerState>,
    log_period: Option<Duration>,
    log: Arc<dyn PopulationLog>,
}

impl PhaseTracker {
    pub fn new(log: Arc<dyn PopulationLog>, log_period: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                current: None,
                totals: [PhaseStats::default(); 4],
                period: [PhaseStats::default(); 4],
                last_period_log: Instant::now(),
                stopped: false,
            }),
            log_period,
            log,
        }
    }

    /// End the current stint and start one in `phase`
    pub fn enter(&self, phase: Phase) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let now = Instant::now();
        Self::close_current(&mut state, now);
        state.current = Some((phase, now));

        if let Some(period) = self.log_period {
            let since = now.duration_since(state.last_period_log);
            if since >= period {
                self.log.info(&format!(
                    "TIME/PHASE Total: {}, Last {} sec: {}",
                    summary(&state.totals),
                    since.as_secs(),
                    summary(&state.period)
                ));
                state.period = [PhaseStats::default(); 4];
                state.last_period_log = now;
            }
        }
    }

    fn close_current(state: &mut TrackerState, now: Instant) {
        if let Some((phase, started)) = state.current.take() {
            let elapsed = now.duration_since(started);
            state.totals[phase.slot()].record(elapsed);
            state.period[phase.slot()].record(elapsed);
        }
    }

    /// Close the last stint and log the final record; idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        Self::close_current(&mut state, Instant::now());
        state.stopped = true;
        self.log.info(&format!("TIME/PHASE Final: {}", summary(&state.totals)));
    }

    /// Stints recorded so far in `phase`
    pub fn reports(&self, phase: Phase) -> u64 {
        self.state.lock().totals[phase.slot()].reports
    }
}
