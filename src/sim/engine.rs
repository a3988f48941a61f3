//! Engine wiring the allocation loop, the scheduler pass and the hardware
//! drivers around one shared roster.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::allocation::{self, Drivers};
use super::clock::{Clock, Pacer};
use super::kpi::KpiReport;
use super::roster::{EngineState, Roster};
use super::scheduler::{ArrivalQueue, PassReport, Scheduler};
use super::types::{ChargeMode, EngineParams, FinalSoc, TickReport};
use crate::devices::types::shared;
use crate::devices::{BufferCharger, NullBufferCharger, SharedCharger, SimulatedCharger};
use crate::io::telemetry::{NullSink, TelemetrySink};

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Ticks executed by this process (excludes ticks replayed from a checkpoint).
    pub ticks_run: u64,
    /// Run-clock time of the last tick (seconds).
    pub end_time_s: f32,
    /// Final state of charge of every vehicle still connected at the end.
    pub final_soc: Vec<FinalSoc>,
    /// Vehicles that departed during the run, in departure order.
    pub departures: Vec<FinalSoc>,
    /// Run indicators.
    pub kpi: KpiReport,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Departed ---")?;
        for report in &self.departures {
            writeln!(f, "{report}")?;
        }
        writeln!(f, "--- Connected at {:.0}s ---", self.end_time_s)?;
        for report in &self.final_soc {
            writeln!(f, "{report}")?;
        }
        write!(f, "{}", self.kpi)
    }
}

/// The allocation side of the engine: everything the fast loop touches.
struct Allocator {
    state: Arc<EngineState>,
    params: EngineParams,
    clock: Clock,
    building_load: Vec<f32>,
    charger: SharedCharger,
    buffer: Box<dyn BufferCharger>,
    sink: Box<dyn TelemetrySink>,
    kpi: KpiReport,
    ticks_run: u64,
    last_time_s: f32,
}

impl Allocator {
    fn allocate(&mut self, tick: u64) -> TickReport {
        let time_s = self.clock.time_of(tick);
        let load_kw = self
            .building_load
            .get(tick as usize)
            .copied()
            .unwrap_or_default();

        let report = {
            let mut roster = self.state.lock();
            let mut charger = self.charger.lock();
            let mut drivers = Drivers {
                charger: &mut *charger,
                buffer: self.buffer.as_mut(),
            };
            allocation::run_tick(&mut roster, tick, time_s, load_kw, &self.params, &mut drivers)
        };

        if let Err(e) = self.sink.record(&report) {
            warn!(tick, error = %e, "telemetry not persisted");
        }
        self.kpi.record(&report, &self.params);
        self.ticks_run += 1;
        self.last_time_s = time_s;
        debug!("{report}");
        report
    }

    /// Stops the hardware charging point and closes out the run.
    fn finish(mut self) -> RunSummary {
        self.state.finish();
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "telemetry flush failed");
        }

        let mut roster = self.state.lock();
        if roster
            .vehicles
            .iter()
            .any(|v| v.mode == ChargeMode::HardwareBacked && v.assigned_current > 0.0)
        {
            if let Err(e) = self.charger.lock().set_current(0.0) {
                warn!(error = %e, "could not stop hardware charging point");
            }
        }
        for vehicle in &mut roster.vehicles {
            vehicle.assigned_current = 0.0;
        }

        let final_soc = roster.final_soc(self.last_time_s);
        for report in &final_soc {
            info!(
                vehicle = %report.vehicle_id,
                soc_remaining_pct = report.soc_remaining_pct,
                "run ended with vehicle connected"
            );
        }
        info!(ticks = self.ticks_run, "building trace exhausted");
        RunSummary {
            ticks_run: self.ticks_run,
            end_time_s: self.last_time_s,
            final_soc,
            departures: roster.departures.clone(),
            kpi: self.kpi.clone(),
        }
    }
}

/// The charging engine.
///
/// [`Engine::run`] drives the allocation loop on the calling thread and the
/// scheduler pass on a second thread, with a condition variable between
/// them. [`Engine::step`] runs the same work sequentially, one tick at a
/// time, which is what tests and replays use.
///
/// # Examples
///
/// ```
/// use ev_cms::config::ScenarioConfig;
/// use ev_cms::sim::engine::Engine;
/// use ev_cms::sim::roster::Roster;
/// use ev_cms::sim::scheduler::ArrivalQueue;
/// use ev_cms::sim::station::Station;
/// use ev_cms::sim::types::EngineParams;
///
/// let cfg = ScenarioConfig::baseline();
/// let params = EngineParams::from_config(&cfg);
/// let roster = Roster::new(Station::pool(2, 13.5, 1.0));
/// let mut engine = Engine::new(params, roster, vec![50.0; 3], ArrivalQueue::default());
///
/// while engine.step().is_some() {}
/// let summary = engine.finish();
/// assert_eq!(summary.ticks_run, 3);
/// ```
pub struct Engine {
    alloc: Allocator,
    scheduler: Scheduler,
    tick_period: Duration,
    lockstep: bool,
}

impl Engine {
    /// Creates an engine over a building-load trace (kW, one sample per tick).
    ///
    /// Starts with a simulated charging point, a buffer charger that ignores
    /// commands, no telemetry and no wall-clock pacing. The allocation loop
    /// does not wait for control passes unless [`Engine::with_lockstep`]
    /// asks it to.
    pub fn new(
        params: EngineParams,
        roster: Roster,
        building_load: Vec<f32>,
        arrivals: ArrivalQueue,
    ) -> Self {
        let clock = Clock::new(
            building_load.len() as u64,
            params.tick_seconds,
            params.control_ratio,
        );
        let charger = shared(SimulatedCharger::new(params.efficiency));
        Self {
            alloc: Allocator {
                state: EngineState::new(roster),
                params: params.clone(),
                clock,
                building_load,
                charger,
                buffer: Box::new(NullBufferCharger::default()),
                sink: Box::new(NullSink),
                kpi: KpiReport::default(),
                ticks_run: 0,
                last_time_s: 0.0,
            },
            scheduler: Scheduler::new(arrivals, params),
            tick_period: Duration::ZERO,
            lockstep: false,
        }
    }

    /// Uses `charger` for the hardware-backed slot.
    pub fn with_charger(mut self, charger: SharedCharger) -> Self {
        self.alloc.charger = charger;
        self
    }

    /// Uses `buffer` for the reserved station's DC charger.
    pub fn with_buffer_charger(mut self, buffer: Box<dyn BufferCharger>) -> Self {
        self.alloc.buffer = buffer;
        self
    }

    /// Sends per-tick telemetry to `sink`.
    pub fn with_sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.alloc.sink = sink;
        self
    }

    /// Paces ticks at `period` of wall-clock time in [`Engine::run`].
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Chooses whether the allocation loop waits for each signaled control
    /// pass before its next tick.
    pub fn with_lockstep(mut self, lockstep: bool) -> Self {
        self.lockstep = lockstep;
        self
    }

    /// Starts at `tick` instead of 0, used when resuming from a checkpoint.
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.alloc.clock.resume_at(tick);
        self
    }

    /// Shared roster handle for listeners.
    pub fn state(&self) -> Arc<EngineState> {
        Arc::clone(&self.alloc.state)
    }

    /// Shared hardware charger handle for the intake listener.
    pub fn charger(&self) -> SharedCharger {
        Arc::clone(&self.alloc.charger)
    }

    /// Engine parameters.
    pub fn params(&self) -> &EngineParams {
        &self.alloc.params
    }

    /// Arrivals not yet admitted.
    pub fn pending_arrivals(&self) -> usize {
        self.scheduler.pending()
    }

    /// Runs one tick, followed by the control pass when the tick is a
    /// control tick. Returns `None` once the building trace is exhausted.
    pub fn step(&mut self) -> Option<TickReport> {
        let tick = self.alloc.clock.tick()?;
        let report = self.alloc.allocate(tick);
        if self.alloc.clock.is_control_tick(tick) {
            let now = self.alloc.clock.time_of(tick);
            let mut roster = self.alloc.state.lock();
            log_pass(&self.scheduler.pass(&mut roster, now), tick);
        }
        Some(report)
    }

    /// Ends a stepped run: marks the state finished and reports final
    /// state of charge.
    pub fn finish(self) -> RunSummary {
        self.alloc.finish()
    }

    /// Runs to the end of the building trace with the allocation loop on
    /// this thread and the scheduler pass on a scoped worker thread.
    ///
    /// On a control tick the loop signals the scheduler and moves on to the
    /// next tick. With lockstep on it first waits for that pass to finish,
    /// which makes the run reproduce [`Engine::step`] exactly.
    pub fn run(self) -> RunSummary {
        let Self {
            mut alloc,
            mut scheduler,
            tick_period,
            lockstep,
        } = self;
        let state = Arc::clone(&alloc.state);
        let tick_seconds = alloc.params.tick_seconds;
        info!(
            start_tick = alloc.clock.current(),
            total_ticks = alloc.clock.total(),
            ?tick_period,
            lockstep,
            "engine started"
        );

        thread::scope(|s| {
            let control = Arc::clone(&state);
            s.spawn(move || {
                while let Some(tick) = control.wait_for_control() {
                    let now = tick as f32 * tick_seconds;
                    let pass = {
                        let mut roster = control.lock();
                        scheduler.pass(&mut roster, now)
                    };
                    log_pass(&pass, tick);
                    control.complete_control(tick);
                }
                debug!("scheduler stopped");
            });

            let mut pacer = Pacer::new(tick_period);
            while let Some(tick) = alloc.clock.tick() {
                pacer.start();
                alloc.allocate(tick);
                if alloc.clock.is_control_tick(tick) {
                    state.signal_control(tick);
                    if lockstep {
                        state.wait_control_complete(tick);
                    }
                }
                pacer.wait();
            }
            // wakes the scheduler so the scope can join it
            state.finish();
        });

        alloc.finish()
    }
}

fn log_pass(pass: &PassReport, tick: u64) {
    if pass.admitted > 0 || !pass.departed.is_empty() || !pass.assist_activated.is_empty() {
        debug!(
            tick,
            admitted = pass.admitted,
            departed = pass.departed.len(),
            assist_activated = pass.assist_activated.len(),
            "control pass"
        );
    }
}
