//! ev-cms entry point: CLI wiring, trace loading and engine construction.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use ev_cms::config::ScenarioConfig;
use ev_cms::devices::types::shared;
use ev_cms::devices::{
    BufferCharger, LineFrameSink, NullBufferCharger, RapiCharger, SharedCharger, SimulatedCharger,
    ZekaCharger,
};
use ev_cms::io::checkpoint;
use ev_cms::io::telemetry::{CsvSink, NullSink, TelemetrySink};
use ev_cms::io::traces::{load_arrivals, load_building_trace};
use ev_cms::listeners::{Intake, StatusPublisher};
use ev_cms::sim::engine::Engine;
use ev_cms::sim::roster::Roster;
use ev_cms::sim::scheduler::ArrivalQueue;
use ev_cms::sim::station::Station;
use ev_cms::sim::types::EngineParams;

#[derive(Parser)]
#[command(name = "ev-cms")]
#[command(about = "EV charging allocation and scheduling engine")]
#[command(version)]
struct Cli {
    /// Load scenario from TOML config file
    #[arg(long, conflicts_with = "preset")]
    scenario: Option<PathBuf>,

    /// Use a built-in preset (baseline, demo, stress)
    #[arg(long)]
    preset: Option<String>,

    /// Building-load trace, one kW sample per tick
    #[arg(long)]
    building_dataset: PathBuf,

    /// Arrival list CSV
    #[arg(long)]
    car_dataset: Option<PathBuf>,

    /// Directory for per-tick vehicle and station telemetry
    #[arg(long)]
    telemetry_dir: Option<PathBuf>,

    /// Resume from the telemetry in --telemetry-dir
    #[arg(long, requires = "telemetry_dir")]
    resume: bool,

    /// Pace ticks at engine.fast_read_delay_s instead of engine.read_delay_s
    #[arg(long)]
    fast_sim: bool,

    /// Serial device of an OpenEVSE station for the hardware slot
    #[arg(long)]
    openevse_port: Option<PathBuf>,

    /// Write buffer-charger CAN frames (cansend format) to this device or file
    #[arg(long)]
    buffer_can: Option<PathBuf>,

    /// Start the intake and status listeners
    #[arg(long)]
    listen: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Start REST API server alongside the engine
    #[cfg(feature = "api")]
    #[arg(long)]
    serve: bool,

    /// API server port
    #[cfg(feature = "api")]
    #[arg(long, default_value = "3000")]
    port: u16,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    process::exit(1);
}

fn load_config(cli: &Cli) -> ScenarioConfig {
    let cfg = match (&cli.scenario, &cli.preset) {
        (Some(path), _) => ScenarioConfig::from_toml_file(path),
        (None, Some(name)) => ScenarioConfig::from_preset(name),
        (None, None) => Ok(ScenarioConfig::baseline()),
    }
    .unwrap_or_else(|e| fail(e));

    let errors = cfg.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    cfg
}

fn open_charger(port: Option<&Path>, params: &EngineParams) -> SharedCharger {
    let Some(port) = port else {
        return shared(SimulatedCharger::new(params.efficiency));
    };
    let link = OpenOptions::new()
        .read(true)
        .write(true)
        .open(port)
        .unwrap_or_else(|e| fail(format!("cannot open {}: {e}", port.display())));
    let reader = link
        .try_clone()
        .unwrap_or_else(|e| fail(format!("cannot clone {}: {e}", port.display())));
    info!(port = %port.display(), "using OpenEVSE station");
    shared(RapiCharger::new(BufReader::new(reader), link))
}

fn open_buffer_charger(device: Option<&Path>) -> Box<dyn BufferCharger> {
    let Some(device) = device else {
        return Box::new(NullBufferCharger::default());
    };
    let out = OpenOptions::new()
        .append(true)
        .create(true)
        .open(device)
        .unwrap_or_else(|e| fail(format!("cannot open {}: {e}", device.display())));
    let charger = ZekaCharger::new(LineFrameSink::new(out))
        .unwrap_or_else(|e| fail(format!("buffer charger init failed: {e}")));
    Box::new(charger)
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(&cli);
    let params = EngineParams::from_config(&cfg);

    let building = load_building_trace(&cli.building_dataset).unwrap_or_else(|e| fail(e));
    let arrivals = match &cli.car_dataset {
        Some(path) => load_arrivals(path, &cfg.battery_classes).unwrap_or_else(|e| fail(e)),
        None => Vec::new(),
    };
    info!(
        ticks = building.len(),
        arrivals = arrivals.len(),
        "traces loaded"
    );

    let (roster, queue, start_tick) = match (&cli.telemetry_dir, cli.resume) {
        (Some(dir), true) => {
            let cp = checkpoint::restore(dir, &cfg, &params, arrivals).unwrap_or_else(|e| fail(e));
            (cp.roster, cp.arrivals, cp.next_tick)
        }
        _ => {
            let s = &cfg.stations;
            let stations = Station::pool(s.max_vehicles, s.rated_capacity_kwh, s.initial_soc);
            (Roster::new(stations), ArrivalQueue::new(arrivals), 0)
        }
    };
    if start_tick as usize >= building.len() {
        warn!(start_tick, "building trace already exhausted");
    }

    let sink: Box<dyn TelemetrySink> = match &cli.telemetry_dir {
        Some(dir) => Box::new(CsvSink::create(dir, cli.resume).unwrap_or_else(|e| fail(e))),
        None => Box::new(NullSink),
    };
    let period_s = if cli.fast_sim {
        cfg.engine.fast_read_delay_s
    } else {
        cfg.engine.read_delay_s
    };

    let engine = Engine::new(params.clone(), roster, building, queue)
        .starting_at(start_tick)
        .with_charger(open_charger(cli.openevse_port.as_deref(), &params))
        .with_buffer_charger(open_buffer_charger(cli.buffer_can.as_deref()))
        .with_sink(sink)
        .with_tick_period(Duration::from_secs_f32(period_s))
        .with_lockstep(cfg.engine.lockstep_control);

    let intake = Intake::new(
        engine.state(),
        engine.charger(),
        &cfg.battery_classes,
        params.clone(),
    );

    let mut listeners = Vec::new();
    if cli.listen {
        let l = &cfg.listeners;
        listeners.push(
            intake
                .clone()
                .spawn(l.intake_addr.as_str())
                .unwrap_or_else(|e| fail(format!("cannot bind {}: {e}", l.intake_addr))),
        );
        let publisher = StatusPublisher::new(
            engine.state(),
            params.clone(),
            Duration::from_secs_f32(l.status_period_s),
        );
        listeners.push(
            publisher
                .spawn(l.status_addr.as_str())
                .unwrap_or_else(|e| fail(format!("cannot bind {}: {e}", l.status_addr))),
        );
    }

    // The API thread is detached; the process exits when the engine does.
    #[cfg(feature = "api")]
    if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let state = Arc::new(ev_cms::api::AppState {
            engine: engine.state(),
            intake: intake.clone(),
            params: params.clone(),
        });
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new()
            .unwrap_or_else(|e| fail(format!("failed to create tokio runtime: {e}")));
        std::thread::spawn(move || {
            if let Err(e) = rt.block_on(ev_cms::api::serve(state, addr)) {
                eprintln!("error: api server: {e}");
            }
        });
    }
    drop(intake);

    let summary = engine.run();
    for handle in listeners {
        if handle.join().is_err() {
            warn!("listener thread panicked");
        }
    }
    println!("{summary}");
}
