//! gaze-sim: runs the gaze subsystem end to end against a simulated
//! estimator and an in-memory page, then prints the final status as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use gaze_assist::clock::SystemClock;
use gaze_assist::config::CalibrationConfig;
use gaze_assist::input_source::{InputEvent, RecordingProvider, ScriptedInputProvider};
use gaze_assist::runtime::GazeRuntime;
use gaze_assist::tracking::{
    ElementKind, ElementTree, GazeSession, Rect, ScreenPoint, SessionEvent, SimulatedEstimator,
    SimulatedMode, Viewport,
};
use gaze_assist::GazeConfig;

#[derive(Parser, Debug)]
#[command(name = "gaze-sim", about = "Gaze tracking and dwell activation simulator")]
struct Cli {
    /// Viewport size (WxH)
    #[arg(long, default_value = "1920x1080")]
    viewport: String,

    /// Dwell activation threshold in ms (500-3000)
    #[arg(long)]
    dwell_ms: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Multiply every calibration timing by this factor
    #[arg(long, default_value = "1.0")]
    time_scale: f64,

    /// Extra time to keep the loop running after the script, in ms
    #[arg(long, default_value = "0")]
    duration_ms: u64,

    /// JSON input script (default: built-in calibrate-then-click demo)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Write the played script to this file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Simulated estimator behaviour: fixed or follow-training
    #[arg(long, default_value = "follow-training")]
    mode: String,
}

/// A small billing page: two buttons, a link and a clickable card.
fn demo_page(viewport: Viewport) -> (ElementTree, ScreenPoint) {
    let mut tree = ElementTree::new();
    let body = tree.insert(
        ElementKind::Container,
        "body",
        Rect::new(0.0, 0.0, viewport.width, viewport.height),
        None,
    );
    let pay = Rect::new(viewport.width * 0.1, viewport.height * 0.1, 240.0, 64.0);
    tree.insert(ElementKind::Button, "Pay bill", pay, Some(body));
    tree.insert(
        ElementKind::Button,
        "Scan bill",
        Rect::new(viewport.width * 0.6, viewport.height * 0.1, 240.0, 64.0),
        Some(body),
    );
    tree.insert(
        ElementKind::Link,
        "Find a clinic",
        Rect::new(viewport.width * 0.1, viewport.height * 0.7, 200.0, 32.0),
        Some(body),
    );
    let card = tree.insert(
        ElementKind::Container,
        "Upcoming appointment",
        Rect::new(viewport.width * 0.55, viewport.height * 0.55, 320.0, 160.0),
        Some(body),
    );
    tree.mark_clickable(card);
    (tree, pay.center())
}

/// Upper bound on how long one calibration run takes.
fn calibration_budget_ms(cal: &CalibrationConfig) -> u64 {
    let per_point = cal.target_move_ms + cal.countdown_secs as u64 * cal.countdown_tick_ms;
    cal.face_poll_ms + 9 * per_point + cal.grace_ms + 200
}

/// Toggle on, wait out calibration, then stare at `target` past the dwell time.
fn demo_script(config: &GazeConfig, target: ScreenPoint) -> ScriptedInputProvider {
    let mut events = vec![
        InputEvent::Toggle,
        InputEvent::Wait {
            ms: calibration_budget_ms(&config.calibration),
        },
    ];
    let step_ms = 50;
    let steps = config.session.dwell_time_ms / step_ms + 6;
    for _ in 0..steps {
        events.push(InputEvent::Gaze {
            x: target.x,
            y: target.y,
            confidence: 0.9,
        });
        events.push(InputEvent::Wait { ms: step_ms });
    }
    ScriptedInputProvider::new(events)
}

fn log_events(events: Vec<SessionEvent>) {
    debug!("{} session events", events.len());
    for event in events {
        debug!("{:?}", event);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gaze_assist=info".into()),
        )
        .init();

    info!("gaze-sim v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => GazeConfig::load(path)?,
        None => GazeConfig::default(),
    };
    if let Some(ms) = cli.dwell_ms {
        config.session.dwell_time_ms = ms;
    }
    if cli.time_scale <= 0.0 {
        anyhow::bail!("--time-scale must be positive, got {}", cli.time_scale);
    }
    config.calibration = config.calibration.scaled(cli.time_scale);
    config.validate()?;

    let viewport = Viewport::parse(&cli.viewport)
        .ok_or_else(|| anyhow::anyhow!("invalid viewport '{}', expected WxH", cli.viewport))?;
    let mode = SimulatedMode::from_str(&cli.mode)
        .ok_or_else(|| anyhow::anyhow!("unknown mode '{}', use fixed or follow-training", cli.mode))?;
    info!(
        "viewport {}x{}, dwell {} ms, estimator {}",
        viewport.width,
        viewport.height,
        config.session.dwell_time_ms,
        mode.as_str()
    );

    let (page, target) = demo_page(viewport);
    let (estimator, handle) = SimulatedEstimator::new(mode);
    handle.look_at(Some(ScreenPoint::new(viewport.width / 2.0, viewport.height / 2.0)));

    let session = GazeSession::new(estimator, page, &config, viewport, Arc::new(SystemClock));
    let mut runtime = GazeRuntime::new(session, &config)?;

    let script = match &cli.script {
        Some(path) => ScriptedInputProvider::load(path)?,
        None => demo_script(&config, target),
    };
    let mut input = RecordingProvider::new(script);
    runtime.play(&mut input)?;
    log_events(runtime.drain_events());
    if cli.duration_ms > 0 {
        runtime.run_for(Duration::from_millis(cli.duration_ms))?;
        log_events(runtime.drain_events());
    }

    let status = runtime.session().status();
    let session = runtime.shutdown();
    for id in session.ui().activations() {
        if let Some(el) = session.ui().get(*id) {
            info!("activated {} '{}'", el.kind.as_str(), el.label);
        }
    }

    if let Some(path) = &cli.record {
        std::fs::write(path, input.to_json()?)?;
        info!("input script written to {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
