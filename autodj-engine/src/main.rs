//! autodj - command-line entry point
//!
//! `plan` prints the next-track pick and transition plan for a JSON pool,
//! `enrich` pulls features and analysis for a pool from the metadata
//! service, and `simulate` runs a full session against simulated decks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use autodj_common::config::DjConfig;
use autodj_common::events::{DjEvent, EventBus};
use autodj_engine::bandit::{Feedback, MemoryWeightStore, WeightStore};
use autodj_engine::db::{self, SqliteWeightStore};
use autodj_engine::deck::simulated::{SimulatedFactory, SIMULATED_SAMPLE_RATE};
use autodj_engine::deck::{control, DeckGraph, GraphDeckControl, SharedDeckGraph};
use autodj_engine::feature_store::FeatureStore;
use autodj_engine::planner::TransitionPlanner;
use autodj_engine::services::memory::{load_pool, PoolEntry};
use autodj_engine::services::{HttpTrackService, StaticTrackService, TrackService};
use autodj_engine::session::{DjSession, SessionDeps};
use autodj_engine::types::TrackRef;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for autodj
#[derive(Parser, Debug)]
#[command(name = "autodj")]
#[command(about = "Autonomous two-deck DJ engine")]
#[command(version)]
struct Args {
    /// Config file (overrides AUTODJ_CONFIG and the per-user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick the next track and plan the transition into it
    Plan {
        /// JSON array of tracks with optional features/analysis
        #[arg(short, long)]
        pool: PathBuf,

        /// Track on air (defaults to the first pool entry)
        #[arg(long)]
        current: Option<String>,

        /// Playback position of the current track
        #[arg(long, default_value = "0")]
        position_ms: u64,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Fetch features and analysis for a pool from the metadata service
    Enrich {
        #[arg(short, long)]
        pool: PathBuf,

        /// Bearer token for the metadata service
        #[arg(long, env = "AUTODJ_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Run a session against simulated decks until N transitions complete
    ///
    /// Reads `like`, `dislike`, `applause`, `skip` or `quit` from stdin.
    Simulate {
        #[arg(short, long)]
        pool: PathBuf,

        #[arg(short, long, default_value = "3")]
        transitions: usize,

        /// Keep learned weights in memory only
        #[arg(long)]
        no_persist: bool,

        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = DjConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Plan {
            pool,
            current,
            position_ms,
            seed,
        } => run_plan(&config, &pool, current.as_deref(), position_ms, seed).await,
        Command::Enrich { pool, token } => run_enrich(&config, &pool, token).await,
        Command::Simulate {
            pool,
            transitions,
            no_persist,
            seed,
        } => run_simulate(&config, &pool, transitions, no_persist, seed).await,
    }
}

fn read_pool(path: &Path) -> Result<Vec<PoolEntry>> {
    let entries =
        load_pool(path).with_context(|| format!("Failed to read pool {}", path.display()))?;
    if entries.is_empty() {
        bail!("Pool {} is empty", path.display());
    }
    info!(tracks = entries.len(), "Pool loaded");
    Ok(entries)
}

fn rng_from(seed: Option<u64>) -> StdRng {
    seed.map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy)
}

async fn run_plan(
    config: &DjConfig,
    pool_path: &Path,
    current_id: Option<&str>,
    position_ms: u64,
    seed: Option<u64>,
) -> Result<()> {
    let entries = read_pool(pool_path)?;
    let service: Arc<dyn TrackService> = Arc::new(StaticTrackService::from_pool(&entries));
    let store = FeatureStore::new(service, &config.feature_store);

    let tracks: Vec<TrackRef> = entries.into_iter().map(|e| e.track).collect();
    let pool = store.enrich_pool(&tracks).await;

    let current = match current_id {
        Some(id) => pool.iter().find(|t| t.id() == id).cloned(),
        None => pool.first().cloned(),
    }
    .context("Current track is not in the pool")?;

    let planner = TransitionPlanner::new(config.planner.clone());
    let mut rng = rng_from(seed);
    let Some(next) = planner.pick_next_track(&current, &pool, &mut rng) else {
        bail!("No candidate besides the current track");
    };

    let position = move || Some(position_ms);
    let plan = planner.compute_transition(&current, &next, &position);
    let score = planner.score(&current, &next);

    let report = serde_json::json!({
        "current": current.id(),
        "next": next,
        "score": score,
        "plan": {
            "transition_id": plan.id,
            "delay_ms": plan.delay_ms(tokio::time::Instant::now()),
            "fade_ms": plan.fade_ms,
            "start_cue_ms": plan.start_cue_ms,
            "outro_start_ms": plan.outro_start_ms,
            "min_fade_ms": plan.min_fade_ms,
            "reason": plan.reason,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_enrich(config: &DjConfig, pool_path: &Path, token: String) -> Result<()> {
    let entries = read_pool(pool_path)?;
    let service = HttpTrackService::new(&config.service, token)
        .context("Failed to build metadata client")?;
    let store = FeatureStore::new(Arc::new(service), &config.feature_store);

    let tracks: Vec<TrackRef> = entries.into_iter().map(|e| e.track).collect();
    let pool = store.enrich_pool(&tracks).await;

    println!("{}", serde_json::to_string_pretty(&pool)?);
    Ok(())
}

async fn run_simulate(
    config: &DjConfig,
    pool_path: &Path,
    transitions: usize,
    no_persist: bool,
    seed: Option<u64>,
) -> Result<()> {
    let entries = read_pool(pool_path)?;

    let weights: Arc<dyn WeightStore> = if no_persist {
        Arc::new(MemoryWeightStore::new())
    } else {
        let db = db::init_database(&config.database_path())
            .await
            .context("Failed to open database")?;
        Arc::new(SqliteWeightStore::new(db))
    };

    let factory = entries.iter().fold(SimulatedFactory::new(), |f, e| {
        match e.features.as_ref() {
            Some(features) => f.with_tempo(e.track.uri.clone(), features.tempo_or_default()),
            None => f,
        }
    });

    let events = Arc::new(EventBus::new(config.session.event_capacity));
    let graph: SharedDeckGraph = Arc::new(Mutex::new(DeckGraph::new(
        config.decks.clone(),
        events.clone(),
    )));
    let controls = Arc::new(GraphDeckControl::new(graph.clone(), Arc::new(factory)));

    let deps = SessionDeps {
        service: Arc::new(StaticTrackService::from_pool(&entries)),
        controls,
        weights,
        events: events.clone(),
    };
    let session = match seed {
        Some(seed) => DjSession::with_seed(config, deps, seed).await,
        None => DjSession::new(config, deps).await,
    };

    session
        .set_pool(entries.into_iter().map(|e| e.track).collect())
        .await;
    let featured = session.enrich_pool().await;
    info!(featured, "Pool ready");

    let mut rx = events.subscribe();
    session.start_playback(None).await?;

    let cancel = CancellationToken::new();
    let renderer = tokio::spawn(render_loop(graph, cancel.clone()));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut completed = 0;

    let watch = session.run(cancel.clone());
    tokio::pin!(watch);
    let mut watch_done = false;

    while completed < transitions {
        tokio::select! {
            _ = &mut watch, if !watch_done => {
                watch_done = true;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
            event = rx.recv() => match event {
                Ok(DjEvent::Beat { .. }) => {}
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    match event {
                        DjEvent::CrossfadeComplete { .. } => completed += 1,
                        DjEvent::TransportChanged { playing: false, .. } => {
                            info!("Pool ran out, session stopped");
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(&session, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }

    cancel.cancel();
    if !watch_done {
        watch.await;
    }
    if let Err(e) = renderer.await {
        warn!(error = %e, "Render loop panicked");
    }
    session.stop().await?;

    info!(completed, "Simulation finished");
    Ok(())
}

/// Apply one stdin command; false to quit
async fn handle_command(session: &DjSession, line: &str) -> bool {
    match line {
        "" => {}
        "quit" | "q" => return false,
        "skip" => match session.skip().await {
            Ok(_) => info!("Skip requested"),
            Err(e) => warn!(error = %e, "Skip failed"),
        },
        other => match other.parse::<Feedback>() {
            Ok(feedback) => match session.submit_feedback(feedback).await {
                Ok(Some(style)) => info!(style = %style, ?feedback, "Feedback applied"),
                Ok(None) => info!(?feedback, "Feedback ignored"),
                Err(e) => warn!(error = %e, "Feedback could not be saved"),
            },
            Err(_) => warn!(command = other, "Unknown command"),
        },
    }
    true
}

/// Pull audio through the graph so the probes see signal, then sample beats
async fn render_loop(graph: SharedDeckGraph, cancel: CancellationToken) {
    const PERIOD_MS: u64 = 50;
    let mut buffer = vec![0.0f32; (SIMULATED_SAMPLE_RATE as u64 * PERIOD_MS / 1000) as usize];
    let mut ticker = interval(Duration::from_millis(PERIOD_MS));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut g = control::lock(&graph);
                g.render(&mut buffer);
                g.sample_beats();
            }
        }
    }
}
