use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use workout_tracker_rs::replay;
use workout_tracker_rs::storage::{GpxTrack, JsonFileStore, SessionSummary};
use workout_tracker_rs::{
    ActivityType, Coordinate, LocationProvider, ScriptedProvider, SimulatedProvider,
    TrackerConfig, TrackerService,
};

#[derive(Parser, Debug)]
#[command(name = "workout_tracker")]
#[command(about = "GPS workout tracker - filtered route, distance, pace and splits", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C, or end of replay)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Activity type (running, cycling, walking, ...)
    #[arg(long, default_value = "running")]
    activity: String,

    /// User the session and lifetime stats belong to
    #[arg(long, default_value = "local")]
    user_id: String,

    /// Replay a recorded fix log (JSON array of samples, .gz allowed)
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Replay speed multiplier
    #[arg(long, default_value = "1.0")]
    speedup: f64,

    /// Tracker config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Discard the session instead of saving it
    #[arg(long)]
    discard: bool,

    /// Output directory
    #[arg(long, default_value = "workout_sessions")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    let activity: ActivityType = args.activity.parse().unwrap_or(ActivityType::Other);

    println!("[{}] Workout Tracker Starting", ts_now());
    println!("  Activity: {}", activity);
    println!("  Duration: {} seconds (0=until stopped)", args.duration);
    println!("  Source: {}", args.replay.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "simulated".to_string()));
    println!("  Output Dir: {}", args.output_dir.display());

    let store = Arc::new(
        JsonFileStore::new(&args.output_dir)
            .with_context(|| format!("creating {}", args.output_dir.display()))?,
    );

    match &args.replay {
        Some(path) => {
            let samples = replay::load_samples(path)
                .with_context(|| format!("loading {}", path.display()))?;
            let seed = samples.first().map(|s| s.coordinate);
            let provider = Arc::new(ScriptedProvider::new(seed));
            let service = Arc::new(TrackerService::new(provider.clone(), config, store.clone()));
            start(&service, &args, activity).await?;

            let feed = replay::replay_into(&provider, &samples, args.speedup);
            if args.duration > 0 {
                tokio::select! {
                    _ = feed => {}
                    _ = sleep(Duration::from_secs(args.duration)) => {}
                }
            } else {
                feed.await;
            }
            finish(&service, &args, &store).await
        }
        None => {
            let origin = Coordinate::new(47.3769, 8.5417);
            let provider = Arc::new(SimulatedProvider::for_activity(origin, activity));
            let service = Arc::new(TrackerService::new(provider, config, store.clone()));
            start(&service, &args, activity).await?;

            if args.duration > 0 {
                sleep(Duration::from_secs(args.duration)).await;
            } else {
                tokio::signal::ctrl_c().await?;
                println!();
            }
            finish(&service, &args, &store).await
        }
    }
}

async fn start<P: LocationProvider>(
    service: &Arc<TrackerService<P>>,
    args: &Args,
    activity: ActivityType,
) -> Result<()> {
    if !service.start(&args.user_id, activity).await? {
        anyhow::bail!("a session is already in progress");
    }

    // Live status line every 5 seconds of session time
    let mut updates = service.subscribe()?;
    let status_service = service.clone();
    tokio::spawn(async move {
        let mut last_printed = u64::MAX;
        while updates.changed().await.is_ok() {
            let Some(session) = updates.borrow_and_update().clone() else {
                break;
            };
            if !session.is_in_progress() {
                break;
            }
            if session.elapsed_seconds % 5 != 0 || session.elapsed_seconds == last_printed {
                continue;
            }
            last_printed = session.elapsed_seconds;
            println!(
                "[{}] {:>7.3} km | {} | {:>5.1} km/h | splits {} | {}",
                ts_now(),
                session.total_distance_km,
                format_hms(session.elapsed_seconds),
                session.current_speed_kmh.unwrap_or(0.0),
                session.splits.len(),
                status_service.signal_status()
            );
        }
    });

    Ok(())
}

async fn finish<P: LocationProvider>(
    service: &TrackerService<P>,
    args: &Args,
    store: &JsonFileStore,
) -> Result<()> {
    if args.discard {
        service.discard()?;
        println!("[{}] Session discarded", ts_now());
        return Ok(());
    }

    let Some(session) = service.stop()? else {
        println!("[{}] No session to save", ts_now());
        return Ok(());
    };

    let gpx_path = store.dir().join(format!("{}.gpx", session.id));
    std::fs::write(&gpx_path, GpxTrack::from_session(&session).to_gpx_xml())?;

    let summary = SessionSummary::from_session(&session);
    let stats = store.load_user_stats(&session.user_id)?;

    println!("\n=== Session {} ===", session.id);
    println!("Distance: {:.3} km", summary.distance_km);
    println!("Duration: {}", format_hms(summary.duration_seconds));
    println!("Avg speed: {:.1} km/h", summary.avg_speed_kmh);
    println!("Avg pace: {:.2} min/km", summary.avg_pace_min_per_km);
    for (i, split) in session.splits.iter().enumerate() {
        println!("  Split {}: {}", i + 1, format_hms(*split));
    }
    println!("Route points: {}", session.route_points.len());
    println!("GPX: {}", gpx_path.display());
    println!(
        "Lifetime ({}): {} workouts, {:.2} km, {}",
        session.user_id,
        stats.total_workouts,
        stats.total_distance_km,
        format_hms(stats.total_time_secs)
    );

    Ok(())
}

fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
