mod world;

use std::time::Duration;

use clap::Parser;
use glam::Vec3;
use tokio::time::MissedTickBehavior;

use tandem::{ActionId, PlayerAction, Session, SessionConfig, StateId};
use world::{DemoAction, DemoWorld};

#[derive(Parser)]
#[command(name = "tandem-client")]
#[command(about = "Demo client that predicts a shared world against a tandem relay")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27016",
        help = "Relay address to sync with"
    )]
    server: String,

    #[arg(long, default_value_t = 20, help = "Prediction ticks per second")]
    prediction_rate: u32,

    #[arg(long, default_value_t = 100, help = "Clock probes per second")]
    probe_rate: u32,

    #[arg(
        long,
        default_value_t = 2.0,
        value_parser = parse_rate,
        help = "Local actions per second"
    )]
    action_rate: f32,

    #[arg(
        short,
        long,
        value_parser = parse_seconds,
        help = "Stop after this many seconds"
    )]
    duration: Option<f32>,
}

fn parse_rate(value: &str) -> Result<f32, String> {
    let rate: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(format!("rate must be a positive number, got {}", value))
    }
}

fn parse_seconds(value: &str) -> Result<f32, String> {
    let secs: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(format!("duration must be a non-negative number, got {}", value))
    }
}

/// Time between local actions. Never zero, since `interval` rejects that.
fn action_period(rate: f32) -> Duration {
    Duration::try_from_secs_f32(1.0 / rate.max(0.1))
        .unwrap_or(Duration::MAX)
        .max(Duration::from_millis(1))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = SessionConfig {
        prediction_rate: args.prediction_rate,
        probe_rate: args.probe_rate,
        ..Default::default()
    };

    let player = StateId::generate().0 as u64;
    let session = Session::connect(
        args.server.as_str(),
        config,
        DemoWorld::default(),
        world::advance,
    )
    .await?;
    log::info!(
        "Playing as {:016x} from {} against {}",
        player,
        session.local_addr(),
        args.server
    );

    let stats = session.stats();
    let mut actions = tokio::time::interval(action_period(args.action_rate));
    actions.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = async {
        match args.duration {
            Some(secs) => {
                let duration = Duration::try_from_secs_f32(secs).unwrap_or(Duration::MAX);
                tokio::time::sleep(duration).await
            }
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut next_action_id = 1u64;
    let mut heading = 0.0f32;

    loop {
        tokio::select! {
            _ = actions.tick() => {
                heading += 0.7;
                let thrust = Vec3::new(heading.cos(), 0.0, heading.sin());
                let action = PlayerAction::new(
                    ActionId(next_action_id),
                    DemoAction::thrust(player, thrust),
                );
                session.add_player_action(action)?;
                next_action_id += 1;
            }
            _ = report.tick() => {
                let s = stats.borrow().clone();
                log::info!(
                    "offset {:.1} ms, rtt {:.1} ms (±{:.1}), {} ticks, {} confirmed, {} resyncs, {} unverified, {} peers",
                    s.offset_ms,
                    s.srtt_ms,
                    s.rtt_variance_ms,
                    s.ticks,
                    s.confirmations,
                    s.supersessions,
                    s.unverified_updates,
                    s.roster_size
                );
            }
            _ = &mut deadline => {
                log::info!("Duration elapsed");
                break;
            }
            result = &mut ctrl_c => {
                result?;
                break;
            }
        }
    }

    session.shutdown().await;
    log::info!("Client shutting down");
    Ok(())
}
