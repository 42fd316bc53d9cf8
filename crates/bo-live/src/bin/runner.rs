use std::sync::Arc;

use anyhow::Context;
use bo_live::{
    driver, DriverConfig, DriverExit, LiveBounds, PvEvaluator, RunnerConfig, SimulatedPvClient,
    SyntheticObjective,
};
use bo_optimizer::{BoundsProvider, CenteredBounds, DefaultBounds, ObjectiveEvaluator, OptimizationLoop};
use bo_types::LoopEvent;
use crossbeam_channel::bounded;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = RunnerConfig::load().context("failed to load runner configuration")?;
    let seed = config.optimization.seed;

    // Events go to stdout as JSON lines; logs stay on stderr.
    let (tx, rx) = bounded::<LoopEvent>(1024);
    let printer = std::thread::spawn(move || {
        for event in rx {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("failed to serialize event: {e}"),
            }
        }
    });

    let fallback = SyntheticObjective::new(config.noise_std, seed.map(|s| s.wrapping_add(1)));
    let (evaluator, mut bounds_provider): (Box<dyn ObjectiveEvaluator>, Box<dyn BoundsProvider>) =
        if config.is_mock() {
            warn!("input or objective PV not configured, evaluating the synthetic objective directly");
            (
                Box::new(SyntheticObjective::new(config.noise_std, seed)),
                Box::new(DefaultBounds),
            )
        } else {
            warn!(
                input_pv = %config.input_pv,
                objective_pv = %config.objective_pv,
                "no channel-access client is available, driving an in-process simulated device"
            );
            let device = Arc::new(SimulatedPvClient::new(
                &config.input_pv,
                &config.objective_pv,
                config.initial_input,
                SyntheticObjective::new(config.noise_std, seed),
            ));
            (
                Box::new(PvEvaluator::new(
                    device.clone(),
                    &config.input_pv,
                    &config.objective_pv,
                    config.wait_time(),
                )
                .with_read_timeout(config.read_timeout())),
                Box::new(LiveBounds::new(device, &config.input_pv, config.range_percentage)),
            )
        };

    let mut bo = OptimizationLoop::new(evaluator, fallback, tx);
    let driver_config = DriverConfig {
        tick: config.tick(),
        max_consecutive_failures: config.max_consecutive_failures,
    };

    for run_index in 0..=config.follow_up_runs {
        let run_id = tokio::task::block_in_place(|| {
            bo.start(config.optimization.clone(), bounds_provider.as_ref())
        })
        .context("failed to start optimization run")?;

        let exit = driver::run(&mut bo, driver_config, shutdown_signal()).await?;
        let Some(summary) = bo.last_summary() else {
            break;
        };
        info!(
            %run_id,
            run = run_index + 1,
            ?exit,
            best_x = summary.best_observed.x,
            best_y = summary.best_observed.y,
            predicted_x = summary.best_predicted.x,
            predicted_y = summary.best_predicted.y,
            "run finished"
        );

        if exit != DriverExit::Converged {
            break;
        }
        bounds_provider = Box::new(
            CenteredBounds::new(summary.best_observed.x).with_half_width(config.recenter_half_width),
        );
    }

    drop(bo);
    printer
        .join()
        .map_err(|_| anyhow::anyhow!("event printer thread panicked"))?;
    Ok(())
}
