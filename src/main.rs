use clap::CommandFactory;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rally_cut::backend::{self, ExecutionPlan};
use rally_cut::cli::{CliArgs, parse_cli};
use rally_cut::settings::resolve_settings;
use rally_cut::{Configuration, RallyCutError, stop_channel};

fn init_tracing() {
    let use_json = std::env::var("RALLYCUT_LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rally_cut=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), RallyCutError> {
    init_tracing();
    let (cli, sources) = parse_cli();

    if cli.list_backends {
        backend::display_available_backends();
        return Ok(());
    }

    let settings = resolve_settings(&cli, &sources)?;
    let input = match cli.input.clone() {
        Some(path) => path,
        None => match Configuration::from_env()?.input {
            Some(path) => path,
            None => {
                CliArgs::command()
                    .print_help()
                    .map_err(|err| RallyCutError::io("stdout", err))?;
                return Ok(());
            }
        },
    };

    let (stop_handle, stop) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight frames");
            stop_handle.request_stop();
        }
    });

    let plan = ExecutionPlan::from_settings(&settings, &input, stop)?;
    let summary = backend::run(plan).await?;

    match &summary.report {
        Some(report) => {
            for record in report.selected() {
                println!(
                    "rally {:>3}: frames {}..{} ({} arcs)",
                    record.original_index,
                    record.start,
                    record.stop,
                    record.rally.arc_count()
                );
            }
            info!(
                analysed = summary.analysed,
                rallies = report.rallies.len(),
                "done"
            );
        }
        None => info!(
            processed = summary.balls.table.processed_count(),
            total = summary.balls.total_frames,
            "stopped before rally extraction"
        ),
    }
    Ok(())
}
