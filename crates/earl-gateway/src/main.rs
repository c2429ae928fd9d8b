use std::sync::Arc;

use tracing::{error, info};

mod mcp_permission;
mod pipeline;
mod reaper;
mod restart_context;
mod runner;
mod session_directory;
mod shutdown;
mod update;

use runner::Runner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "earl_gateway=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if let Some(sub) = args.get(1) {
        return run_subcommand(sub, args.get(2).map(String::as_str)).await;
    }

    let config = earl_core::EarlConfig::from_env()?;
    info!(version = update::VERSION, git_sha = update::GIT_SHA, "earl-gateway starting");

    let runner = Arc::new(Runner::new(config).await?);

    restart_context::notify_if_pending(&runner).await;

    runner::install_signal_handlers(Arc::clone(&runner));

    runner.run().await;

    if runner.pending_update() {
        if let Err(e) = update::apply_update(true).await {
            error!(error = %e, "self-update failed");
        }
    } else if runner.pending_restart() {
        if let Err(e) = update::restart_service() {
            error!(error = %e, "restart failed");
        }
    }

    Ok(())
}

async fn run_subcommand(name: &str, arg: Option<&str>) -> anyhow::Result<()> {
    match name {
        "version" => {
            println!("earl-gateway {} ({})", update::VERSION, update::GIT_SHA);
            Ok(())
        }
        "check-update" => {
            update::check_and_print().await?;
            Ok(())
        }
        "update" => update::apply_update(arg == Some("--yes")).await,
        "rollback" => update::rollback(),
        "mcp-permission-prompt" => mcp_permission::run().await,
        other => {
            eprintln!("unknown subcommand: {other}");
            std::process::exit(2);
        }
    }
}
