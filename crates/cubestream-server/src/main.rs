#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::{
    config::{CliArgs, ServerConfig},
    lifecycle::{
        interrupt::SignalInterrupt,
        supervisor::{Supervisor, SupervisorState},
    },
    runner::ServerRunner,
    service::store::DirectoryStore,
    telemetry::init_telemetry,
};
use std::{process::ExitCode, sync::Arc};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let providers = match init_telemetry() {
        Ok(providers) => providers,
        Err(err) => {
            eprintln!("Failed to initialize telemetry: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(state) => {
            tracing::info!(?state, "Service shut down successfully");
            providers.shutdown();
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("Service exited with an error: {err:#}");
            providers.shutdown();
            // The runner may still own tasks that ignored cancellation. Do not
            // wait for the runtime to wind them down.
            std::process::exit(1);
        }
    }
}

async fn run(args: CliArgs) -> anyhow::Result<SupervisorState> {
    let config = ServerConfig::try_from(args)?;
    let interrupts = SignalInterrupt::install()?;

    let store = Arc::new(DirectoryStore::new(config.data_dir.clone()));
    let supervisor = Supervisor::new(config.grace_period);
    let runner = ServerRunner::new(config, store);

    Ok(supervisor.run(runner, interrupts).await?)
}
