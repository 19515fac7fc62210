use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetmig_core::{
    Branch, BranchDirectory, BranchStateStore, ConnectionDescriptor, InMemoryDirectory,
    Orchestrator, OrchestratorConfig, SqliteConnector,
};
use fleetmig_server::{
    config::{Args, ServerConfig},
    create_router, fleet, migrations,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fleetmig_server={log_filter},fleetmig_core={log_filter},tower_http=info")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: ServerConfig = args.into();
    let listen_addr = config.listen_addr();

    // Durable orchestration state
    let db = sled::open(&config.data_dir)?;
    let store = Arc::new(BranchStateStore::open(&db)?);

    // Branch registry and orchestrator
    let directory = Arc::new(InMemoryDirectory::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(migrations::catalog()?),
        store,
        Arc::new(SqliteConnector),
        Arc::clone(&directory) as Arc<dyn BranchDirectory>,
        OrchestratorConfig::default(),
    ));

    if let Some(path) = &config.fleet {
        let fleet = fleet::load(path)?;
        for entry in fleet.branches {
            let code = entry.code.clone();
            directory.insert(Branch::new(
                entry.code,
                entry.provider,
                ConnectionDescriptor::new(entry.connection),
            )?);
            let state = orchestrator.register_branch(&code)?;
            tracing::info!(branch = %code, status = %state.status, "branch registered");
        }
    }

    // Periodic scheduler pass: picks up failed branches once their backoff
    // elapses and newly registered branches.
    if let Some(interval) = config.pass_interval {
        let scheduler = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let orchestrator = Arc::clone(&scheduler);
                match tokio::task::spawn_blocking(move || orchestrator.run_pass()).await {
                    Ok(reports) if !reports.is_empty() => {
                        tracing::info!(branches = reports.len(), "scheduler pass completed");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "scheduler pass failed"),
                }
            }
        });
    }

    let state = AppState::new(orchestrator);
    let app = create_router(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!("fleetmig server listening on {listen_addr}");
    tracing::info!("fleet overview at http://{listen_addr}/branches");

    axum::serve(listener, app).await?;

    Ok(())
}
