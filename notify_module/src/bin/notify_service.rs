use std::sync::Arc;

use tokio::task;
use tracing::info;

use notify_module::gateway::MessagingGateway;
use notify_module::jobs::{AftercareJob, JobScheduler, RecallJob};
use notify_module::store::Stores;
use notify_module::{run_server, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env()?;

    let db_url = config.database_url.clone();
    let stores = task::spawn_blocking(move || Stores::postgres(&db_url))
        .await
        .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { err.into() })??;
    let gateway = Arc::new(MessagingGateway::new(&config.channel_api_base_url));

    let mut scheduler = JobScheduler::new(config.job_poll_interval);
    scheduler.register(
        config.aftercare_cron.clone(),
        Arc::new(AftercareJob::new(stores.clone(), gateway.clone())),
    );
    scheduler.register(
        config.recall_cron.clone(),
        Arc::new(RecallJob::with_limits(
            stores.clone(),
            gateway.clone(),
            config.recall_dormant_days,
            config.recall_batch_limit,
        )),
    );
    let mut job_control = scheduler.start();

    let serve_result = run_server(config, stores, gateway, shutdown_signal()).await;
    info!("shutting down job scheduler");
    job_control.stop_and_join();
    serve_result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
