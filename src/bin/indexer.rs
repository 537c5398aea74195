use dotenvy::dotenv;
use std::sync::atomic::Ordering;

use phantasma_indexer::config::Config;
use phantasma_indexer::db;
use phantasma_indexer::phantasma_client::PhantasmaClient;
use phantasma_indexer::retry::RetryingRpc;
use phantasma_indexer::store::PgStore;
use phantasma_indexer::synchronizer::Synchronizer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv().ok();
    let config = Config::from_env()?;

    let mut migration_conn = db::migration_connection(&config.database_url)?;
    db::run_migrations(&mut migration_conn)?;

    let pool = db::initialize_db_pool(&config.database_url)?;
    let store = PgStore::new(pool);
    let rpc = RetryingRpc::new(PhantasmaClient::new(&config.rpc_url)?, config.retry.clone());

    let synchronizer = Synchronizer::new(&rpc, &store, config.sync.clone());
    let cancelled = synchronizer.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the block being committed");
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    log::info!("Starting phantasma synchronization from {}...", config.rpc_url);

    let report = synchronizer.synchronize().await?;
    for (stage, outcome) in &report.stages {
        log::info!("Stage {}: {:?}", stage, outcome);
    }
    for walk in report.walks.iter().filter(|walk| !walk.report.is_clean()) {
        log::warn!(
            "Chain {} needs attention: gaps {:?}, broken links {:?}",
            walk.chain_address,
            walk.report.gaps,
            walk.report.broken_links
        );
    }

    log::info!("Done");

    Ok(())
}
