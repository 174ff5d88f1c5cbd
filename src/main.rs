use log::{error, info, warn};
use searchbox::api::{self, AppServices};
use searchbox::config::Config;
use searchbox::service::{DocumentService, IndexService};
use searchbox::storage::Store;
use std::sync::Arc;
use warp::Filter;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    if config.api_key.is_none() {
        warn!("API_KEY is not set; requests are not authenticated");
    }

    let store = match Store::open(&config.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open store at {}: {e}", config.data_dir.display());
            std::process::exit(1);
        }
    };

    let app = AppServices {
        indexes: IndexService::new(store.clone(), store.clone()),
        docs: DocumentService::new(store.clone(), store),
    };
    let routes = api::routes(app, config.api_key.clone());
    let routes = api::accepts_gzip()
        .and(routes.clone())
        .with(warp::compression::gzip())
        .or(routes);

    info!("Server running on port {}", config.port);
    warp::serve(routes).run(([0, 0, 0, 0], config.port)).await;
}
