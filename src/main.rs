//! API server: accepts generation requests and dispatches them to workers

use gen_dispatch::{
    api, channel,
    config::Settings,
    dispatch::{DispatchPolicy, Dispatcher},
    logging, worker, AppState,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    logging::init(&settings.logging);

    info!("Starting gen-dispatch API");

    let channel = channel::from_config(&settings.broker)?;
    // A broker that is down at startup is not fatal; every dispatch reconnects
    if let Err(e) = channel.connect().await {
        warn!(error = %e, "Message broker unavailable at startup");
    }

    if settings.broker.kind == "memory" {
        let executor = Arc::new(worker::from_settings(&settings)?);
        worker::start(&channel, executor, &settings.broker.queue).await?;
        info!("Running in-process worker on the in-memory channel");
    }

    let dispatcher = Arc::new(Dispatcher::with_queue(
        channel.clone(),
        settings.broker.queue.clone(),
        DispatchPolicy::from(&settings.dispatch),
    ));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState {
        settings: Arc::new(settings),
        channel: channel.clone(),
        dispatcher,
    });

    let app = api::routes::create_router(app_state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    channel.close().await;
    info!("Server stopped");
    Ok(())
}
