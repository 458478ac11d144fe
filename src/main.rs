use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use porthole::{EngineConfig, PortholeApp};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Porthole");

    let config = EngineConfig::load().unwrap_or_else(|e| {
        tracing::warn!("failed to load config, using defaults: {e}");
        EngineConfig::default()
    });

    let mut app = match PortholeApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("failed to initialize engine: {e}");
            return;
        }
    };

    app.connect_default().await;
    tracing::info!(
        "context {} ({})",
        app.current_context(),
        app.current_config_path()
    );

    let namespaces: Vec<String> = std::env::args().skip(1).collect();
    if namespaces.is_empty() {
        for namespace in app.list_namespaces().await {
            println!("{namespace}");
        }
        return;
    }

    for namespace in &namespaces {
        let endpoints = app.get_endpoints_json(namespace).await;
        println!("{endpoints}");
    }

    tracing::info!("tunnels stay open until Ctrl-C");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to wait for shutdown signal: {e}");
    }
    app.shutdown_all();
}
