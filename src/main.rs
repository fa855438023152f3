use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use retina_serve::fetch::fetch_model;
use retina_serve::{
    load_class_mapping, router, AppState, Args, Command, FetchArgs, InspectArgs, LabelTable,
    ModelError, ModelSlot, OnnxModel, ServeArgs,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve(args) => serve(args).await,
        Command::Fetch(args) => fetch(args).await,
        Command::Inspect(args) => inspect(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let labels = match &args.labels {
        Some(path) => load_class_mapping(path)?,
        None => LabelTable::retinopathy(),
    };
    let slot = ModelSlot::new(Arc::new(OnnxModel::new(args.cuda)), &args.model, labels);

    if args.preload {
        match slot.ensure_loaded().await {
            Ok(_) => {}
            Err(err @ (ModelError::Configuration(_) | ModelError::UnsupportedInput(_))) => {
                return Err(err).context("refusing to serve a misconfigured model");
            }
            Err(err) => warn!(error = %err, "preload failed, will retry on first request"),
        }
    }

    let state = Arc::new(AppState::new(slot, args.service_name, args.scores));
    let app = router(state, args.max_upload_bytes);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Starting server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn fetch(args: FetchArgs) -> Result<()> {
    let outcome =
        tokio::task::spawn_blocking(move || fetch_model(&args.url, &args.model, args.force)).await??;
    info!(?outcome, "fetch finished");
    Ok(())
}

async fn inspect(args: InspectArgs) -> Result<()> {
    let model = tokio::task::spawn_blocking(move || OnnxModel::new(args.cuda).load_model(&args.model))
        .await??;
    model.summary();
    Ok(())
}
