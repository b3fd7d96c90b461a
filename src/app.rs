use crate::{
    classifier::OrtClassifier,
    config::{Config, ModelConfig},
    server::HttpServer,
    state::{ModelSlot, PredictionCell},
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model: Arc<ModelSlot> = Arc::new(ModelSlot::new());
    let predictions: Arc<PredictionCell> = Arc::new(PredictionCell::new());

    spawn_model_loader(model.clone(), config.model.clone());

    let server = HttpServer::new(model, predictions, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();
    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

/// Loads the model off the accept path and resolves the slot exactly once.
/// A load failure leaves the service up with classification disabled; the
/// failure reason is surfaced to callers through the slot.
fn spawn_model_loader(model: Arc<ModelSlot>, model_config: ModelConfig) {
    tokio::spawn(async move {
        let loaded =
            tokio::task::spawn_blocking(move || OrtClassifier::new(&model_config)).await;

        match loaded {
            Ok(Ok(classifier)) => {
                tracing::info!("Model loaded, classification enabled");
                model.publish(Arc::new(classifier));
            }
            Ok(Err(e)) => {
                tracing::error!("Error while loading model: {}", e);
                model.fail(e.to_string());
            }
            Err(e) => {
                tracing::error!("Model loader task failed: {}", e);
                model.fail(format!("loader task failed: {}", e));
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
