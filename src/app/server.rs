use crate::adapters::http::{self, router};
use crate::adapters::storage::LocalStorage;
use crate::core::network::{DigitModel, DigitNet, InferenceBackend};
use crate::core::predictor::DigitPredictor;
use crate::core::unpack::ArchiveLimits;
use crate::core::weights::WeightSource;
use crate::domain::ports::{ConfigProvider, PredictionService};
use crate::utils::error::{Result, ServeError};
use crate::utils::monitor::ResourceMonitor;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Loads the model once, then serves predictions until shutdown.
pub struct DigitServer<C: ConfigProvider> {
    config: C,
}

impl<C: ConfigProvider> DigitServer<C> {
    pub fn new(config: C) -> Self {
        Self { config }
    }

    /// Read the weight file and build the shared prediction service.
    pub async fn load_service(&self) -> Result<Arc<dyn PredictionService>> {
        let started = Instant::now();
        let storage = LocalStorage::new(".");
        let source = WeightSource::open(&storage, self.config.weights_path()).await?;

        // 讀檔與複製參數都是阻塞操作
        let (model, summary) = tokio::task::spawn_blocking(move || {
            let device = Default::default();
            let mut net = DigitNet::<InferenceBackend>::new(&device);
            let summary = source.apply_to(&mut net)?;
            Ok::<_, ServeError>((DigitModel::new(net, device), summary))
        })
        .await
        .map_err(|e| ServeError::ModelLoad {
            message: format!("weight loading task failed: {}", e),
        })??;

        tracing::info!(
            "✅ Loaded {} tensors from {} in {:?}",
            summary.applied,
            self.config.weights_path(),
            started.elapsed()
        );
        if !summary.unused.is_empty() {
            tracing::warn!(
                "{} tensors in {} are not used by the network",
                summary.unused.len(),
                self.config.weights_path()
            );
        }

        let monitor_enabled = self.config.monitor_enabled();
        if monitor_enabled {
            ResourceMonitor::new(true).log_stats("Model load");
        }

        let predictor = DigitPredictor::new_with_monitoring(Arc::new(model), monitor_enabled)
            .with_archive_limits(ArchiveLimits::for_body_limit(self.config.body_limit_bytes()));
        Ok(Arc::new(predictor))
    }

    /// Load the model, bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = self.load_service().await?;
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        tracing::info!("🚀 Listening on http://{}", listener.local_addr()?);

        http::serve(
            listener,
            router(service, self.config.body_limit_bytes()),
            shutdown,
        )
        .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_missing_weight_file_fails_startup() {
        let config = ServerConfig {
            weights_path: "/nonexistent/model_weights.pth".to_string(),
            ..ServerConfig::default()
        };

        let err = match DigitServer::new(config).run(std::future::ready(())).await {
            Err(e) => e,
            Ok(()) => panic!("server started without weights"),
        };

        assert!(matches!(err, ServeError::ModelLoad { ref message } if message.contains("model_weights")));
    }

    #[tokio::test]
    async fn test_garbage_weight_file_fails_startup() {
        for suffix in [".pth", ".safetensors"] {
            let file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
            std::fs::write(file.path(), b"not a weight file").unwrap();
            let config = ServerConfig {
                weights_path: file.path().to_str().unwrap().to_string(),
                ..ServerConfig::default()
            };

            let result = DigitServer::new(config).load_service().await;

            assert!(matches!(result, Err(ServeError::ModelLoad { .. })), "{suffix}");
        }
    }

    #[tokio::test]
    async fn test_unknown_weight_extension_fails_startup() {
        let config = ServerConfig {
            weights_path: "model_weights.bin".to_string(),
            ..ServerConfig::default()
        };

        let err = match DigitServer::new(config).load_service().await {
            Err(e) => e,
            Ok(_) => panic!("loaded weights with an unknown extension"),
        };

        assert!(err.to_string().contains(".pth"));
    }
}
