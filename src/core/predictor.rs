use crate::core::preprocess::image_to_tensor;
use crate::core::unpack::{expand_uploads, validate_image_upload, ArchiveLimits};
use crate::domain::model::{Digit, ImageEntry, PredictionResult, UploadedFile};
use crate::domain::ports::{Classifier, PredictionService};
use crate::utils::error::{Result, ServeError};
use crate::utils::monitor::ResourceMonitor;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Runs uploads through preprocessing and a shared classifier.
///
/// Inference is CPU-bound and runs on tokio's blocking pool, one request at a
/// time per call; there is no batching across requests.
#[derive(Clone)]
pub struct DigitPredictor {
    classifier: Arc<dyn Classifier>,
    monitor: Arc<ResourceMonitor>,
    archive_limits: ArchiveLimits,
}

impl DigitPredictor {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self::new_with_monitoring(classifier, false)
    }

    pub fn new_with_monitoring(classifier: Arc<dyn Classifier>, monitor_enabled: bool) -> Self {
        Self {
            classifier,
            monitor: Arc::new(ResourceMonitor::new(monitor_enabled)),
            archive_limits: ArchiveLimits::default(),
        }
    }

    pub fn with_archive_limits(mut self, archive_limits: ArchiveLimits) -> Self {
        self.archive_limits = archive_limits;
        self
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Classifier) -> Result<T> + Send + 'static,
    {
        let classifier = Arc::clone(&self.classifier);
        tokio::task::spawn_blocking(move || job(classifier.as_ref()))
            .await
            .map_err(|e| ServeError::Inference {
                message: format!("inference task failed: {}", e),
            })?
    }
}

/// Decode and classify every entry; stops at the first failure.
fn classify_entries(classifier: &dyn Classifier, entries: Vec<ImageEntry>) -> Result<PredictionResult> {
    let mut predictions = PredictionResult::new();
    for entry in entries {
        let input = image_to_tensor(&entry.key, &entry.bytes)?;
        let digit = classifier.classify(&input)?;
        tracing::debug!("{} -> {}", entry.key, digit);
        predictions.insert(entry.key, digit);
    }
    Ok(predictions)
}

#[async_trait]
impl PredictionService for DigitPredictor {
    async fn predict_one(&self, file: UploadedFile) -> Result<Digit> {
        let entry = validate_image_upload(file)?;
        let started = Instant::now();

        let key = entry.key.clone();
        let digit = self
            .run_blocking(move |classifier| {
                let input = image_to_tensor(&entry.key, &entry.bytes)?;
                classifier.classify(&input)
            })
            .await?;

        tracing::info!("Predicted {} -> {} in {:?}", key, digit, started.elapsed());
        Ok(digit)
    }

    async fn predict_batch(&self, files: Vec<UploadedFile>) -> Result<PredictionResult> {
        let uploads = files.len();
        // 先驗證並展開全部檔案，再開始推論
        let entries = expand_uploads(files, self.archive_limits)?;
        let images = entries.len();
        let started = Instant::now();

        let predictions = self
            .run_blocking(move |classifier| classify_entries(classifier, entries))
            .await?;

        tracing::info!(
            "Batch of {} uploads ({} images) predicted in {:?}",
            uploads,
            images,
            started.elapsed()
        );
        self.monitor.log_stats("Batch prediction");
        Ok(predictions)
    }
}
