use crate::core::preprocess::InputTensor;
use crate::domain::model::{Digit, PredictionResult, UploadedFile};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// Where `path` lives on disk, for readers that need a seekable file.
    fn local_path(&self, path: &str) -> PathBuf;
}

pub trait ConfigProvider: Send + Sync {
    fn bind_address(&self) -> String;
    fn weights_path(&self) -> &str;
    fn body_limit_bytes(&self) -> usize;
    fn monitor_enabled(&self) -> bool;
}

/// A loaded model that maps a preprocessed image to a digit.
/// Implementations are immutable after construction and shared across requests.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &InputTensor) -> Result<Digit>;
}

#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict_one(&self, file: UploadedFile) -> Result<Digit>;
    async fn predict_batch(&self, files: Vec<UploadedFile>) -> Result<PredictionResult>;
}
