use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A predicted digit class, always in `0..=9`.
pub type Digit = u8;

/// Number of digit classes the classifier scores.
pub const NUM_CLASSES: usize = 10;

/// Image extensions accepted by the prediction endpoints.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// One uploaded multipart file. Lives only for the duration of a request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// An image that passed extension validation and waits for decoding.
/// `key` is the name it will be reported under.
#[derive(Debug, Clone)]
pub struct ImageEntry {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// filename → predicted digit, sorted by filename.
pub type PredictionResult = BTreeMap<String, Digit>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: Digit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    pub predictions: PredictionResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
