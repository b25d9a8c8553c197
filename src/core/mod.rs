pub mod network;
pub mod predictor;
pub mod preprocess;
pub mod unpack;
pub mod weights;

pub use crate::domain::model::{Digit, ImageEntry, PredictionResult, UploadedFile};
pub use crate::domain::ports::{Classifier, ConfigProvider, PredictionService, Storage};
pub use crate::utils::error::Result;
