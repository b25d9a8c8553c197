use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Unsupported file type: {filename} (expected png, jpg or jpeg)")]
    UnsupportedExtension { filename: String },

    #[error("Cannot decode image {filename}: {source}")]
    ImageDecode {
        filename: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Cannot open zip archive {filename}: {source}")]
    MalformedArchive {
        filename: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Invalid file in zip archive: {entry} (expected png, jpg or jpeg)")]
    InvalidArchiveEntry { entry: String },

    #[error("Missing multipart field: {field}")]
    MissingField { field: String },

    #[error("No files were uploaded")]
    NoFiles,

    #[error("Malformed multipart request: {message}")]
    Multipart { message: String },

    #[error("Inference failed: {message}")]
    Inference { message: String },

    #[error("Failed to load model weights: {message}")]
    ModelLoad { message: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("Server responded with {status}: {message}")]
    ServerResponse { status: u16, message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ServeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 使用者上傳的內容有問題
    Request,
    /// 模型或推論過程
    Model,
    Configuration,
    Network,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ServeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ServeError::UnsupportedExtension { .. }
            | ServeError::ImageDecode { .. }
            | ServeError::MalformedArchive { .. }
            | ServeError::InvalidArchiveEntry { .. }
            | ServeError::MissingField { .. }
            | ServeError::NoFiles
            | ServeError::Multipart { .. } => ErrorCategory::Request,
            ServeError::Inference { .. } | ServeError::ModelLoad { .. } => ErrorCategory::Model,
            ServeError::ConfigError { .. }
            | ServeError::ConfigValidationError { .. }
            | ServeError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            ServeError::ApiError(_) | ServeError::ServerResponse { .. } => ErrorCategory::Network,
            ServeError::CsvError(_)
            | ServeError::IoError(_)
            | ServeError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Request => ErrorSeverity::Low,
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::System => ErrorSeverity::High,
            ErrorCategory::Model | ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// HTTP status code for this error when it reaches a client.
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::Request => 400,
            ErrorCategory::Network => 502,
            _ => 500,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ServeError::ModelLoad { .. } => format!("The model could not be loaded: {}", self),
            ServeError::ConfigError { .. }
            | ServeError::ConfigValidationError { .. }
            | ServeError::InvalidConfigValueError { .. } => {
                format!("The configuration is invalid: {}", self)
            }
            ServeError::ApiError(e) if e.is_connect() => {
                "Cannot reach the prediction service".to_string()
            }
            _ => self.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ServeError::UnsupportedExtension { .. } | ServeError::InvalidArchiveEntry { .. } => {
                "Only upload png, jpg or jpeg images (optionally inside a zip archive)"
            }
            ServeError::ImageDecode { .. } => "Check that the file is a valid, non-truncated image",
            ServeError::MalformedArchive { .. } => "Re-create the zip archive and upload it again",
            ServeError::MissingField { .. } | ServeError::NoFiles | ServeError::Multipart { .. } => {
                "Send a multipart/form-data request with the expected file field"
            }
            ServeError::Inference { .. } => "Retry the request; check the server logs if it persists",
            ServeError::ModelLoad { .. } => {
                "Export the weights with torch.save(model.state_dict(), \"model_weights.pth\")"
            }
            ServeError::ApiError(_) => "Make sure the server is running and the URL is correct",
            ServeError::ServerResponse { .. } => "Check the uploaded file; the server rejected it",
            ServeError::CsvError(_) | ServeError::IoError(_) => {
                "Check file permissions and available disk space"
            }
            ServeError::SerializationError(_) => "The server returned an unexpected response body",
            ServeError::ConfigError { .. }
            | ServeError::ConfigValidationError { .. }
            | ServeError::InvalidConfigValueError { .. } => {
                "Fix the configuration file or command-line flags and restart"
            }
        }
    }
}
