use crate::adapters::http::SINGLE_FILE_FIELD;
use crate::domain::model::{Digit, ErrorResponse, PredictionResponse};
use crate::utils::error::{Result, ServeError};
use crate::utils::validation::file_extension;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;

/// Thin client for `POST /predict`.
#[derive(Debug, Clone)]
pub struct PredictClient {
    client: Client,
    endpoint: String,
}

impl PredictClient {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn predict(&self, filename: &str, bytes: Vec<u8>) -> Result<Digit> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_for(filename))?;
        let form = Form::new().part(SINGLE_FILE_FIELD, part);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // 伺服器錯誤格式不一定是 JSON
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ServeError::ServerResponse {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: PredictionResponse = serde_json::from_str(&body)?;
        Ok(parsed.prediction)
    }
}

fn mime_for(filename: &str) -> &'static str {
    match file_extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_mime_guess() {
        assert_eq!(mime_for("a.PNG"), "image/png");
        assert_eq!(mime_for("b.jpeg"), "image/jpeg");
        assert_eq!(mime_for("c"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_predict_parses_prediction() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/predict").body_contains("seven.png");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"prediction": 7}"#);
        });

        let client = PredictClient::new(server.url("/predict"), 5).unwrap();
        let digit = client.predict("seven.png", vec![1, 2, 3]).await.unwrap();

        mock.assert();
        assert_eq!(digit, 7);
    }

    #[tokio::test]
    async fn test_error_body_becomes_server_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/predict");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"error": "Unsupported file type: notes.txt"}"#);
        });

        let client = PredictClient::new(server.url("/predict"), 5).unwrap();
        let err = client.predict("notes.txt", b"x".to_vec()).await.unwrap_err();

        match err {
            ServeError::ServerResponse { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("notes.txt"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
