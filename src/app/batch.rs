use crate::adapters::client::PredictClient;
use crate::domain::model::Digit;
use crate::utils::error::{Result, ServeError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One request's outcome. `prediction` is empty when the request failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub filename: String,
    pub prediction: Option<Digit>,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub rows: Vec<BatchRow>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.rows.iter().filter(|r| r.prediction.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.succeeded()
    }

    /// Write `filename,prediction` rows, sorted by filename.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut rows: Vec<&BatchRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.filename.cmp(&b.filename));

        let mut writer = csv::Writer::from_path(path)?;
        if rows.is_empty() {
            writer.write_record(["filename", "prediction"])?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Sends every file of a directory to `/predict` with bounded concurrency.
pub struct BatchRunner {
    client: PredictClient,
    concurrency: usize,
    iterations: usize,
}

impl BatchRunner {
    pub fn new(client: PredictClient, concurrency: usize, iterations: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            iterations: iterations.max(1),
        }
    }

    pub async fn run<P: AsRef<Path>>(&self, image_dir: P) -> Result<BatchReport> {
        let files = list_files(image_dir.as_ref())?;
        tracing::info!(
            "Sending {} files x {} iterations to {} ({} concurrent)",
            files.len(),
            self.iterations,
            self.client.endpoint(),
            self.concurrency
        );

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for _ in 0..self.iterations {
            for path in &files {
                let semaphore = Arc::clone(&semaphore);
                let client = self.client.clone();
                let path = path.clone();
                tasks.spawn(async move {
                    // 限制同時進行的請求數
                    let _permit = semaphore.acquire_owned().await.ok();
                    send_one(&client, &path).await
                });
            }
        }

        let mut rows = Vec::with_capacity(files.len() * self.iterations);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(row) => rows.push(row),
                Err(e) => tracing::error!("❌ Request task failed: {}", e),
            }
        }

        let report = BatchReport {
            rows,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "Batch finished: {} succeeded, {} failed in {:.2?}",
            report.succeeded(),
            report.failed(),
            report.elapsed
        );
        Ok(report)
    }
}

async fn send_one(client: &PredictClient, path: &Path) -> BatchRow {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let started = Instant::now();

    let result = match tokio::fs::read(path).await {
        Ok(bytes) => client.predict(&filename, bytes).await,
        Err(e) => Err(ServeError::IoError(e)),
    };
    let elapsed = started.elapsed();

    let prediction = match result {
        Ok(digit) => {
            tracing::info!("{} -> {} ({:.3?})", filename, digit, elapsed);
            Some(digit)
        }
        Err(e) => {
            tracing::warn!("{} -> failed: {} ({:.3?})", filename, e, elapsed);
            None
        }
    };

    BatchRow {
        filename,
        prediction,
        elapsed,
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
