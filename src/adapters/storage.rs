use crate::core::Storage;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.local_path(path)).await?;
        Ok(data)
    }

    fn local_path(&self, path: &str) -> PathBuf {
        // 絕對路徑會直接取代 base_path
        Path::new(&self.base_path).join(path)
    }
}
