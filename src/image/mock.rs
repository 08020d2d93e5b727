use super::CompressionService;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Pass-through compressor with scripted failures keyed by file name.
#[derive(Clone)]
pub struct MockCompressor {
    hard_limit: u64,
    critical: Arc<Mutex<HashSet<String>>>,
    unreadable: Arc<Mutex<HashSet<String>>>,
    compress_count: Arc<Mutex<usize>>,
}

impl MockCompressor {
    pub fn new() -> Self {
        Self {
            hard_limit: u64::MAX,
            critical: Arc::new(Mutex::new(HashSet::new())),
            unreadable: Arc::new(Mutex::new(HashSet::new())),
            compress_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_hard_limit(mut self, hard_limit: u64) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    /// Files with this name cannot be brought under the limit.
    pub fn with_critical_failure(self, file_name: &str) -> Self {
        self.critical.lock().unwrap().insert(file_name.to_string());
        self
    }

    /// Files with this name cannot be decoded.
    pub fn with_unreadable(self, file_name: &str) -> Self {
        self.unreadable.lock().unwrap().insert(file_name.to_string());
        self
    }

    pub fn get_compress_count(&self) -> usize {
        *self.compress_count.lock().unwrap()
    }
}

impl Default for MockCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl CompressionService for MockCompressor {
    async fn ensure_under_limit(&self, path: &Path) -> Result<PathBuf> {
        *self.compress_count.lock().unwrap() += 1;

        let name = file_name(path);
        if self.unreadable.lock().unwrap().contains(&name) {
            return Err(Error::compression(path, "Mock decode failure"));
        }
        if self.critical.lock().unwrap().contains(&name) {
            return Err(Error::CriticalCompression {
                path: path.to_path_buf(),
                size: self.hard_limit.saturating_add(1),
                limit: self.hard_limit,
            });
        }
        Ok(path.to_path_buf())
    }

    fn validate_under_limit(&self, path: &Path) -> Result<u64> {
        let size = std::fs::metadata(path)
            .map_err(|e| Error::compression(path, e))?
            .len();
        if size > self.hard_limit {
            return Err(Error::CriticalCompression {
                path: path.to_path_buf(),
                size,
                limit: self.hard_limit,
            });
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_passes_paths_through() {
        let compressor = MockCompressor::new();
        let path = PathBuf::from("/tmp/hero.jpg");

        let result = compressor.ensure_under_limit(&path).await.unwrap();
        assert_eq!(result, path);
        assert_eq!(compressor.get_compress_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_failures() {
        let compressor = MockCompressor::new()
            .with_critical_failure("poster.png")
            .with_unreadable("corrupt.png");

        let err = compressor
            .ensure_under_limit(Path::new("/x/poster.png"))
            .await
            .unwrap_err();
        assert!(err.is_critical());

        let err = compressor
            .ensure_under_limit(Path::new("/x/corrupt.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compression { .. }));
        assert_eq!(compressor.get_compress_count(), 2);
    }

    #[test]
    fn test_mock_validate_uses_real_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        assert_eq!(MockCompressor::new().validate_under_limit(&path).unwrap(), 100);
        assert!(MockCompressor::new()
            .with_hard_limit(50)
            .validate_under_limit(&path)
            .unwrap_err()
            .is_critical());
    }
}
