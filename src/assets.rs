//! Resource loading for manifests and model weights
//!
//! Locators are opaque strings from the manifest. The file loader resolves
//! them against an asset root; web-style absolute paths (`/models/x.onnx`)
//! are treated as root-relative.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

/// Asynchronous byte source
pub trait AssetLoader: Send + Sync {
    fn fetch(&self, locator: &str) -> BoxFuture<'static, io::Result<Vec<u8>>>;
}

/// Loads assets from the local filesystem
#[derive(Debug, Clone)]
pub struct FileAssetLoader {
    root: PathBuf,
}

impl FileAssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path under the asset root
    pub fn resolve(&self, locator: &str) -> PathBuf {
        let trimmed = locator.trim_start_matches('/');
        self.root.join(trimmed)
    }
}

impl AssetLoader for FileAssetLoader {
    fn fetch(&self, locator: &str) -> BoxFuture<'static, io::Result<Vec<u8>>> {
        let path = self.resolve(locator);
        async move {
            tracing::debug!(path = %path.display(), "Reading asset");
            tokio::fs::read(&path).await
        }
        .boxed()
    }
}

/// Fixed in-memory asset table (embedded models, tests)
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssets {
    entries: HashMap<String, Arc<[u8]>>,
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(locator, bytes);
        self
    }

    pub fn insert(&mut self, locator: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(locator.into(), Arc::from(bytes.into()));
    }
}

impl AssetLoader for InMemoryAssets {
    fn fetch(&self, locator: &str) -> BoxFuture<'static, io::Result<Vec<u8>>> {
        let result = self.entries.get(locator).map(|bytes| bytes.to_vec()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("asset not found: {}", locator),
            )
        });
        futures_util::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_web_style_path() {
        let loader = FileAssetLoader::new("/srv/assets");
        assert_eq!(
            loader.resolve("/models/candy.onnx"),
            PathBuf::from("/srv/assets/models/candy.onnx")
        );
        assert_eq!(
            loader.resolve("models/candy.onnx"),
            PathBuf::from("/srv/assets/models/candy.onnx")
        );
    }

    #[tokio::test]
    async fn test_file_loader_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weights.bin"), [1u8, 2, 3]).unwrap();

        let loader = FileAssetLoader::new(dir.path());
        assert_eq!(loader.fetch("/weights.bin").await.unwrap(), vec![1, 2, 3]);
        assert!(loader.fetch("missing.bin").await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_assets() {
        let assets = InMemoryAssets::new().with("a", vec![7u8]);
        assert_eq!(assets.fetch("a").await.unwrap(), vec![7]);
        let err = assets.fetch("b").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
