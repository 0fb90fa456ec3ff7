//! Document loading
//!
//! Loaders turn a source path into cleaned text plus document-level
//! metadata. The contract is deterministic: identical file bytes always
//! produce identical output, which is what makes re-ingestion idempotent.
//!
//! Format-specific extraction (PDF pages, email bodies) plugs in through
//! the same trait from outside this crate; only plain text variants live
//! here.

use crate::chunk::{clean_text, compute_content_hash};
use crate::error::{Error, Result};
use crate::meta::DocumentInfo;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A loaded document: cleaned text plus identity/attributes
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    pub info: DocumentInfo,
}

/// Trait for document loaders
#[async_trait]
pub trait DocumentLoader: Send + Sync + std::fmt::Debug {
    /// Load and clean a document from disk
    async fn load(&self, path: &Path) -> Result<LoadedDocument>;
}

/// Loader registry keyed on file type.
///
/// The key is the explicit type hint when given, otherwise the lowercased
/// file extension. Unknown keys fail fast before any task work starts.
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registry with the built-in plain-text loaders
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text_loader = Arc::new(TextLoader);
        registry.register("txt", Arc::clone(&text_loader) as Arc<dyn DocumentLoader>);
        registry.register("md", Arc::clone(&text_loader) as Arc<dyn DocumentLoader>);
        registry.register("text", text_loader);
        registry
    }

    /// Register a loader for a file type key
    pub fn register(&mut self, file_type: &str, loader: Arc<dyn DocumentLoader>) {
        self.loaders.insert(file_type.to_lowercase(), loader);
    }

    /// Resolve the loader for a path, honoring an explicit type hint
    pub fn resolve(
        &self,
        path: &Path,
        file_type_hint: Option<&str>,
    ) -> Result<(String, Arc<dyn DocumentLoader>)> {
        let key = match file_type_hint {
            Some(hint) => hint.to_lowercase(),
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Cannot determine file type for {} (no extension, no hint)",
                        path.display()
                    ))
                })?,
        };

        match self.loaders.get(&key) {
            Some(loader) => Ok((key, Arc::clone(loader))),
            None => Err(Error::Config(format!(
                "Unsupported file type: {}",
                key
            ))),
        }
    }

    /// Registered file type keys, sorted
    pub fn supported_types(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.loaders.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Plain text / markdown loader
#[derive(Debug)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Validation(format!("Cannot read {}: {}", path.display(), e)))?;

        let raw = String::from_utf8(bytes.clone()).map_err(|_| {
            Error::Validation(format!("{} is not valid UTF-8 text", path.display()))
        })?;

        let text = clean_text(&raw);
        debug!(
            "Loaded {} ({} bytes, {} cleaned chars)",
            path.display(),
            bytes.len(),
            text.len()
        );

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let mime_type = mime_guess::from_path(path).first_or_text_plain();

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "content_hash".to_string(),
            json!(compute_content_hash(&bytes)),
        );
        metadata.insert("mime_type".to_string(), json!(mime_type.to_string()));
        if let Some(ref ft) = file_type {
            metadata.insert("file_type".to_string(), json!(ft));
        }

        Ok(LoadedDocument {
            text,
            info: DocumentInfo {
                file_path: path.to_string_lossy().to_string(),
                filename,
                file_size: bytes.len() as i64,
                file_type,
                metadata,
            },
        })
    }
}

/// Minimal document identity derived from the path alone, used to record
/// failures for documents that never loaded
pub fn minimal_document_info(path: &str) -> DocumentInfo {
    let p = Path::new(path);
    DocumentInfo {
        file_path: path.to_string(),
        filename: p
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string(),
        file_size: 0,
        file_type: p
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase()),
        metadata: serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_text_loader_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.txt");
        std::fs::write(&path, "Some   text\twith\n\n\n\nmessy whitespace.").unwrap();

        let loader = TextLoader;
        let first = loader.load(&path).await.unwrap();
        let second = loader.load(&path).await.unwrap();

        assert_eq!(first.text, second.text);
        assert_eq!(first.info.metadata, second.info.metadata);
        assert_eq!(first.text, "Some text with\n\nmessy whitespace.");
        assert_eq!(first.info.filename, "note.txt");
        assert_eq!(first.info.file_type.as_deref(), Some("txt"));
        assert!(first.info.file_size > 0);
    }

    #[tokio::test]
    async fn test_text_loader_rejects_binary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.txt");
        std::fs::write(&path, [0xFFu8, 0xFE, 0x00, 0x80]).unwrap();

        let err = TextLoader.load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_text_loader_missing_file() {
        let err = TextLoader
            .load(Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_registry_resolves_by_extension_and_hint() {
        let registry = LoaderRegistry::with_defaults();

        let (key, _) = registry.resolve(Path::new("/docs/a.TXT"), None).unwrap();
        assert_eq!(key, "txt");

        let (key, _) = registry
            .resolve(Path::new("/docs/readme"), Some("md"))
            .unwrap();
        assert_eq!(key, "md");
    }

    #[test]
    fn test_registry_unknown_type_is_config_error() {
        let registry = LoaderRegistry::with_defaults();

        let err = registry
            .resolve(Path::new("/docs/slides.pptx"), None)
            .unwrap_err();
        match &err {
            Error::Config(msg) => assert!(msg.contains("pptx")),
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(!err.is_retryable());

        let err = registry.resolve(Path::new("/docs/no_extension"), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_supported_types_listed() {
        let registry = LoaderRegistry::with_defaults();
        let types = registry.supported_types();
        assert!(types.contains(&"txt".to_string()));
        assert!(types.contains(&"md".to_string()));
    }
}
