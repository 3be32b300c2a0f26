//! Model code resolution
//!
//! Maps a run's `CodeSource` to a local directory. Each repository kind has
//! a factory; repositories are created once per URI and remember the last
//! revision they fetched.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use sweep_core::{CodeSource, ExecutionError, RepositoryKind};
use tracing::debug;

/// A place model code can be fetched from
#[async_trait]
pub trait CodeRepository: Send + Sync {
    /// Makes `revision` available locally and returns its path
    async fn resolve(&self, revision: &str) -> Result<PathBuf, ExecutionError>;

    /// Latest revision available
    async fn head_revision(&self) -> Result<String, ExecutionError>;
}

/// Code already present in a local directory
///
/// Unversioned: every revision resolves to the same path.
#[derive(Debug, Clone)]
pub struct LocalFileRepository {
    uri: String,
    path: PathBuf,
}

impl LocalFileRepository {
    /// Accepts a plain path or a `file://` URI
    pub fn new(uri: &str) -> Self {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Self {
            uri: uri.to_string(),
            path: PathBuf::from(path),
        }
    }
}

#[async_trait]
impl CodeRepository for LocalFileRepository {
    async fn resolve(&self, _revision: &str) -> Result<PathBuf, ExecutionError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => Ok(self.path.clone()),
            Ok(_) => Err(ExecutionError::CodeResolution {
                uri: self.uri.clone(),
                message: "not a directory".to_string(),
            }),
            Err(e) => Err(ExecutionError::CodeResolution {
                uri: self.uri.clone(),
                message: e.to_string(),
            }),
        }
    }

    async fn head_revision(&self) -> Result<String, ExecutionError> {
        Ok(String::new())
    }
}

/// Skips fetching when the requested revision was the last one fetched
///
/// The cache belongs to this instance only.
pub struct CachedRepository<R> {
    inner: R,
    last: tokio::sync::Mutex<Option<(String, PathBuf)>>,
}

impl<R: CodeRepository> CachedRepository<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            last: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl<R: CodeRepository> CodeRepository for CachedRepository<R> {
    async fn resolve(&self, revision: &str) -> Result<PathBuf, ExecutionError> {
        // held across the fetch so two runs never check out concurrently
        let mut last = self.last.lock().await;
        if let Some((cached, path)) = last.as_ref() {
            if cached == revision {
                debug!(revision, "Using cached checkout");
                return Ok(path.clone());
            }
        }
        let path = self.inner.resolve(revision).await?;
        *last = Some((revision.to_string(), path.clone()));
        Ok(path)
    }

    async fn head_revision(&self) -> Result<String, ExecutionError> {
        self.inner.head_revision().await
    }
}

/// Builds a repository for a URI, given the base model directory
pub type RepositoryFactory =
    Arc<dyn Fn(&str, &Path) -> Arc<dyn CodeRepository> + Send + Sync>;

/// Resolves code sources through per-URI repositories
pub struct CodeResolver {
    model_dir: PathBuf,
    factories: HashMap<RepositoryKind, RepositoryFactory>,
    repositories: Mutex<HashMap<(RepositoryKind, String), Arc<dyn CodeRepository>>>,
}

impl CodeResolver {
    /// Resolver without any repository kinds
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            factories: HashMap::new(),
            repositories: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver that understands local directories
    pub fn with_builtins(model_dir: impl Into<PathBuf>) -> Self {
        let mut resolver = Self::new(model_dir);
        resolver.register(
            RepositoryKind::LocalFile,
            Arc::new(|uri: &str, _model_dir: &Path| {
                Arc::new(CachedRepository::new(LocalFileRepository::new(uri)))
                    as Arc<dyn CodeRepository>
            }),
        );
        resolver
    }

    /// Adds or replaces support for a repository kind
    pub fn register(&mut self, kind: RepositoryKind, factory: RepositoryFactory) {
        self.factories.insert(kind, factory);
    }

    /// Local path of the source's code at its revision
    pub async fn resolve(&self, source: &CodeSource) -> Result<PathBuf, ExecutionError> {
        let repository = self.repository(source)?;
        repository.resolve(&source.revision).await
    }

    /// Latest revision of the source's repository
    pub async fn head_revision(&self, source: &CodeSource) -> Result<String, ExecutionError> {
        self.repository(source)?.head_revision().await
    }

    fn repository(&self, source: &CodeSource) -> Result<Arc<dyn CodeRepository>, ExecutionError> {
        let key = (source.kind, source.uri.clone());
        let mut repositories = self
            .repositories
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(repository) = repositories.get(&key) {
            return Ok(Arc::clone(repository));
        }

        let factory = self
            .factories
            .get(&source.kind)
            .ok_or_else(|| ExecutionError::CodeResolution {
                uri: source.uri.clone(),
                message: format!("unsupported repository kind: {}", source.kind),
            })?;
        let repository = factory(&source.uri, &self.model_dir);
        repositories.insert(key, Arc::clone(&repository));
        Ok(repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRepository {
        path: PathBuf,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CodeRepository for CountingRepository {
        async fn resolve(&self, revision: &str) -> Result<PathBuf, ExecutionError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.path.join(revision))
        }

        async fn head_revision(&self) -> Result<String, ExecutionError> {
            Ok("7".to_string())
        }
    }

    #[tokio::test]
    async fn test_local_repository_resolves_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}", dir.path().display());

        let path = LocalFileRepository::new(&uri).resolve("").await.unwrap();

        assert_eq!(path, dir.path());
    }

    #[tokio::test]
    async fn test_local_repository_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let repository = LocalFileRepository::new(&missing.to_string_lossy());

        let err = repository.resolve("").await.unwrap_err();

        assert!(matches!(err, ExecutionError::CodeResolution { .. }));
    }

    #[tokio::test]
    async fn test_cache_skips_repeated_revision() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let repository = CachedRepository::new(CountingRepository {
            path: PathBuf::from("/models"),
            fetches: Arc::clone(&fetches),
        });

        repository.resolve("1").await.unwrap();
        repository.resolve("1").await.unwrap();
        let path = repository.resolve("2").await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(path, PathBuf::from("/models/2"));
    }

    #[tokio::test]
    async fn test_caches_are_per_instance() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let first = CachedRepository::new(CountingRepository {
            path: PathBuf::from("/a"),
            fetches: Arc::clone(&fetches),
        });
        let second = CachedRepository::new(CountingRepository {
            path: PathBuf::from("/b"),
            fetches: Arc::clone(&fetches),
        });

        first.resolve("1").await.unwrap();
        let path = second.resolve("1").await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(path, PathBuf::from("/b/1"));
    }

    #[tokio::test]
    async fn test_resolver_rejects_unregistered_kind() {
        let resolver = CodeResolver::with_builtins("/tmp/models");
        let source = CodeSource::new("https://example.com/m.zip", RepositoryKind::HttpZip, "");

        let err = resolver.resolve(&source).await.unwrap_err();

        assert!(err.to_string().contains("unsupported repository kind: http_zip"));
    }

    #[tokio::test]
    async fn test_resolver_reuses_repository_per_uri() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        let mut resolver = CodeResolver::new("/tmp/models");
        resolver.register(
            RepositoryKind::Svn,
            Arc::new(move |uri: &str, model_dir: &Path| {
                Arc::new(CachedRepository::new(CountingRepository {
                    path: model_dir.join(uri.replace([':', '/'], "_")),
                    fetches: Arc::clone(&counter),
                })) as Arc<dyn CodeRepository>
            }),
        );
        let source = CodeSource::new("svn://host/repo", RepositoryKind::Svn, "12");

        resolver.resolve(&source).await.unwrap();
        resolver.resolve(&source).await.unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.head_revision(&source).await.unwrap(), "7");
    }
}
