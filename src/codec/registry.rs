//! Ordered adapter lookup

use super::detect::sniff_format;
use super::{ArchiveAdapter, Capability, Operation, TarGzAdapter, ZipAdapter};
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Name and capability of a registered adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    /// Adapter name
    pub name: &'static str,
    /// Operations it supports
    pub capability: Capability,
    /// File name suffixes it claims
    pub extensions: Vec<&'static str>,
}

/// Ordered list of archive adapters
///
/// Adapters registered later take priority, so a custom adapter can override a
/// built-in one without removing it.
pub struct AdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn ArchiveAdapter>>>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
        }
    }

    /// A registry holding the zip and tar adapters (zip first)
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TarGzAdapter));
        registry.register(Arc::new(ZipAdapter));
        registry
    }

    /// Add `adapter` at the highest priority
    pub fn register(&self, adapter: Arc<dyn ArchiveAdapter>) {
        debug!(
            adapter = adapter.name(),
            capability = ?adapter.capability(),
            "registering archive adapter"
        );
        self.write().insert(0, adapter);
    }

    /// Registered adapters in priority order
    pub fn list(&self) -> Vec<AdapterInfo> {
        self.read()
            .iter()
            .map(|a| AdapterInfo {
                name: a.name(),
                capability: a.capability(),
                extensions: a.extensions().to_vec(),
            })
            .collect()
    }

    /// First adapter that can perform `operation` on `path`
    ///
    /// Adapters are matched by file name first. When none claims the name and
    /// the path is an existing file being decompressed, its magic bytes decide.
    ///
    /// # Errors
    ///
    /// - [`Error::NoAdapterFound`] if no capable adapter matches
    /// - [`Error::UnknownFormat`] if sniffing was needed and matched nothing
    pub async fn resolve(
        &self,
        path: &Path,
        operation: Operation,
    ) -> Result<Arc<dyn ArchiveAdapter>> {
        if let Some(adapter) =
            self.find(|a| a.capability().supports(operation) && a.can_handle(path))
        {
            debug!(?path, %operation, adapter = adapter.name(), "resolved adapter by name");
            return Ok(adapter);
        }

        if operation == Operation::Decompress
            && tokio::fs::metadata(path)
                .await
                .is_ok_and(|m| m.is_file())
        {
            let format = sniff_format(path).await?;
            if let Some(adapter) = self.find(|a| {
                a.capability().supports(operation) && a.signatures().contains(&format)
            }) {
                debug!(?path, ?format, adapter = adapter.name(), "resolved adapter by magic bytes");
                return Ok(adapter);
            }
        }

        Err(Error::NoAdapterFound {
            path: path.to_path_buf(),
            operation,
        })
    }

    fn find(&self, pred: impl Fn(&dyn ArchiveAdapter) -> bool) -> Option<Arc<dyn ArchiveAdapter>> {
        self.read().iter().find(|a| pred(a.as_ref())).cloned()
    }

    // Lock poisoning only happens if a panic occurs while the Vec is borrowed,
    // which cannot leave it inconsistent.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn ArchiveAdapter>>> {
        self.adapters.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn ArchiveAdapter>>> {
        self.adapters.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.list())
            .finish()
    }
}
