use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::faces::store::{CaptureMetadata, IdentityVector, VectorStore};

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub vector: Arc<[f64]>,
    pub created_at: DateTime<Utc>,
}

impl From<IdentityVector> for GalleryEntry {
    fn from(identity: IdentityVector) -> Self {
        Self {
            name: identity.name,
            vector: identity.vector.into(),
            created_at: identity.created_at,
        }
    }
}

/// Immutable view of the gallery at one point in time, oldest commit first.
#[derive(Debug, Clone, Default)]
pub struct GallerySnapshot {
    entries: Vec<GalleryEntry>,
    dimension: Option<usize>,
}

impl GallerySnapshot {
    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn with_upserted(&self, entry: GalleryEntry) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(
            self.entries
                .iter()
                .filter(|existing| existing.name != entry.name)
                .cloned(),
        );
        let dimension = self.dimension.or(Some(entry.vector.len()));
        entries.push(entry);
        Self { entries, dimension }
    }

    fn without(&self, name: &str, fixed_dimension: Option<usize>) -> Self {
        let entries: Vec<GalleryEntry> = self
            .entries
            .iter()
            .filter(|existing| existing.name != name)
            .cloned()
            .collect();
        let dimension = if entries.is_empty() {
            fixed_dimension
        } else {
            self.dimension
        };
        Self { entries, dimension }
    }
}

/// Write-through, copy-on-write cache of the vector store.
///
/// Writers are serialized and publish a complete new snapshot with one
/// pointer swap; readers only hold the lock long enough to clone the `Arc`.
pub struct Gallery {
    store: Arc<dyn VectorStore>,
    current: RwLock<Arc<GallerySnapshot>>,
    writer: Mutex<()>,
    fixed_dimension: Option<usize>,
}

impl Gallery {
    pub fn new(store: Arc<dyn VectorStore>, dimension: Option<usize>) -> Self {
        Self {
            store,
            current: RwLock::new(Arc::new(GallerySnapshot {
                entries: Vec::new(),
                dimension,
            })),
            writer: Mutex::new(()),
            fixed_dimension: dimension,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Replaces the in-memory state with the store contents.
    pub fn load(&self) -> AppResult<usize> {
        let identities = self.store.get_all()?;
        let mut dimension = self.fixed_dimension;
        for identity in &identities {
            match dimension {
                Some(expected) if expected != identity.vector.len() => {
                    return Err(AppError::DimensionMismatch {
                        expected,
                        found: identity.vector.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(identity.vector.len()),
            }
        }

        let entries: Vec<GalleryEntry> = identities.into_iter().map(GalleryEntry::from).collect();
        let count = entries.len();
        self.publish(GallerySnapshot { entries, dimension });
        info!(identities = count, dimension = ?dimension, "gallery loaded");
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<GallerySnapshot> {
        self.current.read().clone()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension()
    }

    /// Writes through to the store, then publishes a snapshot containing the
    /// new vector. Memory is left untouched when the store write fails.
    pub async fn upsert(
        &self,
        name: &str,
        vector: Vec<f64>,
        metadata: CaptureMetadata,
    ) -> AppResult<GalleryEntry> {
        let _writer = self.writer.lock().await;
        let base = self.snapshot();
        if let Some(expected) = base.dimension() {
            if expected != vector.len() {
                return Err(AppError::DimensionMismatch {
                    expected,
                    found: vector.len(),
                });
            }
        }

        let vector: Arc<[f64]> = vector.into();
        let store = Arc::clone(&self.store);
        let owned_name = name.to_string();
        let stored_vector = Arc::clone(&vector);
        let created_at =
            tokio::task::spawn_blocking(move || store.put(&owned_name, &stored_vector, &metadata))
                .await??;

        let entry = GalleryEntry {
            name: name.to_string(),
            vector,
            created_at,
        };
        self.publish(base.with_upserted(entry.clone()));
        debug!(name = %name, "gallery entry published");
        Ok(entry)
    }

    pub async fn remove(&self, name: &str) -> AppResult<()> {
        let _writer = self.writer.lock().await;
        let base = self.snapshot();
        let store = Arc::clone(&self.store);
        let owned_name = name.to_string();
        tokio::task::spawn_blocking(move || store.delete(&owned_name)).await??;

        self.publish(base.without(name, self.fixed_dimension));
        debug!(name = %name, "gallery entry removed");
        Ok(())
    }

    fn publish(&self, snapshot: GallerySnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}
