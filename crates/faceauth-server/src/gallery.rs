use chrono::{DateTime, SecondsFormat, Utc};
use faceauth_core::errors::{AppError, AppResult};
use faceauth_core::faces::store::VectorStore;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentitySummary {
    pub name: String,
    pub dimension: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captures: Option<usize>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub dimension: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captures: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentityHistory {
    pub name: String,
    pub vectors: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemovalOutcome {
    pub name: String,
    pub removed_vectors: usize,
}

pub fn list_identities(store: &dyn VectorStore) -> AppResult<Vec<IdentitySummary>> {
    let mut identities: Vec<IdentitySummary> = store
        .get_all()?
        .into_iter()
        .map(|identity| IdentitySummary {
            dimension: identity.vector.len(),
            captures: identity.metadata.as_ref().map(|meta| meta.captures),
            created_at: timestamp(identity.created_at),
            name: identity.name,
        })
        .collect();
    identities.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(identities)
}

pub fn identity_history(store: &dyn VectorStore, name: &str) -> AppResult<IdentityHistory> {
    let vectors: Vec<HistoryEntry> = store
        .history(name)?
        .into_iter()
        .map(|stored| HistoryEntry {
            id: stored.id,
            dimension: stored.dimension,
            captures: stored.metadata.as_ref().map(|meta| meta.captures),
            source: stored.metadata.map(|meta| meta.source),
            created_at: timestamp(stored.created_at),
        })
        .collect();
    if vectors.is_empty() {
        return Err(AppError::IdentityNotFound {
            name: name.to_string(),
        });
    }
    Ok(IdentityHistory {
        name: name.to_string(),
        vectors,
    })
}

pub fn remove_identity(store: &dyn VectorStore, name: &str) -> AppResult<RemovalOutcome> {
    let removed_vectors = store.history(name)?.len();
    store.delete(name)?;
    info!(name = %name, removed_vectors, "identity removed");
    Ok(RemovalOutcome {
        name: name.to_string(),
        removed_vectors,
    })
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
