use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{Listing, Source};

/// Where listings end up.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Insert or replace by `(source, external_id)`.
    async fn upsert_property(&self, listing: &Listing) -> Result<()>;

    async fn properties_exist(&self, external_ids: &[String], source: Source) -> Result<HashMap<String, bool>>;

    /// Persist buffered writes.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Listings kept in a pretty-printed JSON array on disk.
pub struct JsonFileStore {
    path: PathBuf,
    listings: Mutex<BTreeMap<(Source, String), Listing>>,
}

impl JsonFileStore {
    /// Opens `path`, loading any listings a previous run saved there.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut listings = BTreeMap::new();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let saved: Vec<Listing> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            for listing in saved {
                listings.insert((listing.source, listing.external_id.clone()), listing);
            }
            info!("📂 Loaded {} stored properties from {}", listings.len(), path.display());
        }

        Ok(Self {
            path,
            listings: Mutex::new(listings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.listings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listings.lock().await.is_empty()
    }
}

#[async_trait]
impl PropertyStore for JsonFileStore {
    async fn upsert_property(&self, listing: &Listing) -> Result<()> {
        if listing.external_id.trim().is_empty() {
            anyhow::bail!("listing from {} has no id", listing.source);
        }
        self.listings
            .lock()
            .await
            .insert((listing.source, listing.external_id.clone()), listing.clone());
        Ok(())
    }

    async fn properties_exist(&self, external_ids: &[String], source: Source) -> Result<HashMap<String, bool>> {
        let listings = self.listings.lock().await;
        Ok(external_ids
            .iter()
            .map(|id| (id.clone(), listings.contains_key(&(source, id.clone()))))
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        let listings = self.listings.lock().await;
        let all: Vec<&Listing> = listings.values().collect();
        let json = serde_json::to_string_pretty(&all)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("💾 Saved {} properties to {}", all.len(), self.path.display());
        Ok(())
    }
}
