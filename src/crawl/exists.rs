use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Source;
use crate::store::PropertyStore;

/// Reports which of a page's listing ids are already stored.
#[async_trait]
pub trait ExistsChecker: Send + Sync {
    async fn existing(&self, source: Source, external_ids: &[String]) -> Result<HashMap<String, bool>>;
}

/// Answers from the persistence collaborator.
pub struct StoreExistsChecker {
    store: Arc<dyn PropertyStore>,
}

impl StoreExistsChecker {
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ExistsChecker for StoreExistsChecker {
    async fn existing(&self, source: Source, external_ids: &[String]) -> Result<HashMap<String, bool>> {
        self.store.properties_exist(external_ids, source).await
    }
}

/// True when every id is reported as known. An empty page is never "all known".
pub fn all_known(ids: &[String], known: &HashMap<String, bool>) -> bool {
    !ids.is_empty() && ids.iter().all(|id| known.get(id).copied().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Listing;
    use crate::store::JsonFileStore;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn all_known_needs_every_id() {
        let known = HashMap::from([("1".to_string(), true), ("2".to_string(), false)]);
        assert!(all_known(&ids(&["1"]), &known));
        assert!(!all_known(&ids(&["1", "2"]), &known));
        assert!(!all_known(&ids(&["1", "3"]), &known));
        assert!(!all_known(&[], &known));
    }

    #[tokio::test]
    async fn store_checker_scopes_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("props.json")).await.unwrap());
        let mut listing = Listing::new(Source::FarmBuy, "77");
        listing.set_coordinates(-34.0, 150.0);
        store.upsert_property(&listing).await.unwrap();

        let checker = StoreExistsChecker::new(store);
        let farmbuy = checker.existing(Source::FarmBuy, &ids(&["77", "78"])).await.unwrap();
        assert_eq!(farmbuy.get("77"), Some(&true));
        assert_eq!(farmbuy.get("78"), Some(&false));

        let rea = checker.existing(Source::Rea, &ids(&["77"])).await.unwrap();
        assert_eq!(rea.get("77"), Some(&false));
    }
}
