use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Error, NewsDocument};

/// Document store kept in memory. It can be switched to a failing mode to
/// simulate an unreachable backend.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, NewsDocument>>,
    unavailable: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<NewsDocument> {
        self.lock().get(id).cloned()
    }

    /// Ids of the stored documents, in lexicographic order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of successful batch commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, NewsDocument>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl super::DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, doc: &NewsDocument) -> Result<(), Error> {
        self.check_available()?;
        self.lock().insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        self.check_available()?;
        self.lock().remove(id);
        Ok(())
    }

    async fn commit(&self, docs: &[NewsDocument]) -> Result<(), Error> {
        self.check_available()?;
        let mut stored = self.lock();
        for doc in docs {
            stored.insert(doc.id.clone(), doc.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, limit: usize, breaking_only: bool) -> Result<Vec<NewsDocument>, Error> {
        self.check_available()?;
        let mut docs: Vec<NewsDocument> = self
            .lock()
            .values()
            .filter(|doc| !breaking_only || doc.is_breaking)
            .cloned()
            .collect();

        docs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.published_at.cmp(&a.published_at))
        });
        docs.truncate(limit);

        Ok(docs)
    }
}
