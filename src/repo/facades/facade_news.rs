use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, trace, warn};

use super::FacadeError;
use crate::{
    docstore::{DocumentStoreRef, NewsDocument},
    repo, types,
};

/// Outcome of a full synchronization towards the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Live rows returned by the relational store.
    pub fetched: usize,
    /// Documents written in the batch.
    pub written: usize,
    /// Rows that stopped being live between the query and the projection.
    pub skipped: usize,
}

/// Facade over news items.
///
/// Every mutation is first applied to the relational store, which is the only
/// source of truth, and then mirrored into the document store. Mirroring is
/// best effort: a failure there is logged and never reported to the caller, the
/// projection catches up on the next mutation of the same item or on the next
/// [`FacadeNews::sync_all`].
///
/// No ordering is enforced between concurrent mutations of the same item, the
/// last write to reach the document store wins.
#[derive(Clone)]
pub struct FacadeNews {
    repo: Arc<dyn repo::NewsRecords>,
    docs: DocumentStoreRef,
}

impl FacadeNews {
    pub fn new(repo: Arc<dyn repo::NewsRecords>, docs: DocumentStoreRef) -> Self {
        Self { repo, docs }
    }

    pub async fn find(&self, id: i64) -> Result<types::NewsItem, FacadeError> {
        Ok(self.repo.news_find(id).await?)
    }

    pub async fn create(&self, item: types::NewsItem) -> Result<types::NewsItem, FacadeError> {
        validate(&item)?;

        let item = self.repo.news_create(&item).await?;
        info!("created news item `{}` (id: {})", item.title, item.id);

        if item.is_live() {
            self.mirror(&item).await;
        }

        Ok(item)
    }

    /// Saves `item`. Live items are written to the document store, items that
    /// are no longer live are removed from it.
    pub async fn update(&self, item: types::NewsItem) -> Result<types::NewsItem, FacadeError> {
        if !item.is_registered() {
            return Err(FacadeError::InvalidData(
                "cannot update an unsaved news item".to_owned(),
            ));
        }
        validate(&item)?;

        let item = self.repo.news_update(&item).await?;
        info!("updated news item `{}` (id: {})", item.title, item.id);

        self.propagate(&item).await;

        Ok(item)
    }

    pub async fn delete(&self, id: i64) -> Result<(), FacadeError> {
        let item = self.repo.news_delete(id).await?;
        info!("deleted news item `{}` (id: {})", item.title, item.id);

        self.unmirror(id).await;

        Ok(())
    }

    pub async fn publish(&self, id: i64) -> Result<types::NewsItem, FacadeError> {
        self.transition(id, types::NewsItem::publish).await
    }

    pub async fn unpublish(&self, id: i64) -> Result<types::NewsItem, FacadeError> {
        self.transition(id, types::NewsItem::unpublish).await
    }

    pub async fn archive(&self, id: i64) -> Result<types::NewsItem, FacadeError> {
        self.transition(id, types::NewsItem::archive).await
    }

    pub async fn set_breaking(
        &self,
        id: i64,
        is_breaking: bool,
    ) -> Result<types::NewsItem, FacadeError> {
        self.transition(id, |item| item.set_breaking(is_breaking))
            .await
    }

    /// Writes every live item to the document store in a single batch.
    ///
    /// Unlike per-item mutations, a document store failure is returned here
    /// since nothing has been written to the relational store.
    pub async fn sync_all(&self) -> Result<SyncReport, FacadeError> {
        let items = self.repo.news_live(Utc::now()).await?;
        let fetched = items.len();

        let docs: Vec<NewsDocument> = items
            .iter()
            .filter(|item| {
                let live = item.is_live();
                if !live {
                    debug!("news item {} expired before projection, skipping", item.id);
                }
                live
            })
            .map(NewsDocument::from)
            .collect();

        self.docs.commit(&docs).await?;

        let report = SyncReport {
            fetched,
            written: docs.len(),
            skipped: fetched - docs.len(),
        };
        info!(
            "synced {} live news items to the document store ({} skipped)",
            report.written, report.skipped
        );

        Ok(report)
    }

    /// Live items for the ticker, breaking news first.
    pub async fn active(
        &self,
        filter: &repo::ActiveFilter,
    ) -> Result<Vec<types::NewsItem>, FacadeError> {
        let items = self.repo.news_active(filter, Utc::now()).await?;
        trace!("found {} active news items for {:?}", items.len(), filter);
        Ok(items)
    }

    pub async fn breaking(&self, limit: Option<i64>) -> Result<Vec<types::NewsItem>, FacadeError> {
        self.active(&repo::ActiveFilter {
            breaking_only: true,
            limit,
            ..Default::default()
        })
        .await
    }

    /// Paginated listing of every item whatever its status, newest first.
    pub async fn list(&self, filter: &repo::ListFilter) -> Result<repo::NewsPage, FacadeError> {
        let page = self.repo.news_list(filter).await?;
        trace!(
            "listed {} of {} news items (page {})",
            page.items.len(),
            page.total,
            page.page
        );
        Ok(page)
    }

    /// Reads the public projection back from the document store.
    pub async fn public_feed(
        &self,
        limit: Option<i64>,
        breaking_only: bool,
    ) -> Result<Vec<NewsDocument>, FacadeError> {
        let limit = repo::ActiveFilter {
            limit,
            ..Default::default()
        }
        .effective_limit();

        Ok(self.docs.query(limit as usize, breaking_only).await?)
    }

    /// Stores a news item received from an upstream feed.
    ///
    /// The item is created as a draft carrying the raw `payload`. When an item
    /// with the same external id and source already exists, only its title,
    /// content and upstream data are refreshed.
    pub async fn import_external(
        &self,
        payload: &serde_json::Value,
        source: types::NewsSource,
    ) -> Result<types::NewsItem, FacadeError> {
        let item = item_from_external(payload, source)?;
        validate(&item)?;

        let (item, created) = self.repo.news_save_external(&item).await?;
        if created {
            info!(
                "imported news item `{}` from {} (id: {})",
                item.title, source, item.id
            );
            if item.is_live() {
                self.mirror(&item).await;
            }
        } else {
            info!(
                "refreshed news item `{}` from {} (id: {})",
                item.title, source, item.id
            );
            self.propagate(&item).await;
        }

        Ok(item)
    }

    async fn transition<F>(&self, id: i64, apply: F) -> Result<types::NewsItem, FacadeError>
    where
        F: FnOnce(&mut types::NewsItem) + Send,
    {
        let mut item = self.repo.news_find(id).await?;
        apply(&mut item);
        trace!(
            "news item {} is now {} (breaking: {})",
            id, item.status, item.is_breaking
        );
        self.update(item).await
    }

    async fn propagate(&self, item: &types::NewsItem) {
        if item.is_live() {
            self.mirror(item).await;
        } else {
            self.unmirror(item.id).await;
        }
    }

    async fn mirror(&self, item: &types::NewsItem) {
        let doc = NewsDocument::from(item);
        match self.docs.upsert(&doc).await {
            Ok(()) => debug!("news item {} mirrored to the document store", item.id),
            Err(e) => warn!(
                "unable to mirror news item {} to the document store: {}",
                item.id, e
            ),
        }
    }

    async fn unmirror(&self, id: i64) {
        match self.docs.remove(&NewsDocument::document_id(id)).await {
            Ok(()) => debug!("news item {id} removed from the document store"),
            Err(e) => warn!("unable to remove news item {id} from the document store: {e}"),
        }
    }
}

fn validate(item: &types::NewsItem) -> Result<(), FacadeError> {
    if item.title.trim().is_empty() {
        return Err(FacadeError::InvalidData(
            "news item title cannot be empty".to_owned(),
        ));
    }
    Ok(())
}

fn item_from_external(
    payload: &serde_json::Value,
    source: types::NewsSource,
) -> Result<types::NewsItem, FacadeError> {
    let data = payload.as_object().ok_or_else(|| {
        FacadeError::InvalidData("upstream news payload must be a json object".to_owned())
    })?;

    let text = |key: &str| data.get(key).and_then(|v| v.as_str()).map(str::to_owned);

    let mut item = types::NewsItem::new(
        text("title").unwrap_or_default().as_str(),
        text("content").unwrap_or_default().as_str(),
    )
    .with_source(source);

    item.source_name = text("source_name");
    item.source_url = text("source_url");
    item.category = text("category");
    item.external_id = text("external_id");
    if let Some(priority) = data.get("priority").and_then(|v| v.as_f64()) {
        item.priority = priority as i32;
    }
    if let Some(is_breaking) = data.get("is_breaking").and_then(|v| v.as_bool()) {
        item.is_breaking = is_breaking;
    }
    item.external_data = Some(payload.to_string());
    item.last_sync_at = Some(Utc::now());

    Ok(item)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::docstore::testing::MemoryDocumentStore;
    use crate::repo::testing::MemoryRepository;

    fn facade() -> (FacadeNews, MemoryRepository, Arc<MemoryDocumentStore>) {
        let repo = MemoryRepository::new();
        let docs = Arc::new(MemoryDocumentStore::new());
        let facade = FacadeNews::new(Arc::new(repo.clone()), docs.clone());
        (facade, repo, docs)
    }

    fn draft(title: &str) -> types::NewsItem {
        types::NewsItem::new(title, "content").with_category("market")
    }

    #[tokio::test]
    async fn create_draft_is_not_mirrored() {
        let (facade, _, docs) = facade();

        let item = facade.create(draft("draft")).await.unwrap();
        assert!(item.is_registered());
        assert!(!item.is_live());
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn create_published_is_mirrored() {
        let (facade, _, docs) = facade();

        let item = facade
            .create(draft("live").with_status(types::NewsStatus::Published))
            .await
            .unwrap();
        assert!(item.published_at.is_some());

        let doc = docs.get(&item.id.to_string()).unwrap();
        assert_eq!(doc.title, "live");
        assert_eq!(doc.category, "market");
    }

    #[tokio::test]
    async fn create_rejects_empty_title() {
        let (facade, repo, _) = facade();

        let result = facade.create(draft("  ")).await;
        assert!(matches!(result, Err(FacadeError::InvalidData(_))));
        assert!(repo.row(1).is_none());
    }

    #[tokio::test]
    async fn authoritative_failure_is_reported() {
        let (facade, repo, docs) = facade();
        let item = facade.create(draft("item")).await.unwrap();

        repo.fail_writes(true);
        let result = facade.publish(item.id).await;
        assert!(matches!(result, Err(FacadeError::RepositoryError(_))));

        // nothing reached the document store
        assert!(docs.is_empty());
        assert_eq!(repo.row(item.id).unwrap().status, types::NewsStatus::Draft);
    }

    #[tokio::test]
    async fn document_store_failure_is_swallowed() {
        let (facade, repo, docs) = facade();
        let item = facade.create(draft("item")).await.unwrap();

        docs.set_unavailable(true);
        let published = facade.publish(item.id).await.unwrap();
        assert_eq!(published.status, types::NewsStatus::Published);

        let mut edited = published.clone();
        edited.title = "edited".to_owned();
        let edited = facade.update(edited).await.unwrap();
        assert_eq!(edited.title, "edited");

        assert_eq!(repo.row(item.id).unwrap().title, "edited");
        docs.set_unavailable(false);
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let (facade, _, _) = facade();
        let item = facade.create(draft("item")).await.unwrap();

        let first = facade.publish(item.id).await.unwrap();
        let second = facade.publish(item.id).await.unwrap();

        assert!(first.published_at.is_some());
        assert_eq!(first.published_at, second.published_at);
        assert_eq!(second.status, types::NewsStatus::Published);
    }

    #[tokio::test]
    async fn breaking_flag_priority() {
        let (facade, _, docs) = facade();
        let item = facade.create(draft("item").with_priority(2)).await.unwrap();
        facade.publish(item.id).await.unwrap();

        let item = facade.set_breaking(item.id, true).await.unwrap();
        assert!(item.is_breaking);
        assert_eq!(item.priority, types::BREAKING_PRIORITY);
        assert_eq!(
            docs.get(&item.id.to_string()).unwrap().priority,
            types::BREAKING_PRIORITY as i64
        );

        let item = facade.set_breaking(item.id, false).await.unwrap();
        assert!(!item.is_breaking);
        assert_eq!(item.priority, types::BREAKING_PRIORITY);
        assert!(!docs.get(&item.id.to_string()).unwrap().is_breaking);
    }

    #[tokio::test]
    async fn update_of_unsaved_item() {
        let (facade, _, _) = facade();
        assert!(matches!(
            facade.update(draft("item")).await,
            Err(FacadeError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn missing_item() {
        let (facade, _, _) = facade();
        assert!(matches!(
            facade.publish(99).await,
            Err(FacadeError::NotFound(_))
        ));
        assert!(matches!(facade.delete(99).await, Err(FacadeError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let (facade, repo, docs) = facade();
        let item = facade
            .create(draft("item").with_status(types::NewsStatus::Published))
            .await
            .unwrap();
        assert!(docs.get(&item.id.to_string()).is_some());

        facade.delete(item.id).await.unwrap();
        assert!(docs.get(&item.id.to_string()).is_none());
        assert!(repo.row(item.id).is_none());
        assert!(matches!(
            facade.find(item.id).await,
            Err(FacadeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_without_document() {
        let (facade, _, docs) = facade();
        let item = facade.create(draft("never published")).await.unwrap();

        facade.delete(item.id).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn delete_with_unavailable_document_store() {
        let (facade, repo, docs) = facade();
        let item = facade.create(draft("item")).await.unwrap();

        docs.set_unavailable(true);
        facade.delete(item.id).await.unwrap();
        assert!(repo.row(item.id).is_none());
    }

    #[tokio::test]
    async fn sync_all_writes_live_set() {
        let (facade, repo, docs) = facade();

        let live_a = facade.create(draft("a")).await.unwrap();
        facade.publish(live_a.id).await.unwrap();
        let live_b = facade.create(draft("b")).await.unwrap();
        facade.publish(live_b.id).await.unwrap();

        facade.create(draft("draft")).await.unwrap();

        let archived = facade.create(draft("archived")).await.unwrap();
        facade.publish(archived.id).await.unwrap();
        facade.archive(archived.id).await.unwrap();

        let mut expired = facade.create(draft("expired")).await.unwrap();
        expired.publish();
        expired.expires_at = Some(Utc::now() - Duration::minutes(1));
        repo.put_row(expired);

        let mut scheduled = facade.create(draft("scheduled")).await.unwrap();
        scheduled.publish();
        scheduled.published_at = Some(Utc::now() + Duration::hours(1));
        repo.put_row(scheduled);

        let mut inactive = facade.create(draft("inactive")).await.unwrap();
        inactive.publish();
        inactive.is_active = false;
        repo.put_row(inactive);

        let commits = docs.commit_count();
        let report = facade.sync_all().await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(docs.commit_count(), commits + 1);

        let mut expected = vec![live_a.id.to_string(), live_b.id.to_string()];
        expected.sort();
        assert_eq!(docs.ids(), expected);
    }

    #[tokio::test]
    async fn sync_all_reports_document_store_failure() {
        let (facade, _, docs) = facade();
        let item = facade.create(draft("a")).await.unwrap();
        facade.publish(item.id).await.unwrap();

        docs.set_unavailable(true);
        assert!(matches!(
            facade.sync_all().await,
            Err(FacadeError::DocumentStoreError(_))
        ));
    }

    #[tokio::test]
    async fn sync_all_recovers_missed_writes() {
        let (facade, _, docs) = facade();
        let item = facade.create(draft("a")).await.unwrap();

        docs.set_unavailable(true);
        facade.publish(item.id).await.unwrap();
        docs.set_unavailable(false);
        assert!(docs.is_empty());

        facade.sync_all().await.unwrap();
        assert!(docs.get(&item.id.to_string()).is_some());
    }

    #[tokio::test]
    async fn lifecycle_end_to_end() {
        let (facade, _, docs) = facade();

        let item = facade.create(draft("Coffee auction")).await.unwrap();
        assert!(!item.is_live());

        let report = facade.sync_all().await.unwrap();
        assert_eq!(report.written, 0);
        assert!(docs.is_empty());

        let item = facade.publish(item.id).await.unwrap();
        assert!(item.is_live());

        facade.sync_all().await.unwrap();
        let doc = docs.get(&item.id.to_string()).unwrap();
        assert_eq!(doc.id, item.id.to_string());
        assert_eq!(doc.title, "Coffee auction");
        assert_eq!(doc.priority, i64::from(item.priority));

        let item = facade.archive(item.id).await.unwrap();
        assert!(!item.is_live());
        assert!(docs.get(&item.id.to_string()).is_none());

        let report = facade.sync_all().await.unwrap();
        assert_eq!(report.written, 0);
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn unpublish_removes_document() {
        let (facade, _, docs) = facade();
        let item = facade.create(draft("item")).await.unwrap();
        facade.publish(item.id).await.unwrap();
        assert_eq!(docs.len(), 1);

        let item = facade.unpublish(item.id).await.unwrap();
        assert_eq!(item.status, types::NewsStatus::Draft);
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn active_ordering_and_filters() {
        let (facade, _, _) = facade();

        let low = facade.create(draft("low").with_priority(1)).await.unwrap();
        facade.publish(low.id).await.unwrap();

        let high = facade.create(draft("high").with_priority(5)).await.unwrap();
        facade.publish(high.id).await.unwrap();

        let breaking = facade
            .create(
                draft("breaking")
                    .with_priority(0)
                    .with_source(types::NewsSource::Partner),
            )
            .await
            .unwrap();
        facade.publish(breaking.id).await.unwrap();
        facade.set_breaking(breaking.id, true).await.unwrap();

        let other = facade
            .create(types::NewsItem::new("other", "").with_category("event"))
            .await
            .unwrap();
        facade.publish(other.id).await.unwrap();

        facade.create(draft("hidden")).await.unwrap();

        let titles = |items: Vec<types::NewsItem>| -> Vec<String> {
            items.into_iter().map(|i| i.title).collect()
        };

        let all = facade.active(&repo::ActiveFilter::default()).await.unwrap();
        assert_eq!(titles(all), vec!["breaking", "high", "low", "other"]);

        let market = facade
            .active(&repo::ActiveFilter {
                category: Some("market".to_owned()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(titles(market), vec!["breaking", "high"]);

        let partner = facade
            .active(&repo::ActiveFilter {
                source: Some(types::NewsSource::Partner),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(titles(partner), vec!["breaking"]);

        let breaking_only = facade.breaking(None).await.unwrap();
        assert_eq!(titles(breaking_only), vec!["breaking"]);
    }

    #[tokio::test]
    async fn public_feed_reads_projection() {
        let (facade, _, _) = facade();

        let a = facade.create(draft("a").with_priority(1)).await.unwrap();
        facade.publish(a.id).await.unwrap();
        let b = facade.create(draft("b")).await.unwrap();
        facade.publish(b.id).await.unwrap();
        facade.set_breaking(b.id, true).await.unwrap();

        let feed = facade.public_feed(None, false).await.unwrap();
        let ids: Vec<String> = feed.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec![b.id.to_string(), a.id.to_string()]);

        let feed = facade.public_feed(Some(500), true).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, b.id.to_string());
    }

    #[tokio::test]
    async fn import_external_creates_then_refreshes() {
        let (facade, repo, _) = facade();

        let payload = serde_json::json!({
            "title": "Rainfall outlook",
            "content": "first",
            "source_name": "Met Agency",
            "category": "weather",
            "priority": 3.0,
            "is_breaking": true,
            "external_id": "met-42",
        });

        let item = facade
            .import_external(&payload, types::NewsSource::External)
            .await
            .unwrap();
        assert_eq!(item.status, types::NewsStatus::Draft);
        assert_eq!(item.source, types::NewsSource::External);
        assert_eq!(item.source_name.as_deref(), Some("Met Agency"));
        assert_eq!(item.priority, 3);
        assert!(item.is_breaking);
        assert_eq!(item.external_id.as_deref(), Some("met-42"));
        assert!(item.last_sync_at.is_some());
        let raw: serde_json::Value =
            serde_json::from_str(item.external_data.as_deref().unwrap()).unwrap();
        assert_eq!(raw, payload);

        let payload = serde_json::json!({
            "title": "Rainfall outlook (revised)",
            "content": "second",
            "external_id": "met-42",
        });
        let refreshed = facade
            .import_external(&payload, types::NewsSource::External)
            .await
            .unwrap();

        assert_eq!(refreshed.id, item.id);
        assert_eq!(refreshed.title, "Rainfall outlook (revised)");
        assert_eq!(refreshed.content, "second");
        // fields not refreshed from upstream are kept
        assert_eq!(refreshed.category.as_deref(), Some("weather"));
        assert_eq!(repo.row(item.id).unwrap().content, "second");

        // same external id from another source is a different item
        let other = facade
            .import_external(&payload, types::NewsSource::Api)
            .await
            .unwrap();
        assert_ne!(other.id, item.id);
    }

    #[tokio::test]
    async fn import_external_rejects_non_objects() {
        let (facade, _, _) = facade();
        assert!(matches!(
            facade
                .import_external(&serde_json::json!(["a"]), types::NewsSource::Api)
                .await,
            Err(FacadeError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn list_every_status() {
        let (facade, repo, _) = facade();

        let draft = facade.create(draft("draft")).await.unwrap();
        let live = facade.create(self::draft("live")).await.unwrap();
        facade.publish(live.id).await.unwrap();
        let archived = facade.create(self::draft("archived")).await.unwrap();
        facade.archive(archived.id).await.unwrap();
        let deleted = facade.create(self::draft("deleted")).await.unwrap();
        facade.delete(deleted.id).await.unwrap();

        // pin creation times, newest first: archived, live, draft
        for (age, id) in [archived.id, live.id, draft.id].into_iter().enumerate() {
            let mut row = repo.row(id).unwrap();
            row.created_at = Utc::now() - Duration::minutes(age as i64);
            repo.put_row(row);
        }

        let page = facade.list(&repo::ListFilter::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 20);
        assert_eq!(page.pages(), 1);
        let ids: Vec<i64> = page.items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![archived.id, live.id, draft.id]);

        let page = facade
            .list(&repo::ListFilter {
                status: Some(types::NewsStatus::Archived),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, archived.id);

        let page = facade
            .list(&repo::ListFilter {
                page: Some(2),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages(), 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, draft.id);
    }
}
