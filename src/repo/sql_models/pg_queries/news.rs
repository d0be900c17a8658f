use chrono::{DateTime, Utc};

use crate::{
    repo::{self, sql_models},
    types,
};

/// Predicate selecting the rows that are visible to the public at `$1`.
const LIVE_PREDICATE: &str = r#"status = 'published'
    AND is_active
    AND deleted_at IS NULL
    AND (published_at IS NULL OR published_at <= $1)
    AND (expires_at IS NULL OR expires_at > $1)"#;

/// Predicate selecting the non deleted rows matching a list filter bound as
/// `$1` (status), `$2` (source), `$3` (category) and `$4` (breaking flag).
const LIST_PREDICATE: &str = r#"deleted_at IS NULL
    AND ($1::TEXT IS NULL OR status = $1)
    AND ($2::TEXT IS NULL OR source = $2)
    AND ($3::TEXT IS NULL OR category = $3)
    AND ($4::BOOLEAN IS NULL OR is_breaking = $4)"#;

fn into_items(records: Vec<sql_models::NewsRecord>) -> Result<Vec<types::NewsItem>, repo::Error> {
    records.into_iter().map(types::NewsItem::try_from).collect()
}

pub async fn news_create(
    exec: &mut impl repo::AsExec,
    item: &types::NewsItem,
) -> Result<types::NewsItem, repo::Error> {
    let res = sqlx::query_as::<_, sql_models::NewsRecord>(
        r#"INSERT INTO news_items(
            title, content, source, source_name, source_url, category,
            priority, status, is_breaking, is_active,
            published_at, expires_at, created_at, updated_at,
            external_id, external_data, last_sync_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *"#,
    )
    .bind(&item.title)
    .bind(&item.content)
    .bind(item.source.as_str())
    .bind(&item.source_name)
    .bind(&item.source_url)
    .bind(&item.category)
    .bind(item.priority)
    .bind(item.status.as_str())
    .bind(item.is_breaking)
    .bind(item.is_active)
    .bind(item.published_at)
    .bind(item.expires_at)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(&item.external_id)
    .bind(&item.external_data)
    .bind(item.last_sync_at)
    .fetch_one(exec.as_exec())
    .await?;

    res.try_into()
}

/// Saves every mutable column of `item`, `updated_at` is set to `now`.
pub async fn news_update(
    exec: &mut impl repo::AsExec,
    item: &types::NewsItem,
    now: DateTime<Utc>,
) -> Result<types::NewsItem, repo::Error> {
    let res = sqlx::query_as::<_, sql_models::NewsRecord>(
        r#"UPDATE news_items SET
            title = $2,
            content = $3,
            source = $4,
            source_name = $5,
            source_url = $6,
            category = $7,
            priority = $8,
            status = $9,
            is_breaking = $10,
            is_active = $11,
            published_at = $12,
            expires_at = $13,
            updated_at = $14,
            external_id = $15,
            external_data = $16,
            last_sync_at = $17
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *"#,
    )
    .bind(item.id)
    .bind(&item.title)
    .bind(&item.content)
    .bind(item.source.as_str())
    .bind(&item.source_name)
    .bind(&item.source_url)
    .bind(&item.category)
    .bind(item.priority)
    .bind(item.status.as_str())
    .bind(item.is_breaking)
    .bind(item.is_active)
    .bind(item.published_at)
    .bind(item.expires_at)
    .bind(now)
    .bind(&item.external_id)
    .bind(&item.external_data)
    .bind(item.last_sync_at)
    .fetch_optional(exec.as_exec())
    .await?;

    res.ok_or(repo::Error::NotFound(item.id))?.try_into()
}

pub async fn news_find_by_id(
    exec: &mut impl repo::AsExec,
    id: i64,
) -> Result<types::NewsItem, repo::Error> {
    let res = sqlx::query_as::<_, sql_models::NewsRecord>(
        "SELECT * FROM news_items WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(exec.as_exec())
    .await?;

    res.ok_or(repo::Error::NotFound(id))?.try_into()
}

pub async fn news_soft_delete(
    exec: &mut impl repo::AsExec,
    id: i64,
    now: DateTime<Utc>,
) -> Result<types::NewsItem, repo::Error> {
    let res = sqlx::query_as::<_, sql_models::NewsRecord>(
        r#"UPDATE news_items SET deleted_at = $2
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *"#,
    )
    .bind(id)
    .bind(now)
    .fetch_optional(exec.as_exec())
    .await?
    .ok_or(repo::Error::NotFound(id))?;

    debug_assert!(res.is_deleted());
    res.try_into()
}

/// Returns all the items satisfying the liveness invariant at `now`.
pub async fn news_find_live(
    exec: &mut impl repo::AsExec,
    now: DateTime<Utc>,
) -> Result<Vec<types::NewsItem>, repo::Error> {
    let query = format!("SELECT * FROM news_items WHERE {LIVE_PREDICATE} ORDER BY id");

    let res = sqlx::query_as::<_, sql_models::NewsRecord>(&query)
        .bind(now)
        .fetch_all(exec.as_exec())
        .await?;

    into_items(res)
}

/// Live items matching `filter`, breaking news first, then by priority and
/// most recent publication.
pub async fn news_find_active(
    exec: &mut impl repo::AsExec,
    filter: &repo::ActiveFilter,
    now: DateTime<Utc>,
) -> Result<Vec<types::NewsItem>, repo::Error> {
    let query = format!(
        r#"SELECT * FROM news_items
        WHERE {LIVE_PREDICATE}
            AND ($2::TEXT IS NULL OR source = $2)
            AND ($3::TEXT IS NULL OR category = $3)
            AND (NOT $4 OR is_breaking)
        ORDER BY is_breaking DESC, priority DESC, published_at DESC NULLS LAST
        LIMIT $5"#
    );

    let res = sqlx::query_as::<_, sql_models::NewsRecord>(&query)
        .bind(now)
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.category.as_deref())
        .bind(filter.breaking_only)
        .bind(filter.effective_limit())
        .fetch_all(exec.as_exec())
        .await?;

    into_items(res)
}

/// One page of the items matching `filter`, most recently created first.
pub async fn news_find_all(
    exec: &mut impl repo::AsExec,
    filter: &repo::ListFilter,
) -> Result<Vec<types::NewsItem>, repo::Error> {
    let query = format!(
        r#"SELECT * FROM news_items
        WHERE {LIST_PREDICATE}
        ORDER BY created_at DESC, id DESC
        LIMIT $5 OFFSET $6"#
    );

    let res = sqlx::query_as::<_, sql_models::NewsRecord>(&query)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.category.as_deref())
        .bind(filter.breaking)
        .bind(filter.effective_limit())
        .bind(filter.offset())
        .fetch_all(exec.as_exec())
        .await?;

    into_items(res)
}

pub async fn news_count_all(
    exec: &mut impl repo::AsExec,
    filter: &repo::ListFilter,
) -> Result<i64, repo::Error> {
    let query = format!("SELECT COUNT(*) FROM news_items WHERE {LIST_PREDICATE}");

    let total = sqlx::query_scalar::<_, i64>(&query)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.category.as_deref())
        .bind(filter.breaking)
        .fetch_one(exec.as_exec())
        .await?;

    Ok(total)
}

pub async fn news_find_by_external_id(
    exec: &mut impl repo::AsExec,
    external_id: &str,
    source: types::NewsSource,
) -> Result<Option<types::NewsItem>, repo::Error> {
    let res = sqlx::query_as::<_, sql_models::NewsRecord>(
        r#"SELECT * FROM news_items
        WHERE external_id = $1 AND source = $2 AND deleted_at IS NULL
        FOR UPDATE"#,
    )
    .bind(external_id)
    .bind(source.as_str())
    .fetch_optional(exec.as_exec())
    .await?;

    res.map(types::NewsItem::try_from).transpose()
}
