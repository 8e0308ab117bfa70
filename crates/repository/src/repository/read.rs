//! Read operations: find_by_id, find, count, paginate and friends.

use crate::convert::FIELD_IS_DELETED;
use crate::core::query::{Filter, Query};
use crate::core::store::{StoreCapability, StoredDocument};
use crate::error::RepositoryResult;
use crate::types::{EntityData, PageCursor, PaginatedResult, StoredEntity};

use super::options::{FindByIdOptions, FindOptions, FindPage};
use super::{Repository, absent};

/// Result sets larger than this are not written to the cache.
pub const MAX_CACHED_RESULTS: usize = 100;

/// A query split into the part the store runs and the part evaluated
/// in-process afterwards.
struct QueryPlan {
    native: Query,
    client: Option<Query>,
    offset: usize,
    limit: Option<usize>,
}

impl<T: EntityData> Repository<T> {
    /// Reads one entity by ID.
    ///
    /// Returns `Ok(None)` when the entity is absent or soft-deleted (unless
    /// `include_deleted`), or fails with `NotFound` when
    /// `throw_if_not_found` is set.
    pub async fn find_by_id(
        &self,
        id: &str,
        options: FindByIdOptions,
    ) -> RepositoryResult<Option<StoredEntity<T>>> {
        let result = self.find_by_id_inner(id, &options).await;
        self.observe("find_by_id", result)
    }

    pub(super) async fn find_by_id_inner(
        &self,
        id: &str,
        options: &FindByIdOptions,
    ) -> RepositoryResult<Option<StoredEntity<T>>> {
        self.validator.validate_id(id)?;
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;

        let use_cache = !options.bypass_cache && tx.is_none() && self.cache.is_enabled();
        if use_cache {
            if let Some(entity) = self.cache.get(id) {
                self.stats.record_cache_hit();
                if entity.is_deleted() && !options.include_deleted {
                    return absent(self.collection(), id, options.throw_if_not_found);
                }
                return Ok(Some(entity));
            }
            self.stats.record_cache_miss();
        }

        let Some(doc) = self.read_document(id, tx).await? else {
            return absent(self.collection(), id, options.throw_if_not_found);
        };
        let entity: StoredEntity<T> = self.converter.from_storage(doc)?;
        if entity.is_deleted() && !options.include_deleted {
            return absent(self.collection(), id, options.throw_if_not_found);
        }

        if tx.is_none() {
            self.cache.set(entity.clone());
        }
        Ok(Some(entity))
    }

    /// Returns `true` if a live entity with this ID exists.
    pub async fn exists(&self, id: &str) -> RepositoryResult<bool> {
        let result = self
            .find_by_id_inner(id, &FindByIdOptions::default())
            .await
            .map(|found| found.is_some());
        self.observe("exists", result)
    }

    /// Reads several entities by ID, skipping absent ones. Cached entities
    /// are served from the cache.
    pub async fn find_by_ids<S: AsRef<str>>(
        &self,
        ids: &[S],
        options: FindByIdOptions,
    ) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_by_id_inner(id.as_ref(), &options).await {
                Ok(Some(entity)) => found.push(entity),
                Ok(None) => {}
                Err(err) => return self.observe("find_by_ids", Err(err)),
            }
        }
        Ok(found)
    }

    /// Runs a query.
    ///
    /// Soft-deleted entities are excluded unless `include_deleted`. Offsets
    /// are applied client-side after fetching `limit + offset` results, so
    /// large offsets are better served by cursors.
    pub async fn find(&self, options: FindOptions) -> RepositoryResult<Vec<StoredEntity<T>>> {
        let result = self
            .find_inner(&options)
            .await
            .map(|(entities, _)| entities);
        self.observe("find", result)
    }

    /// Runs a query and returns the cursor positioned after the last result
    /// when the page is full.
    pub async fn find_page(&self, options: FindOptions) -> RepositoryResult<FindPage<T>> {
        let result = self
            .find_inner(&options)
            .await
            .map(|(items, next_cursor)| FindPage { items, next_cursor });
        self.observe("find_page", result)
    }

    /// Returns the first result of a query.
    pub async fn find_one(&self, options: FindOptions) -> RepositoryResult<Option<StoredEntity<T>>> {
        let options = options.limit(1);
        let result = self
            .find_inner(&options)
            .await
            .map(|(entities, _)| entities.into_iter().next());
        self.observe("find_one", result)
    }

    /// Counts the entities a query would return, ignoring limit, offset,
    /// ordering and cursors.
    pub async fn count(&self, options: FindOptions) -> RepositoryResult<u64> {
        let result = self.count_inner(&options).await;
        self.observe("count", result)
    }

    /// Returns one page of results plus the navigation totals. The count
    /// and the page query run concurrently.
    pub async fn paginate(
        &self,
        page: u32,
        page_size: u32,
        options: FindOptions,
    ) -> RepositoryResult<PaginatedResult<StoredEntity<T>>> {
        let result = self.paginate_inner(page, page_size, options).await;
        self.observe("paginate", result)
    }

    async fn paginate_inner(
        &self,
        page: u32,
        page_size: u32,
        options: FindOptions,
    ) -> RepositoryResult<PaginatedResult<StoredEntity<T>>> {
        self.validator.validate_pagination(page, page_size)?;

        let mut page_options = options.clone();
        page_options.limit = Some(page_size as usize);
        page_options.offset = (page as usize - 1) * page_size as usize;

        let (total, found) = tokio::join!(
            self.count_inner(&options),
            self.find_inner(&page_options)
        );
        let (items, _) = found?;
        Ok(PaginatedResult::new(items, total?, page, page_size))
    }

    pub(super) async fn find_inner(
        &self,
        options: &FindOptions,
    ) -> RepositoryResult<(Vec<StoredEntity<T>>, Option<PageCursor>)> {
        let docs = self.find_documents(options).await?;

        let next_cursor = match (options.limit, docs.last()) {
            (Some(limit), Some(last)) if docs.len() == limit => {
                let ordering = Query {
                    order_by: options.order_by.clone(),
                    ..Query::default()
                };
                Some(ordering.cursor_for(last))
            }
            _ => None,
        };

        let entities = docs
            .into_iter()
            .map(|doc| self.converter.from_storage(doc))
            .collect::<RepositoryResult<Vec<StoredEntity<T>>>>()?;

        if options.use_cache
            && options.transaction.is_none()
            && entities.len() <= MAX_CACHED_RESULTS
        {
            for entity in &entities {
                self.cache.set(entity.clone());
            }
        }
        Ok((entities, next_cursor))
    }

    async fn find_documents(&self, options: &FindOptions) -> RepositoryResult<Vec<StoredDocument>> {
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;
        let plan = self.plan_query(options, false)?;

        tracing::debug!(
            collection = %self.config.collection,
            native_filters = plan.native.filters.len(),
            client_side = plan.client.is_some(),
            limit = ?plan.native.limit,
            "running query",
        );

        let mut docs = match tx {
            Some(tx) => tx.query(&self.config.collection, &plan.native).await?,
            None => self.store.query(&self.config.collection, &plan.native).await?,
        };
        self.stats.record_reads(docs.len().max(1) as u64);

        if let Some(client) = &plan.client {
            docs = client.apply(docs);
        }
        let docs = docs.into_iter().skip(plan.offset);
        Ok(match plan.limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        })
    }

    pub(super) async fn count_inner(&self, options: &FindOptions) -> RepositoryResult<u64> {
        let tx = options.transaction.as_ref();
        Self::check_transaction(tx)?;
        let plan = self.plan_query(options, true)?;

        if plan.client.is_none() && tx.is_none() && self.store.supports(StoreCapability::NativeCount) {
            let total = self
                .store
                .count(&self.config.collection, &plan.native)
                .await?;
            self.stats.record_reads(1);
            return Ok(total);
        }

        let docs = match tx {
            Some(tx) => tx.query(&self.config.collection, &plan.native).await?,
            None => self.store.query(&self.config.collection, &plan.native).await?,
        };
        self.stats.record_reads(docs.len().max(1) as u64);

        Ok(match &plan.client {
            Some(client) => client.apply(docs).len() as u64,
            None => docs.len() as u64,
        })
    }

    /// Builds the filter list and splits it between store and client.
    fn plan_query(&self, options: &FindOptions, for_count: bool) -> RepositoryResult<QueryPlan> {
        let mut filters: Vec<Filter> = options
            .filter
            .iter()
            .map(|(field, value)| Filter::eq(field.clone(), value.clone()))
            .collect();
        filters.extend(options.advanced_filters.iter().cloned());
        if self.config.use_soft_deletes && !options.include_deleted {
            filters.push(Filter::eq(FIELD_IS_DELETED, false));
        }
        self.validator.validate_filters(&filters)?;

        let (native_filters, client_filters): (Vec<Filter>, Vec<Filter>) = filters
            .into_iter()
            .partition(|filter| self.store.supports_operator(filter.op));

        if for_count {
            return Ok(QueryPlan {
                native: Query {
                    filters: native_filters,
                    ..Query::default()
                },
                client: (!client_filters.is_empty()).then(|| Query {
                    filters: client_filters,
                    ..Query::default()
                }),
                offset: 0,
                limit: None,
            });
        }

        let has_cursor = options.start_after.is_some() || options.end_before.is_some();
        let cursors_unsupported = has_cursor && !self.store.supports(StoreCapability::Cursors);

        if client_filters.is_empty() && !cursors_unsupported {
            return Ok(QueryPlan {
                native: Query {
                    filters: native_filters,
                    order_by: options.order_by.clone(),
                    limit: options.limit.map(|limit| limit.saturating_add(options.offset)),
                    start_after: options.start_after.clone(),
                    end_before: options.end_before.clone(),
                },
                client: None,
                offset: options.offset,
                limit: options.limit,
            });
        }

        Ok(QueryPlan {
            native: Query {
                filters: native_filters,
                order_by: options.order_by.clone(),
                ..Query::default()
            },
            client: Some(Query {
                filters: client_filters,
                order_by: options.order_by.clone(),
                limit: None,
                start_after: options.start_after.clone(),
                end_before: options.end_before.clone(),
            }),
            offset: options.offset,
            limit: options.limit,
        })
    }
}
