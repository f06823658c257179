//! Data source seam and the cancellable fetch wrapped around it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::generation::QueryGeneration;
use crate::types::{ItemKey, ListItem, QueryParams};

/// External collaborator that produces rows for a query.
///
/// `fetch` should observe `token` at each of its own suspension points; the
/// pipeline additionally races the whole call against the token and checks it
/// between records, so a source that ignores it is still superseded correctly.
pub trait DataSource: Send + Sync + 'static {
    type Record: Send + 'static;

    fn fetch(
        &self,
        params: &QueryParams,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Self::Record>, FetchError>> + Send;

    /// Maps one payload record to a row; `None` skips the record.
    fn to_entity(&self, record: Self::Record) -> Result<Option<ListItem>, FetchError>;

    /// Whether `params` should clear the list instead of fetching.
    fn is_blank(&self, params: &QueryParams) -> bool {
        params.is_blank()
    }

    fn name(&self) -> &str {
        "source"
    }
}

/// Input to one fetch: what to ask for and which generation asks.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub params: QueryParams,
    pub generation: QueryGeneration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOperation {
    debounce: Duration,
}

impl FetchOperation {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }

    /// Runs `source` for `request`, honouring the generation's token.
    ///
    /// Rows come back with unique keys: a repeated key keeps the position of
    /// its first occurrence and the fields of its last one. The list is
    /// truncated to `params.limit` when that is non-zero.
    pub async fn run<S: DataSource>(
        &self,
        source: &S,
        request: &FetchRequest,
    ) -> Result<Vec<Arc<ListItem>>, FetchError> {
        let token = request.generation.token();

        if !self.debounce.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.debounce) => {}
            }
        }

        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let started = Instant::now();
        debug!(
            source = source.name(),
            generation = request.generation.id(),
            query = %request.params.describe(),
            "starting fetch"
        );

        let records = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            result = source.fetch(&request.params, token) => result?,
        };

        let mut rows: Vec<ListItem> = Vec::with_capacity(records.len());
        let mut positions: HashMap<ItemKey, usize> = HashMap::with_capacity(records.len());
        for record in records {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let Some(row) = source.to_entity(record)? else {
                continue;
            };
            match positions.get(row.key()) {
                Some(&index) => rows[index] = row,
                None => {
                    positions.insert(row.key().clone(), rows.len());
                    rows.push(row);
                }
            }
        }

        if request.params.limit > 0 {
            rows.truncate(request.params.limit);
        }

        debug!(
            source = source.name(),
            generation = request.generation.id(),
            count = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch complete"
        );

        Ok(rows.into_iter().map(Arc::new).collect())
    }
}
