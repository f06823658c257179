//! Lazily connected shared resources for data sources.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::FetchError;

type ConnectFuture<T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send>>;
type Connect<T> = Arc<dyn Fn() -> ConnectFuture<T> + Send + Sync>;

/// A connection or catalog handle shared by every query of a data source.
///
/// The first `get` runs the connector; concurrent callers wait on the same
/// attempt. A failed attempt leaves the cell empty so the next query retries.
pub struct SharedCatalog<T> {
    label: &'static str,
    cell: OnceCell<T>,
    connect: Connect<T>,
}

impl<T> std::fmt::Debug for SharedCatalog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCatalog")
            .field("label", &self.label)
            .field("connected", &self.cell.initialized())
            .finish()
    }
}

impl<T: Send + Sync + 'static> SharedCatalog<T> {
    pub fn new<F, Fut>(label: &'static str, connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        Self {
            label,
            cell: OnceCell::new(),
            connect: Arc::new(move || -> ConnectFuture<T> { Box::pin(connect()) }),
        }
    }

    /// Wraps an already connected value.
    pub fn ready(label: &'static str, value: T) -> Self {
        Self {
            label,
            cell: OnceCell::new_with(Some(value)),
            connect: Arc::new(|| -> ConnectFuture<T> {
                Box::pin(async {
                    Err::<T, FetchError>(FetchError::transient(
                        "CATALOG_UNAVAILABLE",
                        "catalog was constructed ready",
                    ))
                })
            }),
        }
    }

    pub async fn get(&self) -> Result<&T, FetchError> {
        self.cell
            .get_or_try_init(|| async {
                let started = Instant::now();
                debug!(catalog = self.label, "connecting shared catalog");
                let value = (self.connect)().await?;
                debug!(
                    catalog = self.label,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "shared catalog connected"
                );
                Ok::<T, FetchError>(value)
            })
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    /// Starts connecting in the background so the first query finds it ready.
    pub fn prewarm(self: &Arc<Self>) -> JoinHandle<()> {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = catalog.get().await {
                warn!(catalog = catalog.label, error = %err, "failed to prewarm shared catalog");
            }
        })
    }
}
