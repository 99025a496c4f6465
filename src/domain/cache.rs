//! Explicit cache of fetched resources.
//!
//! One cell per fetch request. Concurrent resolves of the same request share
//! a single in-flight fetch; a miss or a failure leaves nothing behind, and a
//! cached instance that has since been destroyed is evicted and loaded again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::debug;

use crate::error::ResolveError;

use super::graph::ResourceGraph;
use super::resolver::FetchRequest;
use super::resource::ResourceHandle;

type Cell = Arc<OnceCell<ResourceHandle>>;

enum LoadFailure {
    Miss,
    Failed(ResolveError),
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    cells: Mutex<HashMap<FetchRequest, Cell>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, request: &FetchRequest) -> Cell {
        let mut cells = self.cells.lock().await;
        cells.entry(request.clone()).or_default().clone()
    }

    /// Drop the cell for `request`, unless it has already been replaced.
    async fn evict(&self, request: &FetchRequest, cell: &Cell) {
        let mut cells = self.cells.lock().await;
        if cells.get(request).is_some_and(|current| Arc::ptr_eq(current, cell)) {
            cells.remove(request);
        }
    }

    pub async fn len(&self) -> usize {
        self.cells.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Return the cached live instance for `request`, or run `load` once.
    pub async fn get_or_load<F, Fut>(
        &self,
        request: &FetchRequest,
        graph: &RwLock<ResourceGraph>,
        load: F,
    ) -> Result<Option<ResourceHandle>, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<ResourceHandle>, ResolveError>>,
    {
        let mut cell = self.cell(request).await;
        if let Some(handle) = cell.get() {
            if graph.read().await.is_live(handle) {
                return Ok(Some(handle.clone()));
            }
            debug!(request = %request, "cached resource was destroyed, reloading");
            self.evict(request, &cell).await;
            cell = self.cell(request).await;
        }

        let result = cell
            .get_or_try_init(|| async {
                match load().await {
                    Ok(Some(handle)) => Ok(handle),
                    Ok(None) => Err(LoadFailure::Miss),
                    Err(e) => Err(LoadFailure::Failed(e)),
                }
            })
            .await;

        match result {
            Ok(handle) => Ok(Some(handle.clone())),
            Err(LoadFailure::Miss) => {
                self.evict(request, &cell).await;
                Ok(None)
            }
            Err(LoadFailure::Failed(e)) => {
                self.evict(request, &cell).await;
                Err(e)
            }
        }
    }
}
