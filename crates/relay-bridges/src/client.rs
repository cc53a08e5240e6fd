use crate::pagination::{self, DEFAULT_MAX_PAGES, Pagination};
use relay_core::{Bridge, CallContext, Executor, Result};
use relay_proto::{JsonObject, Request, Response};
use tracing::debug;

/// A bridge plus the executor that drives it.
#[derive(Debug)]
pub struct Client<B: Bridge> {
    executor: Executor<B>,
    pagination: Pagination,
}

impl<B: Bridge> Client<B> {
    pub fn new(executor: Executor<B>, pagination: Pagination) -> Self {
        Self {
            executor,
            pagination,
        }
    }

    pub fn executor(&self) -> &Executor<B> {
        &self.executor
    }

    pub fn bridge(&self) -> &B {
        self.executor.bridge()
    }

    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Replaces the executor, e.g. to attach a shared cache or sink.
    pub fn map_executor(self, f: impl FnOnce(Executor<B>) -> Executor<B>) -> Self {
        Self {
            executor: f(self.executor),
            pagination: self.pagination,
        }
    }

    /// One logical call.
    pub async fn call(&self, request: Request, ctx: &CallContext) -> Result<Response> {
        self.executor.execute(request, ctx).await
    }

    /// Collects list items across pages with the bridge's default strategy.
    /// `max_pages == 0` means [`DEFAULT_MAX_PAGES`].
    pub async fn list_all(
        &self,
        request: Request,
        max_pages: usize,
        ctx: &CallContext,
    ) -> Result<Vec<JsonObject>> {
        self.list_all_with(request, max_pages, &self.pagination, ctx)
            .await
    }

    pub async fn list_all_with(
        &self,
        mut request: Request,
        max_pages: usize,
        strategy: &Pagination,
        ctx: &CallContext,
    ) -> Result<Vec<JsonObject>> {
        let max_pages = if max_pages == 0 {
            DEFAULT_MAX_PAGES
        } else {
            max_pages
        };
        strategy.first_page(&mut request);
        let mut out = Vec::new();
        for page in 1..=max_pages {
            let response = self.executor.execute(request.clone(), ctx).await?;
            let batch = pagination::items(&response);
            let batch_len = batch.len();
            out.extend(batch);
            debug!(provider = %self.bridge().provider(), page, batch_len, "list page");
            if !strategy.advance(&mut request, &response, batch_len) {
                break;
            }
        }
        Ok(out)
    }

    pub fn flush(&self) {
        self.executor.flush();
    }
}
