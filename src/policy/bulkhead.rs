use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::chain::{Next, Policy};
use crate::context::Context;
use crate::error::Error;
use crate::policy::metrics::MetricsCollector;
use crate::request::Request;
use crate::response::Response;
use crate::util::{read_unpoisoned, write_unpoisoned};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkheadConfig {
    max_concurrent: usize,
    per_host: bool,
}

impl BulkheadConfig {
    pub fn standard() -> Self {
        Self {
            max_concurrent: 100,
            per_host: true,
        }
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// One shared limit across all hosts instead of per-host isolation.
    pub fn global(mut self) -> Self {
        self.per_host = false;
        self
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Bounds concurrent in-flight requests with a non-blocking semaphore.
///
/// Acquisition is fail-fast: when the limit is reached the call returns
/// `BulkheadFull` immediately instead of queueing, keeping latency
/// predictable under saturation.
pub struct BulkheadPolicy {
    config: BulkheadConfig,
    global: Option<Arc<Semaphore>>,
    per_host: RwLock<HashMap<String, Arc<Semaphore>>>,
    collector: Option<Arc<MetricsCollector>>,
}

impl BulkheadPolicy {
    pub fn new(config: BulkheadConfig) -> Self {
        Self::with_collector(config, None)
    }

    pub(crate) fn with_collector(
        config: BulkheadConfig,
        collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            global: (!config.per_host).then(|| Arc::new(Semaphore::new(config.max_concurrent))),
            per_host: RwLock::new(HashMap::new()),
            config,
            collector,
        }
    }

    fn semaphore_for(&self, host: &str) -> Arc<Semaphore> {
        if let Some(global) = &self.global {
            return Arc::clone(global);
        }
        if let Some(found) = read_unpoisoned(&self.per_host).get(host) {
            return Arc::clone(found);
        }
        let mut semaphores = write_unpoisoned(&self.per_host);
        Arc::clone(
            semaphores
                .entry(host.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent))),
        )
    }

    /// Current holder count for a host (0 for unknown hosts).
    pub fn in_flight(&self, host: &str) -> usize {
        let semaphore = if let Some(global) = &self.global {
            Some(Arc::clone(global))
        } else {
            read_unpoisoned(&self.per_host).get(host).map(Arc::clone)
        };
        semaphore
            .map(|semaphore| {
                self.config
                    .max_concurrent
                    .saturating_sub(semaphore.available_permits())
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Policy for BulkheadPolicy {
    async fn execute(
        &self,
        ctx: &Context,
        request: Request,
        next: Next<'_>,
    ) -> crate::Result<Response> {
        if request.options().bulkhead_disabled() {
            return next.run(ctx, request).await;
        }

        let host = request.host().to_owned();
        let semaphore = self.semaphore_for(&host);

        let Ok(permit) = semaphore.try_acquire_owned() else {
            debug!(host = %host, max_concurrent = self.config.max_concurrent, "bulkhead full, rejecting request");
            if let Some(collector) = &self.collector {
                collector.inc_rejected_requests(&host);
            }
            return Err(Error::BulkheadFull {
                method: request.method().clone(),
                uri: request.uri_text().to_owned(),
                host,
            });
        };

        let outcome = next.run(ctx, request).await;
        drop(permit);
        outcome
    }
}
