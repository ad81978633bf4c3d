//! ETL orchestration.
//!
//! Drives the extract -> transform -> load cycle per source and owns the run
//! lifecycle around it. Stage order is strict: transform never starts before
//! extraction has persisted raw records, load never starts before transform
//! has finished. Failures in one source never leak into another.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cdp_common::types::{RunStatus, SourceTag};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info};

use crate::etl::error::{EtlError, EtlResult};
use crate::etl::runs::{RunCounters, RunTracker};
use crate::etl::sources::{SourceAdapter, SourceRegistry};

/// Outcome of one pipeline invocation, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Missing when the run could not even be opened.
    pub run_id: Option<String>,
    pub source: SourceTag,
    pub status: RunStatus,
    pub records_processed: usize,
    pub records_loaded: usize,
    pub records_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    fn failed(source: SourceTag, run_id: Option<String>, error: String) -> Self {
        Self {
            run_id,
            source,
            status: RunStatus::Failed,
            records_processed: 0,
            records_loaded: 0,
            records_failed: 0,
            error: Some(error),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct StageOutcome {
    extracted: usize,
    loaded: usize,
    failed: usize,
}

pub struct EtlOrchestrator {
    registry: SourceRegistry,
    tracker: RunTracker,
}

impl EtlOrchestrator {
    pub fn new(registry: SourceRegistry, tracker: RunTracker) -> Self {
        Self { registry, tracker }
    }

    pub fn sources(&self) -> Vec<SourceTag> {
        self.registry.tags()
    }

    /// Run one source end to end. Infallible from the caller's point of
    /// view: every failure, a panicking stage included, is absorbed into a
    /// failed [`RunResult`].
    pub async fn run_source(&self, source: SourceTag) -> RunResult {
        let Some(adapter) = self.registry.get(source) else {
            return RunResult::failed(source, None, format!("no adapter registered for {source}"));
        };

        let run_id = match self.tracker.start(source).await {
            Ok(run_id) => run_id,
            Err(err) => {
                error!(%source, %err, "failed to open run");
                return RunResult::failed(source, None, err.to_string());
            },
        };

        // Unwinds from a misbehaving adapter are caught here so the run row
        // still reaches a terminal state instead of staying `running`.
        let staged = AssertUnwindSafe(self.execute(adapter.as_ref()))
            .catch_unwind()
            .await;
        match staged {
            Ok(Ok(stage)) => {
                let counters = RunCounters {
                    processed: stage.extracted as i64,
                    inserted: stage.loaded as i64,
                    updated: 0,
                    failed: stage.failed as i64,
                };
                if let Err(err) = self.tracker.update_counters(&run_id, counters).await {
                    return self.fail_run(source, run_id, err.to_string()).await;
                }
                if let Err(err) = self.tracker.complete(&run_id, true, None).await {
                    return RunResult::failed(source, Some(run_id), err.to_string());
                }
                RunResult {
                    run_id: Some(run_id),
                    source,
                    status: RunStatus::Completed,
                    records_processed: stage.extracted,
                    records_loaded: stage.loaded,
                    records_failed: stage.failed,
                    error: None,
                }
            },
            Ok(Err(err)) => self.fail_run(source, run_id, err.to_string()).await,
            Err(panic) => {
                let message = format!("stage panicked: {}", panic_message(panic.as_ref()));
                self.fail_run(source, run_id, message).await
            },
        }
    }

    /// Parse a source name and run it. Unknown names surface as a
    /// validation error so the API can answer 400 instead of opening a run.
    pub async fn run_source_by_name(&self, name: &str) -> EtlResult<RunResult> {
        let source: SourceTag = name
            .parse()
            .map_err(|err: cdp_common::CdpError| EtlError::validation(err.to_string()))?;
        Ok(self.run_source(source).await)
    }

    /// Run every registered source sequentially in canonical order.
    pub async fn run_all(&self) -> BTreeMap<SourceTag, RunResult> {
        let mut results = BTreeMap::new();
        for source in self.registry.tags() {
            let result = self.run_source(source).await;
            results.insert(source, result);
        }
        results
    }

    /// Run every registered source concurrently, one task per source.
    /// Stages within a source stay strictly sequential.
    pub async fn run_all_concurrent(self: Arc<Self>) -> BTreeMap<SourceTag, RunResult> {
        let mut handles = Vec::new();
        for source in self.registry.tags() {
            let orchestrator = Arc::clone(&self);
            handles.push((
                source,
                tokio::spawn(async move { orchestrator.run_source(source).await }),
            ));
        }

        let mut results = BTreeMap::new();
        for (source, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => RunResult::failed(source, None, format!("task panicked: {err}")),
            };
            results.insert(source, result);
        }
        results
    }

    async fn fail_run(&self, source: SourceTag, run_id: String, error: String) -> RunResult {
        error!(%source, run_id, error, "run failed");
        if let Err(finalize_err) = self.tracker.complete(&run_id, false, Some(error.clone())).await
        {
            error!(run_id, %finalize_err, "failed to record run failure");
        }
        RunResult::failed(source, Some(run_id), error)
    }

    async fn execute(&self, adapter: &dyn SourceAdapter) -> EtlResult<StageOutcome> {
        let source = adapter.source();

        info!(%source, "extract stage");
        let raw = adapter.extract().await?;
        if raw.is_empty() {
            info!(%source, "nothing to process");
            return Ok(StageOutcome::default());
        }

        info!(%source, records = raw.len(), "transform stage");
        let normalized = adapter.transform(&raw);
        let dropped_in_transform = raw.len() - normalized.len();

        info!(%source, records = normalized.len(), "load stage");
        let outcome = adapter.load(&normalized).await?;

        Ok(StageOutcome {
            extracted: raw.len(),
            loaded: outcome.loaded,
            failed: dropped_in_transform + outcome.failed,
        })
    }
}
