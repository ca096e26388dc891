//! Runs registered scrapers, directly or through the job dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;
use tracing::{info, warn};

use super::{IngestTarget, PreviewItem, ScrapeContext, ScrapeOutcome, Scraper, ScraperRegistry};
use crate::dispatch::{
    CancelToken, DispatchError, JobContext, JobDispatcher, JobKind, JobSnapshot, Runnable,
};
use crate::reconcile::ReconciliationService;
use crate::repository::LedgerRepository;

/// Per-invocation switches for a scraper run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub max_pages: Option<usize>,
    /// Do not bring the ledger up to date with the archive first.
    pub skip_preflight: bool,
}

/// Wires scrapers to the ledger, the archive preflight and the index.
#[derive(Clone)]
pub struct ScraperRunner {
    registry: Arc<ScraperRegistry>,
    ledger: LedgerRepository,
    reconciler: Option<ReconciliationService>,
    ingest: Option<IngestTarget>,
    documents_dir: PathBuf,
}

impl ScraperRunner {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        ledger: LedgerRepository,
        documents_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            ledger,
            reconciler: None,
            ingest: None,
            documents_dir: documents_dir.into(),
        }
    }

    pub fn with_reconciler(mut self, reconciler: ReconciliationService) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_ingest(mut self, ingest: IngestTarget) -> Self {
        self.ingest = Some(ingest);
        self
    }

    pub fn registry(&self) -> &ScraperRegistry {
        &self.registry
    }

    fn context(&self, options: RunOptions, cancel: CancelToken) -> ScrapeContext {
        ScrapeContext {
            ledger: self.ledger.clone(),
            ingest: self.ingest.clone(),
            cancel,
            dry_run: options.dry_run,
            max_pages: options.max_pages,
            documents_dir: self.documents_dir.clone(),
        }
    }

    /// Run one scraper to completion.
    ///
    /// Unless this is a dry run or preflight is skipped, URLs the archive
    /// already holds are recorded first so the scraper does not fetch them.
    pub async fn run(
        &self,
        name: &str,
        options: RunOptions,
        cancel: CancelToken,
    ) -> anyhow::Result<ScrapeOutcome> {
        let scraper = self
            .registry
            .get(name)
            .with_context(|| format!("Unknown scraper: {}", name))?;

        if !options.dry_run && !options.skip_preflight {
            if let Some(ref reconciler) = self.reconciler {
                let added = reconciler
                    .preflight_sync(name)
                    .await
                    .with_context(|| format!("Preflight sync failed for {}", name))?;
                if added > 0 {
                    info!("Preflight recorded {} archived URLs for {}", added, name);
                }
            }
        }

        let ctx = self.context(options, cancel);
        let outcome = scraper.run(&ctx).await?;
        if outcome.cancelled {
            warn!("Scraper {} cancelled after {} pages", name, outcome.pages);
        } else {
            info!(
                "Scraper {} finished: {} downloaded, {} skipped, {} failed",
                name, outcome.downloaded, outcome.skipped, outcome.failed
            );
        }
        Ok(outcome)
    }

    pub async fn preview(&self, name: &str) -> anyhow::Result<Vec<PreviewItem>> {
        let scraper = self
            .registry
            .get(name)
            .with_context(|| format!("Unknown scraper: {}", name))?;
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        scraper.preview(&self.context(options, CancelToken::new())).await
    }

    /// Runnable for the dispatcher. Dry run and page limit come from the
    /// job context so the job snapshot and the run always agree.
    pub fn runnable(&self, name: &str, skip_preflight: bool) -> Runnable {
        let runner = self.clone();
        let name = name.to_string();
        Box::new(move |ctx: JobContext| {
            async move {
                let options = RunOptions {
                    dry_run: ctx.dry_run,
                    max_pages: ctx.max_pages,
                    skip_preflight,
                };
                let outcome = runner.run(&name, options, ctx.cancel).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(outcome)?)
            }
            .boxed()
        })
    }

    pub fn preview_runnable(&self, name: &str) -> Runnable {
        let runner = self.clone();
        let name = name.to_string();
        Box::new(move |_ctx: JobContext| {
            async move {
                let items = runner.preview(&name).await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(items)?)
            }
            .boxed()
        })
    }

    /// Queue a run on `dispatcher`.
    pub fn dispatch(
        &self,
        dispatcher: &JobDispatcher,
        name: &str,
        options: RunOptions,
    ) -> Result<JobSnapshot, DispatchError> {
        if self.registry.get(name).is_none() {
            return Err(DispatchError::UnknownScraper(name.to_string()));
        }
        dispatcher.enqueue(
            name,
            self.runnable(name, options.skip_preflight),
            JobKind::Run,
            options.dry_run,
            options.max_pages,
        )
    }

    /// Queue a preview on `dispatcher`.
    pub fn dispatch_preview(
        &self,
        dispatcher: &JobDispatcher,
        name: &str,
    ) -> Result<JobSnapshot, DispatchError> {
        if self.registry.get(name).is_none() {
            return Err(DispatchError::UnknownScraper(name.to_string()));
        }
        dispatcher.enqueue(name, self.preview_runnable(name), JobKind::Preview, true, None)
    }
}
