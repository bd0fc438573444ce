//! The recipe processing saga.
//!
//! One run walks a provider through four phases:
//!
//! 1. **Discovering**: crawl from the seed URL, keep recipe pages only.
//! 2. **Fingerprinting**: fetch each page, hash it and drop unchanged or
//!    duplicate content.
//! 3. **Processing**: extract a recipe from each stored fingerprint.
//! 4. **Persisting**: close the batch and complete the saga.
//!
//! Every item outcome is written to the saga's ledger and persisted before
//! the next item starts, so a run reloaded from storage after a crash picks
//! up exactly where the previous one stopped.

use crate::core::{State, StateMap, StateValue};
use crate::domain::{ContentQuality, Fingerprint, RecipeBatch};
use crate::error::{FailureKind, ItemError, SagaError};
use crate::policy::{BatchCompletionPolicy, CompletionReason, ErrorClass, ErrorClassifier, RetryPolicy};
use crate::saga::config::SagaConfig;
use crate::saga::events::{EventSink, SagaEvent, TracingEventSink};
use crate::saga::ledger::{FailedUrlRecord, SagaLedger, CURRENT_INDEX, PROCESSED_URLS};
use crate::saga::state::{SagaState, SagaStatus};
use crate::traits::{
    ContentFetcher, FingerprintRepository, RateLimiter, RecipeBatchRepository, RecipeExtractor,
    RecipeRepository, SagaStateRepository, UrlDiscovery,
};
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Phase {
    Discovering,
    Fingerprinting,
    Processing,
    Persisting,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discovering => "Discovering",
            Self::Fingerprinting => "Fingerprinting",
            Self::Processing => "Processing",
            Self::Persisting => "Persisting",
        }
    }

    /// Unknown or empty names map to the first phase.
    pub fn parse(name: &str) -> Self {
        match name {
            "Fingerprinting" => Self::Fingerprinting,
            "Processing" => Self::Processing,
            "Persisting" => Self::Persisting,
            _ => Self::Discovering,
        }
    }
}

const DISCOVERING_PROGRESS: i64 = 25;
const FINGERPRINTING_PROGRESS: i64 = 50;
const PROCESSING_END_PROGRESS: i64 = 90;
const PERSISTING_PROGRESS: i64 = 90;

/// Everything the saga talks to.
#[derive(Clone)]
pub struct SagaDependencies {
    pub discovery: Arc<dyn UrlDiscovery>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub extractor: Arc<dyn RecipeExtractor>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub sagas: Arc<dyn SagaStateRepository>,
    pub batches: Arc<dyn RecipeBatchRepository>,
    pub fingerprints: Arc<dyn FingerprintRepository>,
    pub recipes: Arc<dyn RecipeRepository>,
}

/// Summary of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub struct SagaReport {
    pub saga_id: Uuid,
    pub batch_id: Uuid,
    pub processed_urls: Vec<String>,
    pub skipped_urls: Vec<String>,
    pub failed_urls: Vec<FailedUrlRecord>,
    /// `NotComplete` when the run ran out of URLs before hitting a limit.
    pub completion_reason: CompletionReason,
    /// Discovered URLs left untouched because the batch hit a limit.
    pub remaining: usize,
}

impl SagaReport {
    pub fn processed_count(&self) -> usize {
        self.processed_urls.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped_urls.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_urls.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SagaOutcome {
    Completed(SagaReport),
    /// Stopped by the cancellation token; the saga is `Paused` and resumable.
    Cancelled { saga_id: Uuid, phase: String },
}

/// Mutable state of one run. Owned by `run`, lent to the phase methods.
struct RunContext {
    state: SagaState,
    ledger: SagaLedger,
    batch: RecipeBatch,
}

enum Attempt<T> {
    Done(T),
    Failed(FailedUrlRecord),
    Cancelled,
}

enum FingerprintOutcome {
    /// Queued for processing from the given fingerprint.
    Ready(Uuid),
    Skipped(&'static str),
    Failed(FailedUrlRecord),
    Cancelled,
}

enum Flow {
    Continue,
    Cancelled,
}

pub struct RecipeProcessingSaga {
    config: SagaConfig,
    deps: SagaDependencies,
    events: Arc<dyn EventSink>,
    classifier: ErrorClassifier,
    completion: BatchCompletionPolicy,
    retry: RetryPolicy,
}

impl RecipeProcessingSaga {
    pub fn new(config: SagaConfig, deps: SagaDependencies) -> Self {
        let retry = config.retry_policy();
        Self {
            config,
            deps,
            events: Arc::new(TracingEventSink),
            classifier: ErrorClassifier,
            completion: BatchCompletionPolicy,
            retry,
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Create a fresh saga for `correlation_id` and run it.
    pub async fn start(
        &self,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SagaOutcome, SagaError> {
        let state = SagaState::create_for_recipe_processing(correlation_id)?;
        self.run(state, cancel).await
    }

    /// Reload a saga from storage and continue it.
    pub async fn resume(
        &self,
        saga_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<SagaOutcome, SagaError> {
        let state = self
            .deps
            .sagas
            .get_by_id(saga_id)
            .await?
            .ok_or_else(|| SagaError::Ledger(format!("saga {saga_id} not found")))?;
        self.run(state, cancel).await
    }

    /// Drive `state` to completion, cancellation or a saga-fatal error.
    ///
    /// `state` may be brand new, paused, or a `Running` saga reloaded after a
    /// crash. Terminal sagas are rejected.
    #[tracing::instrument(
        skip(self, state, cancel),
        fields(saga_id = %state.id(), provider = %self.config.provider_id)
    )]
    pub async fn run(
        &self,
        mut state: SagaState,
        cancel: &CancellationToken,
    ) -> Result<SagaOutcome, SagaError> {
        if state.status().is_final() {
            return Err(SagaError::AlreadyFinished {
                id: state.id(),
                status: state.status().name().to_string(),
            });
        }

        let is_new = self.deps.sagas.get_by_id(state.id()).await?.is_none();
        if is_new {
            self.deps.sagas.add(&state).await?;
        }

        if let Err(err) = self.config.validate() {
            tracing::error!(error = %err, "provider configuration rejected");
            self.fail_saga(&mut state, None, &err.to_string()).await;
            return Err(err.into());
        }

        match state.status() {
            SagaStatus::Created => {
                let event = state.start()?;
                self.publish(event);
            }
            SagaStatus::Paused => {
                let event = state.resume()?;
                self.publish(event);
            }
            _ => tracing::info!(phase = state.current_phase(), "resuming running saga"),
        }

        let mut ctx = match self.open_run(state).await {
            Ok(ctx) => ctx,
            Err((mut state, err)) => {
                self.fail_saga(&mut state, None, &err.to_string()).await;
                return Err(err);
            }
        };

        match self.drive(&mut ctx, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(error = %err, phase = ctx.state.current_phase(), "saga failed");
                let message = err.to_string();
                self.fail_saga(&mut ctx.state, Some((&mut ctx.batch, &ctx.ledger)), &message)
                    .await;
                Err(err)
            }
        }
    }

    /// Load or create the batch and bring it in line with the ledger.
    async fn open_run(&self, state: SagaState) -> Result<RunContext, (SagaState, SagaError)> {
        let mut ledger = SagaLedger::from_state(state.state_data());

        let batch = match ledger.batch_id {
            Some(id) => match self.deps.batches.get_by_id(id).await {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    return Err((state, SagaError::Ledger(format!("batch {id} not found"))))
                }
                Err(err) => return Err((state, err.into())),
            },
            None => {
                let batch = match RecipeBatch::create_batch(
                    self.config.provider_id.as_str(),
                    self.config.batch_size,
                    self.config.time_window,
                ) {
                    Ok(batch) => batch,
                    Err(err) => return Err((state, err.into())),
                };
                if let Err(err) = self.deps.batches.add(&batch).await {
                    return Err((state, err.into()));
                }
                ledger.batch_id = Some(batch.id());
                batch
            }
        };

        let mut ctx = RunContext {
            state,
            ledger,
            batch,
        };
        if let Err(err) = self.resync_batch(&mut ctx) {
            return Err((ctx.state, err));
        }
        Ok(ctx)
    }

    /// Apply ledger outcomes the batch missed because of a crash between the
    /// saga write and the batch write.
    fn resync_batch(&self, ctx: &mut RunContext) -> Result<(), SagaError> {
        if ctx.batch.status().is_final() {
            return Ok(());
        }
        let known: HashSet<String> = ctx
            .batch
            .processed_urls()
            .iter()
            .chain(ctx.batch.skipped_urls())
            .chain(ctx.batch.failed_urls())
            .cloned()
            .collect();

        let mut replayed = 0usize;
        for url in ctx.ledger.processed_urls.iter().filter(|u| !known.contains(*u)) {
            ctx.batch.mark_recipe_processed(url.as_str())?;
            replayed += 1;
        }
        for url in ctx.ledger.skipped_urls.iter().filter(|u| !known.contains(*u)) {
            ctx.batch.mark_recipe_skipped(url.as_str())?;
            replayed += 1;
        }
        for record in ctx.ledger.failed_urls.iter().filter(|r| !known.contains(&r.url)) {
            ctx.batch.mark_recipe_failed(record.url.as_str())?;
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!(replayed, batch_id = %ctx.batch.id(), "batch resynchronised from ledger");
        }
        Ok(())
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<SagaOutcome, SagaError> {
        let phase = Phase::parse(ctx.state.current_phase());

        if phase <= Phase::Discovering {
            self.discover(ctx).await?;
        }
        if phase <= Phase::Fingerprinting {
            if let Flow::Cancelled = self.fingerprint_all(ctx, cancel).await? {
                return self.pause(ctx, Phase::Fingerprinting).await;
            }
        }
        if phase <= Phase::Processing {
            if let Flow::Cancelled = self.process_all(ctx, cancel).await? {
                return self.pause(ctx, Phase::Processing).await;
            }
        }
        self.persist_results(ctx).await
    }

    async fn discover(&self, ctx: &mut RunContext) -> Result<(), SagaError> {
        let started = Instant::now();
        if ctx.ledger.discovered_urls.is_empty() {
            let found = self
                .deps
                .discovery
                .discover_urls(
                    &self.config.seed_url,
                    self.config.max_depth,
                    self.config.max_urls,
                )
                .await
                .map_err(SagaError::Discovery)?;

            let mut seen = HashSet::new();
            let limit = usize::try_from(self.config.max_urls).unwrap_or(usize::MAX);
            ctx.ledger.discovered_urls = found
                .into_iter()
                .map(|d| d.url)
                .filter(|url| {
                    self.deps
                        .discovery
                        .is_recipe_url(url, &self.config.provider_id)
                })
                .filter(|url| seen.insert(url.clone()))
                .take(limit)
                .collect();
        }

        tracing::info!(
            discovered = ctx.ledger.discovered_urls.len(),
            seed = %self.config.seed_url,
            "discovery finished"
        );
        ctx.state.update_metrics(0, 0, Some(started.elapsed()))?;
        self.save(ctx, Phase::Discovering, DISCOVERING_PROGRESS)
            .await
    }

    async fn fingerprint_all(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Flow, SagaError> {
        let started = Instant::now();
        self.save(ctx, Phase::Fingerprinting, FINGERPRINTING_PROGRESS)
            .await?;

        for idx in ctx.ledger.fingerprint_index..ctx.ledger.discovered_urls.len() {
            if cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if self.batch_is_done(ctx) || self.fingerprint_quota_met(ctx) {
                break;
            }
            let url = ctx.ledger.discovered_urls[idx].clone();
            let already_fingerprinted = ctx.ledger.fingerprinted_urls.contains(&url);

            if !already_fingerprinted && !ctx.ledger.is_settled(&url) {
                match self.fingerprint_url(ctx, &url, cancel).await? {
                    FingerprintOutcome::Ready(id) => ctx.ledger.record_fingerprinted(&url, id),
                    FingerprintOutcome::Skipped(reason) => {
                        tracing::debug!(url = %url, reason, "skipping url");
                        ctx.ledger.record_skipped(&url);
                        ctx.batch.mark_recipe_skipped(url.as_str())?;
                    }
                    FingerprintOutcome::Failed(record) => {
                        ctx.batch.mark_recipe_failed(record.url.as_str())?;
                        ctx.ledger.record_failed(record);
                        ctx.state.update_metrics(0, 1, None)?;
                    }
                    FingerprintOutcome::Cancelled => return Ok(Flow::Cancelled),
                }
            }
            ctx.ledger.fingerprint_index = idx + 1;
            self.save(ctx, Phase::Fingerprinting, FINGERPRINTING_PROGRESS)
                .await?;
        }

        tracing::info!(
            fingerprinted = ctx.ledger.fingerprinted_urls.len(),
            skipped = ctx.ledger.skipped_urls.len(),
            "fingerprinting finished"
        );
        ctx.state.update_metrics(0, 0, Some(started.elapsed()))?;
        Ok(Flow::Continue)
    }

    async fn fingerprint_url(
        &self,
        ctx: &mut RunContext,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FingerprintOutcome, SagaError> {
        let limiter = &self.deps.rate_limiter;
        let fetcher = &self.deps.fetcher;
        let fetched = self
            .with_retries(ctx, url, Phase::Fingerprinting, cancel, move || async move {
                limiter.acquire().await;
                let result = fetcher.fetch(url).await;
                limiter.release();
                result
            })
            .await?;

        let content = match fetched {
            Attempt::Done(content) => content,
            Attempt::Cancelled => return Ok(FingerprintOutcome::Cancelled),
            Attempt::Failed(record) => {
                self.store_failed_fingerprint(&record).await?;
                return Ok(FingerprintOutcome::Failed(record));
            }
        };

        let quality = ContentQuality::assess(&content);
        let content_length = content.len();
        let mut fingerprint =
            match Fingerprint::create_success(url, content, &self.config.provider_id, quality) {
                Ok(fp) => fp,
                Err(err) => {
                    let record = self.failure_record(
                        url,
                        &ItemError::from(err),
                        true,
                        0,
                        Phase::Fingerprinting,
                    );
                    return Ok(FingerprintOutcome::Failed(record));
                }
            };

        let previous = self.deps.fingerprints.get_latest_processed(url).await?;
        if previous.is_some() && !fingerprint.has_content_changed(previous.as_ref()) {
            return Ok(FingerprintOutcome::Skipped("content unchanged since last run"));
        }
        if let Some(existing) = self
            .deps
            .fingerprints
            .get_by_hash(fingerprint.content_hash())
            .await?
        {
            if existing.url() != url {
                return Ok(FingerprintOutcome::Skipped("content duplicates another url"));
            }
            if !existing.is_processed() {
                // left behind by an interrupted run
                return Ok(FingerprintOutcome::Ready(existing.id()));
            }
        }
        if !fingerprint.is_ready_for_processing() {
            return Ok(FingerprintOutcome::Skipped("content quality too low"));
        }

        fingerprint.set_metadata("SagaId", ctx.state.id().to_string());
        fingerprint.set_metadata("ContentLength", content_length);
        self.deps.fingerprints.add(&fingerprint).await?;
        Ok(FingerprintOutcome::Ready(fingerprint.id()))
    }

    /// Stop fetching once the processed and queued URLs fill the batch.
    fn fingerprint_quota_met(&self, ctx: &RunContext) -> bool {
        let queued = u64::try_from(ctx.ledger.remaining_to_process().len()).unwrap_or(u64::MAX);
        let filled = u64::from(ctx.batch.processed_count()).saturating_add(queued);
        if filled >= u64::from(ctx.batch.batch_size()) {
            tracing::info!(queued, batch_size = ctx.batch.batch_size(), "batch quota queued");
            true
        } else {
            false
        }
    }

    /// Store the failed fetch with one unit of retry budget per transient
    /// attempt, so the fingerprint agrees with its `FailedUrls` entry.
    async fn store_failed_fingerprint(&self, record: &FailedUrlRecord) -> Result<(), SagaError> {
        let mut fingerprint = match Fingerprint::create_failure(
            record.url.as_str(),
            self.config.provider_id.as_str(),
            record.error.as_str(),
        ) {
            Ok(fp) => fp,
            Err(err) => {
                tracing::debug!(url = %record.url, error = %err, "failure not fingerprinted");
                return Ok(());
            }
        };
        for _ in 0..record.retry_count {
            if !fingerprint.can_retry() {
                break;
            }
            fingerprint.prepare_for_retry()?;
            fingerprint.complete_retry_failure(record.error.as_str())?;
        }
        if record.error_type == FailureKind::Blocked.name() {
            fingerprint.mark_as_blocked(record.error.as_str())?;
        }
        self.deps.fingerprints.add(&fingerprint).await?;
        Ok(())
    }

    async fn process_all(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<Flow, SagaError> {
        let started = Instant::now();
        let total = ctx.ledger.fingerprinted_urls.len();

        for idx in ctx.ledger.current_index..total {
            if cancel.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            if self.batch_is_done(ctx) {
                break;
            }
            let url = ctx.ledger.fingerprinted_urls[idx].clone();
            if !ctx.ledger.is_settled(&url) {
                match self.process_url(ctx, &url, cancel).await? {
                    Attempt::Done(()) => {
                        ctx.ledger.record_processed(&url);
                        ctx.batch.mark_recipe_processed(url.as_str())?;
                        ctx.state.update_metrics(1, 0, None)?;
                    }
                    Attempt::Failed(record) => {
                        tracing::warn!(
                            url = %url,
                            error = %record.error,
                            permanent = record.is_permanent,
                            retries = record.retry_count,
                            "recipe processing failed"
                        );
                        ctx.batch.mark_recipe_failed(record.url.as_str())?;
                        ctx.ledger.record_failed(record);
                        ctx.state.update_metrics(0, 1, None)?;
                    }
                    Attempt::Cancelled => return Ok(Flow::Cancelled),
                }
            }

            ctx.ledger.current_index = idx + 1;
            let span = PROCESSING_END_PROGRESS - FINGERPRINTING_PROGRESS;
            let done = i64::try_from(idx + 1).unwrap_or(i64::MAX);
            let progress = FINGERPRINTING_PROGRESS
                + span * done / i64::try_from(total.max(1)).unwrap_or(i64::MAX);
            self.item_checkpoint(ctx)?;
            self.save(ctx, Phase::Processing, progress).await?;
        }

        ctx.state.update_metrics(0, 0, Some(started.elapsed()))?;
        Ok(Flow::Continue)
    }

    async fn process_url(
        &self,
        ctx: &mut RunContext,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Attempt<()>, SagaError> {
        let id = ctx
            .ledger
            .fingerprint_ids
            .get(url)
            .copied()
            .ok_or_else(|| SagaError::Ledger(format!("no fingerprint recorded for {url}")))?;
        let mut fingerprint = self
            .deps
            .fingerprints
            .get_by_id(id)
            .await?
            .ok_or_else(|| SagaError::Ledger(format!("fingerprint {id} for {url} not found")))?;

        if !fingerprint.is_processed() {
            let leftover = self
                .deps
                .recipes
                .get_by_url(url)
                .await?
                .filter(|r| r.fingerprint_id == Some(fingerprint.id()));
            let recipe = match leftover {
                // saved by an interrupted run before the fingerprint was marked
                Some(existing) => existing,
                None => {
                    let Some(raw) = fingerprint.raw_content().map(str::to_string) else {
                        let err = ItemError::new(
                            FailureKind::InvalidOperation,
                            format!("fingerprint {id} has no content to extract"),
                        );
                        return Ok(Attempt::Failed(self.failure_record(
                            url,
                            &err,
                            true,
                            0,
                            Phase::Processing,
                        )));
                    };
                    let extractor = &self.deps.extractor;
                    let source = &fingerprint;
                    let raw = raw.as_str();
                    let extracted = self
                        .with_retries(ctx, url, Phase::Processing, cancel, move || {
                            extractor.extract(raw, source)
                        })
                        .await?;
                    let recipe = match extracted {
                        Attempt::Done(recipe) => recipe.with_fingerprint(fingerprint.id()),
                        Attempt::Failed(record) => return Ok(Attempt::Failed(record)),
                        Attempt::Cancelled => return Ok(Attempt::Cancelled),
                    };
                    self.deps.recipes.add(&recipe).await?;
                    recipe
                }
            };
            fingerprint.mark_as_processed(Some(recipe.id()))?;
            fingerprint.clear_raw_content()?;
            self.deps.fingerprints.update(&fingerprint).await?;
            tracing::debug!(url = %url, recipe_id = %recipe.id(), title = %recipe.title, "recipe saved");
        }
        Ok(Attempt::Done(()))
    }

    async fn persist_results(&self, ctx: &mut RunContext) -> Result<SagaOutcome, SagaError> {
        let now = Utc::now();
        let reason = self.completion.completion_reason(&ctx.batch, now);
        self.save(ctx, Phase::Persisting, PERSISTING_PROGRESS)
            .await?;

        if !ctx.batch.status().is_final() {
            ctx.batch.complete_batch()?;
            self.deps.batches.update(&ctx.batch).await?;
        }

        let remaining =
            ctx.ledger.remaining_to_process().len() + ctx.ledger.pending_fingerprints().len();
        let mut final_metrics = StateMap::new();
        final_metrics.insert("ProcessedCount".into(), ctx.ledger.processed_urls.len().into());
        final_metrics.insert("SkippedCount".into(), ctx.ledger.skipped_urls.len().into());
        final_metrics.insert("FailedCount".into(), ctx.ledger.failed_urls.len().into());
        final_metrics.insert("RemainingCount".into(), remaining.into());
        final_metrics.insert("CompletionReason".into(), format!("{reason:?}").into());

        if let Some(event) = ctx.state.complete(Some(final_metrics))? {
            self.publish(event);
        }
        self.deps.sagas.update(&ctx.state).await?;

        tracing::info!(
            processed = ctx.ledger.processed_urls.len(),
            skipped = ctx.ledger.skipped_urls.len(),
            failed = ctx.ledger.failed_urls.len(),
            remaining,
            reason = ?reason,
            "saga completed"
        );

        Ok(SagaOutcome::Completed(SagaReport {
            saga_id: ctx.state.id(),
            batch_id: ctx.batch.id(),
            processed_urls: ctx.ledger.processed_urls.clone(),
            skipped_urls: ctx.ledger.skipped_urls.clone(),
            failed_urls: ctx.ledger.failed_urls.clone(),
            completion_reason: reason,
            remaining,
        }))
    }

    /// Run `op` until it succeeds, fails permanently, exhausts its retries
    /// or the token fires during a backoff.
    async fn with_retries<T, F, Fut>(
        &self,
        ctx: &mut RunContext,
        url: &str,
        phase: Phase,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Attempt<T>, SagaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ItemError>>,
    {
        loop {
            let err = match op().await {
                Ok(value) => return Ok(Attempt::Done(value)),
                Err(err) => err,
            };

            if self.classifier.classify(&err) == ErrorClass::Permanent {
                return Ok(Attempt::Failed(self.failure_record(url, &err, true, 0, phase)));
            }

            let used = ctx.ledger.retries_used(url) + 1;
            ctx.ledger.retry_counts.insert(url.to_string(), used);
            if !self.retry.allows_retry(used) {
                return Ok(Attempt::Failed(self.failure_record(url, &err, false, used, phase)));
            }

            let delay = self.retry.next_delay(used - 1);
            tracing::warn!(
                url = %url,
                error = %err,
                attempt = used,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "transient failure, backing off"
            );
            let progress = i64::from(ctx.state.phase_progress());
            self.save(ctx, phase, progress).await?;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(Attempt::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn failure_record(
        &self,
        url: &str,
        err: &ItemError,
        is_permanent: bool,
        retry_count: u32,
        phase: Phase,
    ) -> FailedUrlRecord {
        FailedUrlRecord {
            url: url.to_string(),
            error: err.message.clone(),
            error_type: err.kind.name().to_string(),
            is_permanent,
            retry_count,
            retryable: false,
            timestamp: Utc::now(),
            phase: phase.name().to_string(),
        }
    }

    fn batch_is_done(&self, ctx: &RunContext) -> bool {
        let now = Utc::now();
        if self.completion.should_complete_batch(&ctx.batch, now) {
            tracing::info!(
                reason = ?self.completion.completion_reason(&ctx.batch, now),
                processed = ctx.batch.processed_count(),
                "batch limit reached"
            );
            true
        } else {
            false
        }
    }

    /// Record the phase and ledger, then write the saga and the batch.
    async fn save(
        &self,
        ctx: &mut RunContext,
        phase: Phase,
        progress: i64,
    ) -> Result<(), SagaError> {
        let event = ctx
            .state
            .update_progress(phase.name(), progress, Some(ctx.ledger.to_state()))?;
        self.publish(event);
        self.deps.sagas.update(&ctx.state).await?;
        self.deps.batches.update(&ctx.batch).await?;
        Ok(())
    }

    /// Named per-item checkpoint, persisted by the following save.
    fn item_checkpoint(&self, ctx: &mut RunContext) -> Result<(), SagaError> {
        let mut data = StateMap::new();
        data.insert(
            PROCESSED_URLS.into(),
            StateValue::string_list(&ctx.ledger.processed_urls),
        );
        data.insert(CURRENT_INDEX.into(), ctx.ledger.current_index.into());
        data.insert("Phase".into(), Phase::Processing.name().into());
        let event = ctx.state.create_checkpoint(Phase::Processing.name(), data)?;
        self.publish(event);
        Ok(())
    }

    async fn pause(&self, ctx: &mut RunContext, phase: Phase) -> Result<SagaOutcome, SagaError> {
        let progress = i64::from(ctx.state.phase_progress());
        let mut data = StateMap::new();
        data.insert(CURRENT_INDEX.into(), ctx.ledger.current_index.into());
        let event = ctx.state.create_checkpoint(phase.name(), data)?;
        self.publish(event);
        let event = ctx.state.pause()?;
        self.publish(event);
        self.save(ctx, phase, progress).await?;

        tracing::info!(phase = phase.name(), "saga paused by cancellation");
        Ok(SagaOutcome::Cancelled {
            saga_id: ctx.state.id(),
            phase: phase.name().to_string(),
        })
    }

    /// Best effort: the original error is what the caller sees.
    async fn fail_saga(
        &self,
        state: &mut SagaState,
        run: Option<(&mut RecipeBatch, &SagaLedger)>,
        message: &str,
    ) {
        let batch = match run {
            Some((batch, ledger)) => {
                let phase = state.current_phase().to_string();
                let progress = i64::from(state.phase_progress());
                if let Err(err) = state.update_progress(phase, progress, Some(ledger.to_state())) {
                    tracing::warn!(error = %err, "could not record ledger on failed saga");
                }
                Some(batch)
            }
            None => None,
        };
        match state.fail(message, Some(format!("phase: {}", state.current_phase()))) {
            Ok(Some(event)) => self.publish(event),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "could not mark saga failed"),
        }
        if let Err(err) = self.deps.sagas.update(state).await {
            // the batch must never get ahead of the stored saga
            tracing::warn!(error = %err, "could not persist failed saga");
            return;
        }
        if let Some(batch) = batch {
            if batch.fail_batch().is_ok() {
                if let Err(err) = self.deps.batches.update(batch).await {
                    tracing::warn!(error = %err, "could not persist failed batch");
                }
            }
        }
    }

    fn publish(&self, event: SagaEvent) {
        self.events.publish(&event);
    }
}
