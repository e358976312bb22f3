//! Crawl orchestrator - drives every target of a job
//!
//! Each target runs as its own task and walks its pages in order:
//! - wait on the target's throttle
//! - fetch through the strategy selector, classifying every attempt
//! - merge the extracted records under the job-wide merge lock
//! - flush the sink and checkpoint in batches
//!
//! Only checkpoint, sink and configuration failures stop the job. Everything
//! else ends at most the target it happened on.

use crate::catalog::{MergeContext, MergeEngine, MergeOutcome};
use crate::config::{Config, SiteCapabilities, TargetConfig};
use crate::crawler::classifier::{Classifier, FailureKind};
use crate::crawler::fetcher::{FetchAttempt, FetchRequest, Fetcher, TransportError};
use crate::crawler::identity::{Identity, IdentityPool};
use crate::crawler::progress::ProgressHandle;
use crate::crawler::retry::RetryPolicy;
use crate::crawler::throttle::{AdaptiveThrottle, ThrottleDecision, WaitOutcome};
use crate::extract::{Content, ContentSource, SiteRegistry, Strategy, StrategySelector};
use crate::output::OutputSink;
use crate::state::TargetState;
use crate::storage::{CheckpointState, CheckpointStore, Counters};
use crate::{ConfigError, Result, ShelfError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything one job needs, constructed by the caller and passed in
pub struct JobContext {
    pub config: Arc<Config>,
    /// SHA-256 of the job file, stored in the checkpoint
    pub config_hash: String,
    pub fetcher: Arc<dyn Fetcher>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub sink: Box<dyn OutputSink>,
    /// Cancelling this token stops the job after a final checkpoint flush
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        config: Config,
        config_hash: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_hash: config_hash.into(),
            fetcher,
            checkpoints,
            sink,
            cancel: CancellationToken::new(),
        }
    }
}

/// Summary of one job run
///
/// Counters cover this run only; the checkpoint keeps the cumulative ones.
/// Target lists reflect the final state of every configured target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub scraped: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub blocked: u64,
    pub price_changes: u64,
    pub pages: u64,
    pub aborted_targets: Vec<String>,
    pub failed_targets: Vec<String>,
    /// Targets whose first page came back empty from every strategy
    pub flagged_targets: Vec<String>,
    pub exhausted_targets: Vec<String>,
    pub cancelled: bool,
    pub resumed: bool,
}

/// Runs a job, resuming from its checkpoint when one exists
pub async fn run_job(ctx: JobContext) -> Result<JobResult> {
    Orchestrator::open(ctx)?.run().await
}

/// Resumes a job from its checkpoint
///
/// # Returns
///
/// * `Err(ShelfError::NoCheckpoint)` - The job never saved a checkpoint
pub async fn resume_job(ctx: JobContext) -> Result<JobResult> {
    Orchestrator::open_existing(ctx)?.run().await
}

/// Deletes a job's checkpoint so the next run starts over
pub fn clear_job(store: &dyn CheckpointStore, job_id: &str) -> Result<bool> {
    let existed = store.clear(job_id)?;
    if existed {
        tracing::info!(job_id, "Checkpoint cleared");
    }
    Ok(existed)
}

/// State shared by all target workers, guarded by one lock
///
/// Holding the lock for a whole page batch serializes merges per identity
/// key across targets.
struct JobShared {
    checkpoint: CheckpointState,
    merge: MergeEngine,
    sink: Box<dyn OutputSink>,
    /// Records merged since the last flush
    pending: usize,
    run: Counters,
}

impl JobShared {
    fn count(&mut self, delta: &Counters) {
        self.checkpoint.counters.add(delta);
        self.run.add(delta);
    }

    /// Flushes the sink, then persists the checkpoint
    fn flush(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        self.sink.flush()?;
        self.checkpoint.saved_at = Some(Utc::now());
        store.save(&self.checkpoint)?;
        tracing::debug!(
            job_id = %self.checkpoint.job_id,
            seen = self.checkpoint.seen.len(),
            "Checkpoint saved"
        );
        self.pending = 0;
        Ok(())
    }
}

/// Drives all targets of one job
pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
    sites: SiteRegistry,
    identities: Arc<StdMutex<IdentityPool>>,
    shared: Arc<Mutex<JobShared>>,
    progress: ProgressHandle,
    resumed: bool,
}

impl Orchestrator {
    /// Prepares a job, loading its checkpoint if there is one
    pub fn open(ctx: JobContext) -> Result<Self> {
        let existing = ctx.checkpoints.load(&ctx.config.job.id)?;
        Ok(Self::with_checkpoint(ctx, existing))
    }

    /// Prepares a job that must already have a checkpoint
    pub fn open_existing(ctx: JobContext) -> Result<Self> {
        match ctx.checkpoints.load(&ctx.config.job.id)? {
            Some(checkpoint) => Ok(Self::with_checkpoint(ctx, Some(checkpoint))),
            None => Err(ShelfError::NoCheckpoint(ctx.config.job.id.clone())),
        }
    }

    fn with_checkpoint(ctx: JobContext, existing: Option<CheckpointState>) -> Self {
        let job_id = ctx.config.job.id.clone();
        let resumed = existing.is_some();

        let mut checkpoint = match existing {
            Some(mut checkpoint) => {
                if checkpoint.config_hash != ctx.config_hash {
                    tracing::warn!(
                        job_id = %job_id,
                        "Job file changed since the checkpoint was written, resuming anyway"
                    );
                    checkpoint.config_hash = ctx.config_hash.clone();
                }
                // Interrupted targets start their current page over
                for progress in checkpoint.targets.values_mut() {
                    if progress.state.is_active() && progress.state != TargetState::Pending {
                        progress.state = TargetState::Pending;
                    }
                }
                tracing::info!(
                    job_id = %job_id,
                    seen = checkpoint.seen.len(),
                    "Resuming from checkpoint"
                );
                checkpoint
            }
            None => {
                tracing::info!(job_id = %job_id, "Starting fresh job");
                CheckpointState::new(&job_id, &ctx.config_hash)
            }
        };

        let progress = ProgressHandle::new(&job_id);
        for target in &ctx.config.targets {
            let id = target.id();
            let entry = checkpoint.target_mut(&id);
            let (state, page, pages_done) = (entry.state, entry.next_page, entry.pages_done);
            progress.update(&id, |view| {
                view.state = state;
                view.page = page;
                view.pages_done = pages_done;
            });
        }

        Self {
            sites: SiteRegistry::from_config(&ctx.config),
            identities: Arc::new(StdMutex::new(IdentityPool::new(&ctx.config.identity))),
            shared: Arc::new(Mutex::new(JobShared {
                checkpoint,
                merge: MergeEngine::new(),
                sink: ctx.sink,
                pending: 0,
                run: Counters::default(),
            })),
            config: ctx.config,
            fetcher: ctx.fetcher,
            checkpoints: ctx.checkpoints,
            cancel: ctx.cancel,
            progress,
            resumed,
        }
    }

    /// Handle to the live progress of this job
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// The job's cancellation token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every unfinished target to a terminal state or cancellation
    ///
    /// # Returns
    ///
    /// * `Ok(JobResult)` - The job ended, possibly with aborted or failed targets
    /// * `Err(ShelfError)` - A fatal error stopped the job
    pub async fn run(self) -> Result<JobResult> {
        let job_id = self.config.job.id.clone();
        let started = Instant::now();
        tracing::info!(
            job_id = %job_id,
            targets = self.config.targets.len(),
            concurrency = self.config.job.max_concurrent_targets,
            "Job started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.job.max_concurrent_targets));
        let mut tasks = JoinSet::new();

        {
            let shared = self.shared.lock().await;
            for target in &self.config.targets {
                let id = target.id();
                if shared.checkpoint.is_finished(&id) {
                    tracing::info!(target_id = %id, "Target already finished, skipping");
                    continue;
                }

                let worker = self.worker_for(target, &shared.checkpoint)?;
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return Ok(());
                    };
                    worker.run().await
                });
            }
        }

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!(job_id = %job_id, "Fatal error, stopping job: {}", e);
                    self.cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Ok(Err(e)) => tracing::error!(job_id = %job_id, "Target worker failed: {}", e),
                Err(e) => tracing::error!(job_id = %job_id, "Target worker panicked: {}", e),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let mut shared = self.shared.lock().await;
        shared.flush(self.checkpoints.as_ref())?;

        let mut result = JobResult {
            job_id: job_id.clone(),
            scraped: shared.run.scraped,
            duplicates: shared.run.duplicates,
            errors: shared.run.errors,
            blocked: shared.run.blocked,
            price_changes: shared.run.price_changes,
            pages: shared.run.pages,
            cancelled: self.cancel.is_cancelled(),
            resumed: self.resumed,
            ..JobResult::default()
        };

        for target in &self.config.targets {
            let id = target.id();
            let Some(progress) = shared.checkpoint.targets.get(&id) else {
                continue;
            };
            match progress.state {
                TargetState::Aborted => result.aborted_targets.push(id.clone()),
                TargetState::Failed => result.failed_targets.push(id.clone()),
                TargetState::Exhausted => result.exhausted_targets.push(id.clone()),
                _ => {}
            }
            if progress.needs_review {
                result.flagged_targets.push(id);
            }
        }

        let merged = shared.merge.stats();
        tracing::info!(
            job_id = %job_id,
            inserted = merged.inserted,
            replaced = merged.replaced,
            kept = merged.kept,
            rejected = merged.rejected,
            "Merge totals for this run"
        );
        tracing::info!(
            job_id = %job_id,
            scraped = result.scraped,
            duplicates = result.duplicates,
            errors = result.errors,
            blocked = result.blocked,
            aborted = result.aborted_targets.len(),
            cancelled = result.cancelled,
            "Job finished in {:?}",
            started.elapsed()
        );

        Ok(result)
    }

    fn worker_for(&self, target: &TargetConfig, checkpoint: &CheckpointState) -> Result<TargetWorker> {
        let site = self
            .sites
            .get(&target.site)
            .ok_or_else(|| ConfigError::UnknownSite(target.site.clone()))?;
        let id = target.id();

        let throttle = match checkpoint.throttle.get(&id) {
            Some(state) => AdaptiveThrottle::restore(&self.config.throttle, state.clone()),
            None => AdaptiveThrottle::new(&self.config.throttle),
        };

        let job = &self.config.job;
        Ok(TargetWorker {
            state: checkpoint
                .targets
                .get(&id)
                .map(|p| p.state)
                .unwrap_or(TargetState::Pending),
            store: target.store.clone().unwrap_or_else(|| site.store.clone()),
            max_pages: target.max_pages.unwrap_or(job.max_pages),
            selector: Arc::new(StrategySelector::for_site(&site)),
            classifier: Classifier::new(&site.challenge_markers),
            throttle,
            retry: RetryPolicy::from_config(&self.config.retry),
            identities: Arc::clone(&self.identities),
            identity: None,
            rotations: 0,
            blocked_retries: 0,
            fetcher: Arc::clone(&self.fetcher),
            checkpoints: Arc::clone(&self.checkpoints),
            shared: Arc::clone(&self.shared),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
            fetch_timeout: Duration::from_secs(job.fetch_timeout_secs),
            target_timeout: Duration::from_secs(job.target_timeout_secs),
            batch_size: job.checkpoint_batch_size,
            target: target.clone(),
            site,
            id,
        })
    }
}

/// Why a page could not be completed
enum Stop {
    Cancelled,
    /// The target ends in the given terminal state
    Finish(TargetState, String),
    Error(ShelfError),
}

impl From<ShelfError> for Stop {
    fn from(error: ShelfError) -> Self {
        Stop::Error(error)
    }
}

/// One target's session: its throttle, identity and state machine
struct TargetWorker {
    id: String,
    target: TargetConfig,
    site: Arc<SiteCapabilities>,
    store: String,
    max_pages: u32,
    state: TargetState,
    selector: Arc<StrategySelector>,
    classifier: Classifier,
    throttle: AdaptiveThrottle,
    retry: RetryPolicy,
    identities: Arc<StdMutex<IdentityPool>>,
    identity: Option<Identity>,
    rotations: u32,
    /// Blocked attempts retried so far, across pages and strategies
    blocked_retries: u32,
    fetcher: Arc<dyn Fetcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    shared: Arc<Mutex<JobShared>>,
    progress: ProgressHandle,
    cancel: CancellationToken,
    fetch_timeout: Duration,
    target_timeout: Duration,
    batch_size: usize,
}

impl TargetWorker {
    async fn run(mut self) -> Result<()> {
        tracing::info!(target_id = %self.id, site = %self.site.key, "Target started");

        let outcome = tokio::time::timeout(self.target_timeout, self.crawl()).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    target_id = %self.id,
                    "Target exceeded its {:?} budget",
                    self.target_timeout
                );
                self.finish(TargetState::Aborted, Some("target timeout".to_string()))
                    .await
            }
        }
    }

    async fn crawl(&mut self) -> Result<()> {
        if self.selector.strategies().is_empty() {
            return self
                .finish(
                    TargetState::Aborted,
                    Some("site declares no usable strategy".to_string()),
                )
                .await;
        }

        self.start_session().await;

        loop {
            let (page, pages_done) = {
                let mut shared = self.shared.lock().await;
                let progress = shared.checkpoint.target_mut(&self.id);
                (progress.next_page, progress.pages_done)
            };

            if page >= self.max_pages {
                tracing::info!(target_id = %self.id, page, "Page limit reached");
                return self.finish(TargetState::Exhausted, None).await;
            }
            self.progress.update(&self.id, |view| view.page = page);

            let selector = Arc::clone(&self.selector);
            let extraction = {
                let mut source = PageSource { worker: self, page };
                selector.extract(&mut source).await
            };

            let extraction = match extraction {
                Ok(extraction) => extraction,
                Err(Stop::Cancelled) => return self.suspend().await,
                Err(Stop::Finish(state, reason)) => return self.finish(state, Some(reason)).await,
                Err(Stop::Error(e)) => return Err(e),
            };

            self.transition(TargetState::Extracting)?;

            let kind = Classifier::classify_extraction(extraction.records.len());
            if kind == FailureKind::ParseEmpty {
                if pages_done == 0 {
                    tracing::warn!(
                        target_id = %self.id,
                        %kind,
                        "Every strategy came back empty on the first page, flagging for review"
                    );
                    let mut shared = self.shared.lock().await;
                    shared.checkpoint.target_mut(&self.id).needs_review = true;
                } else {
                    tracing::info!(target_id = %self.id, page, "No more records");
                }
                return self.finish(TargetState::Exhausted, None).await;
            }

            self.merge_page(page, extraction.records, extraction.strategy)
                .await?;

            if extraction.has_more == Some(false) {
                tracing::info!(target_id = %self.id, page, "Site reports no more pages");
                return self.finish(TargetState::Exhausted, None).await;
            }
        }
    }

    /// Acquires an identity and runs the warm-up procedure if the site wants one
    async fn start_session(&mut self) {
        let identity = lock_pool(&self.identities).acquire_identity();
        self.begin_session(identity).await;
    }

    async fn begin_session(&mut self, identity: Identity) {
        tracing::debug!(target_id = %self.id, identity = %identity.name, "Session started");
        self.progress
            .update(&self.id, |view| view.identity = Some(identity.name.clone()));

        let trust = if self.site.warmup {
            self.fetcher.warm_up(&identity, &self.site).await
        } else {
            0
        };
        self.throttle.reset_trust(trust);
        self.identity = Some(identity);
        self.progress.set_throttle(&self.id, &self.throttle);
    }

    /// Retires the burned identity and starts a new session
    async fn rotate_identity(&mut self) {
        let (next, available) = {
            let mut pool = lock_pool(&self.identities);
            if let Some(current) = &self.identity {
                pool.retire(current);
            }
            (pool.acquire_identity(), pool.available())
        };
        self.rotations += 1;
        tracing::info!(
            target_id = %self.id,
            identity = %next.name,
            rotation = self.rotations,
            available,
            "Rotating identity after a challenge"
        );
        self.begin_session(next).await;
    }

    /// Fetches the content one strategy needs for one page
    ///
    /// Retries are driven by the retry policy; every attempt goes through the
    /// throttle first.
    async fn fetch_for(&mut self, strategy: Strategy, page: u32) -> std::result::Result<Option<Content>, Stop> {
        let Some(template) = strategy.template(&self.site) else {
            return Ok(None);
        };
        let url = self.site.expand(template, &self.target.query, page);
        let mut attempts = 0u32;
        let mut extra = Duration::ZERO;

        loop {
            if let WaitOutcome::Cancelled = self.throttle.wait(extra, &self.cancel).await {
                return Err(Stop::Cancelled);
            }
            self.transition(TargetState::Fetching)?;
            attempts += 1;

            let request = FetchRequest {
                url: url.clone(),
                identity: self.identity.clone().unwrap_or_else(Identity::fallback),
                mode: strategy.fetch_mode(),
                timeout: self.fetch_timeout,
            };
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout(url.clone())),
                };

            let kind = self.classifier.classify(&outcome);
            let (status, latency, retry_after) = match &outcome {
                Ok(response) => (Some(response.status), response.latency, response.retry_after),
                Err(_) => (None, started.elapsed(), None),
            };
            self.progress.record_attempt(
                &self.id,
                FetchAttempt::new(&self.id, &url, kind, status, latency, strategy),
            );

            let decision = self.throttle.record_outcome(kind);
            self.progress.set_throttle(&self.id, &self.throttle);
            match decision {
                ThrottleDecision::Escalated { factor } => {
                    tracing::warn!(target_id = %self.id, factor, "Throttle escalated")
                }
                ThrottleDecision::Decayed { factor } => {
                    tracing::info!(target_id = %self.id, factor, "Throttle relaxed")
                }
                _ => {}
            }

            tracing::debug!(
                target_id = %self.id,
                page,
                %strategy,
                %kind,
                attempt = attempts,
                "Fetched {}",
                url
            );

            match kind {
                FailureKind::Ok | FailureKind::ParseEmpty => {
                    self.transition(TargetState::Extracting)?;
                    return match outcome {
                        Ok(response) => Ok(Some(Content {
                            body: response.body,
                            url: response.final_url,
                        })),
                        Err(_) => Ok(None),
                    };
                }
                FailureKind::RateLimited | FailureKind::BotChallenge => {
                    self.transition(TargetState::Blocked)?;
                    self.bump(|c| c.blocked += 1).await;
                    tracing::warn!(target_id = %self.id, page, %kind, status, "Blocked");

                    if let ThrottleDecision::AbortTarget { consecutive } = decision {
                        return Err(Stop::Finish(
                            TargetState::Aborted,
                            format!("{} consecutive blocks", consecutive),
                        ));
                    }

                    if kind == FailureKind::BotChallenge {
                        if self.rotations >= self.retry.max_identity_rotations() {
                            return Err(Stop::Finish(
                                TargetState::Aborted,
                                format!("challenged after {} identity rotations", self.rotations),
                            ));
                        }
                        self.rotate_identity().await;
                    }

                    if !self
                        .retry
                        .should_retry_blocked(kind, attempts, self.blocked_retries)
                    {
                        return Err(Stop::Finish(
                            TargetState::Aborted,
                            format!(
                                "{} after {} attempts ({} blocked retries)",
                                kind, attempts, self.blocked_retries
                            ),
                        ));
                    }

                    self.blocked_retries += 1;
                    self.transition(TargetState::Throttled)?;
                    extra = self.retry.delay_for(attempts, retry_after);
                }
                FailureKind::NetworkError => {
                    self.bump(|c| c.errors += 1).await;
                    let reason = match &outcome {
                        Err(e) => e.to_string(),
                        Ok(response) => format!("HTTP {}", response.status),
                    };

                    if !self.retry.should_retry(kind, attempts) {
                        return Err(Stop::Finish(
                            TargetState::Failed,
                            format!("{} ({} attempts)", reason, attempts),
                        ));
                    }

                    tracing::debug!(target_id = %self.id, attempt = attempts, "Retrying after {}", reason);
                    self.transition(TargetState::Throttled)?;
                    extra = self.retry.delay_for(attempts, None);
                }
                FailureKind::UnknownError | FailureKind::ValidationError => {
                    if !matches!(outcome, Err(TransportError::RenderingUnavailable)) {
                        self.bump(|c| c.errors += 1).await;
                    }
                    tracing::debug!(target_id = %self.id, %strategy, "Skipping strategy after {}", kind);
                    return Ok(None);
                }
            }
        }
    }

    /// Merges one page of records and advances the pagination cursor
    async fn merge_page(
        &mut self,
        page: u32,
        records: Vec<crate::catalog::RawRecord>,
        strategy: Option<Strategy>,
    ) -> Result<()> {
        let ctx = MergeContext {
            site: &self.site.key,
            store: &self.store,
            query: &self.target.query,
            currency: &self.site.currency,
            captured_at: Utc::now(),
        };

        let mut delta = Counters {
            pages: 1,
            ..Counters::default()
        };

        let mut shared = self.shared.lock().await;
        let JobShared {
            checkpoint,
            merge,
            sink,
            ..
        } = &mut *shared;

        for raw in &records {
            match merge.merge(raw, &ctx, &mut checkpoint.seen) {
                MergeOutcome::Inserted(record) => {
                    sink.record(&record)?;
                    delta.scraped += 1;
                }
                MergeOutcome::Replaced {
                    record,
                    price_change,
                } => {
                    sink.record(&record)?;
                    delta.duplicates += 1;
                    if let Some(change) = price_change {
                        tracing::info!(
                            target_id = %self.id,
                            key = %change.key,
                            old = change.old_price,
                            new = change.new_price,
                            "Price changed"
                        );
                        sink.price_change(&change)?;
                        delta.price_changes += 1;
                    }
                }
                MergeOutcome::Kept(_) => delta.duplicates += 1,
                MergeOutcome::Rejected(e) => {
                    tracing::warn!(target_id = %self.id, page, "Dropped record: {}", e);
                    delta.errors += 1;
                }
            }
        }

        let progress = checkpoint.target_mut(&self.id);
        progress.next_page = page + 1;
        progress.pages_done += 1;
        progress.records_seen += records.len() as u64;
        progress.state = self.state;
        let pages_done = progress.pages_done;
        checkpoint
            .throttle
            .insert(self.id.clone(), self.throttle.snapshot());

        shared.count(&delta);
        shared.pending += records.len();
        if shared.pending >= self.batch_size {
            shared.flush(self.checkpoints.as_ref())?;
        }
        self.progress.set_counters(shared.run);
        drop(shared);

        self.progress.update(&self.id, |view| view.pages_done = pages_done);
        tracing::info!(
            target_id = %self.id,
            page,
            records = records.len(),
            new = delta.scraped,
            strategy = strategy.map(|s| s.as_str()).unwrap_or("none"),
            "Page done"
        );
        Ok(())
    }

    /// Moves the target to a terminal state and persists it
    async fn finish(&mut self, state: TargetState, reason: Option<String>) -> Result<()> {
        self.transition(state)?;

        if state == TargetState::Aborted {
            if let Some(identity) = &self.identity {
                lock_pool(&self.identities).retire(identity);
            }
            tracing::warn!(
                target_id = %self.id,
                "Target aborted: {}",
                reason.as_deref().unwrap_or("unknown reason")
            );
        } else if state == TargetState::Failed {
            tracing::warn!(
                target_id = %self.id,
                "Target failed: {}",
                reason.as_deref().unwrap_or("unknown reason")
            );
        } else {
            tracing::info!(target_id = %self.id, state = %state, "Target finished");
        }

        let mut shared = self.shared.lock().await;
        let progress = shared.checkpoint.target_mut(&self.id);
        progress.state = state;
        progress.last_error = reason;
        shared
            .checkpoint
            .throttle
            .insert(self.id.clone(), self.throttle.snapshot());
        shared.flush(self.checkpoints.as_ref())
    }

    /// Records where an interrupted target stopped; the job flushes at the end
    async fn suspend(&mut self) -> Result<()> {
        tracing::info!(target_id = %self.id, state = %self.state, "Target interrupted");
        let mut shared = self.shared.lock().await;
        shared.checkpoint.target_mut(&self.id).state = self.state;
        shared
            .checkpoint
            .throttle
            .insert(self.id.clone(), self.throttle.snapshot());
        Ok(())
    }

    async fn bump<F>(&self, f: F)
    where
        F: FnOnce(&mut Counters),
    {
        let mut delta = Counters::default();
        f(&mut delta);
        let mut shared = self.shared.lock().await;
        shared.count(&delta);
        self.progress.set_counters(shared.run);
    }

    fn transition(&mut self, to: TargetState) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(ShelfError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(target_id = %self.id, "{} -> {}", self.state, to);
        self.state = to;
        self.progress.set_state(&self.id, to);
        Ok(())
    }
}

/// Serves strategy content for one page of a worker
struct PageSource<'a> {
    worker: &'a mut TargetWorker,
    page: u32,
}

#[async_trait]
impl ContentSource for PageSource<'_> {
    type Error = Stop;

    async fn load(&mut self, strategy: Strategy) -> std::result::Result<Option<Content>, Stop> {
        self.worker.fetch_for(strategy, self.page).await
    }
}

fn lock_pool(pool: &StdMutex<IdentityPool>) -> MutexGuard<'_, IdentityPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}
