//! Scan job supervision: the per-slot pipeline and its failure policy.
//!
//! ```text
//! BlockScanner ──► ReorgDetector ──► decoders ──► PoolIndex ──► CursorStore
//!   (prefetch)      (linkage)                     (durable)     (advance)
//! ```
//!
//! Every slot is written to the index before the cursor moves past it, so a
//! crash between the two replays the slot on restart and the index absorbs
//! the replay. Skipped slots are recorded as gaps and still advance.
//!
//! ## States
//!
//! - `Running`: slots are being indexed
//! - `Paused`: a transient failure outlasted the per-fetch retry budget; the
//!   job waits and resumes from the same slot
//! - `Aborted`: a fatal error, or too many consecutive failures (terminal)
//! - `Stopped`: the stop signal was received between slots
//! - `Completed`: the requested range was fully indexed

use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ScanConfig;
use crate::cursor::{CursorStore, GapKind, JobKey};
use crate::decoder::DecoderRegistry;
use crate::error::{IndexerError, IndexerResult};
use crate::events::DomainEvent;
use crate::index::{PoolIndex, SlotSummary};
use crate::reorg::{BlockRecord, ReorgDetector, ReorgSignal};
use crate::rpc::{ChainClient, Commitment};
use crate::scanner::{BlockScanner, SlotBatch, SlotOutcome};

/// Slots between two progress log lines.
const PROGRESS_EVERY: u64 = 100;

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    /// Indexing slots
    Running,
    /// Waiting after a transient failure
    Paused(String),
    /// Halted by a fatal error
    Aborted(String),
    /// Halted by the stop signal
    Stopped,
    /// Requested range fully indexed
    Completed,
}

impl JobState {
    /// Whether the job can no longer make progress in this run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted(_) | Self::Stopped | Self::Completed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused(reason) => write!(f, "paused ({reason})"),
            Self::Aborted(reason) => write!(f, "aborted ({reason})"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Slots with a block that were indexed
    pub blocks: u64,
    /// Slots recorded as gaps
    pub gaps: u64,
    /// Transactions that passed the filter
    pub candidates: u64,
    /// Decoded events, anomalies included
    pub events: u64,
    /// New pools
    pub pools_created: u64,
    /// Pool creations rejected as duplicates
    pub duplicate_pools: u64,
    /// Swaps attached to a known pool on arrival
    pub swaps_attached: u64,
    /// Swaps parked as pending
    pub swaps_pending: u64,
    /// Pending swaps attached when their pool appeared
    pub swaps_promoted: u64,
    /// Events that were already indexed
    pub replayed: u64,
    /// Undecodable instructions
    pub anomalies: u64,
    /// Pending swaps that became orphans
    pub expired: u64,
    /// Reorgs rolled back
    pub reorgs: u64,
    /// Transient failures that paused the job
    pub failures: u64,
    /// First slot processed in this run
    pub first_slot: Option<u64>,
    /// Last slot processed in this run
    pub last_slot: Option<u64>,
}

impl ScanStats {
    fn absorb(&mut self, summary: &SlotSummary) {
        self.pools_created += summary.pools_created;
        self.duplicate_pools += summary.duplicate_pools;
        self.swaps_attached += summary.swaps_attached;
        self.swaps_pending += summary.swaps_unknown_pool;
        self.swaps_promoted += summary.swaps_promoted;
        self.replayed += summary.replayed;
        self.anomalies += summary.anomalies;
        self.expired += summary.expired;
    }

    fn slot_done(&mut self, slot: u64) {
        self.first_slot.get_or_insert(slot);
        self.last_slot = Some(slot);
    }
}

/// Final result of [`ScanJob::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Job identity
    pub job_key: String,
    /// Terminal state
    pub state: JobState,
    /// Run counters
    pub stats: ScanStats,
    /// Persisted cursor after the run
    pub cursor: Option<u64>,
}

impl JobReport {
    /// Whether the run ended without an abort.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.state, JobState::Aborted(_))
    }
}

enum Step {
    Advanced,
    Rewound(u64),
}

enum RangeEnd {
    Finished,
    Stopped,
    Rewound(u64),
    Failed(IndexerError),
}

enum Polled {
    Item(Option<IndexerResult<SlotBatch>>),
    StopSignal,
}

/// One resumable scan over a filter, commitment and slot range.
pub struct ScanJob {
    client: Arc<dyn ChainClient>,
    scanner: BlockScanner,
    decoders: DecoderRegistry,
    cursors: CursorStore,
    index: PoolIndex,
    config: ScanConfig,
    job: JobKey,
    detector: ReorgDetector,
    state: JobState,
    stats: ScanStats,
    next_slot: u64,
    high_water: Option<u64>,
    consecutive_failures: u32,
    reorgs_without_progress: u32,
}

impl ScanJob {
    /// Assemble a job. Nothing touches the network or the database until
    /// [`run`](Self::run).
    #[must_use]
    pub fn new(
        client: Arc<dyn ChainClient>,
        decoders: DecoderRegistry,
        cursors: CursorStore,
        index: PoolIndex,
        config: ScanConfig,
    ) -> Self {
        let job = JobKey::new(&config.filter, config.commitment());
        let scanner = BlockScanner::new(Arc::clone(&client), config.options);
        Self {
            client,
            scanner,
            decoders,
            cursors,
            index,
            config,
            job,
            detector: ReorgDetector::new(),
            state: JobState::Running,
            stats: ScanStats::default(),
            next_slot: 0,
            high_water: None,
            consecutive_failures: 0,
            reorgs_without_progress: 0,
        }
    }

    /// Job identity (filter + commitment).
    #[must_use]
    pub const fn job_key(&self) -> &JobKey {
        &self.job
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &JobState {
        &self.state
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Run until the range is done, the stop signal fires, or a fatal error.
    ///
    /// Setting the watch value to `true` stops the job after the slot being
    /// processed; the cursor then covers every indexed slot.
    #[instrument(skip_all, fields(job = %self.job.short(), filter = %self.config.filter))]
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> JobReport {
        let final_state = match self.drive(&mut stop).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, slot = self.next_slot, "Scan job aborted");
                JobState::Aborted(e.to_string())
            }
        };
        self.transition(final_state);

        let cursor = match self.cursors.load(&self.job).await {
            Ok(cursor) => cursor.map(|c| c.last_slot),
            Err(e) => {
                warn!(error = %e, "Could not read the final cursor");
                None
            }
        };

        info!(
            state = %self.state,
            blocks = self.stats.blocks,
            gaps = self.stats.gaps,
            pools_created = self.stats.pools_created,
            swaps_attached = self.stats.swaps_attached,
            swaps_pending = self.stats.swaps_pending,
            swaps_promoted = self.stats.swaps_promoted,
            anomalies = self.stats.anomalies,
            reorgs = self.stats.reorgs,
            cursor = ?cursor,
            "Scan finished"
        );

        JobReport {
            job_key: self.job.as_str().to_string(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            cursor,
        }
    }

    async fn drive(&mut self, stop: &mut watch::Receiver<bool>) -> IndexerResult<JobState> {
        self.config.validate()?;
        self.next_slot = self.start_slot().await?;

        // Without --to and --follow the range ends at the tip seen at start
        let fixed_end = match (self.config.to_slot, self.config.follow) {
            (Some(to), _) => Some(to),
            (None, false) => Some(self.chain_tip().await?),
            (None, true) => None,
        };

        info!(
            from = self.next_slot,
            to = ?fixed_end,
            follow = self.config.follow,
            commitment = %self.config.commitment(),
            "Scan job started"
        );

        loop {
            if *stop.borrow() {
                return Ok(JobState::Stopped);
            }

            let end = match fixed_end {
                Some(end) => end,
                None => match self.chain_tip().await {
                    Ok(tip) => tip,
                    Err(e) => {
                        if self.on_failure(e, stop).await? {
                            return Ok(JobState::Stopped);
                        }
                        continue;
                    }
                },
            };

            if self.next_slot > end {
                if fixed_end.is_some() {
                    return Ok(JobState::Completed);
                }
                debug!(next = self.next_slot, tip = end, "Caught up with the chain tip");
                if sleep_or_stop(self.config.poll_interval, stop).await {
                    return Ok(JobState::Stopped);
                }
                continue;
            }

            match self.scan_range(end, stop).await {
                RangeEnd::Finished => {}
                RangeEnd::Stopped => return Ok(JobState::Stopped),
                RangeEnd::Rewound(slot) => self.next_slot = slot,
                RangeEnd::Failed(e) => {
                    if self.on_failure(e, stop).await? {
                        return Ok(JobState::Stopped);
                    }
                }
            }
        }
    }

    /// Explicit `from_slot`, else one past the cursor, else the chain tip.
    async fn start_slot(&self) -> IndexerResult<u64> {
        if let Some(from) = self.config.from_slot {
            return Ok(from);
        }
        match self.cursors.load(&self.job).await? {
            Some(cursor) => {
                info!(cursor = cursor.last_slot, "Resuming from cursor");
                Ok(cursor.last_slot + 1)
            }
            None => {
                let tip = self.chain_tip().await?;
                info!(tip, "New job without a start slot, starting at the chain tip");
                Ok(tip)
            }
        }
    }

    async fn chain_tip(&self) -> IndexerResult<u64> {
        let commitment = self.config.commitment();
        self.config
            .options
            .backoff
            .retry("getSlot", || self.client.get_slot(commitment))
            .await
    }

    async fn scan_range(&mut self, end: u64, stop: &mut watch::Receiver<bool>) -> RangeEnd {
        let mut stream = self.scanner.scan(self.next_slot, end, self.config.filter.clone());

        loop {
            if *stop.borrow() {
                return RangeEnd::Stopped;
            }

            let polled = tokio::select! {
                item = stream.next() => Polled::Item(item),
                Ok(()) = stop.changed() => Polled::StopSignal,
            };

            let batch = match polled {
                Polled::StopSignal => continue,
                Polled::Item(None) => return RangeEnd::Finished,
                Polled::Item(Some(Err(e))) => return RangeEnd::Failed(e),
                Polled::Item(Some(Ok(batch))) => batch,
            };

            let slot = batch.slot;
            match self.process_batch(batch).await {
                Ok(Step::Advanced) => {
                    self.next_slot = slot + 1;
                    self.slot_succeeded(slot, end);
                }
                Ok(Step::Rewound(next)) => return RangeEnd::Rewound(next),
                Err(e) => return RangeEnd::Failed(e),
            }
        }
    }

    /// Index one slot, then advance the cursor past it.
    async fn process_batch(&mut self, batch: SlotBatch) -> IndexerResult<Step> {
        let slot = batch.slot;
        match batch.outcome {
            SlotOutcome::Skipped { reason } => self.record_gap(slot, GapKind::Skipped, &reason).await?,
            SlotOutcome::Unreadable { reason } => self.record_gap(slot, GapKind::Unreadable, &reason).await?,
            SlotOutcome::Block {
                blockhash,
                previous_blockhash,
                parent_slot,
                candidates,
            } => {
                let record = BlockRecord::new(slot, blockhash, previous_blockhash, parent_slot);
                if let Some(signal) = self.detector.check(&self.cursors, &self.job, &record).await? {
                    return self.roll_back(&signal).await.map(Step::Rewound);
                }

                let events: Vec<DomainEvent> = candidates
                    .iter()
                    .flat_map(|tx| self.decoders.decode_transaction(tx))
                    .collect();
                let summary = self.index.apply_slot(slot, &events).await?;
                self.cursors
                    .advance(&self.job, slot, &record.blockhash, record.parent_slot)
                    .await?;

                self.stats.blocks += 1;
                self.stats.candidates += candidates.len() as u64;
                self.stats.events += events.len() as u64;
                self.stats.absorb(&summary);
                if !summary.is_empty() {
                    debug!(
                        slot,
                        pools_created = summary.pools_created,
                        swaps_attached = summary.swaps_attached,
                        swaps_pending = summary.swaps_unknown_pool,
                        anomalies = summary.anomalies,
                        "Slot indexed"
                    );
                }
            }
        }
        Ok(Step::Advanced)
    }

    async fn record_gap(&mut self, slot: u64, kind: GapKind, reason: &str) -> IndexerResult<()> {
        // Expire pending swaps even when the slot has no block
        let summary = self.index.apply_slot(slot, &[]).await?;
        self.cursors.record_gap(&self.job, slot, kind, reason).await?;
        self.stats.gaps += 1;
        self.stats.absorb(&summary);
        Ok(())
    }

    /// Invalidate everything above the rollback target and rewind every
    /// cursor past it, this job's last. Returns the slot to rescan from.
    ///
    /// The index is shared, so other jobs that indexed above the target lose
    /// rows too and must rescan them. A crash at any point leaves this job's
    /// hash history intact, so the next run detects the same fork again.
    async fn roll_back(&mut self, signal: &ReorgSignal) -> IndexerResult<u64> {
        self.reorgs_without_progress += 1;
        if self.reorgs_without_progress > self.config.max_consecutive_failures {
            return Err(IndexerError::fatal(
                format!(
                    "{} reorgs without progress, last at slot {}",
                    self.reorgs_without_progress, signal.divergent_slot
                ),
                None,
            ));
        }

        let finalized = self
            .config
            .options
            .backoff
            .retry("getSlot(finalized)", || self.client.get_slot(Commitment::Finalized))
            .await?;
        let target = ReorgDetector::rollback_target(signal.divergent_slot, finalized);
        let reason = signal.to_error().to_string();

        let other_jobs = self.cursors.rewind_others(&self.job, target).await?;
        let invalidation = self.index.invalidate_from(target + 1, &reason).await?;
        self.cursors.rewind(&self.job, target).await?;
        self.stats.reorgs += 1;

        warn!(
            divergent_slot = signal.divergent_slot,
            finalized,
            rollback_to = target,
            other_jobs_rewound = other_jobs,
            pools_invalidated = invalidation.pools_invalidated,
            swaps_invalidated = invalidation.swaps_invalidated,
            "Rolled back after reorg"
        );

        Ok(target + 1)
    }

    fn slot_succeeded(&mut self, slot: u64, end: u64) {
        self.stats.slot_done(slot);
        self.consecutive_failures = 0;
        if matches!(self.state, JobState::Paused(_)) {
            self.transition(JobState::Running);
        }
        if self.high_water.map_or(true, |high| slot > high) {
            self.high_water = Some(slot);
            self.reorgs_without_progress = 0;
        }

        let done = self.stats.blocks + self.stats.gaps;
        if done % PROGRESS_EVERY == 0 {
            info!(
                slot,
                end,
                remaining = end.saturating_sub(slot),
                blocks = self.stats.blocks,
                gaps = self.stats.gaps,
                pools_created = self.stats.pools_created,
                swaps_attached = self.stats.swaps_attached,
                "Scan progress"
            );
        }
    }

    /// Pause after a failed slot, or abort once the failure is fatal or the
    /// consecutive-failure budget is spent. Returns `true` if stopped while
    /// paused.
    async fn on_failure(
        &mut self,
        e: IndexerError,
        stop: &mut watch::Receiver<bool>,
    ) -> IndexerResult<bool> {
        if e.is_fatal() {
            return Err(e);
        }

        self.consecutive_failures += 1;
        self.stats.failures += 1;
        if self.consecutive_failures > self.config.max_consecutive_failures {
            return Err(IndexerError::max_consecutive_failures(
                self.consecutive_failures,
                e.to_string(),
            ));
        }

        let delay = self.config.options.backoff.delay_for(self.consecutive_failures);
        warn!(
            slot = self.next_slot,
            failures = self.consecutive_failures,
            max_failures = self.config.max_consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Slot failed, pausing"
        );
        self.transition(JobState::Paused(e.to_string()));

        Ok(sleep_or_stop(delay, stop).await)
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Job state changed");
            self.state = next;
        }
    }
}

impl fmt::Debug for ScanJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanJob")
            .field("job", &self.job)
            .field("state", &self.state)
            .field("next_slot", &self.next_slot)
            .finish_non_exhaustive()
    }
}

/// Sleep for `duration` unless stop is requested first. Returns `true` on stop.
async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        Ok(()) = stop.changed() => *stop.borrow(),
    }
}
