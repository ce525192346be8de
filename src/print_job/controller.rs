// src/print_job/controller.rs - Job lifecycle and the cooperative streaming tick
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use super::dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome, StatusFields};
use super::throttle::NotifyThrottle;
use super::{EncryptedJob, JobPhase, JobStatus, PrintJobError, PrintJobState, virtual_filename};
use crate::artifact::{ArtifactError, DecryptedArtifact};
use crate::config::EngineConfig;
use crate::crypto::payload::SNIFF_WINDOW;
use crate::crypto::{CryptoError, KeyUnwrapper, PayloadDecryptor, PayloadFormat, sniff_payload, sniff_prefix};
use crate::gcode_utils::{ExtrusionTracker, LayerMarker, estimate_layer_from_z, parse_layer_marker};
use crate::metadata::{JobMetadata, MetadataScanner, MetadataSidecar};
use crate::stream::{Line, StreamingReader};

/// Bytes logged around a rejected line.
const CONTEXT_BEFORE: usize = 1024;
const CONTEXT_AFTER: usize = 128;

/// Cancels the current job from any task, without the controller lock.
/// The controller checks it between lines.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What the caller should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A batch went out; tick again after yielding.
    Yield,
    /// The dispatcher is busy; wait before the next tick.
    Backoff(Duration),
    /// Nothing to stream (standby or paused).
    Idle,
    Finished(JobPhase),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub jobs_started: u64,
    pub artifacts_released: u64,
    pub lines_dispatched: u64,
    pub layer_changes: u64,
    pub notifications: u64,
    pub fail_safe_runs: u64,
}

struct ActiveJob {
    reader: Option<StreamingReader>,
    metadata: JobMetadata,
    pending: Option<Line>,
    extrusion: ExtrusionTracker,
    numbered_markers: bool,
    layer_history: Vec<u32>,
    registered: bool,
    started_at: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
    finished_at: Option<Instant>,
}

impl ActiveJob {
    fn new(reader: StreamingReader) -> Self {
        Self {
            reader: Some(reader),
            metadata: JobMetadata::default(),
            pending: None,
            extrusion: ExtrusionTracker::new(),
            numbered_markers: false,
            layer_history: Vec::new(),
            registered: false,
            started_at: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
            finished_at: None,
        }
    }

    /// Printing time so far, pauses excluded.
    fn print_duration(&self, now: Instant) -> Duration {
        let end = self.finished_at.unwrap_or(now);
        let paused = self.paused_total
            + self
                .paused_at
                .map_or(Duration::ZERO, |at| end.saturating_duration_since(at));
        end.saturating_duration_since(self.started_at).saturating_sub(paused)
    }
}

enum Step {
    Dispatched,
    Busy,
    Eof,
    Failed,
}

/// Owns one device's job: the decrypted artifact, its reader, and the
/// [`PrintJobState`]. Only one job is active at a time.
pub struct PrintJobController<D: CommandDispatcher> {
    config: EngineConfig,
    unwrapper: KeyUnwrapper,
    scanner: MetadataScanner,
    dispatcher: D,
    state: PrintJobState,
    job: Option<ActiveJob>,
    throttle: NotifyThrottle<()>,
    status_tx: watch::Sender<JobStatus>,
    cancel: CancelHandle,
    fail_safe: VecDeque<String>,
    fail_safe_deadline: Option<Instant>,
    stats: ControllerStats,
}

impl<D: CommandDispatcher> PrintJobController<D> {
    pub fn new(config: EngineConfig, unwrapper: KeyUnwrapper, dispatcher: D) -> Self {
        let scanner = MetadataScanner::new(&config.scanner);
        let throttle = NotifyThrottle::new(config.status.min_notify_interval());
        let (status_tx, _) = watch::channel(JobStatus::default());
        Self {
            config,
            unwrapper,
            scanner,
            dispatcher,
            state: PrintJobState::default(),
            job: None,
            throttle,
            status_tx,
            cancel: CancelHandle::default(),
            fail_safe: VecDeque::new(),
            fail_safe_deadline: None,
            stats: ControllerStats::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &PrintJobState {
        &self.state
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Receives every status the throttle lets through, plus phase changes.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Current status, bypassing the throttle.
    pub fn status(&self) -> JobStatus {
        self.snapshot(Instant::now())
    }

    pub fn metadata(&self) -> Option<&JobMetadata> {
        self.job.as_ref().map(|job| &job.metadata)
    }

    /// Layers at which a layer change fired, in order.
    pub fn layer_changes(&self) -> &[u32] {
        self.job.as_ref().map_or(&[][..], |job| job.layer_history.as_slice())
    }

    pub fn artifact_loaded(&self) -> bool {
        self.job.as_ref().is_some_and(|job| job.reader.is_some())
    }

    /// Fail-safe commands still waiting for the dispatcher.
    pub fn fail_safe_pending(&self) -> usize {
        self.fail_safe.len()
    }

    /// Unwraps, decrypts and scans `job`, registers it with the dispatcher
    /// and enters `printing`. All crypto work happens here, once.
    pub async fn start(
        &mut self,
        job: EncryptedJob,
        sidecar: Option<MetadataSidecar>,
    ) -> Result<(), PrintJobError> {
        self.prepare_start()?;
        let name = job.virtual_filename(Utc::now());
        self.begin(&job.job_id, job.filename.clone());
        tracing::info!(
            "Starting print job {} ({} byte sealed payload)",
            job.job_id,
            job.encrypted_payload.len()
        );

        let artifact = match self.open_sealed(&job).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.fail(e.to_string(), false);
                return Err(e);
            }
        };
        let reader = StreamingReader::from_artifact(artifact, self.config.stream.read_chunk_bytes);
        self.install(reader, name, sidecar)
    }

    /// Streams a plaintext G-code file from disk.
    pub fn start_file(
        &mut self,
        path: &Path,
        sidecar: Option<MetadataSidecar>,
    ) -> Result<(), PrintJobError> {
        self.prepare_start()?;
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let job_id = filename.clone().unwrap_or_else(|| path.display().to_string());
        let name = virtual_filename(filename.as_deref(), &job_id, Utc::now());
        self.begin(&job_id, filename);
        tracing::info!("Starting print job {} from {}", job_id, path.display());

        let reader = match open_plaintext_file(path, self.config.stream.read_chunk_bytes) {
            Ok(reader) => reader,
            Err(e) => {
                self.fail(e.to_string(), false);
                return Err(e.into());
            }
        };
        self.install(reader, name, sidecar)
    }

    fn prepare_start(&mut self) -> Result<(), PrintJobError> {
        if !self.fail_safe.is_empty() {
            return Err(PrintJobError::DeviceBusy(
                self.state.job_id.clone().unwrap_or_default(),
            ));
        }
        match self.state.phase {
            JobPhase::Standby => Ok(()),
            JobPhase::Complete | JobPhase::Cancelled => {
                self.job = None;
                self.state = PrintJobState::default();
                self.throttle.reset();
                Ok(())
            }
            JobPhase::Error => Err(PrintJobError::InvalidTransition {
                action: "start",
                phase: JobPhase::Error,
            }),
            _ => Err(PrintJobError::DeviceBusy(
                self.state.job_id.clone().unwrap_or_default(),
            )),
        }
    }

    fn begin(&mut self, job_id: &str, filename: Option<String>) {
        self.cancel.clear();
        self.job = None;
        self.state = PrintJobState {
            phase: JobPhase::Decrypting,
            job_id: Some(job_id.to_string()),
            filename,
            ..PrintJobState::default()
        };
        self.stats.jobs_started += 1;
        self.publish_now();
    }

    async fn open_sealed(&self, job: &EncryptedJob) -> Result<DecryptedArtifact, PrintJobError> {
        match sniff_payload(&job.encrypted_payload) {
            PayloadFormat::Malformed => Err(CryptoError::DecryptFailed(format!(
                "payload of {} bytes is empty or not block aligned",
                job.encrypted_payload.len()
            ))
            .into()),
            PayloadFormat::Plaintext if self.config.safety.allow_plaintext_jobs => {
                tracing::warn!("Job {} payload is not encrypted; streaming it as plaintext", job.job_id);
                Ok(DecryptedArtifact::from_plaintext(job.encrypted_payload.clone()))
            }
            PayloadFormat::Plaintext => Err(CryptoError::DecryptFailed(
                "payload is not encrypted and plaintext jobs are disabled".to_string(),
            )
            .into()),
            PayloadFormat::Encrypted => {
                let key = self
                    .unwrapper
                    .unwrap(&job.key_package, job.kek_reference.as_deref())
                    .await?;
                let artifact = PayloadDecryptor::decrypt(&job.encrypted_payload, &key, &job.iv);
                drop(key);
                Ok(artifact?)
            }
        }
    }

    fn install(
        &mut self,
        mut reader: StreamingReader,
        virtual_name: String,
        sidecar: Option<MetadataSidecar>,
    ) -> Result<(), PrintJobError> {
        let label = self.job_label();
        let size = reader.size();
        let scanner = &self.scanner;
        let scanned = reader.with_source(|source| scanner.scan(source));
        self.job = Some(ActiveJob::new(reader));
        self.state.file_size = size;

        let outcome = match scanned {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(e.to_string(), false);
                return Err(e.into());
            }
        };
        for warning in &outcome.warnings {
            tracing::warn!("Job {}: {}", label, warning);
        }
        let mut metadata = outcome.metadata;
        if let Some(sidecar) = &sidecar {
            metadata.apply_sidecar(sidecar);
        }

        if self.cancel.is_requested() {
            self.finish_cancel();
            return Ok(());
        }

        let accepted = self.dispatcher.register_stream(&virtual_name, size, &metadata);
        if let Some(job) = self.job.as_mut() {
            job.metadata = metadata;
            job.registered = accepted;
        }
        if !accepted {
            let err = DispatchError::RegistrationRejected(virtual_name);
            self.fail(err.to_string(), false);
            return Err(err.into());
        }

        tracing::info!(
            "Job {} registered as {} ({} bytes, {} layers)",
            label,
            virtual_name,
            size,
            self.metadata().map_or(0, |m| m.layer_count)
        );
        self.state.phase = JobPhase::Printing;
        self.publish_now();
        Ok(())
    }

    /// Streams up to one batch of lines. Never suspends.
    ///
    /// After a failure the job is not reported finished until every
    /// fail-safe command has gone out.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.drain_fail_safe() {
            return TickOutcome::Backoff(self.config.stream.busy_backoff());
        }
        if self.cancel.is_requested() && self.state.phase.is_active() {
            self.finish_cancel();
            return TickOutcome::Finished(JobPhase::Cancelled);
        }
        match self.state.phase {
            JobPhase::Printing => {}
            JobPhase::Paused => {
                self.poll_notifications();
                return TickOutcome::Idle;
            }
            JobPhase::Standby | JobPhase::Decrypting => return TickOutcome::Idle,
            phase => return TickOutcome::Finished(phase),
        }

        let started = Instant::now();
        let budget = self.config.stream.tick_budget();
        for _ in 0..self.config.stream.lines_per_tick {
            if self.cancel.is_requested() {
                self.finish_cancel();
                return TickOutcome::Finished(JobPhase::Cancelled);
            }
            match self.step() {
                Step::Dispatched => {}
                Step::Busy => {
                    self.poll_notifications();
                    return TickOutcome::Backoff(self.config.stream.busy_backoff());
                }
                Step::Eof => {
                    self.complete();
                    return TickOutcome::Finished(JobPhase::Complete);
                }
                Step::Failed if self.fail_safe.is_empty() => {
                    return TickOutcome::Finished(JobPhase::Error);
                }
                Step::Failed => return TickOutcome::Backoff(self.config.stream.busy_backoff()),
            }
            if started.elapsed() >= budget {
                break;
            }
        }
        self.poll_notifications();
        TickOutcome::Yield
    }

    fn next_pending_line(&mut self) -> Result<Option<Line>, ArtifactError> {
        let job = self
            .job
            .as_mut()
            .ok_or_else(|| ArtifactError::ArtifactUnavailable("no active job".to_string()))?;
        if let Some(line) = job.pending.take() {
            return Ok(Some(line));
        }
        let reader = job.reader.as_mut().ok_or_else(|| {
            ArtifactError::ArtifactUnavailable("artifact already released".to_string())
        })?;
        reader.next_line()
    }

    fn step(&mut self) -> Step {
        let line = match self.next_pending_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Step::Eof,
            Err(e) => {
                self.fail(e.to_string(), true);
                return Step::Failed;
            }
        };
        if line.is_blank() {
            self.account(&line);
            return Step::Dispatched;
        }
        match self.dispatcher.dispatch(line.text()) {
            Ok(DispatchOutcome::Accepted) => {
                self.stats.lines_dispatched += 1;
                self.account(&line);
                Step::Dispatched
            }
            Ok(DispatchOutcome::Busy) => {
                if let Some(job) = self.job.as_mut() {
                    job.pending = Some(line);
                }
                Step::Busy
            }
            Err(e) => {
                self.dump_context(line.offset());
                self.fail(e.to_string(), true);
                Step::Failed
            }
        }
    }

    /// Counters move only after the dispatcher took the line.
    fn account(&mut self, line: &Line) {
        let layer_height = self.config.scanner.assumed_layer_height_mm;
        self.state.file_position += line.advance();
        let Some(job) = self.job.as_mut() else {
            return;
        };
        self.state.filament_used_mm += job.extrusion.observe(line.text());

        let layer = match parse_layer_marker(line.text()) {
            Some(LayerMarker::Number(n)) => {
                job.numbered_markers = true;
                Some(n)
            }
            // Z estimates only when the file never numbers its layers.
            Some(LayerMarker::ZHeight(z)) if !job.numbered_markers => {
                Some(estimate_layer_from_z(z, layer_height))
            }
            _ => None,
        };
        let mut changed = None;
        if let Some(layer) = layer {
            if layer > self.state.current_layer {
                self.state.current_layer = layer;
                job.layer_history.push(layer);
                changed = Some((layer, job.metadata.layer_count));
            }
        }
        if let Some((layer, total)) = changed {
            self.on_layer_change(layer, total);
        }
        self.queue_progress();
    }

    /// Counts the change and, when enabled, shows it on the display. The
    /// `M117` message is best effort: it is skipped when the dispatcher is
    /// busy, and a refusal is only logged.
    fn on_layer_change(&mut self, layer: u32, total: u32) {
        self.stats.layer_changes += 1;
        tracing::debug!("Job {}: layer {}/{}", self.job_label(), layer, total);
        if !self.config.status.display_layer_messages {
            return;
        }
        let message = format!("M117 Layer {}/{}", layer, total);
        match self.dispatcher.dispatch(&message) {
            Ok(DispatchOutcome::Accepted) => {}
            Ok(DispatchOutcome::Busy) => tracing::debug!("Skipped layer message, dispatcher busy"),
            Err(e) => tracing::warn!("Layer message refused: {}", e),
        }
    }

    pub fn pause(&mut self) -> Result<(), PrintJobError> {
        if self.state.phase != JobPhase::Printing {
            return Err(PrintJobError::InvalidTransition {
                action: "pause",
                phase: self.state.phase,
            });
        }
        if let Some(job) = self.job.as_mut() {
            job.paused_at = Some(Instant::now());
        }
        self.state.phase = JobPhase::Paused;
        tracing::info!("Paused job {} at byte {}", self.job_label(), self.state.file_position);
        self.publish_now();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PrintJobError> {
        if self.state.phase != JobPhase::Paused {
            return Err(PrintJobError::InvalidTransition {
                action: "resume",
                phase: self.state.phase,
            });
        }
        if let Some(job) = self.job.as_mut() {
            if let Some(at) = job.paused_at.take() {
                job.paused_total += at.elapsed();
            }
        }
        self.state.phase = JobPhase::Printing;
        tracing::info!("Resumed job {}", self.job_label());
        self.publish_now();
        Ok(())
    }

    /// Moves the stream to `offset` while paused. Any line held back by a
    /// busy dispatcher is dropped.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), PrintJobError> {
        if self.state.phase != JobPhase::Paused {
            return Err(PrintJobError::InvalidTransition {
                action: "seek",
                phase: self.state.phase,
            });
        }
        let job = self
            .job
            .as_mut()
            .ok_or_else(|| ArtifactError::ArtifactUnavailable("no active job".to_string()))?;
        let reader = job
            .reader
            .as_mut()
            .ok_or_else(|| ArtifactError::ArtifactUnavailable("artifact already released".to_string()))?;
        reader.seek(offset)?;
        job.pending = None;
        self.state.file_position = offset;
        tracing::info!("Job {} repositioned to byte {}", self.job_label(), offset);
        self.publish_now();
        Ok(())
    }

    /// Cancels the active job. Without one this does nothing.
    pub fn cancel(&mut self) {
        match self.state.phase {
            JobPhase::Standby | JobPhase::Complete | JobPhase::Cancelled => {
                tracing::debug!("Cancel ignored while {}", self.state.phase);
            }
            _ => self.finish_cancel(),
        }
    }

    fn finish_cancel(&mut self) {
        self.cancel.clear();
        self.release_artifact();
        self.state.phase = JobPhase::Cancelled;
        self.state.current_layer = 0;
        self.state.file_position = 0;
        self.state.file_size = 0;
        self.state.filament_used_mm = 0.0;
        self.state.message = None;
        self.mark_finished();
        tracing::info!("Cancelled job {}", self.job_label());
        self.publish_now();
    }

    fn complete(&mut self) {
        if self.state.file_position != self.state.file_size {
            tracing::warn!(
                "Job {} reached end of stream at byte {} of {}",
                self.job_label(),
                self.state.file_position,
                self.state.file_size
            );
        }
        self.release_artifact();
        self.state.phase = JobPhase::Complete;
        self.state.message = None;
        self.mark_finished();
        tracing::info!("Finished job {}", self.job_label());
        self.publish_now();
    }

    fn fail(&mut self, message: String, fail_safe: bool) {
        tracing::error!("Job {} failed: {}", self.job_label(), message);
        if fail_safe {
            self.run_fail_safe();
        }
        self.release_artifact();
        self.state.phase = JobPhase::Error;
        self.state.message = Some(message);
        self.mark_finished();
        self.publish_now();
    }

    /// Queues the configured fail-safe commands and sends as many as the
    /// dispatcher takes right now. The rest go out from [`Self::tick`].
    fn run_fail_safe(&mut self) {
        self.stats.fail_safe_runs += 1;
        tracing::warn!("Issuing fail-safe sequence for job {}", self.job_label());
        self.fail_safe = self
            .config
            .safety
            .fail_safe_commands
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect();
        self.fail_safe_deadline = Some(Instant::now() + self.config.safety.fail_safe_timeout());
        self.drain_fail_safe();
    }

    /// Sends queued fail-safe commands in order. A busy dispatcher keeps the
    /// command queued until the deadline; a refused command is logged and
    /// skipped. Returns true once the queue is empty.
    fn drain_fail_safe(&mut self) -> bool {
        while let Some(command) = self.fail_safe.front().cloned() {
            match self.dispatcher.dispatch(&command) {
                Ok(DispatchOutcome::Accepted) => {
                    self.fail_safe.pop_front();
                }
                Ok(DispatchOutcome::Busy) => {
                    let expired = self
                        .fail_safe_deadline
                        .is_none_or(|deadline| Instant::now() >= deadline);
                    if !expired {
                        return false;
                    }
                    tracing::error!(
                        "Job {}: dispatcher stayed busy, {} fail-safe commands not sent (next '{}')",
                        self.job_label(),
                        self.fail_safe.len(),
                        command
                    );
                    self.fail_safe.clear();
                }
                Err(e) => {
                    tracing::error!("Fail-safe command '{}' failed: {}", command, e);
                    self.fail_safe.pop_front();
                }
            }
        }
        self.fail_safe_deadline = None;
        true
    }

    fn dump_context(&mut self, position: u64) {
        let label = self.job_label();
        let Some(reader) = self.job.as_mut().and_then(|job| job.reader.as_mut()) else {
            return;
        };
        match reader.context_around(position, CONTEXT_BEFORE, CONTEXT_AFTER) {
            Ok((before, after)) => tracing::info!(
                "Job {} stream context before byte {}:\n{}\nUpcoming:\n{}",
                label,
                position,
                before,
                after
            ),
            Err(e) => tracing::warn!("Job {}: could not read stream context: {}", label, e),
        }
    }

    /// Drops the reader (and with it the artifact) if still held, and
    /// unregisters from the dispatcher. Safe to call repeatedly.
    fn release_artifact(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        job.pending = None;
        if let Some(reader) = job.reader.take() {
            drop(reader);
            self.stats.artifacts_released += 1;
        }
        if job.registered {
            job.registered = false;
            self.dispatcher.unregister();
        }
    }

    fn mark_finished(&mut self) {
        if let Some(job) = self.job.as_mut() {
            job.finished_at.get_or_insert_with(Instant::now);
        }
    }

    fn job_label(&self) -> String {
        self.state.job_id.clone().unwrap_or_else(|| "-".to_string())
    }

    fn snapshot(&self, now: Instant) -> JobStatus {
        let (layer_count, estimated_time_s, print_duration) = match &self.job {
            Some(job) => (
                job.metadata.layer_count,
                job.metadata.estimated_time_s,
                job.print_duration(now),
            ),
            None => (0, 0, Duration::ZERO),
        };
        let progress = self.state.progress();
        let print_duration_s = print_duration.as_secs_f64();
        JobStatus {
            state: self.state.phase,
            job_id: self.state.job_id.clone(),
            filename: self.state.filename.clone(),
            file_position: self.state.file_position,
            file_size: self.state.file_size,
            progress,
            current_layer: self.state.current_layer,
            layer_count,
            filament_used_mm: self.state.filament_used_mm,
            estimated_time_s,
            print_duration_s,
            total_duration_s: (progress > 0.0).then(|| print_duration_s / progress),
            message: self.state.message.clone(),
            updated_at: Utc::now(),
        }
    }

    fn status_fields(&self) -> StatusFields {
        let total_layer = self.metadata().map_or(0, |m| m.layer_count);
        BTreeMap::from([
            ("current_layer".to_string(), self.state.current_layer as f64),
            ("total_layer".to_string(), total_layer as f64),
            ("filament_used".to_string(), self.state.filament_used_mm),
            ("file_position".to_string(), self.state.file_position as f64),
            ("file_size".to_string(), self.state.file_size as f64),
        ])
    }

    fn emit(&mut self, now: Instant) {
        let fields = self.status_fields();
        self.dispatcher.set_status(&fields);
        self.status_tx.send_replace(self.snapshot(now));
        self.stats.notifications += 1;
    }

    /// Phase changes go out immediately and restart the throttle window.
    fn publish_now(&mut self) {
        let now = Instant::now();
        self.throttle.mark_emitted(now);
        self.emit(now);
    }

    fn queue_progress(&mut self) {
        let now = Instant::now();
        if self.throttle.offer((), now).is_some() {
            self.emit(now);
        }
    }

    fn poll_notifications(&mut self) {
        let now = Instant::now();
        if self.throttle.poll(now).is_some() {
            self.emit(now);
        }
    }
}

fn open_plaintext_file(path: &Path, chunk_size: usize) -> Result<StreamingReader, ArtifactError> {
    let mut reader = StreamingReader::open_file(path, chunk_size)?;
    let head = reader.peek_head(SNIFF_WINDOW)?;
    match sniff_prefix(&head, reader.size()) {
        PayloadFormat::Plaintext => Ok(reader),
        format => Err(ArtifactError::ArtifactUnavailable(format!(
            "{} is not plaintext G-code ({:?})",
            path.display(),
            format
        ))),
    }
}
