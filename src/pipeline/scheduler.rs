// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Worker pool driving scan -> classify -> organize for one run

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Control, EventSink, FileOutcome, FileStatus, PipelineEvent, RunState, RunSummary, SchedulerHandle};
use crate::client::prompt::classification_prompt;
use crate::client::{ClassificationClient, ClassificationRequest, ReqwestTransport};
use crate::config::AppConfig;
use crate::db::{Fingerprint, FingerprintStore};
use crate::export::ErrorExporter;
use crate::interpret::ResponseInterpreter;
use crate::media::{scan_directory, ImagePreparer, MediaFile, MediaPreparer, ScanOptions};
use crate::organizer::{FileOrganizer, RenameInfo};
use crate::{Result, SortError};

/// One-shot batch run; build a new one for every run
pub struct Scheduler {
    config: Arc<AppConfig>,
    store: FingerprintStore,
    client: Arc<ClassificationClient>,
    preparer: Arc<dyn MediaPreparer>,
    control: Arc<Control>,
    events: EventSink,
    receiver: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
}

/// Everything a worker needs, shared across the pool
struct RunContext {
    config: Arc<AppConfig>,
    store: FingerprintStore,
    client: Arc<ClassificationClient>,
    preparer: Arc<dyn MediaPreparer>,
    interpreter: ResponseInterpreter,
    organizer: Arc<FileOrganizer>,
    exporter: ErrorExporter,
    prompt: String,
    control: Arc<Control>,
    events: EventSink,
    queue: Mutex<VecDeque<MediaFile>>,
    progress: Mutex<usize>,
    outcomes: Mutex<Vec<FileOutcome>>,
    total: usize,
}

impl Scheduler {
    pub fn new(
        config: AppConfig,
        store: FingerprintStore,
        client: ClassificationClient,
        preparer: Arc<dyn MediaPreparer>,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventSink(Some(tx));

        Ok(Self {
            config: Arc::new(config),
            store,
            client: Arc::new(client),
            preparer,
            control: Arc::new(Control::new(events.clone())),
            events,
            receiver: Some(rx),
        })
    }

    /// Production wiring: reqwest transport and the image/ffmpeg preparer
    pub fn from_config(config: AppConfig, store: FingerprintStore) -> Result<Self> {
        let client = ClassificationClient::from_config(&config, Arc::new(ReqwestTransport::new()))?;
        let preparer = Arc::new(ImagePreparer::new(&config.media));
        Self::new(config, store, client, preparer)
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.control.clone())
    }

    pub fn client(&self) -> &Arc<ClassificationClient> {
        &self.client
    }

    /// Event stream for this run; only the first call gets it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        self.receiver.take()
    }

    /// Scan `source`, organize into `target` and report what happened
    ///
    /// Only setup problems (unreadable source, ledger failure while scanning)
    /// are returned as errors; per-file failures land in the summary.
    pub async fn run(mut self, source: &Path, target: &Path) -> Result<RunSummary> {
        // Nobody listening: don't let events pile up.
        self.receiver.take();

        self.control.transition(&[RunState::Idle], RunState::Scanning);
        let result = self.run_inner(source, target).await;

        self.control.finish();
        match &result {
            Ok(summary) => self.events.emit(PipelineEvent::Finished(summary.clone())),
            Err(e) => self.events.log(format!("Run aborted: {}", e)),
        }
        result
    }

    async fn run_inner(&self, source: &Path, target: &Path) -> Result<RunSummary> {
        let candidates = self.scan(source, target)?;
        let total = candidates.len();

        if total == 0 {
            info!("Nothing to process in {:?}", source);
            self.events.log("No unprocessed media files found");
            return Ok(RunSummary::default());
        }
        if self.control.is_stopped() {
            return Ok(RunSummary {
                total,
                stopped_early: true,
                ..RunSummary::default()
            });
        }

        let workers = self.config.max_concurrent().min(total);
        info!("Processing {} files with {} workers", total, workers);
        self.events.log(format!("Processing {} files with {} workers", total, workers));

        let organizer = FileOrganizer::new(target, &self.config.organize);
        let ctx = Arc::new(RunContext {
            config: self.config.clone(),
            store: self.store.clone(),
            client: self.client.clone(),
            preparer: self.preparer.clone(),
            interpreter: ResponseInterpreter::from_config(&self.config),
            organizer: Arc::new(organizer),
            exporter: ErrorExporter::new(&self.config.error_export),
            prompt: classification_prompt(&self.config),
            control: self.control.clone(),
            events: self.events.clone(),
            queue: Mutex::new(candidates.into()),
            progress: Mutex::new(0),
            outcomes: Mutex::new(Vec::with_capacity(total)),
            total,
        });

        self.control.start_running();
        self.events.emit(PipelineEvent::Progress { completed: 0, total });

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let ctx = ctx.clone();
            pool.spawn(async move { ctx.worker(id).await });
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }

        let left = lock(&ctx.queue).len();
        let outcomes = lock(&ctx.outcomes);
        let summary = RunSummary::from_outcomes(total, &outcomes, self.control.is_stopped() && left > 0);
        info!(
            "Run finished: {} organized, {} failed, {} skipped, {} not started",
            summary.succeeded, summary.failed, summary.skipped, left
        );
        Ok(summary)
    }

    /// Purge stale ledger rows, then list media not yet recorded by path
    fn scan(&self, source: &Path, target: &Path) -> Result<Vec<MediaFile>> {
        let source = source
            .canonicalize()
            .map_err(|e| SortError::Scan(format!("cannot open {}: {}", source.display(), e)))?;
        std::fs::create_dir_all(target)?;
        let target = target.canonicalize()?;

        let purged = self.store.purge_missing()?;
        if purged > 0 {
            self.events.log(format!("Removed {} stale ledger entries", purged));
        }

        let media = &self.config.media;
        let options = ScanOptions {
            recursive: media.recursive,
            include_images: media.process_images,
            include_videos: media.process_videos,
            skip_dir_names: ErrorExporter::new(&self.config.error_export)
                .relative_folder_name()
                .map(|n| vec![n.to_string()])
                .unwrap_or_default(),
            // Organizing in place relies on the ledger instead.
            skip_paths: if target != source && target.starts_with(&source) {
                vec![target]
            } else {
                Vec::new()
            },
        };
        let files = scan_directory(&source, &options)?;

        let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        let fresh = self.store.list_unprocessed(&paths)?;
        let found = files.len();
        let fresh: HashSet<PathBuf> = fresh.into_iter().collect();
        let candidates: Vec<MediaFile> = files.into_iter().filter(|f| fresh.contains(&f.path)).collect();

        debug!("{} media files, {} unprocessed", found, candidates.len());
        self.events.log(format!(
            "Found {} media files, {} not yet processed",
            found,
            candidates.len()
        ));
        Ok(candidates)
    }
}

impl RunContext {
    async fn worker(self: Arc<Self>, id: usize) {
        debug!("Worker {} started", id);
        loop {
            if !self.control.checkpoint().await {
                break;
            }
            let next = lock(&self.queue).pop_front();
            let Some(file) = next else { break };

            let outcome = self.process(&file).await;
            self.record_outcome(outcome);
        }
        debug!("Worker {} done", id);
    }

    fn record_outcome(&self, outcome: FileOutcome) {
        let name = display_name(&outcome.path);
        match &outcome.status {
            FileStatus::Organized { category, dest } => {
                info!("{} -> {} ({:?})", name, category, dest);
                self.events.log(format!("{} -> {}", name, category));
            }
            FileStatus::Skipped { reason } => {
                debug!("{} skipped: {}", name, reason);
                self.events.log(format!("{} skipped: {}", name, reason));
            }
            FileStatus::Failed { kind, message } => {
                warn!("{} failed [{}]: {}", name, kind, message);
                self.events.log(format!("{} failed [{}]: {}", name, kind, message));
            }
        }

        lock(&self.outcomes).push(outcome.clone());
        self.events.emit(PipelineEvent::FileDone(outcome));

        // Emit under the lock so progress never goes backwards.
        let mut progress = lock(&self.progress);
        *progress += 1;
        self.events.emit(PipelineEvent::Progress {
            completed: *progress,
            total: self.total,
        });
    }

    async fn process(&self, file: &MediaFile) -> FileOutcome {
        let status = match self.classify_and_organize(file).await {
            Ok((category, dest)) => FileStatus::Organized { category, dest },
            Err(SortError::AlreadyProcessed(reason)) => FileStatus::Skipped { reason },
            Err(e) => {
                self.export_failure(&file.path, &e).await;
                FileStatus::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };
        FileOutcome {
            path: file.path.clone(),
            status,
        }
    }

    async fn classify_and_organize(&self, file: &MediaFile) -> Result<(String, PathBuf)> {
        let path = &file.path;
        if !path.is_file() {
            return Err(SortError::NotFound(path.display().to_string()));
        }
        // One pass over the bytes serves both the duplicate check and the record;
        // a move takes the bytes away, so this has to happen before organizing.
        let fingerprint = {
            let src = path.clone();
            tokio::task::spawn_blocking(move || Fingerprint::of(&src))
                .await
                .map_err(|e| SortError::FileSystem(std::io::Error::other(e)))?
        };
        if self.store.is_processed_with(path, &fingerprint)? {
            return Err(SortError::AlreadyProcessed("same file or content already in ledger".to_string()));
        }

        let prepared = self.preparer.prepare(file).await?;
        self.events.emit(PipelineEvent::Preview {
            path: path.clone(),
            jpeg: Arc::new(prepared.jpeg),
        });

        let request = ClassificationRequest::with_image(self.prompt.clone(), prepared.base64);
        let raw = self.client.classify(&request).await?;
        let interpretation = self.interpreter.interpret(&raw)?;

        let description = match interpretation.description {
            Some(d) => Some(d),
            None if self.wants_second_pass() => self.describe(request).await,
            None => None,
        };
        let rename = description.map(|description| RenameInfo {
            description,
            include_original: self.config.rename.include_original,
            date_token: self.config.rename.date_token,
            date_format: self.config.rename.date_format.clone(),
        });

        let category = interpretation.category;

        let organizer = self.organizer.clone();
        let (src, cat) = (path.clone(), category.clone());
        let dest = tokio::task::spawn_blocking(move || organizer.organize(&src, &cat, rename.as_ref()))
            .await
            .map_err(|e| SortError::OrganizeFailed(format!("organize task failed: {}", e)))??;

        self.record(path, &fingerprint, &category, &raw);
        Ok((category, dest))
    }

    /// The file is already in place; a lost ledger row only means it is seen again next run
    fn record(&self, path: &Path, fingerprint: &Fingerprint, category: &str, raw: &str) {
        let first = self.store.record_with_fingerprint(path, fingerprint, category, raw);
        let Err(e) = first.or_else(|e| {
            debug!("Ledger write for {:?} failed ({}), retrying once", path, e);
            self.store.record_with_fingerprint(path, fingerprint, category, raw)
        }) else {
            return;
        };
        warn!("Organized {:?} but could not record it in the ledger: {}", path, e);
        self.events.log(format!(
            "{} organized but not recorded in the ledger: {}",
            display_name(path),
            e
        ));
    }

    /// Structured replies carry their own description; plain ones need a second call
    fn wants_second_pass(&self) -> bool {
        self.config.rename.enabled && !self.config.classify.structured_output
    }

    /// Best effort: a failed description keeps the original name
    async fn describe(&self, mut request: ClassificationRequest) -> Option<String> {
        request.prompt = self.config.rename.prompt.clone();
        match self.client.classify(&request).await {
            Ok(text) => self.interpreter.description_from_text(&text),
            Err(e) => {
                warn!("Description request failed, keeping original name: {}", e);
                None
            }
        }
    }

    async fn export_failure(&self, path: &Path, error: &SortError) {
        if !self.exporter.enabled() || !ErrorExporter::should_export(error) {
            return;
        }
        let exporter = self.exporter.clone();
        let path = path.to_path_buf();
        let message = error.to_string();
        let kind = error.kind();

        let result = tokio::task::spawn_blocking(move || exporter.export(&path, &message, kind)).await;
        match result {
            Ok(Ok(Some(copy))) => debug!("Failure copy at {:?}", copy),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Could not export failed file: {}", e),
            Err(e) => warn!("Export task failed: {}", e),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
