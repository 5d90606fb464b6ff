//! Drives one job from launch to a terminal state.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::engine::{EngineProcess, ExitOutcome, OutputLayout, SeparationEngine};
use crate::error::StemsplitError;
use crate::state_machine::{JobId, Lifecycle, ProgressPolicy, ResultFile, Transition};
use crate::store::JobStore;

/// Owns a job record while its engine process runs.
///
/// The engine gives no progress signal, so while it runs the supervisor
/// polls it once per `poll_interval` and advances a synthetic progress value
/// along [`ProgressPolicy`]. It is the only writer of the record until the
/// record reaches `done` or `error`.
pub struct ExecutionSupervisor<E> {
    store: JobStore,
    engine: Arc<E>,
    layout: Arc<OutputLayout>,
    policy: ProgressPolicy,
    poll_interval: Duration,
}

impl<E: SeparationEngine> ExecutionSupervisor<E> {
    pub fn new(
        store: JobStore,
        engine: Arc<E>,
        layout: Arc<OutputLayout>,
        policy: ProgressPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            layout,
            policy,
            poll_interval,
        }
    }

    /// Runs the job to completion. Failures are recorded on the job, never
    /// returned.
    pub async fn run(&self, id: JobId, input: PathBuf) {
        let span = info_span!("job", job_id = %id);
        async {
            match self.store.update(&id, Lifecycle::begin) {
                Ok(Transition::Started) => {}
                Ok(_) => {
                    warn!("job already finished; not starting it again");
                    return;
                }
                Err(e) => {
                    warn!("job vanished before it started: {e}");
                    return;
                }
            }
            info!(input = %input.display(), "separation started");

            let recorded = match self.execute(&id, &input).await {
                Ok(files) => self.store.update(&id, |r| Lifecycle::finish(r, files)),
                Err(e) => {
                    warn!("separation failed: {e}");
                    let message = e.to_string();
                    self.store.update(&id, |r| Lifecycle::fail(r, message))
                }
            };
            if let Err(e) = recorded {
                warn!("could not record job outcome: {e}");
                return;
            }
            if let Ok(record) = self.store.get(&id) {
                let elapsed = Utc::now() - record.created_at;
                info!(
                    status = %record.status,
                    files = record.files.len(),
                    elapsed_secs = elapsed.num_seconds(),
                    "job finished"
                );
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, id: &JobId, input: &Path) -> Result<Vec<ResultFile>, StemsplitError> {
        let name = self.engine.name();
        let mut process = self
            .engine
            .launch(input, &self.layout.output_root)
            .map_err(|e| StemsplitError::Process(format!("failed to launch {name}: {e}")))?;

        match self.wait_with_heartbeat(id, &mut process).await? {
            ExitOutcome::Success => {}
            ExitOutcome::Failure { code: Some(code) } => {
                return Err(StemsplitError::Process(format!(
                    "{name} exited with status {code}"
                )));
            }
            ExitOutcome::Failure { code: None } => {
                return Err(StemsplitError::Process(format!(
                    "{name} was terminated by a signal"
                )));
            }
        }

        self.store.update(id, Lifecycle::collecting)?;
        self.collect_results(input).await
    }

    async fn wait_with_heartbeat(
        &self,
        id: &JobId,
        process: &mut E::Process,
    ) -> Result<ExitOutcome, StemsplitError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let polled = process.try_wait().map_err(|e| {
                StemsplitError::Process(format!("failed to poll {}: {e}", self.engine.name()))
            })?;
            if let Some(outcome) = polled {
                debug!(?outcome, "engine exited");
                return Ok(outcome);
            }
            let policy = self.policy;
            if let Transition::Advanced(progress) =
                self.store.update(id, |r| Lifecycle::tick(r, policy))?
            {
                debug!(progress, "heartbeat");
            }
        }
    }

    /// Lists result files in the engine's output directory for `input`,
    /// sorted by name. A missing directory yields no files.
    async fn collect_results(&self, input: &Path) -> Result<Vec<ResultFile>, StemsplitError> {
        let dir = self.layout.stem_dir(input);
        let scan_error = |e: io::Error| {
            StemsplitError::Process(format!("failed to read results in {}: {e}", dir.display()))
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "engine output directory missing; no files");
                return Ok(Vec::new());
            }
            Err(e) => return Err(scan_error(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let path = entry.path();
            let is_file = entry.file_type().await.map_err(scan_error)?.is_file();
            if !is_file || !self.layout.is_result(&path) {
                continue;
            }
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| ResultFile {
                url: self.layout.result_url(input, &name),
                name,
            })
            .collect())
    }
}
