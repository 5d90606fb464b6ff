use serde::{Deserialize, Serialize};

use super::job::{JobRecord, JobStatus, ResultFile};

/// Progress reported once the supervisor has taken ownership of a job.
pub const PROCESSING_PROGRESS: u8 = 10;
/// Progress reported while result files are being collected.
pub const COLLECTING_PROGRESS: u8 = 95;
/// Progress of a finished job.
pub const DONE_PROGRESS: u8 = 100;

/// Shape of the synthetic progress curve shown while the engine runs.
///
/// The engine reports nothing but its exit status, so each poll that finds it
/// still running advances progress by `step` until `ceiling` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPolicy {
    pub step: u8,
    pub ceiling: u8,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            step: 2,
            ceiling: 90,
        }
    }
}

/// The result of applying a lifecycle event to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `starting -> processing`.
    Started,
    /// Heartbeat moved progress to the contained value.
    Advanced(u8),
    /// Heartbeat left progress where it was (ceiling reached).
    Held(u8),
    /// Engine exited successfully; results are being collected.
    Collecting,
    /// `processing -> done`.
    Finished,
    /// `-> error`.
    Failed,
    /// The record was already terminal and has not been touched.
    Ignored,
}

/// Applies lifecycle events to a [`JobRecord`].
///
/// Every event is a no-op on terminal records and progress is only ever
/// raised, so any sequence of events yields a monotonic history.
pub struct Lifecycle;

impl Lifecycle {
    pub fn begin(record: &mut JobRecord) -> Transition {
        if record.is_terminal() {
            return Transition::Ignored;
        }
        record.status = JobStatus::Processing;
        raise(record, PROCESSING_PROGRESS);
        Transition::Started
    }

    /// One heartbeat while the engine is still running.
    pub fn tick(record: &mut JobRecord, policy: ProgressPolicy) -> Transition {
        if record.is_terminal() {
            return Transition::Ignored;
        }
        if record.progress < policy.ceiling {
            let next = record.progress.saturating_add(policy.step).min(DONE_PROGRESS - 1);
            raise(record, next);
            Transition::Advanced(record.progress)
        } else {
            Transition::Held(record.progress)
        }
    }

    pub fn collecting(record: &mut JobRecord) -> Transition {
        if record.is_terminal() {
            return Transition::Ignored;
        }
        raise(record, COLLECTING_PROGRESS);
        Transition::Collecting
    }

    /// Publishes the result files and marks the job done in one step, so a
    /// reader never sees `done` without its files.
    pub fn finish(record: &mut JobRecord, files: Vec<ResultFile>) -> Transition {
        if record.is_terminal() {
            return Transition::Ignored;
        }
        record.files = files;
        record.progress = DONE_PROGRESS;
        record.status = JobStatus::Done;
        Transition::Finished
    }

    /// Progress is left at whatever value it held.
    pub fn fail(record: &mut JobRecord, message: impl Into<String>) -> Transition {
        if record.is_terminal() {
            return Transition::Ignored;
        }
        record.status = JobStatus::Error;
        record.error = Some(message.into());
        Transition::Failed
    }
}

fn raise(record: &mut JobRecord, progress: u8) {
    record.progress = record.progress.max(progress);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::job::JobId;

    fn make_record() -> JobRecord {
        JobRecord::new(JobId::from("song"))
    }

    #[test]
    fn begin_moves_to_processing_at_ten() {
        let mut record = make_record();
        assert_eq!(Lifecycle::begin(&mut record), Transition::Started);
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 10);
    }

    #[test]
    fn heartbeat_approaches_but_never_passes_ceiling() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        let policy = ProgressPolicy::default();

        let mut previous = record.progress;
        for _ in 0..100 {
            Lifecycle::tick(&mut record, policy);
            assert!(record.progress >= previous);
            previous = record.progress;
        }
        assert_eq!(record.progress, 90);
        assert_eq!(
            Lifecycle::tick(&mut record, policy),
            Transition::Held(90)
        );
    }

    #[test]
    fn heartbeat_steps_by_configured_amount() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        let policy = ProgressPolicy { step: 7, ceiling: 50 };
        assert_eq!(Lifecycle::tick(&mut record, policy), Transition::Advanced(17));
        assert_eq!(Lifecycle::tick(&mut record, policy), Transition::Advanced(24));
    }

    #[test]
    fn uneven_step_may_overshoot_ceiling_once() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        record.progress = 89;
        Lifecycle::tick(&mut record, ProgressPolicy::default());
        assert_eq!(record.progress, 91);
        assert_eq!(
            Lifecycle::tick(&mut record, ProgressPolicy::default()),
            Transition::Held(91)
        );
    }

    #[test]
    fn finish_sets_files_and_done_together() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        Lifecycle::collecting(&mut record);
        assert_eq!(record.progress, 95);

        let files = vec![ResultFile {
            name: "vocals.wav".into(),
            url: "/outputs/htdemucs/song/vocals.wav".into(),
        }];
        assert_eq!(Lifecycle::finish(&mut record, files.clone()), Transition::Finished);
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.progress, 100);
        assert_eq!(record.files, files);
    }

    #[test]
    fn fail_freezes_progress() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        Lifecycle::tick(&mut record, ProgressPolicy::default());
        Lifecycle::tick(&mut record, ProgressPolicy::default());

        assert_eq!(Lifecycle::fail(&mut record, "engine crashed"), Transition::Failed);
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.progress, 14);
        assert_eq!(record.error.as_deref(), Some("engine crashed"));
        assert!(record.files.is_empty());
    }

    #[test]
    fn terminal_records_are_never_touched() {
        let mut record = make_record();
        Lifecycle::begin(&mut record);
        Lifecycle::finish(&mut record, Vec::new());
        let snapshot = record.clone();

        assert_eq!(Lifecycle::begin(&mut record), Transition::Ignored);
        assert_eq!(
            Lifecycle::tick(&mut record, ProgressPolicy::default()),
            Transition::Ignored
        );
        assert_eq!(Lifecycle::collecting(&mut record), Transition::Ignored);
        assert_eq!(Lifecycle::fail(&mut record, "late"), Transition::Ignored);
        assert_eq!(record, snapshot);
    }
}
