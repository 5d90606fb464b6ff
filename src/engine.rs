//! Seam around the external separation process.
//!
//! The engine is opaque: it takes an input file and an output root, runs to
//! completion, and leaves its stems under
//! `<output_root>/<model_namespace>/<input stem>/`. The only signal it gives
//! is its exit status.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

/// How a finished engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure { code: Option<i32> },
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failure {
                code: status.code(),
            }
        }
    }
}

/// A running engine process that can be polled without blocking.
pub trait EngineProcess: Send {
    /// Returns `Ok(None)` while the process is still running.
    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>>;
}

impl EngineProcess for Child {
    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        Ok(Child::try_wait(self)?.map(ExitOutcome::from))
    }
}

/// Something that can start a separation run.
pub trait SeparationEngine: Send + Sync + 'static {
    type Process: EngineProcess + 'static;

    /// Human-readable engine name used in logs and error messages.
    fn name(&self) -> &str;

    fn launch(&self, input: &Path, output_root: &Path) -> io::Result<Self::Process>;
}

/// Runs the `demucs` command line.
#[derive(Debug, Clone)]
pub struct DemucsEngine {
    program: String,
    extra_args: Vec<String>,
}

impl DemucsEngine {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    fn command(&self, input: &Path, output_root: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(input)
            .arg("-o")
            .arg(output_root)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for DemucsEngine {
    fn default() -> Self {
        Self::new("demucs", vec!["--float32".to_string()])
    }
}

impl SeparationEngine for DemucsEngine {
    type Process = Child;

    fn name(&self) -> &str {
        &self.program
    }

    fn launch(&self, input: &Path, output_root: &Path) -> io::Result<Child> {
        self.command(input, output_root).spawn()
    }
}

/// Where the engine writes results and how they are addressed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub output_root: PathBuf,
    pub model_namespace: String,
    pub result_extension: String,
}

impl OutputLayout {
    pub fn new(
        output_root: impl Into<PathBuf>,
        model_namespace: impl Into<String>,
        result_extension: impl Into<String>,
    ) -> Self {
        Self {
            output_root: output_root.into(),
            model_namespace: model_namespace.into(),
            result_extension: result_extension.into(),
        }
    }

    /// Input file name without its extension.
    pub fn stem(input: &Path) -> String {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stem_dir(&self, input: &Path) -> PathBuf {
        self.output_root
            .join(&self.model_namespace)
            .join(Self::stem(input))
    }

    pub fn result_url(&self, input: &Path, file_name: &str) -> String {
        format!(
            "/outputs/{}/{}/{}",
            self.model_namespace,
            Self::stem(input),
            file_name
        )
    }

    pub fn is_result(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.result_extension))
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new("outputs", "htdemucs", "wav")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_dir_follows_engine_convention() {
        let layout = OutputLayout::new("/data/outputs", "htdemucs", "wav");
        let input = Path::new("/data/uploads/1234_song.mp3");
        assert_eq!(
            layout.stem_dir(input),
            PathBuf::from("/data/outputs/htdemucs/1234_song")
        );
    }

    #[test]
    fn result_url_matches_stem_dir() {
        let layout = OutputLayout::default();
        let input = Path::new("uploads/song.mp3");
        assert_eq!(
            layout.result_url(input, "vocals.wav"),
            "/outputs/htdemucs/song/vocals.wav"
        );
    }

    #[test]
    fn stem_keeps_inner_dots() {
        assert_eq!(OutputLayout::stem(Path::new("my.song.v2.flac")), "my.song.v2");
    }

    #[test]
    fn result_extension_filter() {
        let layout = OutputLayout::default();
        assert!(layout.is_result(Path::new("drums.wav")));
        assert!(layout.is_result(Path::new("drums.WAV")));
        assert!(!layout.is_result(Path::new("drums.mp3")));
        assert!(!layout.is_result(Path::new("README")));
    }

    #[test]
    fn demucs_command_line() {
        let engine = DemucsEngine::default();
        let cmd = engine.command(Path::new("in/song.mp3"), Path::new("out"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "demucs");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["in/song.mp3", "-o", "out", "--float32"]);
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let engine = DemucsEngine::new("stemsplit-no-such-engine-binary", Vec::new());
        let err = engine
            .launch(Path::new("song.mp3"), Path::new("out"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_process_reports_exit_outcome() {
        let ok = DemucsEngine::new("true", Vec::new());
        let mut child = ok.launch(Path::new("a"), Path::new("b")).unwrap();
        let outcome = loop {
            if let Some(outcome) = EngineProcess::try_wait(&mut child).unwrap() {
                break outcome;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(outcome, ExitOutcome::Success);

        let bad = DemucsEngine::new("false", Vec::new());
        let mut child = bad.launch(Path::new("a"), Path::new("b")).unwrap();
        let outcome = loop {
            if let Some(outcome) = EngineProcess::try_wait(&mut child).unwrap() {
                break outcome;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(outcome, ExitOutcome::Failure { code: Some(1) });
    }
}
