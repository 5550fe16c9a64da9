//! Analyzer subprocess runner.
//!
//! Invokes the external ARLogAnalyzer JAR with bounded resources: a sized JVM
//! heap, a wall-clock deadline, and piped stdio. Stdout is delivered line by
//! line to a caller-supplied observer so the ingestion pipeline can pick up
//! progress markers while the analyzer runs; stderr is accumulated for
//! diagnostic attachment to the job record.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::models::AnalysisOptions;

/// Seam between the pipeline and the analyzer subprocess, so tests can
/// substitute a canned analyzer without a JVM.
#[async_trait]
pub trait AnalyzerRunner: Send + Sync {
    async fn run(
        &self,
        input: &Path,
        heap_mb: u32,
        timeout_secs: u64,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
        on_stdout: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<JarOutput, JarError>;
}

/// Heap sizing bounds in MB.
const MIN_HEAP_MB: u64 = 2048;
const MAX_HEAP_MB: u64 = 20480;

/// Captured output of an analyzer run. Present on every outcome, including
/// timeouts and failures, so the report parser can attempt a best-effort
/// parse of whatever the analyzer managed to print.
#[derive(Debug, Default, Clone)]
pub struct JarOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum JarError {
    #[error("analyzer timed out after {seconds}s")]
    Timeout { output: JarOutput, seconds: u64 },

    #[error("analyzer exited with status {exit_code}")]
    Failed { output: JarOutput, exit_code: i32 },

    #[error("analyzer cancelled")]
    Cancelled { output: JarOutput },

    #[error("failed to spawn analyzer: {0}")]
    Spawn(#[from] std::io::Error),
}

impl JarError {
    pub fn output(&self) -> Option<&JarOutput> {
        match self {
            Self::Timeout { output, .. }
            | Self::Failed { output, .. }
            | Self::Cancelled { output } => Some(output),
            Self::Spawn(_) => None,
        }
    }
}

/// `max(2048, min(20480, 4 x file_size_mb))` unless the job overrides it.
pub fn resolve_heap_mb(file_size_bytes: u64, override_mb: Option<u32>) -> u32 {
    if let Some(mb) = override_mb {
        return mb;
    }
    let file_size_mb = file_size_bytes / (1024 * 1024);
    (4 * file_size_mb).clamp(MIN_HEAP_MB, MAX_HEAP_MB) as u32
}

pub struct JarRunner {
    jar_path: PathBuf,
}

impl JarRunner {
    pub fn new(jar_path: impl Into<PathBuf>) -> Self {
        Self { jar_path: jar_path.into() }
    }

    /// Build the analyzer argv from the flag bundle. Empty-valued options are
    /// suppressed; per-type skip flags render as bare switches.
    pub fn build_args(
        &self,
        input: &Path,
        heap_mb: u32,
        options: &AnalysisOptions,
    ) -> Vec<String> {
        let mut args = vec![
            format!("-Xmx{}m", heap_mb),
            "-jar".to_string(),
            self.jar_path.display().to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-n".to_string(),
            options.top_n.to_string(),
        ];

        let mut push_opt = |flag: &str, value: &str| {
            if !value.is_empty() {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        };

        push_opt("-g", &options.group_by.join(","));
        push_opt("-s", options.sort_by.as_deref().unwrap_or(""));
        push_opt("-u", &options.include_users.join(","));
        push_opt("-x", &options.exclude_users.join(","));
        push_opt("-b", options.begin_time.as_deref().unwrap_or(""));
        push_opt("-e", options.end_time.as_deref().unwrap_or(""));
        push_opt("-l", options.locale.as_deref().unwrap_or(""));
        push_opt("-d", options.date_format.as_deref().unwrap_or(""));

        if options.skip_api {
            args.push("--skip-api".to_string());
        }
        if options.skip_sql {
            args.push("--skip-sql".to_string());
        }
        if options.skip_fltr {
            args.push("--skip-fltr".to_string());
        }
        if options.skip_escl {
            args.push("--skip-escl".to_string());
        }
        if options.enable_fts {
            args.push("--fts".to_string());
        }

        args
    }

    /// Run the analyzer to completion, a deadline, or cancellation.
    ///
    /// `on_stdout` observes each stdout line as it arrives. On deadline or
    /// cancellation the whole process tree receives a fatal signal.
    async fn run_process(
        &self,
        input: &Path,
        heap_mb: u32,
        timeout_secs: u64,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
        on_stdout: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<JarOutput, JarError> {
        let args = self.build_args(input, heap_mb, options);
        tracing::debug!(args = ?args, "spawning analyzer");

        let mut child = Command::new("java")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_pipe = child.stdout.take().expect("stdout piped");
        let stderr_pipe = child.stderr.take().expect("stderr piped");

        // Stderr is drained on its own task so a chatty analyzer cannot
        // deadlock against a full pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr_pipe);
            let _ = reader.read_to_string(&mut buf).await;
            buf
        });

        let mut stdout = String::new();
        let mut stdout_lines = BufReader::new(stdout_pipe).lines();
        let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_stdout(&line);
                        stdout.push_str(&line);
                        stdout.push('\n');
                    }
                    Ok(None) => break Outcome::Finished,
                    Err(err) => {
                        tracing::warn!(error = %err, "analyzer stdout read failed");
                        break Outcome::Finished;
                    }
                },
                () = &mut deadline => break Outcome::TimedOut,
                () = cancel.cancelled() => break Outcome::Cancelled,
            }
        };

        if !matches!(outcome, Outcome::Finished) {
            let _ = child.start_kill();
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        let output = JarOutput { stdout, stderr };

        match outcome {
            Outcome::TimedOut => Err(JarError::Timeout { output, seconds: timeout_secs }),
            Outcome::Cancelled => Err(JarError::Cancelled { output }),
            Outcome::Finished => {
                let exit_code = status.code().unwrap_or(-1);
                if status.success() {
                    Ok(output)
                } else {
                    Err(JarError::Failed { output, exit_code })
                }
            }
        }
    }
}

enum Outcome {
    Finished,
    TimedOut,
    Cancelled,
}

#[async_trait]
impl AnalyzerRunner for JarRunner {
    async fn run(
        &self,
        input: &Path,
        heap_mb: u32,
        timeout_secs: u64,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
        on_stdout: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<JarOutput, JarError> {
        self.run_process(input, heap_mb, timeout_secs, options, cancel, on_stdout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_heuristic_bounds() {
        // Small files get the floor.
        assert_eq!(resolve_heap_mb(10 * 1024 * 1024, None), 2048);
        // 1 GB file -> 4096 MB heap.
        assert_eq!(resolve_heap_mb(1024 * 1024 * 1024, None), 4096);
        // Huge files are capped.
        assert_eq!(resolve_heap_mb(100 * 1024 * 1024 * 1024, None), 20480);
        // Explicit override wins.
        assert_eq!(resolve_heap_mb(1024, Some(512)), 512);
    }

    #[test]
    fn argv_suppresses_empty_options() {
        let runner = JarRunner::new("/opt/arloganalyzer.jar");
        let options = AnalysisOptions {
            top_n: 50,
            group_by: vec!["form".into(), "client".into()],
            skip_sql: true,
            enable_fts: false,
            ..Default::default()
        };
        let args = runner.build_args(Path::new("/tmp/in.log"), 4096, &options);

        assert_eq!(args[0], "-Xmx4096m");
        assert!(args.contains(&"-g".to_string()));
        assert!(args.contains(&"form,client".to_string()));
        assert!(args.contains(&"--skip-sql".to_string()));
        // Empty-valued options never appear.
        assert!(!args.contains(&"-u".to_string()));
        assert!(!args.contains(&"-b".to_string()));
        assert!(!args.contains(&"--fts".to_string()));
        assert!(!args.contains(&"--skip-api".to_string()));
    }
}
