//! Helper tool jobs: video download and metadata dump.
//!
//! Both tools are external executables found by (usually relative) path and
//! driven through the [`ProcessSupervisor`]. Results come back as a
//! [`ToolResult`], never as engine error codes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::process::{JobEvent, JobHandle, JobOutcome, JobSpec, ProcessSupervisor, StderrPolicy};

pub const DOWNLOAD_FAILED: &str = "Download failed";
pub const METADATA_FAILED: &str = "Reading media metadata failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp compatible downloader
    pub downloader: PathBuf,
    /// mediainfo compatible metadata dumper
    pub metadata_tool: PathBuf,
    /// Defaults to `VideoDownload` next to the executable
    pub download_dir: Option<PathBuf>,
    pub format: String,
    pub merge_format: String,
    pub output_template: String,
    pub stderr_policy: StderrPolicy,
    pub timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            downloader: PathBuf::from("third/yt-dlp"),
            metadata_tool: PathBuf::from("third/Mediainfo/mediainfo"),
            download_dir: None,
            format: "bv[ext=mp4]+ba[ext=m4a]".to_string(),
            merge_format: "mp4".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            stderr_policy: StderrPolicy::ReportAll,
            timeout_secs: None,
        }
    }
}

impl ToolsConfig {
    pub fn download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("VideoDownload")
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// `-o <dir>/<template> -f <format> --embed-metadata --merge-output-format <fmt> <url>`
    pub fn download_args(&self, dir: &Path, url: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            dir.join(&self.output_template).to_string_lossy().into_owned(),
            "-f".to_string(),
            self.format.clone(),
            "--embed-metadata".to_string(),
            "--merge-output-format".to_string(),
            self.merge_format.clone(),
            url.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolResult {
    Success { path: PathBuf, output: String },
    Failure { message: String },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }
}

/// Final file named by the downloader's own output. A merge beats an
/// earlier "already downloaded" notice, which beats a plain destination.
pub fn downloaded_path_from_log(log: &str) -> Option<PathBuf> {
    let lines: Vec<&str> = log.split(['\n', '\r']).map(str::trim).collect();
    let last = |extract: fn(&str) -> Option<&str>| lines.iter().rev().find_map(|&l| extract(l));

    last(merged_into)
        .or_else(|| last(already_downloaded))
        .or_else(|| last(destination))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

fn merged_into(line: &str) -> Option<&str> {
    line.strip_prefix("[Merger] Merging formats into ")?
        .strip_prefix('"')?
        .strip_suffix('"')
}

fn already_downloaded(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("[download] ")?;
    rest.split_once(" has already been downloaded").map(|(path, _)| path)
}

fn destination(line: &str) -> Option<&str> {
    line.strip_prefix("[download] Destination: ")
}

/// Downloader scratch files: `.part`, `.part-FragN`, `.ytdl`, `x.temp.mp4`.
fn is_partial_download(path: &Path) -> bool {
    let ext = |p: &Path| p.extension().and_then(|e| e.to_str()).map(str::to_owned);
    match ext(path) {
        Some(e) if e.starts_with("part") || e == "ytdl" => true,
        _ => path
            .file_stem()
            .map(|stem| ext(Path::new(stem)).as_deref() == Some("temp"))
            .unwrap_or(false),
    }
}

/// Newest finished regular file directly inside `dir`.
pub fn most_recent_file(dir: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot list {}: {}", dir.display(), e);
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            let path = entry.path();
            if !meta.is_file() || is_partial_download(&path) {
                return None;
            }
            Some((meta.modified().ok()?, path))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

/// Forward every job event to `on_event`, then wait for the outcome.
pub async fn drive_job<F>(job: &mut JobHandle, mut on_event: F) -> JobOutcome
where
    F: FnMut(&JobEvent),
{
    while let Some(event) = job.next_event().await {
        on_event(&event);
    }
    job.wait().await
}

pub struct MediaTools {
    config: ToolsConfig,
    supervisor: ProcessSupervisor,
}

impl MediaTools {
    pub fn new(config: ToolsConfig, supervisor: ProcessSupervisor) -> Self {
        Self { config, supervisor }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Start a download into the download directory (created if missing).
    pub fn start_download(&self, url: &str) -> Result<(JobHandle, PathBuf), ValidationError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }

        let dir = self.config.download_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Could not create {}: {}", dir.display(), e);
        }

        let spec = JobSpec::new(&self.config.downloader, self.config.download_args(&dir, url))
            .timeout(self.config.timeout())
            .stderr_policy(self.config.stderr_policy)
            .failure_message(DOWNLOAD_FAILED);
        Ok((self.supervisor.run(spec), dir))
    }

    /// Start a metadata dump of `media`. Fails fast when nothing is loaded.
    pub fn start_metadata(&self, media: Option<&str>) -> Result<JobHandle, ValidationError> {
        let media = media.map(str::trim).filter(|m| !m.is_empty());
        let Some(media) = media else {
            return Err(ValidationError::NoActiveMedia);
        };

        let spec = JobSpec::new(&self.config.metadata_tool, vec![media.to_string()])
            .timeout(self.config.timeout())
            .stderr_policy(self.config.stderr_policy)
            .failure_message(METADATA_FAILED);
        Ok(self.supervisor.run(spec))
    }

    /// Result of a finished download job.
    pub fn download_result(outcome: &JobOutcome, dir: &Path, output: String) -> ToolResult {
        if !outcome.is_success() {
            return ToolResult::Failure {
                message: outcome.describe(DOWNLOAD_FAILED),
            };
        }
        let path = downloaded_path_from_log(&output)
            .filter(|path| path.is_file())
            .or_else(|| most_recent_file(dir))
            .unwrap_or_else(|| dir.to_path_buf());
        ToolResult::Success { path, output }
    }

    /// Result of a finished metadata job.
    pub fn metadata_result(outcome: &JobOutcome, media: &str, output: String) -> ToolResult {
        if outcome.is_success() {
            ToolResult::Success {
                path: PathBuf::from(media),
                output,
            }
        } else {
            ToolResult::Failure {
                message: outcome.describe(METADATA_FAILED),
            }
        }
    }
}
