//! Last-resort backend: shell out to ffmpeg, transcode to a mono 44.1kHz
//! scratch WAV, read it back with hound. The scratch file is removed on
//! every exit path — success, decode error, timeout, or panic.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::FfmpegConfig;

use super::{wav, BackendError, RawAudio};

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Scratch WAV path that cleans itself up when dropped.
/// Deletion failures are logged, never escalated.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new() -> Self {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "soundalike_ffmpeg_{}_{}.wav",
            std::process::id(),
            seq
        ));
        Self { path }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("Failed to delete scratch file {}: {}", self.path.display(), e);
            }
        }
    }
}

pub(crate) fn load(path: &Path, config: &FfmpegConfig) -> Result<RawAudio, BackendError> {
    let binary = config.resolve_binary();
    let scratch = ScratchFile::new();

    let mut child = Command::new(&binary)
        .args(["-loglevel", "error", "-y", "-i"])
        .arg(path)
        .args(["-ac", "1", "-ar", "44100", "-f", "wav"])
        .arg(&scratch.path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackendError::Ffmpeg(format!("failed to spawn {binary}: {e}")))?;

    let timeout = Duration::from_secs(config.timeout_secs);
    let status = match wait_with_timeout(&mut child, timeout)? {
        Some(status) => status,
        None => {
            child.kill().ok();
            child.wait().ok();
            return Err(BackendError::Ffmpeg(format!(
                "timed out after {}s transcoding {}",
                config.timeout_secs,
                path.display()
            )));
        }
    };

    if !status.success() {
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).ok();
        }
        return Err(BackendError::Ffmpeg(format!(
            "exit {}: {}",
            status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    // Scratch file is deleted by the guard even if this read fails.
    wav::load(&scratch.path)
}

/// Poll the child until it exits or the deadline passes.
/// Returns None on timeout; the caller kills the child.
fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>, BackendError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let path;
        {
            let scratch = ScratchFile::new();
            std::fs::write(&scratch.path, b"RIFF").unwrap();
            path = scratch.path.clone();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_binary_is_backend_error() {
        let config = FfmpegConfig {
            binary: "soundalike-no-such-binary".into(),
            timeout_secs: 5,
        };
        let err = load(Path::new("/tmp/in.mp3"), &config).unwrap_err();
        assert!(matches!(err, BackendError::Ffmpeg(_)));
    }
}
