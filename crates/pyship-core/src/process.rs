use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{anyhow, Context, Result};

const DEFAULT_CAPTURE_LIMIT: usize = 512 * 1024;
const TRUNCATION_MARKER: &str = "[...earlier output truncated...]\n";

fn capture_limit() -> usize {
    std::env::var("PYSHIP_MAX_CAPTURE_BYTES")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CAPTURE_LIMIT)
}

/// Exit status and captured streams of one external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stdout followed by stderr, for diagnostics and marker matching.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
        }
    }
}

/// Runs `program` to completion with stdin closed, capturing both streams.
///
/// An env pair with an empty value removes that variable from the child.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its streams cannot
/// be drained.
pub fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd);
    for (key, value) in envs {
        if value.is_empty() {
            command.env_remove(key);
        } else {
            command.env(key, value);
        }
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout missing for {program}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr missing for {program}"))?;
    let limit = capture_limit();
    let stdout_reader = thread::spawn(move || capture_tail(stdout, limit));
    let stderr_reader = thread::spawn(move || capture_tail(stderr, limit));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;
    let stdout = stdout_reader
        .join()
        .map_err(|_| anyhow!("stdout reader for {program} panicked"))??;
    let stderr = stderr_reader
        .join()
        .map_err(|_| anyhow!("stderr reader for {program} panicked"))??;
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Drains `reader`, keeping at most the last `limit` bytes.
fn capture_tail(mut reader: impl Read, limit: usize) -> Result<String> {
    let mut kept: Vec<u8> = Vec::new();
    let mut dropped = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        kept.extend_from_slice(&chunk[..read]);
        if kept.len() > limit {
            let overflow = kept.len() - limit;
            kept.drain(..overflow);
            dropped = true;
        }
    }
    let text = String::from_utf8_lossy(&kept);
    Ok(if dropped {
        format!("{TRUNCATION_MARKER}{text}")
    } else {
        text.into_owned()
    })
}
