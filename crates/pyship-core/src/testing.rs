//! In-memory collaborators for exercising the pipeline without tools or network.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use toml_edit::DocumentMut;
use walkdir::WalkDir;

use pyship_domain::to_posix_rel;

use crate::cancel::CancelToken;
use crate::effects::{Clock, DiagnosticsSink, Effects, IndexClient, Level, ProcessRunner};
use crate::index::IndexError;
use crate::process::RunOutput;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct FakeEffects {
    pub(crate) process: FakeProcess,
    pub(crate) index: FakeIndex,
    pub(crate) clock: FakeClock,
    pub(crate) sink: MemorySink,
}

impl FakeEffects {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Effects for FakeEffects {
    fn process(&self) -> &dyn ProcessRunner {
        &self.process
    }

    fn index(&self) -> &dyn IndexClient {
        &self.index
    }

    fn clock(&self) -> &dyn Clock {
        &self.clock
    }

    fn diagnostics(&self) -> &dyn DiagnosticsSink {
        &self.sink
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) cwd: PathBuf,
    /// Files under `cwd` at the moment the tool ran.
    pub(crate) files: Vec<String>,
}

impl Invocation {
    pub(crate) fn is_build(&self) -> bool {
        self.args.iter().take(2).eq(["-m", "build"].iter())
    }

    pub(crate) fn is_upload(&self) -> bool {
        self.args.iter().take(2).eq(["-m", "twine"].iter())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) enum BuildBehavior {
    /// Writes a wheel and sdist named after `pyproject.toml`.
    #[default]
    Succeed,
    WheelOnly,
    Fail(RunOutput),
}

pub(crate) struct FakeProcess {
    build: Mutex<BuildBehavior>,
    upload: Mutex<RunOutput>,
    calls: Mutex<Vec<Invocation>>,
}

impl Default for FakeProcess {
    fn default() -> Self {
        Self {
            build: Mutex::new(BuildBehavior::Succeed),
            upload: Mutex::new(RunOutput {
                code: 0,
                stdout: "Uploading distributions to https://upload.pypi.org/legacy/\n".into(),
                stderr: String::new(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProcess {
    pub(crate) fn set_build(&self, behavior: BuildBehavior) {
        *guard(&self.build) = behavior;
    }

    pub(crate) fn set_upload(&self, output: RunOutput) {
        *guard(&self.upload) = output;
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        guard(&self.calls).clone()
    }

    pub(crate) fn builds(&self) -> usize {
        self.invocations().iter().filter(|call| call.is_build()).count()
    }

    pub(crate) fn uploads(&self) -> usize {
        self.invocations().iter().filter(|call| call.is_upload()).count()
    }

    fn simulate_build(&self, args: &[String], cwd: &Path) -> Result<RunOutput> {
        let behavior = guard(&self.build).clone();
        if let BuildBehavior::Fail(output) = behavior {
            return Ok(output);
        }
        let outdir = args
            .iter()
            .position(|arg| arg == "--outdir")
            .and_then(|pos| args.get(pos + 1))
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("build invoked without --outdir"))?;
        let pyproject = fs::read_to_string(cwd.join("pyproject.toml"))
            .context("fake build needs pyproject.toml")?
            .parse::<DocumentMut>()?;
        let name = pyproject["project"]["name"]
            .as_str()
            .ok_or_else(|| anyhow!("pyproject.toml has no project.name"))?
            .replace('-', "_");
        let version = pyproject["project"]["version"]
            .as_str()
            .ok_or_else(|| anyhow!("pyproject.toml has no project.version"))?
            .to_string();
        fs::create_dir_all(&outdir)?;
        let wheel = format!("{name}-{version}-py3-none-any.whl");
        fs::write(outdir.join(&wheel), format!("wheel {name} {version}"))?;
        let mut built = wheel;
        if !matches!(behavior, BuildBehavior::WheelOnly) {
            let sdist = format!("{name}-{version}.tar.gz");
            fs::write(outdir.join(&sdist), format!("sdist {name} {version}"))?;
            built = format!("{sdist} and {built}");
        }
        Ok(RunOutput {
            code: 0,
            stdout: format!("* Building sdist...\n* Building wheel...\nSuccessfully built {built}\n"),
            stderr: String::new(),
        })
    }
}

impl ProcessRunner for FakeProcess {
    fn invoke(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput> {
        let files = WalkDir::new(cwd)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.path().strip_prefix(cwd).ok().map(to_posix_rel))
            .collect();
        let call = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            envs: envs.to_vec(),
            cwd: cwd.to_path_buf(),
            files,
        };
        guard(&self.calls).push(call.clone());
        if call.is_build() {
            self.simulate_build(args, cwd)
        } else if call.is_upload() {
            Ok(guard(&self.upload).clone())
        } else {
            Ok(RunOutput::default())
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum IndexReply {
    Missing,
    Versions(Vec<&'static str>),
    Fail(u16),
}

/// Answers queued replies in order, then reports the project as missing.
#[derive(Default)]
pub(crate) struct FakeIndex {
    replies: Mutex<VecDeque<IndexReply>>,
    names: Mutex<Vec<String>>,
}

impl FakeIndex {
    pub(crate) fn push(&self, reply: IndexReply) {
        guard(&self.replies).push_back(reply);
    }

    pub(crate) fn calls(&self) -> usize {
        guard(&self.names).len()
    }
}

impl IndexClient for FakeIndex {
    fn fetch_versions(&self, name: &str) -> Result<Option<BTreeSet<String>>, IndexError> {
        guard(&self.names).push(name.to_string());
        match guard(&self.replies).pop_front().unwrap_or(IndexReply::Missing) {
            IndexReply::Missing => Ok(None),
            IndexReply::Versions(versions) => {
                Ok(Some(versions.into_iter().map(String::from).collect()))
            }
            IndexReply::Fail(status) => Err(IndexError::Status {
                url: format!("https://index.invalid/pypi/{name}/json"),
                status,
            }),
        }
    }
}

/// Virtual time: sleeping advances `now` instantly.
pub(crate) struct FakeClock {
    start: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_on_sleep: Mutex<Option<CancelToken>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
            cancel_on_sleep: Mutex::new(None),
        }
    }
}

impl FakeClock {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        guard(&self.sleeps).clone()
    }

    /// Trips `token` the next time anything sleeps.
    pub(crate) fn cancel_on_sleep(&self, token: &CancelToken) {
        *guard(&self.cancel_on_sleep) = Some(token.clone());
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + *guard(&self.offset)
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        guard(&self.sleeps).push(duration);
        if let Some(token) = guard(&self.cancel_on_sleep).take() {
            token.cancel();
            return true;
        }
        *guard(&self.offset) += duration;
        cancel.is_cancelled()
    }
}

#[derive(Default)]
pub(crate) struct MemorySink {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub(crate) fn lines(&self) -> Vec<(Level, String)> {
        guard(&self.lines).clone()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        guard(&self.lines).iter().any(|(_, line)| line.contains(needle))
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, level: Level, message: &str) {
        guard(&self.lines).push((level, message.to_string()));
    }
}
