use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use pyship_core::{
    batch_status, ensure_unpublished, publish, run_batch, CancelToken, Config, ConfigOverrides,
    Credential, EnvSnapshot, ExecutionOutcome, PublishError, PublishOptions, SummaryStore,
    SystemEffects,
};
use pyship_domain::{BatchRequest, IndexSnapshot, PublishRequest};

use crate::cli::{BatchArgs, CheckArgs, CommandCli, ManifestArgs, PublishArgs, PyshipCli, RunArgs};

impl CommandCli {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Publish(_) => "publish",
            Self::Batch(_) => "batch",
            Self::Check(_) => "check",
            Self::Manifest(_) => "manifest",
        }
    }
}

pub fn dispatch_command(cli: &PyshipCli, snapshot: &EnvSnapshot) -> Result<ExecutionOutcome> {
    let run = match &cli.command {
        CommandCli::Publish(args) => Some(&args.run),
        CommandCli::Batch(args) => Some(&args.run),
        CommandCli::Check(_) | CommandCli::Manifest(_) => None,
    };
    let config = match load_config(cli, run, snapshot) {
        Ok(config) => config,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("invalid configuration: {err:#}"),
                json!({ "hint": "check the PYSHIP_* environment variables and flags" }),
            ))
        }
    };
    match &cli.command {
        CommandCli::Publish(args) => publish_command(&config, snapshot, args),
        CommandCli::Batch(args) => batch_command(&config, snapshot, args),
        CommandCli::Check(args) => check_command(&config, args),
        CommandCli::Manifest(args) => manifest_command(&config, args),
    }
}

fn load_config(cli: &PyshipCli, run: Option<&RunArgs>, snapshot: &EnvSnapshot) -> Result<Config> {
    let mut config = Config::from_snapshot(snapshot)?;
    let run = run.cloned().unwrap_or_default();
    config.apply(&ConfigOverrides {
        index_url: cli.index_url.clone(),
        repository_url: run.repository_url,
        token_env: run.token_env,
        python: run.python,
        summary_path: cli.summary_path.clone(),
        artifact_dir: run.artifact_dir,
        keep_workspace: run.keep_workspace,
        poll_attempts: run.poll_attempts,
        poll_interval: run.poll_interval,
        poll_timeout: run.poll_timeout,
    })?;
    Ok(config)
}

fn run_options(config: &Config, run: &RunArgs) -> Result<PublishOptions> {
    let mut options = PublishOptions::from_config(config)?;
    options.dry_run = run.dry_run;
    options.wait = !run.no_wait;
    Ok(options)
}

fn publish_command(
    config: &Config,
    snapshot: &EnvSnapshot,
    args: &PublishArgs,
) -> Result<ExecutionOutcome> {
    let request = match &args.request {
        Some(path) => match read_request(path) {
            Ok(request) => request,
            Err(err) => {
                return Ok(ExecutionOutcome::user_error(
                    format!("invalid publish request: {err:#}"),
                    json!({
                        "path": path.display().to_string(),
                        "error": { "kind": "invalid_request", "message": format!("{err:#}") },
                    }),
                ))
            }
        },
        None => request_from_flags(args),
    };
    let options = run_options(config, &args.run)?;
    let credential = resolve_credential(config, snapshot, None);
    let effects = SystemEffects::new(config)?;
    let cancel = interrupt_token();
    let result = publish(&effects, &options, credential.as_ref(), &request, &cancel);
    let mut outcome = result.into_outcome();
    outcome.details["summary_path"] = json!(options.summary_path.display().to_string());
    Ok(outcome)
}

fn batch_command(
    config: &Config,
    snapshot: &EnvSnapshot,
    args: &BatchArgs,
) -> Result<ExecutionOutcome> {
    let contents = fs::read_to_string(&args.file)
        .with_context(|| format!("reading batch document {}", args.file.display()))?;
    let batch = match BatchRequest::from_json(&contents) {
        Ok(batch) => batch,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("invalid batch document {}: {err:#}", args.file.display()),
                json!({ "path": args.file.display().to_string() }),
            ))
        }
    };
    let mut options = run_options(config, &args.run)?;
    if let Some(token_env) = &batch.token_env {
        options.token_env.clone_from(token_env);
    }
    let credential = resolve_credential(config, snapshot, batch.token_env.as_deref());
    let effects = SystemEffects::new(config)?;
    let cancel = interrupt_token();
    let report = run_batch(&effects, &options, credential.as_ref(), &batch, &cancel);

    let status = batch_status(&report);
    let mut counts = BTreeMap::<&str, usize>::new();
    for entry in &report.entries {
        *counts.entry(entry.status.as_str()).or_default() += 1;
    }
    let summary = counts
        .iter()
        .map(|(status, count)| format!("{count} {status}"))
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!(
        "batch finished with status {} ({summary})",
        report.status.as_str()
    );
    Ok(ExecutionOutcome::with_status(
        status,
        message,
        json!({ "report": report }),
    ))
}

fn check_command(config: &Config, args: &CheckArgs) -> Result<ExecutionOutcome> {
    let request = PublishRequest::new(&args.name, &args.version, "");
    if let Err(err) = request.parsed_version() {
        return Ok(ExecutionOutcome::user_error(err.to_string(), json!({})));
    }
    let effects = SystemEffects::new(config)?;
    let details = json!({
        "package": args.name,
        "version": args.version,
        "index_url": config.index().url.as_str(),
    });
    Ok(match ensure_unpublished(&effects, &request) {
        Ok(IndexSnapshot::Found(versions)) => ExecutionOutcome::success(
            format!(
                "{} {} is not published yet ({} other release(s) on the index)",
                args.name,
                args.version,
                versions.len()
            ),
            merge(details, json!({ "published": false, "known_versions": versions })),
        ),
        Ok(_) => ExecutionOutcome::success(
            format!("{} is not on the index yet; {} would be its first release", args.name, args.version),
            merge(details, json!({ "published": false, "known_versions": [] })),
        ),
        Err(err) => ExecutionOutcome::with_status(
            err.severity(),
            err.to_string(),
            merge(
                details,
                json!({
                    "published": matches!(err, PublishError::DuplicateVersion { .. }),
                    "error": { "kind": err.kind(), "message": err.to_string() },
                    "hint": err.hint(),
                }),
            ),
        ),
    })
}

fn manifest_command(config: &Config, args: &ManifestArgs) -> Result<ExecutionOutcome> {
    let store = SummaryStore::new(config.summary_path());
    let document = match store.load() {
        Ok(document) => document,
        Err(err) => {
            return Ok(ExecutionOutcome::failure(
                format!("{err:#}"),
                json!({ "path": store.path().display().to_string() }),
            ))
        }
    };
    let mut records: Vec<_> = match &args.package {
        Some(package) => document.for_package(package).cloned().collect(),
        None => document.records,
    };
    if let Some(limit) = args.limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }
    let message = match records.len() {
        0 => "no publish records found".to_string(),
        1 => "1 publish record".to_string(),
        n => format!("{n} publish records"),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "path": store.path().display().to_string(),
            "records": records,
        }),
    ))
}

fn read_request(path: &Path) -> Result<PublishRequest> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading publish request {}", path.display()))?;
    let mut request: PublishRequest = serde_json::from_str(&contents)
        .with_context(|| format!("parsing publish request {}", path.display()))?;
    if request.main_file.is_relative() {
        if let Some(base) = path.parent() {
            request.main_file = base.join(&request.main_file);
        }
    }
    Ok(request)
}

fn request_from_flags(args: &PublishArgs) -> PublishRequest {
    let mut request = PublishRequest::new(
        args.name.clone().unwrap_or_default(),
        args.version.clone().unwrap_or_default(),
        args.main_file.clone().unwrap_or_default(),
    );
    request.author.clone_from(&args.author);
    request.email.clone_from(&args.email);
    request.description.clone_from(&args.description);
    request.license_text.clone_from(&args.license_text);
    request.dependencies.clone_from(&args.dependencies);
    request.ancillary.clone_from(&args.ancillary);
    request
}

fn resolve_credential(
    config: &Config,
    snapshot: &EnvSnapshot,
    token_env: Option<&str>,
) -> Option<Credential> {
    let token_env = token_env.unwrap_or(&config.upload().token_env);
    let credential = Credential::resolve(snapshot, token_env, config.upload().pypirc.as_deref());
    if let Some(credential) = &credential {
        tracing::debug!(source = %credential.source(), "resolved upload credential");
    }
    credential
}

/// A token that trips on Ctrl-C so the pipeline can stop between steps.
fn interrupt_token() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    let spawned = thread::Builder::new()
        .name("pyship-interrupt".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::debug!(error = %err, "interrupt handler unavailable");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                tracing::warn!("interrupt received; stopping after the current step");
                handle.cancel();
            }
        });
    if let Err(err) = spawned {
        tracing::debug!(error = %err, "could not start interrupt handler");
    }
    cancel
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}
