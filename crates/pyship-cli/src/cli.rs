use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const PYSHIP_BEFORE_HELP: &str = concat!(
    "pyship ",
    env!("CARGO_PKG_VERSION"),
    " – Release single-package Python distributions\n\n",
    "\x1b[1;36mCommands\x1b[0m\n",
    "  publish          Stage, build, upload and confirm one release.\n",
    "  batch            Publish every entry of a batch document in order.\n",
    "  check            Ask the index whether a version is already released.\n",
    "  manifest         Show records from the publish summary store.\n",
);

pub const PYSHIP_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

#[derive(Parser, Debug)]
#[command(
    name = "pyship",
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = PYSHIP_BEFORE_HELP,
    help_template = PYSHIP_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct PyshipCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_name = "URL",
        help = "Index serving the JSON metadata API (PYSHIP_INDEX_URL)",
        global = true
    )]
    pub index_url: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Summary store location (PYSHIP_SUMMARY_PATH)",
        global = true
    )]
    pub summary_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Stage, build, upload and confirm one release")]
    Publish(PublishArgs),
    #[command(about = "Publish every entry of a batch document in order")]
    Batch(BatchArgs),
    #[command(about = "Ask the index whether a version is already released")]
    Check(CheckArgs),
    #[command(about = "Show records from the publish summary store")]
    Manifest(ManifestArgs),
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    #[arg(value_name = "NAME", required_unless_present = "request")]
    pub name: Option<String>,
    #[arg(id = "release_version", value_name = "VERSION", required_unless_present = "request")]
    pub version: Option<String>,
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["name", "release_version"],
        help = "Read the publish request from a JSON document"
    )]
    pub request: Option<PathBuf>,
    #[arg(long, value_name = "FILE", required_unless_present = "request", help = "Main module of the package")]
    pub main_file: Option<PathBuf>,
    #[arg(long = "ancillary", value_name = "PATH", help = "Extra file to ship, relative to the main file", action = ArgAction::Append)]
    pub ancillary: Vec<PathBuf>,
    #[arg(long)]
    pub author: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub license_text: Option<String>,
    #[arg(long = "dependency", value_name = "REQ", help = "Runtime requirement (PEP 508)", action = ArgAction::Append)]
    pub dependencies: Vec<String>,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[arg(value_name = "FILE", help = "Batch document with entries and repo_parent_root")]
    pub file: PathBuf,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    #[arg(long, help = "Build only; skip upload and the availability check")]
    pub dry_run: bool,
    #[arg(long, help = "Do not wait for the release to appear on the index")]
    pub no_wait: bool,
    #[arg(long, help = "Leave the build workspace on disk (PYSHIP_KEEP_WORKSPACE)")]
    pub keep_workspace: bool,
    #[arg(long, value_name = "DIR", help = "Copy built artifacts here (PYSHIP_ARTIFACT_DIR)")]
    pub artifact_dir: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Upload endpoint passed to twine (PYSHIP_REPOSITORY_URL)")]
    pub repository_url: Option<String>,
    #[arg(long, value_name = "VAR", help = "Environment variable holding the API token (PYSHIP_TOKEN_ENV)")]
    pub token_env: Option<String>,
    #[arg(long, value_name = "PATH", help = "Interpreter that runs build and twine (PYSHIP_PYTHON)")]
    pub python: Option<String>,
    #[arg(long, value_name = "N", value_parser = value_parser!(u32))]
    pub poll_attempts: Option<u32>,
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub poll_interval: Option<std::time::Duration>,
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds, help = "Overall wait budget; 0 disables it")]
    pub poll_timeout: Option<std::time::Duration>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(value_name = "NAME")]
    pub name: String,
    #[arg(id = "release_version", value_name = "VERSION")]
    pub version: String,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    #[arg(long, value_name = "NAME", help = "Only show records for this package")]
    pub package: Option<String>,
    #[arg(long, value_name = "N", help = "Show at most the N most recent records")]
    pub limit: Option<usize>,
}

fn parse_seconds(raw: &str) -> Result<std::time::Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("expected a number of seconds, got {raw:?}"))?;
    std::time::Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("expected a non-negative number of seconds, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        PyshipCli::command().debug_assert();
    }

    #[test]
    fn publish_accepts_flags_or_a_request_file() {
        let cli = PyshipCli::try_parse_from([
            "pyship",
            "publish",
            "demo",
            "1.2.0",
            "--main-file",
            "src/demo/demo.py",
            "--ancillary",
            "README.md",
            "--dependency",
            "requests>=2",
            "--no-wait",
            "--poll-interval",
            "0.5",
        ])
        .expect("parse publish");
        let CommandCli::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.name.as_deref(), Some("demo"));
        assert_eq!(args.ancillary, vec![PathBuf::from("README.md")]);
        assert!(args.run.no_wait);
        assert_eq!(
            args.run.poll_interval,
            Some(std::time::Duration::from_millis(500))
        );

        let cli = PyshipCli::try_parse_from(["pyship", "--json", "publish", "--request", "req.json"])
            .expect("parse request file");
        assert!(cli.json);
        assert!(PyshipCli::try_parse_from(["pyship", "publish", "demo"]).is_err());
    }
}
