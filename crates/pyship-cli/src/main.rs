use clap::Parser;
use color_eyre::Result;
use serde_json::json;

use pyship_core::{EnvSnapshot, ExecutionOutcome};

mod cli;
mod dispatch;
mod output;
mod style;

use cli::PyshipCli;
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PyshipCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let snapshot = EnvSnapshot::capture();
    let outcome = dispatch::dispatch_command(&cli, &snapshot).unwrap_or_else(|err| {
        tracing::debug!(error = ?err, "command failed");
        ExecutionOutcome::failure(format!("{err:#}"), json!({}))
    });
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, cli.command.name(), &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!(
        "pyship={level},pyship_core={level},pyship_domain={level},pyship_cli={level}"
    );
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
