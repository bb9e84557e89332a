use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use gix_pre_receive::backend::GixBackend;
use gix_pre_receive::{config, Error, PreReceiveBuilder, Verdict};
use tracing_subscriber::EnvFilter;

/// Reject pushes deleting or rewriting master, release tags and tagged release branches.
///
/// Reads `<old> <new> <ref>` lines from stdin, as passed to a `pre-receive` hook.
#[derive(Debug, Parser)]
#[command(name = "gix-pre-receive", version)]
struct Args {
    /// The repository receiving the push.
    #[arg(long, env = "GIT_DIR", default_value = ".", value_name = "PATH")]
    git_dir: PathBuf,

    /// The deployer identity, overriding the configured one.
    #[arg(long, value_name = "EMAIL")]
    deployer_email: Option<String>,

    /// Read configuration from this file instead of the system configuration.
    #[arg(long, value_name = "PATH")]
    system_config: Option<PathBuf>,

    /// Log more, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(Verdict::Accepted) => ExitCode::SUCCESS,
        Ok(Verdict::Rejected(rejection)) => {
            tracing::info!(refname = %rejection.refname, reason = ?rejection.reason, "push rejected");
            eprintln!("{rejection}");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: Args) -> anyhow::Result<Verdict> {
    let policy_config = config::load_policy_config(args.system_config.as_deref())
        .context("invalid protection configuration")?
        .with_deployer_email(args.deployer_email);
    let backend = GixBackend::open(&args.git_dir).map_err(Error::from)?;
    tracing::debug!(?backend, policy = ?policy_config.policy_set(), "starting");

    let hook = PreReceiveBuilder::new()
        .with_backend(backend)
        .with_policy_config(policy_config)
        .build();
    Ok(hook.run(io::stdin().lock())?)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
