//! VDO Operations task runner
//!
//! Runs one operational task and exits. The workflow engine invokes this
//! binary with an action name and the event JSON, either inline or as
//! `@path/to/event.json`.

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::error;
use vdo_core::config::Config;
use vdo_core::tasks::{self, TaskContext};

#[derive(Parser, Debug)]
#[command(name = "vdo-tasks", about = "Run one RPC-V operations task")]
struct Args {
    /// Task to run, e.g. network_copy or create_org.
    #[arg(long)]
    action: String,

    /// Event JSON, inline or @file.
    #[arg(long, default_value = "{}")]
    event: String,
}

fn parse_event(raw: &str) -> Result<Value> {
    let content = match raw.strip_prefix('@') {
        Some(file) => fs::read_to_string(file).with_context(|| format!("cannot read {file}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&content).context("event is not valid JSON")
}

async fn run(args: &Args) -> Result<Value> {
    let event = parse_event(&args.event)?;
    let config = Config::from_env();
    let context = TaskContext::from_config(&config)?;
    tasks::dispatch(&context, &args.action, &event).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(cause) => {
            error!(action = %args.action, error = %format!("{cause:#}"), "task failed");
            ExitCode::FAILURE
        }
    }
}
