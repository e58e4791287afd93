// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use activity_engine::broker::Content;
use activity_engine::config::{load_and_validate_config, RuntimeBuilder};
use activity_engine::engine::ProcessEvent;
use activity_engine::errors::RuntimeError;
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::env;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

const SIGNAL_ALL_FLAG: &str = "--signal-all";

struct Args {
    config_files: Vec<String>,
    /// Payload sent to every waiting step; `None` leaves waiting steps alone
    signal: Option<Value>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut config_files = Vec::new();
    let mut signal = None;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        if arg == SIGNAL_ALL_FLAG {
            let raw = rest
                .next()
                .with_context(|| format!("{} needs a JSON payload", SIGNAL_ALL_FLAG))?;
            signal = Some(
                serde_json::from_str(raw)
                    .with_context(|| format!("invalid {} payload: {}", SIGNAL_ALL_FLAG, raw))?,
            );
        } else {
            config_files.push(arg.clone());
        }
    }
    if config_files.is_empty() {
        bail!("no configuration file given");
    }
    Ok(Args {
        config_files,
        signal,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let raw_args: Vec<String> = env::args().collect();
    let args = match parse_args(&raw_args) {
        Ok(args) => args,
        Err(e) => {
            let program = raw_args.first().map(String::as_str).unwrap_or("activity-engine");
            eprintln!("{}", e);
            eprintln!("Usage: {} <config.yaml> [config.yaml ...] [{} <json>]", program, SIGNAL_ALL_FLAG);
            eprintln!("Example: {} configs/order-approval.yaml {} '{{\"approved\": true}}'", program, SIGNAL_ALL_FLAG);
            std::process::exit(1);
        }
    };

    println!("🚀 Activity Engine");
    println!("══════════════════");
    println!("Config files: {:?}", args.config_files);
    if let Some(signal) = &args.signal {
        println!("Signal payload: {}", signal);
    }
    println!();

    for (i, config_file) in args.config_files.iter().enumerate() {
        if i > 0 {
            println!("\n{}", "─".repeat(80));
        }
        if let Err(e) = run_single_config(config_file, args.signal.as_ref()).await {
            eprintln!("❌ Failed to run {}: {:#}", config_file, e);
        }
    }

    println!("\n🎉 Done!");
    Ok(())
}

async fn run_single_config(config_file: &str, signal: Option<&Value>) -> Result<()> {
    println!("📋 Loading {}", config_file);
    let config = load_and_validate_config(config_file)
        .with_context(|| format!("loading {}", config_file))?;
    println!(
        "   Process '{}' with {} activities and {} flows",
        config.process.id,
        config.process.activities.len(),
        config.process.flows.len()
    );

    let started = Instant::now();
    let (runner, mut events) = RuntimeBuilder::new().spawn(&config, Content::new())?;
    println!("▶️  Running as {}", runner.execution_id());
    println!();

    loop {
        let postponed = match runner.get_postponed().await {
            Ok(postponed) => postponed,
            Err(RuntimeError::ChannelClosed) => break,
            Err(e) => return Err(e.into()),
        };
        print_pending_events(&mut events);
        if postponed.is_empty() {
            break;
        }

        let Some(payload) = signal else {
            println!();
            println!("⏸️  Waiting steps:");
            for api in postponed.iter() {
                println!("   • {} ({})", api.id().unwrap_or("?"), api.execution_id().unwrap_or("?"));
            }
            runner.stop()?;
            break;
        };
        let mut delivered = false;
        for api in postponed.iter() {
            if let Some(id) = api.id() {
                println!("   📨 signal {}", id);
                delivered |= runner.signal(id, payload.clone()).await?;
            }
        }
        if !delivered {
            runner.stop()?;
            break;
        }
    }

    let outcome = runner.wait().await?;
    while let Some(event) = events.recv().await {
        print_event(&event);
    }

    println!();
    println!("🏁 {} in {:?}", outcome.status.as_str(), started.elapsed());
    if !outcome.output().is_empty() {
        println!("📦 Output:");
        println!("{}", serde_json::to_string_pretty(outcome.output())?);
    }
    Ok(())
}

fn print_pending_events(events: &mut UnboundedReceiver<ProcessEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &ProcessEvent) {
    if !event.routing_key.starts_with("activity.") && !event.routing_key.starts_with("execution.") {
        return;
    }
    println!(
        "   {:<32} {}",
        event.routing_key,
        event.content.id().unwrap_or("-")
    );
}
