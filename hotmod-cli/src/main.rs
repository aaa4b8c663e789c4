//! hotmod: run and call hot-reloaded native modules

mod cli;
mod tracing_support;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use hotmod_host::{LifecycleEvent, Manager, ManagerConfig, ModuleState, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_support::init_subscriber_with_config;

/// Upper bound on waiting for the initial loads before calling anyway
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_subscriber_with_config(cli.log.tracing_config());

    let config = cli.source.manager_config()?;
    match cli.command {
        Command::Watch => watch(config).await,
        Command::Call {
            module,
            function,
            args,
            module_version,
            json,
        } => {
            let failed = call(config, &module, &function, &args, module_version, json).await?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Start a manager, subscribed before the initial scan so no event is missed
async fn start(config: ManagerConfig) -> Result<(Manager, broadcast::Receiver<LifecycleEvent>)> {
    let manager = Manager::new(config);
    let events = manager.subscribe();
    manager
        .start()
        .await
        .with_context(|| format!("starting manager on {}", manager.config().root.display()))?;
    Ok((manager, events))
}

async fn watch(config: ManagerConfig) -> Result<()> {
    let (manager, mut events) = start(config).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped lifecycle events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    manager.stop().await;
    Ok(())
}

fn print_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Failed { .. } => eprintln!("{}", event),
        _ => println!("{}", event),
    }
}

/// Wait until every module found at startup has loaded or failed
async fn settle(
    manager: &Manager,
    events: &mut broadcast::Receiver<LifecycleEvent>,
    timeout: Duration,
) {
    let mut pending: HashSet<PathBuf> = manager
        .modules()
        .iter()
        .filter(|module| module.state() != ModuleState::Loaded)
        .map(|module| module.path().to_path_buf())
        .collect();

    let wait = async {
        while !pending.is_empty() {
            match events.recv().await {
                Ok(LifecycleEvent::Loaded { path, .. } | LifecycleEvent::Failed { path, .. }) => {
                    pending.remove(&path);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    pending.retain(|path| {
                        manager
                            .module_at(path)
                            .is_some_and(|module| module.state() != ModuleState::Loaded)
                    });
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    let timed_out = tokio::time::timeout(timeout, wait).await.is_err();
    if timed_out {
        tracing::warn!(pending = pending.len(), "Calling before every module settled");
    }
}

/// Returns true when the call reported an error
async fn call(
    config: ManagerConfig,
    module: &str,
    function: &str,
    raw_args: &[String],
    version: Option<u64>,
    json: bool,
) -> Result<bool> {
    let (manager, mut events) = start(config).await?;
    settle(&manager, &mut events, SETTLE_TIMEOUT).await;

    let args: Vec<Value> = raw_args.iter().map(|raw| cli::parse_arg(raw)).collect();
    let result = match version {
        Some(version) => match manager.resolve_versioned(module, version) {
            Ok(handle) => handle.call(function, args),
            Err(e) => vec![Value::Error(e.into_call_error())],
        },
        None => manager.call(module, function, args),
    };

    if json {
        let rendered: Vec<_> = result.iter().map(cli::to_json).collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for value in &result {
            println!("{}", value);
        }
    }

    manager.stop().await;
    Ok(matches!(result.last(), Some(Value::Error(_))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_host::{BuiltinLoader, BuiltinModule};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settle_waits_for_initial_loads() {
        let dir = TempDir::new().unwrap();
        for file in ["good.mod", "unknown.mod"] {
            std::fs::write(dir.path().join(file), b"module").unwrap();
        }
        let loader = BuiltinLoader::new();
        loader.register("good.mod", || {
            BuiltinModule::new("good", 1).function("answer", || 42i64)
        });

        let config = ManagerConfig::new(dir.path())
            .with_suffix(".mod")
            .with_debounce(Duration::from_millis(50));
        let manager = Manager::builder(config).loader(loader).build();
        let mut events = manager.subscribe();
        manager.start().await.unwrap();

        let started = tokio::time::Instant::now();
        settle(&manager, &mut events, Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        assert_eq!(manager.call("good", "answer", vec![]), vec![Value::Int(42)]);
        let unknown = manager.module_at(dir.path().join("unknown.mod")).unwrap();
        assert_eq!(unknown.state(), ModuleState::Unloaded);

        manager.stop().await;
    }
}
