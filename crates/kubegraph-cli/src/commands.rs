//! CLI command implementations.

use crate::config::Settings;
use colored::Colorize;
use kubegraph_core::ResourceKind;
use kubegraph_graph::{Change, GraphStats, Reconciler};
use kubegraph_watcher::{DirectorySource, EventProcessor, ResourceSource, SnapshotEmitter};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn require_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(format!("source directory {} does not exist", path.display()).into());
    }
    Ok(())
}

fn print_stats(stats: &GraphStats) {
    println!("  {} {}", "Nodes:".dimmed(), stats.node_count);
    for (kind, count) in &stats.nodes_by_kind {
        println!("    {:<12} {}", kind.to_string(), count);
    }
    println!("  {} {}", "Relationships:".dimmed(), stats.edge_count);
    for (relation, count) in &stats.edges_by_relation {
        println!("    {:<12} {}", relation.to_string(), count);
    }
}

/// Watch the source directory and emit snapshots until Ctrl+C.
pub async fn run(settings: &Settings) -> Result<()> {
    require_dir(&settings.source_dir)?;

    let source = Arc::new(DirectorySource::new(&settings.source_dir));
    let reconciler = Arc::new(Reconciler::new());
    let cancel = CancellationToken::new();

    println!(
        "{} Watching {} ({} kinds)",
        "✓".green(),
        source.root().display(),
        settings.kinds.len()
    );

    let mut processors = Vec::with_capacity(settings.kinds.len());
    for &kind in &settings.kinds {
        if !source.kind_dir(kind).is_dir() {
            println!(
                "  {} no {} directory yet, will retry",
                "⚠".yellow(),
                kind.plural().cyan()
            );
        }
        let processor = EventProcessor::new(kind, source.clone(), reconciler.clone(), cancel.clone())
            .with_backoff(settings.backoff());
        processors.push(processor.spawn());
    }

    let emitter = SnapshotEmitter::new(reconciler.store().clone(), &settings.output, cancel.clone())
        .with_interval(settings.emit_interval)
        .spawn();

    println!(
        "{} Writing {} every {}s",
        "✓".green(),
        settings.output.display(),
        settings.emit_interval.as_secs()
    );
    println!("  Press {} to stop", "Ctrl+C".cyan());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();

    for handle in processors {
        if let Err(e) = handle.await {
            warn!(error = %e, "event processor task failed");
        }
    }
    let written = emitter.await?;

    println!();
    println!("{} Stopped after {} snapshots", "✓".green(), written);
    print_stats(&reconciler.store().stats());
    Ok(())
}

/// List every kind once, write one snapshot and exit.
pub async fn snapshot(settings: &Settings) -> Result<()> {
    require_dir(&settings.source_dir)?;

    let source = DirectorySource::new(&settings.source_dir);
    let reconciler = Reconciler::new();

    for &kind in &settings.kinds {
        let objects = source.list(kind).await?;
        for object in objects {
            reconciler.reconcile(Change::Upsert(object.key, object.properties));
        }
    }

    let snapshot = reconciler.store().snapshot();
    snapshot.write_to(&settings.output)?;

    println!("{} Wrote {}", "✓".green(), settings.output.display());
    print_stats(&reconciler.store().stats());
    Ok(())
}

/// Decode every manifest and report the ones that fail.
pub fn check(settings: &Settings) -> Result<()> {
    require_dir(&settings.source_dir)?;

    let source = DirectorySource::new(&settings.source_dir);
    let mut ok = 0;
    let mut failures = Vec::new();

    for kind in ResourceKind::ALL {
        for (path, loaded) in source.scan(kind)? {
            match loaded {
                Ok(_) => ok += 1,
                Err(e) => failures.push((path, e)),
            }
        }
    }

    println!("{} {} manifests decoded", "✓".green(), ok.to_string().cyan());

    if failures.is_empty() {
        return Ok(());
    }

    println!("\n{} manifests that failed to decode:", "⚠".yellow());
    for (path, error) in &failures {
        println!("  {} - {}", path.display().to_string().red(), error);
    }
    Err(format!("{} manifests failed to decode", failures.len()).into())
}
