//! `steward canvas`: inspect recorded task canvases.

use anyhow::Context;
use std::fmt::Write as _;
use steward_agent::canvas::{CanvasStore, TaskCanvas};
use steward_config::{AppConfig, CanvasConfig};

fn store() -> anyhow::Result<CanvasStore> {
    let config = AppConfig::load().context("failed to load config")?;
    let store = open(&config.canvas);
    tracing::debug!(directory = %store.directory().display(), "opened canvas store");
    Ok(store)
}

/// The configured store, even when tracking is switched off for the engine.
fn open(config: &CanvasConfig) -> CanvasStore {
    CanvasStore::new(config.resolved_directory())
        .with_similarity_threshold(config.similarity_threshold)
}

pub fn list() -> anyhow::Result<()> {
    let store = store()?;
    print!("{}", render_list(&store.list()?));
    Ok(())
}

pub fn show(id: &str) -> anyhow::Result<()> {
    let canvas = store()?.load(id)?;
    println!("{}", canvas.generate_progress_summary());
    Ok(())
}

pub fn cleanup(days: i64) -> anyhow::Result<()> {
    let removed = store()?.cleanup_older_than(days)?;
    tracing::info!(removed, days, "canvas cleanup finished");
    println!("Removed {removed} canvas(es) older than {days} day(s)");
    Ok(())
}

fn render_list(canvases: &[TaskCanvas]) -> String {
    if canvases.is_empty() {
        return "No canvases recorded.\n".into();
    }
    let mut out = String::new();
    for canvas in canvases {
        let _ = writeln!(
            out,
            "{}  {:>3.0}%  {:<11}  {}",
            canvas.canvas_id,
            canvas.completion_percentage(),
            format!("{:?}", canvas.status).to_lowercase(),
            canvas.goal
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_agent::planning::{ExecutionPlan, PlanStep};

    #[test]
    fn lists_saved_canvases() {
        let dir = tempfile::tempdir().unwrap();
        let config = CanvasConfig {
            directory: Some(dir.path().to_path_buf()),
            ..CanvasConfig::default()
        };
        let store = open(&config);
        assert_eq!(render_list(&store.list().unwrap()), "No canvases recorded.\n");

        let plan = ExecutionPlan::new("p", "tidy desktop")
            .with_steps(vec![PlanStep::new("step_1", "list the desktop")]);
        let canvas = store.create_canvas("tidy desktop", &plan).unwrap();

        let listed = render_list(&store.list().unwrap());
        assert!(listed.contains(&canvas.canvas_id));
        assert!(listed.contains("pending"));
        assert!(listed.contains("tidy desktop"));
    }
}
