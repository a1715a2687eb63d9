//! Task canvas: an external, file-backed record of a goal's steps.
//!
//! One canvas per goal attempt, stored as pretty JSON under the canvas
//! directory (`~/.steward/canvas/{canvas_id}.json` by default). A later
//! request for the same goal finds the canvas by keyword similarity, which
//! is how repeated requests learn that the work was already done.
//!
//! Writes happen on every status change; the directory is created on
//! first write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use steward_config::CanvasConfig;
use steward_core::error::CanvasError;
use tracing::{debug, info, warn};

use crate::planning::{ExecutionPlan, PlanStep, TaskStatus};
use crate::state::scratchpad::preview;

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CanvasStep {
    fn from_plan_step(step: &PlanStep) -> Self {
        Self {
            id: step.step_id.clone(),
            title: preview(&step.description, 60),
            description: step.description.clone(),
            status: TaskStatus::Pending,
            tool: step.tool_name.clone(),
            params: step.tool_params.clone(),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCanvas {
    pub canvas_id: String,
    pub goal: String,
    pub steps: Vec<CanvasStep>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `canvas_{first 8 hex of sha256(goal)}_{timestamp}`.
fn canvas_id(goal: &str, now: DateTime<Utc>) -> String {
    let digest = Sha256::digest(goal.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("canvas_{hash}_{}", now.format("%Y%m%d_%H%M%S_%3f"))
}

impl TaskCanvas {
    /// A pending canvas with one step per plan step.
    pub fn new(goal: impl Into<String>, plan: &ExecutionPlan) -> Self {
        let goal = goal.into();
        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("plan_id".into(), Value::String(plan.plan_id.clone()));
        Self {
            canvas_id: canvas_id(&goal, now),
            goal,
            steps: plan.steps().iter().map(CanvasStep::from_plan_step).collect(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Completed and skipped steps as a percentage of all steps.
    pub fn completion_percentage(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let done = self.steps.iter().filter(|s| s.is_done()).count();
        done as f64 / self.steps.len() as f64 * 100.0
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Set one step's status and recompute the overall status.
    pub fn update_step_status(
        &mut self,
        step_id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), CanvasError> {
        let now = Utc::now();
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| CanvasError::UnknownStep(step_id.to_string()))?;

        step.status = status;
        match status {
            TaskStatus::InProgress if step.started_at.is_none() => step.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped => {
                step.completed_at = Some(now)
            }
            _ => {}
        }
        if result.is_some() {
            step.result = result;
        }
        if error.is_some() {
            step.error = error;
        }

        self.recompute_status();
        self.updated_at = now;
        Ok(())
    }

    fn recompute_status(&mut self) {
        self.status = if self.steps.iter().all(CanvasStep::is_done) {
            TaskStatus::Completed
        } else if self.steps.iter().any(|s| s.status == TaskStatus::Failed) {
            TaskStatus::Failed
        } else if self
            .steps
            .iter()
            .any(|s| matches!(s.status, TaskStatus::InProgress | TaskStatus::Completed))
        {
            TaskStatus::InProgress
        } else {
            TaskStatus::Pending
        };
    }

    /// Mirror the plan into the canvas, adding steps the plan gained since.
    ///
    /// Returns whether anything changed.
    pub fn sync_from_plan(&mut self, plan: &ExecutionPlan) -> bool {
        let mut changed = false;
        for step in plan.steps() {
            if !self.steps.iter().any(|s| s.id == step.step_id) {
                self.steps.push(CanvasStep::from_plan_step(step));
                changed = true;
            }
            let unchanged = self
                .steps
                .iter()
                .any(|s| s.id == step.step_id && s.status == step.status);
            if unchanged {
                continue;
            }
            let result = step.result.as_ref().map(|r| match r {
                Value::String(s) => preview(s, 200),
                other => preview(&other.to_string(), 200),
            });
            if self
                .update_step_status(&step.step_id, step.status, result, step.error.clone())
                .is_ok()
            {
                changed = true;
            }
        }
        if changed {
            self.recompute_status();
        }
        changed
    }

    /// Multi-line progress report.
    pub fn generate_progress_summary(&self) -> String {
        let done = self.steps.iter().filter(|s| s.is_done()).count();
        let failed = self
            .steps
            .iter()
            .filter(|s| s.status == TaskStatus::Failed)
            .count();

        let mut out = format!(
            "Progress for \"{}\": {done}/{} steps done ({:.0}%)\n",
            self.goal,
            self.steps.len(),
            self.completion_percentage()
        );
        for step in &self.steps {
            let marker = match step.status {
                TaskStatus::Pending => "[ ]",
                TaskStatus::InProgress => "[~]",
                TaskStatus::Completed => "[x]",
                TaskStatus::Failed => "[!]",
                TaskStatus::Skipped => "[-]",
            };
            let _ = writeln!(out, "{marker} {}", step.title);
            if let Some(result) = &step.result {
                let _ = writeln!(out, "    -> {result}");
            } else if let Some(error) = &step.error {
                let _ = writeln!(out, "    -> error: {error}");
            }
        }
        if self.is_completed() {
            out.push_str("All steps are complete.");
        } else if failed > 0 {
            let _ = write!(out, "{failed} step(s) failed.");
        }
        out
    }
}

/// Share of distinct lowercase words the two texts have in common.
pub fn keyword_similarity(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// A directory of canvas JSON files.
#[derive(Debug, Clone)]
pub struct CanvasStore {
    directory: PathBuf,
    similarity_threshold: f64,
}

impl CanvasStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// `None` when canvases are disabled.
    pub fn from_config(config: &CanvasConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(config.resolved_directory())
                .with_similarity_threshold(config.similarity_threshold)
        })
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, canvas_id: &str) -> PathBuf {
        self.directory.join(format!("{canvas_id}.json"))
    }

    fn storage_error(path: &Path, reason: impl ToString) -> CanvasError {
        CanvasError::Storage {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create and persist a canvas for `plan`.
    pub fn create_canvas(&self, goal: &str, plan: &ExecutionPlan) -> Result<TaskCanvas, CanvasError> {
        let canvas = TaskCanvas::new(goal, plan);
        self.save(&canvas)?;
        info!(canvas_id = %canvas.canvas_id, steps = canvas.steps.len(), "Canvas created");
        Ok(canvas)
    }

    pub fn save(&self, canvas: &TaskCanvas) -> Result<(), CanvasError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| Self::storage_error(&self.directory, e))?;
        let path = self.path_for(&canvas.canvas_id);
        let content =
            serde_json::to_string_pretty(canvas).map_err(|e| Self::storage_error(&path, e))?;
        std::fs::write(&path, content).map_err(|e| Self::storage_error(&path, e))?;
        debug!(canvas_id = %canvas.canvas_id, status = ?canvas.status, "Canvas saved");
        Ok(())
    }

    pub fn load(&self, canvas_id: &str) -> Result<TaskCanvas, CanvasError> {
        let path = self.path_for(canvas_id);
        if !path.exists() {
            return Err(CanvasError::NotFound(canvas_id.to_string()));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| Self::storage_error(&path, e))?;
        serde_json::from_str(&content).map_err(|e| Self::storage_error(&path, e))
    }

    /// Every readable canvas, most recently updated first.
    pub fn list(&self) -> Result<Vec<TaskCanvas>, CanvasError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.directory).map_err(|e| Self::storage_error(&self.directory, e))?;

        let mut canvases = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(canvas) => canvases.push(canvas),
                Err(e) => warn!(error = %e, "Skipping unreadable canvas"),
            }
        }
        canvases.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(canvases)
    }

    /// The most recent canvas whose goal is similar enough to `goal`.
    pub fn find_existing(&self, goal: &str) -> Result<Option<TaskCanvas>, CanvasError> {
        let found = self
            .list()?
            .into_iter()
            .find(|c| keyword_similarity(goal, &c.goal) > self.similarity_threshold);
        if let Some(canvas) = &found {
            debug!(canvas_id = %canvas.canvas_id, status = ?canvas.status, "Found existing canvas");
        }
        Ok(found)
    }

    /// Delete canvases not updated in the last `days` days. Returns how many went.
    pub fn cleanup_older_than(&self, days: i64) -> Result<usize, CanvasError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut removed = 0;
        for canvas in self.list()? {
            if canvas.updated_at >= cutoff {
                continue;
            }
            let path = self.path_for(&canvas.canvas_id);
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old canvas"),
            }
        }
        Ok(removed)
    }
}
