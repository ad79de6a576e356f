//! In-memory task registry.
//!
//! The registry exclusively owns canonical `Task` records. Every mutation
//! goes through one of the update methods here (never through shared
//! references into task internals), so per-key entry locking gives
//! single-writer semantics and subscribers re-fetching state always observe
//! at least what the triggering event described.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use subtitle_format::{SubtitleEntry, merge_entry, validate_entries};

use crate::domain::{NewTask, Task, TaskStage, TaskStatus};
use crate::{Error, Result};

/// Concurrency-safe store of all tasks.
pub struct TaskRegistry {
    tasks: DashMap<String, Task>,
    /// Submission order, for `list`.
    order: Mutex<Vec<String>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Rehydrate a registry from a persisted snapshot.
    ///
    /// Tasks that were mid-flight when the snapshot was taken come back as
    /// they were stored; ordering guarantees apply to events published
    /// after the reload.
    pub fn from_snapshot(tasks: Vec<Task>) -> Self {
        let registry = Self::new();
        {
            let mut order = registry.order.lock();
            for task in tasks {
                order.push(task.id.clone());
                registry.tasks.insert(task.id.clone(), task);
            }
        }
        registry
    }

    /// Snapshot every task for persistence.
    pub fn snapshot(&self) -> Vec<Task> {
        self.list()
    }

    /// Create a new pending task.
    pub fn create(&self, params: NewTask) -> Task {
        let task = Task::new(params);
        self.order.lock().push(task.id.clone());
        self.tasks.insert(task.id.clone(), task.clone());
        task
    }

    /// Create many tasks, preserving submission order.
    pub fn create_batch(&self, params: Vec<NewTask>) -> Vec<Task> {
        params.into_iter().map(|p| self.create(p)).collect()
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.tasks
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::not_found("Task", id))
    }

    /// List all tasks in submission order.
    pub fn list(&self) -> Vec<Task> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect()
    }

    /// Number of tasks currently holding a given status.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Remove a task.
    ///
    /// Active tasks must be cancelled first; removing a record out from
    /// under a running pipeline is refused.
    pub fn remove(&self, id: &str) -> Result<Task> {
        {
            let task = self.tasks.get(id).ok_or_else(|| Error::not_found("Task", id))?;
            if task.status.is_active() {
                return Err(Error::validation(format!(
                    "task {id} is {}; cancel it before deleting",
                    task.status
                )));
            }
        }
        let (_, task) = self
            .tasks
            .remove(id)
            .ok_or_else(|| Error::not_found("Task", id))?;
        self.order.lock().retain(|existing| existing != id);
        Ok(task)
    }

    /// Central mutation path. Bumps `updated_at`; optionally enforces the
    /// terminal write ban.
    fn mutate<F>(&self, id: &str, guard_terminal: bool, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Task", id))?;
        if guard_terminal && entry.status.is_terminal() {
            return Err(Error::TaskAlreadyFinished {
                status: entry.status.as_str().to_string(),
            });
        }
        f(&mut entry)?;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Transition a task's lifecycle status.
    ///
    /// Terminal targets stamp `completed_at`; reaching `Failed` also moves
    /// the stage to `Failed`.
    pub fn transition(&self, id: &str, target: TaskStatus) -> Result<Task> {
        self.mutate(id, false, |task| {
            task.status = task.status.transition_to(target)?;
            if target.is_terminal() {
                task.completed_at = Some(Utc::now());
            }
            match target {
                TaskStatus::Completed => {
                    task.stage = TaskStage::Completed;
                    task.progress = 100.0;
                }
                TaskStatus::Failed => {
                    task.stage = TaskStage::Failed;
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// Transition to `Failed` recording the failure message.
    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<Task> {
        let message = message.into();
        self.mutate(id, false, |task| {
            task.status = task.status.transition_to(TaskStatus::Failed)?;
            task.stage = TaskStage::Failed;
            task.error = Some(message.clone());
            task.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Enter a pipeline stage, resetting progress to the stage floor.
    pub fn set_stage(&self, id: &str, stage: TaskStage, detail: impl Into<String>) -> Result<Task> {
        self.mutate(id, true, |task| {
            task.stage = stage;
            task.progress = stage.progress_floor();
            task.stage_detail = detail.into();
            Ok(())
        })
    }

    /// Advance progress within the current stage.
    ///
    /// Progress is clamped to 100 and never decreases within a stage.
    pub fn set_progress(&self, id: &str, progress: f32, detail: impl Into<String>) -> Result<Task> {
        self.mutate(id, true, |task| {
            task.progress = task.progress.max(progress.min(100.0));
            task.stage_detail = detail.into();
            Ok(())
        })
    }

    /// Record the extract-stage artifact.
    pub fn set_audio_path(&self, id: &str, path: std::path::PathBuf) -> Result<Task> {
        self.mutate(id, true, |task| {
            task.audio_path = Some(path);
            Ok(())
        })
    }

    /// Record the synthesis-stage artifact.
    pub fn set_output_video_path(&self, id: &str, path: std::path::PathBuf) -> Result<Task> {
        self.mutate(id, true, |task| {
            task.output_video_path = Some(path);
            Ok(())
        })
    }

    /// Merge one recognized entry by sorted insertion.
    pub fn merge_subtitle(&self, id: &str, entry: SubtitleEntry) -> Result<Task> {
        self.mutate(id, true, |task| {
            merge_entry(&mut task.subtitles, entry);
            Ok(())
        })
    }

    /// Replace the subtitle list wholesale (cue shaping, user edits).
    ///
    /// Allowed on terminal tasks: users edit subtitles after completion and
    /// re-export. The list is validated and kept sorted.
    pub fn update_subtitles(&self, id: &str, mut entries: Vec<SubtitleEntry>) -> Result<Task> {
        validate_entries(&entries)?;
        entries.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        self.mutate(id, false, |task| {
            task.subtitles = entries;
            Ok(())
        })
    }

    /// Apply translated texts by entry id, keeping the original text.
    ///
    /// Unknown ids are ignored: the entry may have been reshaped away by a
    /// concurrent user edit.
    pub fn apply_translations(&self, id: &str, pairs: &[(u64, String)]) -> Result<Task> {
        self.mutate(id, true, |task| {
            for (entry_id, translated) in pairs {
                if let Some(entry) = task.subtitles.iter_mut().find(|e| e.id == *entry_id) {
                    if entry.original_text.is_none() {
                        entry.original_text = Some(std::mem::take(&mut entry.text));
                    }
                    entry.text = translated.clone();
                }
            }
            Ok(())
        })
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
