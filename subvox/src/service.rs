//! Service facade: the engine surface consumed by the UI collaborator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subtitle_format::{ExportMode, SubtitleEntry, render_srt, render_text};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::EngineConfig;
use crate::domain::{NewTask, Task};
use crate::pipeline::PipelineRunner;
use crate::progress::{EngineEvent, ProgressBus, TaskEvent};
use crate::providers::{MediaTool, RecognitionProvider, TranslationProvider};
use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Subtitle export container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Srt,
    Text,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Text => "txt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "srt" => Some(Self::Srt),
            "txt" | "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Builder for [`SubtitleService`].
pub struct SubtitleServiceBuilder {
    config: EngineConfig,
    snapshot: Option<Vec<Task>>,
    media: Arc<dyn MediaTool>,
    recognition: Arc<dyn RecognitionProvider>,
    translation: Arc<dyn TranslationProvider>,
}

impl SubtitleServiceBuilder {
    pub fn new(
        media: Arc<dyn MediaTool>,
        recognition: Arc<dyn RecognitionProvider>,
        translation: Arc<dyn TranslationProvider>,
    ) -> Self {
        Self {
            config: EngineConfig::default(),
            snapshot: None,
            media,
            recognition,
            translation,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Rehydrate the registry from a persisted snapshot. Rehydrated tasks
    /// are not automatically admitted; the host re-submits pending ones via
    /// `start_queue`. Already-recorded artifacts (extracted audio,
    /// translated entries) are honored, so resumed work is not redone.
    pub fn with_snapshot(mut self, tasks: Vec<Task>) -> Self {
        self.snapshot = Some(tasks);
        self
    }

    /// Build the service, spawning the scheduler's admission loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> SubtitleService {
        let config = Arc::new(self.config);
        let registry = Arc::new(match self.snapshot {
            Some(tasks) => TaskRegistry::from_snapshot(tasks),
            None => TaskRegistry::new(),
        });
        let bus = Arc::new(ProgressBus::new(config.event_capacity));
        let runner = Arc::new(PipelineRunner::new(
            registry.clone(),
            bus.clone(),
            config.clone(),
            self.media,
            self.recognition,
            self.translation,
        ));
        let scheduler = Scheduler::new(registry.clone(), bus.clone(), config.clone(), runner);

        info!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            "subtitle service ready"
        );
        SubtitleService {
            registry,
            bus,
            scheduler,
            config,
        }
    }
}

/// The pipeline engine's exposed surface: task CRUD, lifecycle control,
/// export and event subscriptions.
pub struct SubtitleService {
    registry: Arc<TaskRegistry>,
    bus: Arc<ProgressBus>,
    scheduler: Arc<Scheduler>,
    config: Arc<EngineConfig>,
}

impl SubtitleService {
    /// Create a task and submit it for processing.
    pub fn create_task(&self, params: NewTask) -> Task {
        let task = self.registry.create(params);
        info!(task_id = %task.id, file = %task.file_name, "task created");
        self.scheduler.enqueue(&task.id);
        task
    }

    /// Create many tasks; they queue in submission order.
    pub fn create_tasks(&self, params: Vec<NewTask>) -> Vec<Task> {
        params.into_iter().map(|p| self.create_task(p)).collect()
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.registry.get(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.registry.list()
    }

    /// Replace a task's subtitles (user edits).
    pub fn update_subtitles(&self, task_id: &str, entries: Vec<SubtitleEntry>) -> Result<Task> {
        self.registry.update_subtitles(task_id, entries)
    }

    /// Delete a task. Active tasks must be cancelled first.
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let removed = self.registry.remove(task_id)?;
        self.bus.remove_task(task_id);
        info!(task_id, file = %removed.file_name, "task deleted");
        Ok(())
    }

    pub fn pause_task(&self, task_id: &str) -> Result<()> {
        self.scheduler.pause_task(task_id)
    }

    pub fn resume_task(&self, task_id: &str) -> Result<()> {
        self.scheduler.resume_task(task_id)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.scheduler.cancel_task(task_id)
    }

    /// Enqueue many existing tasks and begin admitting.
    pub fn start_queue(&self, task_ids: Vec<String>) {
        self.scheduler.start_queue(task_ids)
    }

    pub fn pause_queue(&self) {
        self.scheduler.pause_queue()
    }

    pub fn resume_queue(&self) {
        self.scheduler.resume_queue()
    }

    pub fn cancel_queue(&self) {
        self.scheduler.cancel_queue()
    }

    /// Render a task's subtitles for export.
    ///
    /// Partial results of failed or cancelled tasks export the same way as
    /// completed ones.
    pub fn export(
        &self,
        task_id: &str,
        format: ExportFormat,
        mode: ExportMode,
        with_timestamps: bool,
    ) -> Result<String> {
        let task = self.registry.get(task_id)?;
        if task.subtitles.is_empty() {
            return Err(Error::validation(format!(
                "task {task_id} has no subtitles to export"
            )));
        }
        Ok(match format {
            ExportFormat::Srt => render_srt(&task.subtitles, mode),
            ExportFormat::Text => render_text(&task.subtitles, mode, with_timestamps),
        })
    }

    /// Subscribe to one task's events.
    pub fn subscribe_task(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        self.bus.subscribe_task(task_id)
    }

    /// Subscribe to every task's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe_all()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot every task for the storage collaborator.
    pub fn snapshot(&self) -> Vec<Task> {
        self.registry.snapshot()
    }

    /// Stop admitting work and cancel everything in flight.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_parse() {
        assert_eq!(ExportFormat::parse("srt"), Some(ExportFormat::Srt));
        assert_eq!(ExportFormat::parse("txt"), Some(ExportFormat::Text));
        assert_eq!(ExportFormat::parse("text"), Some(ExportFormat::Text));
        assert_eq!(ExportFormat::parse("ass"), None);
    }
}
