//! Progress bus: per-task fan-out of progress and result events.
//!
//! One bounded broadcast channel per task plus a global firehose. Per-task
//! publish order is delivery order for every subscriber; slow subscribers
//! lag and drop the oldest events rather than blocking publishers. There is
//! no replay buffer: late subscribers re-fetch current task state from the
//! registry.

use dashmap::DashMap;
use serde::Serialize;
use subtitle_format::SubtitleEntry;
use tokio::sync::broadcast;

use crate::domain::TaskStage;

/// Events emitted for a single task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TaskEvent {
    /// Progress update within the current stage.
    Progress {
        progress: f32,
        stage: TaskStage,
        detail: String,
    },
    /// The pipeline moved to a new stage.
    StageChanged { stage: TaskStage },
    /// A recognized segment became available.
    SubtitleAdded { entry: SubtitleEntry },
    /// Translated entry count advanced.
    TranslationProgress { completed: usize, total: usize },
    /// Synthesis progress in percent of the synthesis leg.
    SynthesisProgress { progress: f32 },
    /// Task reached `Completed`.
    Completed,
    /// Task reached `Failed`.
    Failed { error: String },
    /// Task reached `Cancelled`.
    Cancelled,
}

impl TaskEvent {
    /// Event kind key, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::StageChanged { .. } => "stage_changed",
            Self::SubtitleAdded { .. } => "subtitle_added",
            Self::TranslationProgress { .. } => "translation_progress",
            Self::SynthesisProgress { .. } => "synthesis_progress",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this event settles the task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Cancelled)
    }
}

/// A task event together with the id of the task it belongs to, as seen on
/// the global firehose.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub task_id: String,
    #[serde(flatten)]
    pub event: TaskEvent,
}

/// Fan-out pub/sub for progress and result events.
pub struct ProgressBus {
    channels: DashMap<String, broadcast::Sender<TaskEvent>>,
    firehose: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl ProgressBus {
    /// Create a bus with the given per-channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity.max(1));
        Self {
            channels: DashMap::new(),
            firehose,
            capacity: capacity.max(1),
        }
    }

    fn sender_for(&self, task_id: &str) -> broadcast::Sender<TaskEvent> {
        self.channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to one task's events.
    pub fn subscribe_task(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        self.sender_for(task_id).subscribe()
    }

    /// Subscribe to every task's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<EngineEvent> {
        self.firehose.subscribe()
    }

    /// Publish an event for a task.
    ///
    /// Send errors only mean there is no subscriber, which is fine.
    pub fn publish(&self, task_id: &str, event: TaskEvent) {
        let _ = self.sender_for(task_id).send(event.clone());
        let _ = self.firehose.send(EngineEvent {
            task_id: task_id.to_string(),
            event,
        });
    }

    /// Drop a task's channel (after task deletion).
    pub fn remove_task(&self, task_id: &str) {
        self.channels.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_per_task_publish_order() {
        let bus = ProgressBus::new(16);
        let mut rx = bus.subscribe_task("t1");

        for i in 0..5 {
            bus.publish(
                "t1",
                TaskEvent::Progress {
                    progress: i as f32,
                    stage: TaskStage::Transcribing,
                    detail: String::new(),
                },
            );
        }

        for i in 0..5 {
            match rx.recv().await.unwrap() {
                TaskEvent::Progress { progress, .. } => assert_eq!(progress, i as f32),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let bus = ProgressBus::new(16);
        bus.publish("t1", TaskEvent::Completed);

        let mut rx = bus.subscribe_task("t1");
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_firehose_carries_task_id() {
        let bus = ProgressBus::new(16);
        let mut rx = bus.subscribe_all();

        bus.publish("t7", TaskEvent::Cancelled);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, "t7");
        assert_eq!(event.event.kind(), "cancelled");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = ProgressBus::new(2);
        for _ in 0..100 {
            bus.publish("t1", TaskEvent::Completed);
        }
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(
            TaskEvent::SubtitleAdded {
                entry: SubtitleEntry::new(1, 0.0, 1.0, "x").unwrap()
            }
            .kind(),
            "subtitle_added"
        );
        assert_eq!(
            TaskEvent::TranslationProgress {
                completed: 1,
                total: 2
            }
            .kind(),
            "translation_progress"
        );
    }
}
