//! Scheduler: admits pending tasks into bounded-concurrency pipeline slots.
//!
//! A semaphore bounds concurrently processing tasks; additional submissions
//! queue FIFO. Pausing a task releases its slot (the parked pipeline future
//! stays resident); resuming re-acquires a slot at the front of the queue.
//! Cancellation is cooperative with a grace timeout, after which the
//! pipeline is force-aborted and settled here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::domain::TaskStatus;
use crate::pipeline::{PipelineControl, PipelineRunner};
use crate::progress::{ProgressBus, TaskEvent};
use crate::registry::TaskRegistry;
use crate::{Error, Result};

/// Queued admission work.
enum Admission {
    /// Admit a pending task into a fresh pipeline.
    Start(String),
    /// Re-admit a paused task into its resident pipeline.
    Resume(String),
}

impl Admission {
    fn task_id(&self) -> &str {
        match self {
            Self::Start(id) | Self::Resume(id) => id,
        }
    }
}

/// State for a task whose pipeline future is resident.
struct ActiveTask {
    control: PipelineControl,
    /// Held while the task occupies a concurrency slot; taken on pause.
    permit: Option<OwnedSemaphorePermit>,
}

/// Bounded-concurrency task scheduler.
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    bus: Arc<ProgressBus>,
    config: Arc<EngineConfig>,
    runner: Arc<PipelineRunner>,

    task_slots: Arc<Semaphore>,
    queue: Mutex<VecDeque<Admission>>,
    active: Arc<DashMap<String, ActiveTask>>,
    queue_notify: Arc<Notify>,
    queue_paused: AtomicBool,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create the scheduler and spawn its admission loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: Arc<ProgressBus>,
        config: Arc<EngineConfig>,
        runner: Arc<PipelineRunner>,
    ) -> Arc<Self> {
        let task_slots = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        let scheduler = Arc::new(Self {
            registry,
            bus,
            config,
            runner,
            task_slots,
            queue: Mutex::new(VecDeque::new()),
            active: Arc::new(DashMap::new()),
            queue_notify: Arc::new(Notify::new()),
            queue_paused: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let admission = scheduler.clone();
        tokio::spawn(async move { admission.admission_loop().await });
        scheduler
    }

    /// Stop admitting and cancel everything.
    pub fn shutdown(&self) {
        self.cancel_queue();
        self.shutdown.cancel();
    }

    /// Enqueue one pending task.
    pub fn enqueue(&self, task_id: &str) {
        self.queue
            .lock()
            .push_back(Admission::Start(task_id.to_string()));
        self.queue_notify.notify_one();
    }

    /// Enqueue many tasks and begin admitting (queue-level start).
    pub fn start_queue(&self, task_ids: Vec<String>) {
        {
            let mut queue = self.queue.lock();
            for id in task_ids {
                queue.push_back(Admission::Start(id));
            }
        }
        self.queue_notify.notify_one();
    }

    /// Number of tasks with a resident pipeline.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Pause one task. Takes effect at the task's next checkpoint; the
    /// concurrency slot is released immediately so the next queued task is
    /// admitted. Pausing a paused task is a no-op.
    pub fn pause_task(&self, task_id: &str) -> Result<()> {
        let task = self.registry.get(task_id)?;
        match task.status {
            TaskStatus::Paused => Ok(()),
            TaskStatus::Processing => {
                let Some(mut active) = self.active.get_mut(task_id) else {
                    return Err(Error::validation(format!(
                        "task {task_id} has no running pipeline"
                    )));
                };
                active.control.pause();
                let task = self.registry.transition(task_id, TaskStatus::Paused)?;
                active.permit.take();
                drop(active);

                self.bus.publish(
                    task_id,
                    TaskEvent::Progress {
                        progress: task.progress,
                        stage: task.stage,
                        detail: "Paused".to_string(),
                    },
                );
                info!(task_id, "task paused");
                self.queue_notify.notify_one();
                Ok(())
            }
            other => other.transition_to(TaskStatus::Paused).map(|_| ()),
        }
    }

    /// Resume one task at the exact stage/sub-index where it paused.
    /// Re-admission takes the front of the queue but still waits for a
    /// concurrency slot. Resuming a processing task is a no-op.
    pub fn resume_task(&self, task_id: &str) -> Result<()> {
        let task = self.registry.get(task_id)?;
        match task.status {
            TaskStatus::Processing => Ok(()),
            TaskStatus::Paused => {
                self.queue
                    .lock()
                    .push_front(Admission::Resume(task_id.to_string()));
                self.queue_notify.notify_one();
                Ok(())
            }
            other => other.transition_to(TaskStatus::Processing).map(|_| ()),
        }
    }

    /// Cancel one task without affecting others.
    ///
    /// Cancel of an already-cancelled task is a no-op (no duplicate
    /// event); cancel of a completed/failed task surfaces
    /// `TaskAlreadyFinished`.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        let task = self.registry.get(task_id)?;
        match task.status {
            TaskStatus::Cancelled => Ok(()),
            TaskStatus::Completed | TaskStatus::Failed => Err(Error::TaskAlreadyFinished {
                status: task.status.as_str().to_string(),
            }),
            TaskStatus::Pending => {
                self.forget_queued(task_id);
                if self
                    .registry
                    .transition(task_id, TaskStatus::Cancelled)
                    .is_ok()
                {
                    self.bus.publish(task_id, TaskEvent::Cancelled);
                    info!(task_id, "queued task cancelled");
                }
                Ok(())
            }
            TaskStatus::Processing | TaskStatus::Paused => {
                if let Some(active) = self.active.get(task_id) {
                    active.control.cancel();
                    debug!(task_id, "cancellation requested");
                } else if self
                    .registry
                    .transition(task_id, TaskStatus::Cancelled)
                    .is_ok()
                {
                    // Settling race: the pipeline is already gone.
                    self.bus.publish(task_id, TaskEvent::Cancelled);
                }
                Ok(())
            }
        }
    }

    /// Pause all currently processing tasks without dequeuing pending ones,
    /// and stop admitting until the queue is resumed.
    pub fn pause_queue(&self) {
        self.queue_paused.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Ok(task) = self.registry.get(&id)
                && task.status == TaskStatus::Processing
            {
                let _ = self.pause_task(&id);
            }
        }
        info!("queue paused");
    }

    /// Resume admission and all paused tasks.
    pub fn resume_queue(&self) {
        self.queue_paused.store(false, Ordering::SeqCst);
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Ok(task) = self.registry.get(&id)
                && task.status == TaskStatus::Paused
            {
                let _ = self.resume_task(&id);
            }
        }
        self.queue_notify.notify_one();
        info!("queue resumed");
    }

    /// Cancel all tasks and clear the queue.
    pub fn cancel_queue(&self) {
        let drained: Vec<Admission> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for admission in &drained {
            if let Admission::Start(id) = admission
                && self.registry.transition(id, TaskStatus::Cancelled).is_ok()
            {
                self.bus.publish(id, TaskEvent::Cancelled);
            }
        }

        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            if let Some(active) = self.active.get(id) {
                active.control.cancel();
            }
        }
        info!(
            dequeued = drained.len(),
            cancelled = ids.len(),
            "queue cancelled"
        );
    }

    fn forget_queued(&self, task_id: &str) {
        self.queue.lock().retain(|a| a.task_id() != task_id);
    }

    async fn admission_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.queue_notify.notified() => {}
            }
            self.drain_queue().await;
        }
    }

    async fn drain_queue(&self) {
        loop {
            if self.queue_paused.load(Ordering::SeqCst) {
                return;
            }
            let Some(admission) = self.queue.lock().pop_front() else {
                return;
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                acquired = self.task_slots.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            if self.queue_paused.load(Ordering::SeqCst) {
                self.queue.lock().push_front(admission);
                return;
            }

            match admission {
                Admission::Start(id) => {
                    // The task may have been cancelled or deleted while queued.
                    match self.registry.get(&id) {
                        Ok(task) if task.status == TaskStatus::Pending => {}
                        _ => continue,
                    }
                    self.launch(id, permit);
                }
                Admission::Resume(id) => {
                    match self.registry.get(&id) {
                        Ok(task) if task.status == TaskStatus::Paused => {}
                        _ => continue,
                    }
                    let Some(mut active) = self.active.get_mut(&id) else {
                        continue;
                    };
                    match self.registry.transition(&id, TaskStatus::Processing) {
                        Ok(task) => {
                            active.permit = Some(permit);
                            active.control.resume();
                            drop(active);
                            self.bus.publish(
                                &id,
                                TaskEvent::Progress {
                                    progress: task.progress,
                                    stage: task.stage,
                                    detail: "Resumed".to_string(),
                                },
                            );
                            info!(task_id = %id, "task resumed");
                        }
                        Err(_) => continue,
                    }
                }
            }
        }
    }

    fn launch(&self, task_id: String, permit: OwnedSemaphorePermit) {
        let (control, checkpoint) = PipelineControl::new();
        let cancel_token = control.cancel_token();
        self.active.insert(
            task_id.clone(),
            ActiveTask {
                control,
                permit: Some(permit),
            },
        );
        debug!(task_id = %task_id, "task admitted");

        let runner = self.runner.clone();
        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let active = self.active.clone();
        let queue_notify = self.queue_notify.clone();
        let grace = Duration::from_millis(self.config.cancel_grace_ms.max(1));
        tokio::spawn(async move {
            let run_id = task_id.clone();
            let mut pipeline = tokio::spawn(async move { runner.run(&run_id, checkpoint).await });

            tokio::select! {
                _ = &mut pipeline => {}
                _ = cancel_token.cancelled() => {
                    // Give in-flight work a grace period to acknowledge the
                    // abort, then force-terminate and settle here.
                    if tokio::time::timeout(grace, &mut pipeline).await.is_err() {
                        warn!(task_id = %task_id, grace_ms = grace.as_millis() as u64,
                            "pipeline did not acknowledge cancel; force-aborting");
                        pipeline.abort();
                        let _ = pipeline.await;
                        if registry.transition(&task_id, TaskStatus::Cancelled).is_ok() {
                            bus.publish(&task_id, TaskEvent::Cancelled);
                        }
                    }
                }
            }

            active.remove(&task_id);
            queue_notify.notify_one();
        });
    }
}
