//! Pipeline Events
//!
//! Typed events streamed from generation and composition to the task owner
//! over a bounded channel, plus [`EventSink`], the handle stages report through.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::core::generation::GeneratedImage;
use crate::core::progress::{MonotonicProgress, StageWindow};
use crate::core::Percent;

/// Default capacity of a task's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Named pipeline stages reported through [`PipelineEvent::StageComplete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Generation,
    Sequencing,
    Assembly,
    TransitionMerge,
    AudioMux,
    Finalize,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Generation => "generation",
            PipelineStage::Sequencing => "sequencing",
            PipelineStage::Assembly => "assembly",
            PipelineStage::TransitionMerge => "transition merge",
            PipelineStage::AudioMux => "audio mux",
            PipelineStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Event emitted by a running task
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One style finished successfully; emitted in completion order
    ImageReady(GeneratedImage),
    /// Global progress; never lower than the previous update
    ProgressUpdate { percent: Percent, message: String },
    StageComplete { stage: PipelineStage, percent: Percent },
}

/// Creates a bounded event channel and a sink covering the full 0~100 range
pub fn event_channel(capacity: usize) -> (EventSink, mpsc::Receiver<PipelineEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink::new(tx), rx)
}

/// Reporting handle passed down the pipeline.
///
/// Cloned and narrowed with [`EventSink::window`]; all clones share one
/// monotonic guard, so the global percentage never regresses.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<PipelineEvent>>,
    window: StageWindow,
    guard: Arc<Mutex<MonotonicProgress>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            tx: Some(tx),
            window: StageWindow::FULL,
            guard: Arc::new(Mutex::new(MonotonicProgress::new())),
        }
    }

    /// Sink that drops every event
    pub fn disconnected() -> Self {
        Self {
            tx: None,
            window: StageWindow::FULL,
            guard: Arc::new(Mutex::new(MonotonicProgress::new())),
        }
    }

    /// Sink whose local 0~100 maps onto `[start, end]` of this sink's range
    pub fn window(&self, start: Percent, end: Percent) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
            window: self.window.sub(start, end),
            guard: Arc::clone(&self.guard),
        }
    }

    /// Last global percentage emitted by any clone of this sink
    pub async fn current(&self) -> Percent {
        self.guard.lock().await.current()
    }

    /// Fine-grained progress. Dropped when the channel is full or another
    /// report is in flight.
    pub fn progress(&self, local: Percent, message: &str) {
        let Ok(mut guard) = self.guard.try_lock() else {
            return;
        };
        let previous = guard.current();
        let percent = guard.advance(self.window.project(local));
        if percent > previous {
            if let Some(tx) = &self.tx {
                let _ = tx.try_send(PipelineEvent::ProgressUpdate {
                    percent,
                    message: message.to_string(),
                });
            }
        }
    }

    /// Coarse progress at stage boundaries; waits for channel capacity.
    pub async fn checkpoint(&self, local: Percent, message: &str) -> Percent {
        let mut guard = self.guard.lock().await;
        let percent = guard.advance(self.window.project(local));
        if let Some(tx) = &self.tx {
            let _ = tx
                .send(PipelineEvent::ProgressUpdate {
                    percent,
                    message: message.to_string(),
                })
                .await;
        }
        percent
    }

    /// Marks `stage` done at the end of this sink's window
    pub async fn stage_complete(&self, stage: PipelineStage) {
        let percent = self.checkpoint(100.0, &format!("{stage} complete")).await;
        self.emit(PipelineEvent::StageComplete { stage, percent })
            .await;
    }

    /// Sends an event as-is; waits for channel capacity
    pub async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("window", &self.window)
            .field("connected", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}
