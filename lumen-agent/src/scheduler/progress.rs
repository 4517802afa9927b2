//! Progress streaming
//!
//! The pipeline runs on a blocking thread and reports through a
//! `ChannelObserver`; a forwarder task on the runtime turns those events
//! into outbound messages.

use lumen_core::domain::job::JobId;
use lumen_core::domain::message::{Message, outbound};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::host::PhotoId;
use crate::service::{PipelineObserver, StageOutcome};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { original: PhotoId, edit_target: PhotoId },
    Stage(StageOutcome),
}

/// Pipeline observer that hands events to the runtime
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver gone, dropping event");
        }
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_edit_target_ready(&mut self, original: &PhotoId, target: &PhotoId) {
        self.send(ProgressEvent::Started {
            original: original.clone(),
            edit_target: target.clone(),
        });
    }

    fn on_stage_complete(&mut self, outcome: &StageOutcome) {
        self.send(ProgressEvent::Stage(outcome.clone()));
    }
}

/// Outbound side of the push channel, if there is one
///
/// Messages are only sent while the channel is up; in polling fallback they
/// are dropped quietly.
#[derive(Clone, Default)]
pub struct Outbox {
    transport: Option<Arc<Transport>>,
}

impl Outbox {
    pub fn new(transport: Option<Arc<Transport>>) -> Self {
        Self { transport }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    pub async fn emit(&self, message: Message) {
        let Some(transport) = self.transport.as_ref().filter(|t| t.is_connected()) else {
            return;
        };
        if let Err(e) = transport.send(message).await {
            debug!("Outbound message dropped: {}", e);
        }
    }
}

/// Drains progress events for one job until the pipeline drops its sender
pub async fn forward_progress(
    job_id: JobId,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    outbox: Outbox,
) {
    let job_id = job_id.as_str();

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Started {
                original,
                edit_target,
            } => {
                outbox
                    .emit(outbound::job_started(
                        job_id,
                        original.as_str(),
                        Some(json!({"edit_target": edit_target.as_str()})),
                    ))
                    .await;
            }
            ProgressEvent::Stage(outcome) => {
                let note = format!(
                    "Stage {}/{} ({}) {:?}",
                    outcome.index + 1,
                    outcome.total,
                    outcome.name,
                    outcome.status
                );
                outbox
                    .emit(outbound::job_progress(
                        job_id,
                        &outcome.name,
                        outcome.percent_complete(),
                        Some(&note),
                        Some(json!({
                            "applied": outcome.applied_count(),
                            "failed": outcome.failed_count(),
                        })),
                    ))
                    .await;
                outbox
                    .emit(outbound::stage_completed(
                        job_id,
                        &outcome.name,
                        Some(outcome.to_value()),
                    ))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::OperationOutcome;

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut observer = ChannelObserver::new(tx);

        observer.on_edit_target_ready(&PhotoId::new("IMG_1"), &PhotoId::new("IMG_1/copy-1"));
        observer.on_stage_complete(&StageOutcome::from_operations(
            0,
            1,
            "base",
            vec![OperationOutcome::applied("Exposure")],
        ));
        drop(observer);

        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::Started { edit_target, .. }) if edit_target.as_str() == "IMG_1/copy-1"
        ));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::Stage(outcome)) if outcome.name == "base"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forwarder_without_transport_drains() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ProgressEvent::Stage(StageOutcome::skipped(0, 1, "lensBlur", "unknown stage")))
            .unwrap();
        drop(tx);

        forward_progress(JobId::new("job-1"), rx, Outbox::default()).await;
        assert!(!Outbox::default().is_connected());
    }
}
