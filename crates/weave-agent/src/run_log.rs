use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weave_core::event::EventBus;
use weave_core::types::EngineEvent;

/// JSONL run logger.
///
/// Subscribes to the EventBus and appends one JSON object per event to
/// `{log_dir}/{YYYYmmdd_HHMMSS}.jsonl`, flushing after every line.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry {
    ts: String,
    kind: &'static str,
    payload: serde_json::Value,
}

impl RunLogger {
    /// `level` controls verbosity: 1=turns and plans, 2=adds ready sets and
    /// step outcomes, 3=adds step starts.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Subscribe now and write in a background task until `cancel` fires or
    /// the bus closes.
    pub fn start(
        self,
        event_bus: &EventBus,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, cancel))
    }

    async fn run(self, mut rx: broadcast::Receiver<EngineEvent>, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = self.log_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                // drain queued events before honouring cancellation
                biased;
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let Some(entry) = self.event_to_entry(&event) else {
                                continue;
                            };
                            if let Ok(line) = serde_json::to_string(&entry) {
                                if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush log");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a log entry, or None if filtered by level.
    fn event_to_entry(&self, event: &EngineEvent) -> Option<LogEntry> {
        let (min_level, payload) = match event {
            EngineEvent::TurnStarted { user_input } => (1, json!({ "user_input": user_input })),
            EngineEvent::PlannerRetry { attempt, error } => {
                (1, json!({ "attempt": attempt, "error": error }))
            }
            EngineEvent::PlanProposed { plan } => (1, json!({ "plan": plan })),
            EngineEvent::PlanRejected { error } => (1, json!({ "error": error })),
            EngineEvent::ReadySetStarted { index, step_ids } => {
                (2, json!({ "index": index, "step_ids": step_ids }))
            }
            EngineEvent::StepStarted {
                step_id,
                kind,
                name,
            } => (3, json!({ "step_id": step_id, "type": kind, "name": name })),
            EngineEvent::StepFinished {
                step_id,
                kind,
                name,
                succeeded,
                elapsed_ms,
            } => (
                2,
                json!({
                    "step_id": step_id,
                    "type": kind,
                    "name": name,
                    "succeeded": succeeded,
                    "elapsed_ms": elapsed_ms,
                }),
            ),
            EngineEvent::PlanFinished {
                steps,
                failed,
                elapsed_ms,
            } => (
                1,
                json!({ "steps": steps, "failed": failed, "elapsed_ms": elapsed_ms }),
            ),
            EngineEvent::TurnComplete {
                user_input,
                response,
            } => (1, json!({ "user_input": user_input, "response": response })),
            EngineEvent::TurnFailed { error } => (1, json!({ "error": error })),
        };

        (self.level >= min_level).then(|| LogEntry {
            ts: Utc::now().to_rfc3339(),
            kind: event.kind(),
            payload,
        })
    }
}
