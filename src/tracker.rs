//! Reports a worker's terminal outcome to the task tracker, including the legacy-sentinel
//! double-report for agents that predate the current upgrade mechanism (§4.7).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TrackerError;
use crate::orchestrator::UpgradeOutcome;
use crate::protocol::RequestChannel;
use crate::version;

/// The status values the task tracker accepts in a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStatus {
    #[serde(rename = "In progress")]
    InProgress,
    Failed,
    Legacy,
}

#[derive(Debug, Clone, Serialize)]
struct StatusUpdateRequest {
    module: &'static str,
    command: &'static str,
    agent: u32,
    status: TrackerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusUpdateResponse {
    #[allow(dead_code)]
    error: i32,
    #[allow(dead_code)]
    data: Option<String>,
}

/// External collaborator that persists per-agent task state (§6). The dispatcher core only ever
/// reaches it through this trait; request parsing and persistence are out of scope.
pub trait TaskTracker: Send + Sync {
    /// Reports `outcome` for `agent_id`. When `outcome` is `Success` and `agent_version` compares
    /// strictly less than `legacy_threshold`, a second `Legacy` update is sent after the primary
    /// one.
    fn report(
        &self,
        agent_id: u32,
        outcome: &UpgradeOutcome,
        agent_version: Option<&str>,
        legacy_threshold: &str,
    ) -> Result<(), TrackerError>;
}

fn build_request(agent_id: u32, outcome: &UpgradeOutcome) -> StatusUpdateRequest {
    match outcome {
        UpgradeOutcome::Success => StatusUpdateRequest {
            module: "upgrade_module",
            command: "upgrade_update_status",
            agent: agent_id,
            status: TrackerStatus::InProgress,
            error_msg: None,
        },
        UpgradeOutcome::Failure { detail, .. } => StatusUpdateRequest {
            module: "upgrade_module",
            command: "upgrade_update_status",
            agent: agent_id,
            status: TrackerStatus::Failed,
            error_msg: Some(detail.clone()),
        },
    }
}

fn legacy_request(agent_id: u32) -> StatusUpdateRequest {
    StatusUpdateRequest {
        module: "upgrade_module",
        command: "upgrade_update_status",
        agent: agent_id,
        status: TrackerStatus::Legacy,
        error_msg: None,
    }
}

fn send(channel: &dyn RequestChannel, request: &StatusUpdateRequest) -> Result<(), TrackerError> {
    let body = serde_json::to_vec(request).expect("StatusUpdateRequest always serializes");
    let reply = channel.exchange(&body).map_err(TrackerError::Transport)?;
    serde_json::from_slice::<StatusUpdateResponse>(&reply).map_err(|_| TrackerError::Malformed)?;
    Ok(())
}

/// Reports status updates to the task tracker over a framed socket, the same transport style as
/// the agent-forwarding channel but pointed at a distinct daemon path (§9).
pub struct SocketTaskTracker {
    channel: Box<dyn RequestChannel>,
}

impl SocketTaskTracker {
    pub fn new(channel: Box<dyn RequestChannel>) -> Self {
        SocketTaskTracker { channel }
    }
}

impl TaskTracker for SocketTaskTracker {
    fn report(
        &self,
        agent_id: u32,
        outcome: &UpgradeOutcome,
        agent_version: Option<&str>,
        legacy_threshold: &str,
    ) -> Result<(), TrackerError> {
        send(self.channel.as_ref(), &build_request(agent_id, outcome))?;

        if matches!(outcome, UpgradeOutcome::Success) {
            if let Some(version) = agent_version {
                if version::is_legacy(version, legacy_threshold) {
                    if let Err(e) = send(self.channel.as_ref(), &legacy_request(agent_id)) {
                        warn!(agent_id, error = %e, "failed to report legacy sentinel");
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramingError;
    use crate::orchestrator::Stage;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct RecordingChannel {
        sent: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            RecordingChannel {
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl RequestChannel for RecordingChannel {
        fn exchange(&self, msg: &[u8]) -> Result<Vec<u8>, FramingError> {
            let value: serde_json::Value = serde_json::from_slice(msg).unwrap();
            self.sent.lock().unwrap().push(value);
            Ok(br#"{"error":0,"data":null}"#.to_vec())
        }
    }

    #[test]
    fn success_without_legacy_version_sends_exactly_one_in_progress_update() {
        let channel = RecordingChannel::new();
        let tracker = SocketTaskTracker::new(Box::new(channel.clone()));
        tracker
            .report(111, &UpgradeOutcome::Success, Some("v4.1.0"), "v4.0.0")
            .unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["status"], "In progress");
    }

    #[test]
    fn failure_reports_failed_status_with_error_message() {
        let channel = RecordingChannel::new();
        let tracker = SocketTaskTracker::new(Box::new(channel.clone()));
        let outcome = UpgradeOutcome::Failure {
            stage: Stage::Sha1,
            detail: "The SHA1 of the file doesn't match in the agent.".to_string(),
        };
        tracker.report(222, &outcome, None, "v4.0.0").unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["status"], "Failed");
        assert_eq!(
            sent[0]["error_msg"],
            "The SHA1 of the file doesn't match in the agent."
        );
    }

    #[test]
    fn legacy_version_triggers_a_second_update() {
        let channel = RecordingChannel::new();
        let tracker = SocketTaskTracker::new(Box::new(channel.clone()));
        tracker
            .report(333, &UpgradeOutcome::Success, Some("v3.13.1"), "v4.0.0")
            .unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["status"], "In progress");
        assert_eq!(sent[1]["status"], "Legacy");
    }

    #[test]
    fn non_legacy_version_sends_only_the_primary_update() {
        let channel = RecordingChannel::new();
        let tracker = SocketTaskTracker::new(Box::new(channel.clone()));
        tracker
            .report(444, &UpgradeOutcome::Success, Some("v4.2.0"), "v4.0.0")
            .unwrap();

        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }
}
