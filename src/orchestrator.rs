//! Drives the seven-step protocol for one agent: pre-flight validation, then
//! lock_restart → open → write* → close → sha1 → upgrade, strictly ordered, abort-on-failure.

use tracing::{debug, warn};

use crate::config::ManagerConfig;
use crate::protocol::wpk::{self, WpkStreamer};
use crate::protocol::{steps, RequestChannel};
use crate::request::{default_installer, UpgradeRequest, UpgradeTask};
use crate::validator::{sha1_hex, CustomValidator, WpkValidator};

/// Which of the seven steps produced a [`UpgradeOutcome::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    LockRestart,
    Open,
    Write,
    Close,
    Sha1,
    Upgrade,
}

/// The terminal result of one agent's upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Success,
    Failure { stage: Stage, detail: String },
}

impl UpgradeOutcome {
    fn failure(stage: Stage, detail: impl ToString) -> Self {
        UpgradeOutcome::Failure {
            stage,
            detail: detail.to_string(),
        }
    }
}

/// Resolved, flavor-independent upgrade parameters derived from pre-flight validation.
struct Resolved {
    local_path: std::path::PathBuf,
    remote_file: String,
    expected_sha1: String,
    installer: String,
}

/// Runs pre-flight validation for a request, producing the parameters the protocol steps need.
fn validate(
    request: &UpgradeRequest,
    config: &ManagerConfig,
    wpk_validator: &dyn WpkValidator,
    custom_validator: &dyn CustomValidator,
) -> Result<Resolved, String> {
    let remote_file = request.task.remote_file_name();

    match &request.task {
        UpgradeTask::Standard { wpk_file, wpk_sha1, .. } => {
            wpk_validator
                .validate(&config.wpk_repository_path, wpk_file, wpk_sha1)
                .map_err(|e| e.to_string())?;

            Ok(Resolved {
                local_path: wpk::local_path(&config.wpk_repository_path, wpk_file),
                remote_file,
                expected_sha1: wpk_sha1.clone(),
                installer: default_installer(&request.platform).to_string(),
            })
        }
        UpgradeTask::Custom { file_path, installer } => {
            custom_validator.validate(file_path).map_err(|e| e.to_string())?;

            let expected_sha1 = sha1_hex(std::path::Path::new(file_path)).map_err(|e| e.to_string())?;
            let installer = installer
                .clone()
                .unwrap_or_else(|| default_installer(&request.platform).to_string());

            Ok(Resolved {
                local_path: std::path::PathBuf::from(file_path),
                remote_file,
                expected_sha1,
                installer,
            })
        }
    }
}

/// Runs the full seven-step protocol for `request`, returning its terminal outcome. Never panics
/// on a protocol or I/O failure; every fallible step maps into a [`UpgradeOutcome::Failure`].
pub fn run_upgrade(
    request: &UpgradeRequest,
    config: &ManagerConfig,
    channel: &dyn RequestChannel,
    wpk_validator: &dyn WpkValidator,
    custom_validator: &dyn CustomValidator,
) -> UpgradeOutcome {
    debug!(agent_id = request.agent_id, command = ?request.command, "starting upgrade");

    let resolved = match validate(request, config, wpk_validator, custom_validator) {
        Ok(r) => r,
        Err(detail) => return UpgradeOutcome::failure(Stage::Validate, detail),
    };

    let agent_id_wire = request.agent_id_wire();

    if let Err(e) = steps::lock_restart(channel, &agent_id_wire) {
        return UpgradeOutcome::failure(Stage::LockRestart, e);
    }

    if let Err(e) = steps::open(channel, &agent_id_wire, &resolved.remote_file) {
        return UpgradeOutcome::failure(Stage::Open, e);
    }

    if let Err(outcome) = stream_chunks(channel, &agent_id_wire, &resolved, config) {
        return outcome;
    }

    if let Err(e) = steps::close(channel, &agent_id_wire, &resolved.remote_file) {
        return UpgradeOutcome::failure(Stage::Close, e);
    }

    if let Err(e) = steps::sha1(
        channel,
        &agent_id_wire,
        &resolved.remote_file,
        &resolved.expected_sha1,
    ) {
        return UpgradeOutcome::failure(Stage::Sha1, e);
    }

    if let Err(e) = steps::upgrade(
        channel,
        &agent_id_wire,
        &resolved.remote_file,
        &resolved.installer,
    ) {
        return UpgradeOutcome::failure(Stage::Upgrade, e);
    }

    debug!(agent_id = request.agent_id, "upgrade completed successfully");
    UpgradeOutcome::Success
}

/// Streams every non-empty chunk of the WPK as a `write` step. The file handle is released
/// (via `WpkStreamer`'s `Drop`) before this function returns on every path, including failure.
fn stream_chunks(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    resolved: &Resolved,
    config: &ManagerConfig,
) -> Result<(), UpgradeOutcome> {
    let mut streamer = WpkStreamer::open(&resolved.local_path, config.chunk_size).map_err(|e| {
        UpgradeOutcome::failure(Stage::Write, StageErrorDisplay(e.to_string()))
    })?;

    loop {
        let chunk = streamer
            .next_chunk()
            .map_err(|e| UpgradeOutcome::failure(Stage::Write, StageErrorDisplay(e.to_string())))?;

        if chunk.is_empty() {
            return Ok(());
        }

        if let Err(e) = steps::write(channel, agent_id_wire, &resolved.remote_file, &chunk) {
            warn!(stage = "write", error = %e, "aborting upgrade after write failure");
            return Err(UpgradeOutcome::failure(Stage::Write, e));
        }
    }
}

/// Lets a bare `String` reason (a local I/O error, not a [`StageError`]) flow through the same
/// `failure` constructor as the `StageError` cases above.
struct StageErrorDisplay(String);

impl std::fmt::Display for StageErrorDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
