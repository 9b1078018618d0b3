//! The data model flowing from the external request parser into one worker.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One of the two commands the upgrade API may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Upgrade,
    UpgradeCustom,
}

/// The platform-specific default installer script name.
pub const DEFAULT_INSTALLER_UNIX: &str = "upgrade.sh";
pub const DEFAULT_INSTALLER_WINDOWS: &str = "upgrade.bat";

/// Picks the default installer for a platform tag when the caller did not supply one.
pub fn default_installer(platform: &str) -> &'static str {
    if platform.eq_ignore_ascii_case("windows") {
        DEFAULT_INSTALLER_WINDOWS
    } else {
        DEFAULT_INSTALLER_UNIX
    }
}

/// The two task flavors share a command-and-platform envelope but diverge completely on the
/// WPK source; a tagged union keeps match sites exhaustive instead of reaching for inheritance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpgradeTask {
    Standard {
        wpk_file: String,
        wpk_sha1: String,
        #[serde(default)]
        custom_version: Option<String>,
    },
    Custom {
        file_path: String,
        #[serde(default)]
        installer: Option<String>,
    },
}

impl UpgradeTask {
    /// The remote filename transmitted to the agent: `wpk_file` for Standard, the basename of
    /// `file_path` for Custom.
    pub fn remote_file_name(&self) -> String {
        match self {
            UpgradeTask::Standard { wpk_file, .. } => wpk_file.clone(),
            UpgradeTask::Custom { file_path, .. } => Path::new(file_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_path.clone()),
        }
    }
}

/// A pending upgrade, owned by the queue and then by exactly one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub agent_id: u32,
    pub platform: String,
    pub command: Command,
    pub task: UpgradeTask,
}

impl UpgradeRequest {
    /// Zero-pads `agent_id` to three digits for the wire grammar.
    pub fn agent_id_wire(&self) -> String {
        format!("{:03}", self.agent_id)
    }
}
