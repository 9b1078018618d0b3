//! The six one-shot protocol step primitives. Each formats a command per the wire grammar in
//! §6, sends it over a [`RequestChannel`], and interprets the reply via [`response::parse`].

use tracing::debug;

use super::framing::RequestChannel;
use super::response::{self, AgentResponse};
use crate::error::{FramingError, StageError};

/// `open` is the only step observed to race with agent-local file-handle churn; every other step
/// either sets up state or depends on a prior step and must surface failure directly.
pub const OPEN_MAX_ATTEMPTS: u32 = 10;

fn command(agent_id_wire: &str, verb: &str, args: &str) -> Vec<u8> {
    let mut cmd = format!("{agent_id_wire} com {verb}");
    if !args.is_empty() {
        cmd.push(' ');
        cmd.push_str(args);
    }
    cmd.into_bytes()
}

fn expect_ok<'a>(reply: &'a [u8]) -> Result<Option<&'a str>, FramingError> {
    match response::parse(reply) {
        Ok(AgentResponse::Ok(payload)) => Ok(payload),
        Ok(AgentResponse::Err(_)) | Err(_) => Err(FramingError::Recv(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "agent reported an error",
        ))),
    }
}

pub fn lock_restart(channel: &dyn RequestChannel, agent_id_wire: &str) -> Result<(), StageError> {
    let cmd = command(agent_id_wire, "lock_restart", "-1");
    debug!(stage = "lock_restart", "sending stage command");
    let reply = channel
        .exchange(&cmd)
        .map_err(StageError::SendLockRestartError)?;
    expect_ok(&reply).map_err(StageError::SendLockRestartError)?;
    Ok(())
}

pub fn open(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    remote_file: &str,
) -> Result<(), StageError> {
    let cmd = command(agent_id_wire, "open", &format!("wb {remote_file}"));

    let mut last_err = None;
    for attempt in 1..=OPEN_MAX_ATTEMPTS {
        debug!(stage = "open", attempt, "sending stage command");
        match channel.exchange(&cmd).map_err(StageError::SendOpenError) {
            Ok(reply) => match expect_ok(&reply) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(StageError::SendOpenError(e)),
            },
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or(StageError::SendOpenError(FramingError::Recv(
        std::io::Error::new(std::io::ErrorKind::Other, "open retries exhausted"),
    ))))
}

pub fn write(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    remote_file: &str,
    chunk: &[u8],
) -> Result<(), StageError> {
    let mut cmd = format!("{agent_id_wire} com write {} {remote_file} ", chunk.len()).into_bytes();
    cmd.extend_from_slice(chunk);

    debug!(stage = "write", bytes = chunk.len(), "sending stage command");
    let reply = channel.exchange(&cmd).map_err(StageError::SendWriteError)?;
    expect_ok(&reply).map_err(StageError::SendWriteError)?;
    Ok(())
}

pub fn close(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    remote_file: &str,
) -> Result<(), StageError> {
    let cmd = command(agent_id_wire, "close", remote_file);
    debug!(stage = "close", "sending stage command");
    let reply = channel.exchange(&cmd).map_err(StageError::SendCloseError)?;
    expect_ok(&reply).map_err(StageError::SendCloseError)?;
    Ok(())
}

/// Requests the SHA1 of `remote_file` from the agent and checks it against `expected_digest`
/// (case-insensitive hex compare). A non-hex payload is treated as a mismatch, not a transport
/// error.
pub fn sha1(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    remote_file: &str,
    expected_digest: &str,
) -> Result<(), StageError> {
    let cmd = command(agent_id_wire, "sha1", remote_file);
    debug!(stage = "sha1", "sending stage command");
    let reply = channel.exchange(&cmd).map_err(StageError::SendSha1Error)?;
    let payload = expect_ok(&reply).map_err(StageError::SendSha1Error)?;

    let digest = payload.ok_or(StageError::WpkSha1DoesNotMatch)?;
    let matches = digest.len() == expected_digest.len()
        && digest
            .chars()
            .all(|c| c.is_ascii_hexdigit())
        && digest.eq_ignore_ascii_case(expected_digest);

    if matches {
        Ok(())
    } else {
        Err(StageError::WpkSha1DoesNotMatch)
    }
}

/// Requests execution of `installer` against `remote_file`; only an exit code of `"0"` is success.
pub fn upgrade(
    channel: &dyn RequestChannel,
    agent_id_wire: &str,
    remote_file: &str,
    installer: &str,
) -> Result<(), StageError> {
    let cmd = command(agent_id_wire, "upgrade", &format!("{remote_file} {installer}"));
    debug!(stage = "upgrade", "sending stage command");
    let reply = channel.exchange(&cmd).map_err(StageError::SendUpgradeError)?;
    let payload = expect_ok(&reply).map_err(StageError::SendUpgradeError)?;

    match payload {
        Some("0") => Ok(()),
        Some(other) => Err(StageError::ScriptFailed(other.to_string())),
        None => Err(StageError::ScriptFailed("<no exit code>".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedChannel {
        replies: Mutex<Vec<&'static str>>,
        sent: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedChannel {
        fn new(replies: Vec<&'static str>) -> Self {
            ScriptedChannel {
                replies: Mutex::new(replies),
                sent: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RequestChannel for ScriptedChannel {
        fn exchange(&self, msg: &[u8]) -> Result<Vec<u8>, FramingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(msg).into_owned());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0]
            };
            Ok(reply.as_bytes().to_vec())
        }
    }

    #[test]
    fn lock_restart_formats_exact_wire_command() {
        let channel = ScriptedChannel::new(vec!["ok"]);
        lock_restart(&channel, "028").unwrap();
        assert_eq!(channel.sent.lock().unwrap()[0], "028 com lock_restart -1");
    }

    #[test]
    fn open_retries_up_to_ten_times_then_fails() {
        let channel = ScriptedChannel::new(vec!["err"]);
        let result = open(&channel, "111", "test.wpk");

        assert!(result.is_err());
        assert_eq!(channel.call_count(), OPEN_MAX_ATTEMPTS as usize);
    }

    #[test]
    fn open_succeeds_on_a_later_attempt() {
        let channel = ScriptedChannel::new(vec!["err", "err", "ok"]);
        open(&channel, "111", "test.wpk").unwrap();
        assert_eq!(channel.call_count(), 3);
    }

    #[test]
    fn write_embeds_chunk_length_and_bytes() {
        let channel = ScriptedChannel::new(vec!["ok"]);
        write(&channel, "111", "test.wpk", b"test\n").unwrap();
        assert_eq!(channel.sent.lock().unwrap()[0], "111 com write 5 test.wpk test\n");
    }

    #[test]
    fn sha1_accepts_matching_digest_case_insensitively() {
        let expected = "d321af65983fa412e3a12c312ada12ab321a253a";
        let channel = ScriptedChannel::new(vec!["ok D321AF65983FA412E3A12C312ADA12AB321A253A"]);
        sha1(&channel, "111", "test.wpk", expected).unwrap();
    }

    #[test]
    fn sha1_rejects_mismatched_digest() {
        let expected = "d321af65983fa412e3a12c312ada12ab321a253a";
        let channel = ScriptedChannel::new(vec!["ok d321af65983fa412e3a12c312ada12ab321a253b"]);
        let err = sha1(&channel, "111", "test.wpk", expected).unwrap_err();
        assert!(matches!(err, StageError::WpkSha1DoesNotMatch));
    }

    #[test]
    fn upgrade_treats_zero_exit_code_as_success() {
        let channel = ScriptedChannel::new(vec!["ok 0"]);
        upgrade(&channel, "111", "test.wpk", "upgrade.sh").unwrap();
        assert_eq!(
            channel.sent.lock().unwrap()[0],
            "111 com upgrade test.wpk upgrade.sh"
        );
    }

    #[test]
    fn upgrade_treats_nonzero_exit_code_as_failure() {
        let channel = ScriptedChannel::new(vec!["ok 1"]);
        let err = upgrade(&channel, "111", "test.wpk", "upgrade.sh").unwrap_err();
        assert!(matches!(err, StageError::ScriptFailed(code) if code == "1"));
    }
}
