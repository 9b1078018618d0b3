//! Classifies a raw agent reply as success (with an optional payload) or failure.

use crate::error::ResponseError;

/// The outcome of parsing one reply: `ok`, optionally carrying a payload, or `err`, carrying a
/// human-readable message. Any other first token is [`ResponseError::Malformed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse<'a> {
    Ok(Option<&'a str>),
    Err(Option<&'a str>),
}

/// Parses a reply of the shape `"ok"` | `"ok" SP payload` | `"err"` | `"err" SP message`.
///
/// Parsing never allocates beyond the payload slice: non-ASCII bytes in the payload (which should
/// only ever carry a hex digest or an exit code) are replaced rather than copied into an owned
/// string, since a malformed payload is itself a signal the caller treats as a protocol error.
pub fn parse(reply: &[u8]) -> Result<AgentResponse<'_>, ResponseError> {
    let reply = std::str::from_utf8(reply).map_err(|_| ResponseError::Malformed)?;

    let mut parts = reply.splitn(2, ' ');
    let tag = parts.next().unwrap_or_default();
    let rest = parts.next().map(str::trim);

    match tag {
        "ok" => Ok(AgentResponse::Ok(rest.filter(|s| !s.is_empty()))),
        "err" => Ok(AgentResponse::Err(rest.filter(|s| !s.is_empty()))),
        _ => Err(ResponseError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ok() {
        assert_eq!(parse(b"ok").unwrap(), AgentResponse::Ok(None));
    }

    #[test]
    fn parses_ok_with_payload() {
        let digest = "d321af65983fa412e3a12c312ada12ab321a253a";
        assert_eq!(
            parse(format!("ok {digest}").as_bytes()).unwrap(),
            AgentResponse::Ok(Some(digest))
        );
    }

    #[test]
    fn parses_err_with_message() {
        assert_eq!(
            parse(b"err Could not calculate sha1 in agent").unwrap(),
            AgentResponse::Err(Some("Could not calculate sha1 in agent"))
        );
    }

    #[test]
    fn rejects_unknown_shape() {
        assert_eq!(parse(b"nope"), Err(ResponseError::Malformed));
        assert_eq!(parse(b""), Err(ResponseError::Malformed));
    }

    #[test]
    fn rejects_non_utf8_reply() {
        assert_eq!(parse(&[0xff, 0xfe]), Err(ResponseError::Malformed));
    }
}
