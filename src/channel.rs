//! Line-oriented command channel.
//!
//! Every interaction with the controller is a short ASCII exchange: the host
//! sends `<keyword>[,<arg>...]\r`, the device either stays silent (pure
//! write), answers `<keyword>,<value>[,<value>...]` followed by the
//! transport's terminator, or reports `error,<code>`. [`CommandChannel`]
//! frames those exchanges over any [`Transport`], verifies the keyword echo,
//! decodes the firmware's single-byte character set, and feeds the result
//! cache.
//!
//! The transport sits behind an async mutex so concurrent tasks can share one
//! channel; the lock is held across the full write-then-read round trip, which
//! is what keeps request and response paired on a half-duplex wire.

use crate::cache::CommandCache;
use crate::error::{Nv200Error, Result};
use crate::transport::{Transport, DEFAULT_TIMEOUT, XOFF, XON};
use crate::types::ErrorCode;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Bytes stripped from frame boundaries and value tokens.
///
/// The firmware pads some replies with NUL/SOH bytes and the serial framing
/// leaves CR/LF and flow-control bytes behind.
const PADDING: &[char] = &['\0', '\x01', '\r', '\n', XON as char, XOFF as char, ' '];

/// A validated command: keyword plus zero or more arguments.
///
/// Built with [`Command::new`] (which rejects keywords that would corrupt the
/// line framing) and extended with [`Command::arg`].
#[derive(Debug, Clone)]
pub struct Command {
    keyword: String,
    args: Vec<String>,
}

impl Command {
    /// Creates a command with no arguments.
    ///
    /// Fails with [`Nv200Error::Command`] if the keyword is empty or contains
    /// a comma or control character.
    pub fn new(keyword: &str) -> Result<Self> {
        if keyword.is_empty() {
            return Err(Nv200Error::Command {
                keyword: keyword.to_string(),
                reason: "keyword must not be empty",
            });
        }
        if keyword.chars().any(|c| c == ',' || c.is_control()) {
            return Err(Nv200Error::Command {
                keyword: keyword.to_string(),
                reason: "keyword must not contain commas or control characters",
            });
        }
        Ok(Self {
            keyword: keyword.to_string(),
            args: Vec::new(),
        })
    }

    /// Appends an argument, formatted with its `Display` impl.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// The command keyword.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Whether any arguments were appended.
    pub fn has_args(&self) -> bool {
        !self.args.is_empty()
    }

    /// The wire form: comma-joined fields, CR-terminated.
    fn serialize(&self) -> String {
        let mut line = self.keyword.clone();
        for arg in &self.args {
            line.push(',');
            line.push_str(arg);
        }
        line.push('\r');
        line
    }
}

/// Command/response framing over a [`Transport`], with result caching.
pub struct CommandChannel {
    transport: Mutex<Box<dyn Transport>>,
    timeout: Duration,
    cache: CommandCache,
}

impl CommandChannel {
    /// Wraps a transport with an empty cache allow-list.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_cacheable(transport, &[])
    }

    /// Wraps a transport; results for keywords in `cacheable` may be cached.
    pub fn with_cacheable(transport: Box<dyn Transport>, cacheable: &'static [&'static str]) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout: DEFAULT_TIMEOUT,
            cache: CommandCache::new(cacheable),
        }
    }

    /// Opens the underlying transport.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.get_mut().connect().await
    }

    /// Closes the underlying transport and drops all cached results.
    pub async fn close(&mut self) -> Result<()> {
        self.cache.clear();
        self.transport.get_mut().close().await
    }

    /// Whether the underlying transport is open.
    pub async fn is_open(&self) -> bool {
        self.transport.lock().await.is_open()
    }

    /// The per-round-trip response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the response timeout, floored at the protocol minimum.
    ///
    /// The firmware needs up to half a second for some reads, so values below
    /// [`DEFAULT_TIMEOUT`] are clamped up rather than honored.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout.max(DEFAULT_TIMEOUT);
    }

    /// The channel's result cache.
    pub fn cache(&self) -> &CommandCache {
        &self.cache
    }

    /// Sends a command without waiting for a response.
    ///
    /// The cache entry for the keyword is invalidated *before* transmission,
    /// so a failed write cannot leave a stale value behind.
    pub async fn send(&self, command: &Command) -> Result<()> {
        self.cache.invalidate(command.keyword());
        let line = command.serialize();
        let mut transport = self.transport.lock().await;
        discard_stale(transport.as_mut(), command.keyword()).await?;
        debug!(keyword = command.keyword(), line = line.trim_end(), "send");
        transport.write(line.as_bytes()).await
    }

    /// Sends a command and returns the parsed response values.
    pub async fn query(&self, command: &Command) -> Result<Vec<String>> {
        self.query_with_timeout(command, self.timeout).await
    }

    /// Sends a command and waits up to `timeout` for its response.
    ///
    /// Parameterless queries are answered from the cache when possible; a
    /// fresh response to a parameterless query is stored back into it.
    pub async fn query_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        if !command.has_args() {
            if let Some(values) = self.cache.lookup(command.keyword()) {
                trace!(keyword = command.keyword(), "answered from cache");
                return Ok(values);
            }
        }

        let line = command.serialize();
        let raw = {
            // Hold the lock across write and read: the wire is half-duplex
            // and interleaved round trips would cross-match responses.
            let mut transport = self.transport.lock().await;
            discard_stale(transport.as_mut(), command.keyword()).await?;
            debug!(keyword = command.keyword(), line = line.trim_end(), "query");
            transport.write(line.as_bytes()).await?;
            let terminator = transport.response_terminator();
            match transport.read_until(terminator, timeout).await {
                Ok(raw) => raw,
                Err(Nv200Error::Timeout { waited_ms, .. }) => {
                    return Err(Nv200Error::Timeout {
                        keyword: command.keyword().to_string(),
                        waited_ms,
                    })
                }
                Err(e) => return Err(e),
            }
        };

        let values = parse_frame(&raw, command.keyword())?;
        if !command.has_args() {
            self.cache.store(command.keyword(), &values);
        }
        Ok(values)
    }

    /// Reads a parameterless command's full value list.
    pub async fn read_values(&self, keyword: &str) -> Result<Vec<String>> {
        self.query(&Command::new(keyword)?).await
    }

    /// Reads a parameterless command's first value as a string.
    pub async fn read_string(&self, keyword: &str) -> Result<String> {
        let values = self.query(&Command::new(keyword)?).await?;
        first_token(keyword, &values).map(str::to_string)
    }

    /// Reads a parameterless command's first value as an integer.
    pub async fn read_int(&self, keyword: &str) -> Result<i64> {
        let values = self.query(&Command::new(keyword)?).await?;
        token_to(keyword, first_token(keyword, &values)?)
    }

    /// Reads a parameterless command's first value as a float.
    pub async fn read_float(&self, keyword: &str) -> Result<f64> {
        let values = self.query(&Command::new(keyword)?).await?;
        token_to(keyword, first_token(keyword, &values)?)
    }

    /// Writes a single value to a command.
    pub async fn write_value(&self, keyword: &str, value: impl fmt::Display) -> Result<()> {
        self.send(&Command::new(keyword)?.arg(value)).await
    }
}

/// Drops input that arrived outside a round trip, typically a response whose
/// query already timed out.
async fn discard_stale(transport: &mut (dyn Transport + '_), keyword: &str) -> Result<()> {
    let stale = transport.drain().await?;
    if stale > 0 {
        warn!(keyword, bytes = stale, "discarded stale input before write");
    }
    Ok(())
}

/// Decodes a raw response frame and verifies the keyword echo.
///
/// The firmware emits a single-byte character set (degree signs, micro signs)
/// that is not valid UTF-8, so bytes map to chars one-to-one.
fn parse_frame(raw: &[u8], sent_keyword: &str) -> Result<Vec<String>> {
    let text: String = raw.iter().map(|&b| b as char).collect();
    let trimmed = text.trim_matches(PADDING);

    let (echoed, rest) = match trimmed.split_once(',') {
        Some((echoed, rest)) => (echoed.trim_matches(PADDING), Some(rest)),
        None => (trimmed, None),
    };

    if echoed == "error" {
        let code = rest
            .map(|r| r.trim_matches(PADDING))
            .and_then(|token| token.parse::<u16>().ok())
            .unwrap_or(0);
        return Err(Nv200Error::Device(ErrorCode::from_value(code)));
    }

    if echoed != sent_keyword {
        return Err(Nv200Error::Protocol {
            sent: sent_keyword.to_string(),
            got: echoed.to_string(),
            frame: text,
        });
    }

    let values = match rest {
        Some(rest) if !rest.trim_matches(PADDING).is_empty() => rest
            .split(',')
            .map(|token| token.trim_matches(PADDING).to_string())
            .collect(),
        _ => Vec::new(),
    };
    Ok(values)
}

/// The first value token of a response, or a `Value` error if there is none.
pub(crate) fn first_token<'a>(keyword: &str, values: &'a [String]) -> Result<&'a str> {
    values
        .first()
        .map(String::as_str)
        .ok_or_else(|| Nv200Error::Value {
            keyword: keyword.to_string(),
            token: String::new(),
            reason: "response contained no value".into(),
        })
}

/// The last value token of a response, or a `Value` error if there is none.
///
/// Parameterized reads echo the request parameters before the value, so the
/// value proper is the final token.
pub(crate) fn last_token<'a>(keyword: &str, values: &'a [String]) -> Result<&'a str> {
    values
        .last()
        .map(String::as_str)
        .ok_or_else(|| Nv200Error::Value {
            keyword: keyword.to_string(),
            token: String::new(),
            reason: "response contained no value".into(),
        })
}

/// Parses a value token, mapping failures onto [`Nv200Error::Value`].
pub(crate) fn token_to<T>(keyword: &str, token: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    token.parse().map_err(|e: T::Err| Nv200Error::Value {
        keyword: keyword.to_string(),
        token: token.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_comma_joined_cr_terminated() {
        let cmd = Command::new("set").map(|c| c.arg(42.5)).map(|c| c.arg(1));
        let cmd = match cmd {
            Ok(cmd) => cmd,
            Err(e) => panic!("command rejected: {}", e),
        };
        assert_eq!(cmd.serialize(), "set,42.5,1\r");
    }

    #[test]
    fn command_rejects_bad_keywords() {
        assert!(matches!(
            Command::new(""),
            Err(Nv200Error::Command { .. })
        ));
        assert!(matches!(
            Command::new("set,1"),
            Err(Nv200Error::Command { .. })
        ));
        assert!(matches!(
            Command::new("set\r"),
            Err(Nv200Error::Command { .. })
        ));
    }

    #[test]
    fn parse_frame_strips_padding_and_terminators() {
        let values = parse_frame(b"\x00\x01meas,12.5\r\n\x11", "meas");
        assert_eq!(values.ok(), Some(vec!["12.5".to_string()]));
    }

    #[test]
    fn parse_frame_splits_multiple_values() {
        let values = parse_frame(b"recout,0,17,5.25\r\n", "recout");
        assert_eq!(
            values.ok(),
            Some(vec!["0".to_string(), "17".to_string(), "5.25".to_string()])
        );
    }

    #[test]
    fn parse_frame_flags_echo_mismatch() {
        let err = parse_frame(b"meas,12.5\r\n", "set");
        assert!(matches!(
            err,
            Err(Nv200Error::Protocol { ref sent, ref got, .. })
                if sent == "set" && got == "meas"
        ));
    }

    #[test]
    fn parse_frame_maps_error_frames() {
        let err = parse_frame(b"error,4\r\n", "set");
        assert!(matches!(
            err,
            Err(Nv200Error::Device(crate::types::ErrorCode::ParameterOutOfRange))
        ));
    }

    #[test]
    fn parse_frame_decodes_non_ascii_bytes() {
        // 0xB5 is the micro sign in the firmware's character set; the frame
        // is not valid UTF-8.
        let raw = b"unitcl,\xB5m\r\n";
        let values = parse_frame(raw, "unitcl");
        assert_eq!(values.ok(), Some(vec!["\u{B5}m".to_string()]));
    }

    #[test]
    fn parse_frame_handles_valueless_echo() {
        let values = parse_frame(b"stop\r\n", "stop");
        assert_eq!(values.ok(), Some(Vec::new()));
    }

    #[test]
    fn token_conversion_reports_offending_token() {
        let err = token_to::<i64>("cl", "abc");
        assert!(matches!(
            err,
            Err(Nv200Error::Value { ref token, .. }) if token == "abc"
        ));
    }
}
