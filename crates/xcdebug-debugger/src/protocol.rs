//! Command/response framing over the debugger's textual interface.
//!
//! The debugger gives no indication of where the output of a command ends.
//! Each command is therefore followed by a *sentinel* command printing a
//! marker unique to the session and to the command:
//!
//! ```text
//! thread backtrace all
//! script print("__XCDEBUG_" + "5f1d03c2a8b7e946_12__")
//! ```
//!
//! The printed marker (`__XCDEBUG_5f1d03c2a8b7e946_12__`) never appears in
//! the echoed command text thanks to the string concatenation, and the
//! random nonce keeps it from colliding with the target's own output.
//!
//! Sentinels carry a sequence number. When a command is abandoned (timeout
//! or cancellation), its late output is followed by its own, older,
//! sentinel, which lets the reader of the next command discard it.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::detector::{CrashReport, ProcessEvent, StopInfo};

/// Prefix shared by every sentinel marker.
pub const SENTINEL_PREFIX: &str = "__XCDEBUG_";

/// Prompt printed by the debugger before reading a command.
const PROMPT: &str = "(lldb)";

/// Encoder of commands for a single debugger subprocess.
#[derive(Debug)]
pub struct CommandProtocol {
    nonce: u64,
    next_seq: u64,
}

impl Default for CommandProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProtocol {
    /// Creates a protocol with a random nonce.
    pub fn new() -> Self {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u32(std::process::id());
        Self::with_nonce(hasher.finish())
    }

    /// Creates a protocol with the given nonce.
    pub const fn with_nonce(nonce: u64) -> Self {
        Self { nonce, next_seq: 1 }
    }

    /// Encodes a command followed by its sentinel.
    pub fn encode(&mut self, command: &str) -> crate::Result<EncodedCommand> {
        let command = command.trim();

        if command.contains(['\n', '\r']) {
            return Err(crate::Error::InvalidParams(
                "debugger commands must fit on a single line".to_owned(),
            ));
        }

        let seq = self.take_seq();
        let sentinel_command = self.sentinel_command(seq);

        let text = if command.is_empty() {
            format!("{sentinel_command}\n")
        } else {
            format!("{command}\n{sentinel_command}\n")
        };

        Ok(EncodedCommand {
            seq,
            command: command.to_owned(),
            sentinel_command,
            text,
        })
    }

    /// Encodes a bare sentinel, used to re-synchronize with the debugger
    /// output after an abandoned command.
    pub fn sync(&mut self) -> EncodedCommand {
        let seq = self.take_seq();
        let sentinel_command = self.sentinel_command(seq);

        EncodedCommand {
            seq,
            command: String::new(),
            text: format!("{sentinel_command}\n"),
            sentinel_command,
        }
    }

    /// Creates a reader for the response of the given command.
    pub fn reader(&self, encoded: &EncodedCommand) -> ResponseReader {
        ResponseReader {
            marker: format!("{SENTINEL_PREFIX}{:016x}_", self.nonce),
            seq: encoded.seq,
            echoes: [encoded.command.clone(), encoded.sentinel_command.clone()],
            lines: Vec::new(),
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn sentinel_command(&self, seq: u64) -> String {
        format!(
            "script print(\"{SENTINEL_PREFIX}\" + \"{:016x}_{seq}__\")",
            self.nonce
        )
    }
}

/// Command ready to be written to the debugger.
#[derive(Debug, Clone)]
pub struct EncodedCommand {
    /// Sequence number of the command.
    pub seq: u64,

    /// The command itself (without sentinel).
    pub command: String,

    /// Sentinel command following the command.
    pub sentinel_command: String,

    /// Text to write to the debugger.
    pub text: String,
}

/// Progress of a [ResponseReader] after consuming a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// The response continues.
    Pending,

    /// The sentinel of an earlier command was found, and everything read so
    /// far was discarded.
    Resynced {
        /// Sequence number of the stale sentinel.
        stale_seq: u64,
    },

    /// The sentinel of this command was found.
    Complete,
}

/// Accumulator of the response of a single command.
#[derive(Debug)]
pub struct ResponseReader {
    marker: String,
    seq: u64,
    echoes: [String; 2],
    lines: Vec<String>,
}

impl ResponseReader {
    /// Consumes the next line of debugger output.
    pub fn push(&mut self, line: String) -> ReadProgress {
        let line = strip_prompt(&line);

        if let Some(pos) = line.find(&self.marker) {
            // target output may lack a trailing newline
            let before = &line[..pos];
            if !before.trim().is_empty() {
                self.lines.push(before.to_owned());
            }

            let seq = line[pos + self.marker.len()..]
                .split("__")
                .next()
                .and_then(|seq| seq.parse::<u64>().ok());

            match seq {
                Some(seq) if seq == self.seq => return ReadProgress::Complete,
                Some(seq) if seq < self.seq => {
                    self.lines.clear();
                    return ReadProgress::Resynced { stale_seq: seq };
                }
                _ => return ReadProgress::Pending,
            }
        }

        if self.echoes.iter().any(|echo| !echo.is_empty() && line == echo) {
            return ReadProgress::Pending;
        }

        self.lines.push(line.to_owned());
        ReadProgress::Pending
    }

    /// Returns the lines accumulated so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consumes the reader, returning the accumulated lines.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Strips the leading prompts of a line.
pub(crate) fn strip_prompt(mut line: &str) -> &str {
    while let Some(rest) = line.strip_prefix(PROMPT) {
        line = rest.trim_start_matches(' ');
    }
    line
}

/// Result of a command, as decoded from the debugger output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Raw output of the command.
    pub output: String,

    /// Whether the debugger reported no error.
    pub succeeded: bool,

    /// Process state change observed while the command ran.
    pub outcome: Outcome,
}

impl CommandResult {
    /// Returns the lines of the output.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }

    /// Returns the output, or a [CommandFailed](crate::Error::CommandFailed)
    /// error if the debugger reported one.
    pub(crate) fn into_checked(self, command: &str) -> crate::Result<Self> {
        if self.succeeded {
            Ok(self)
        } else {
            Err(crate::Error::CommandFailed {
                command: command.to_owned(),
                output: self.output,
            })
        }
    }
}

/// Classified outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No process state change was observed.
    Completed,

    /// The target resumed execution.
    Running,

    /// The target stopped.
    Stopped(StopInfo),

    /// The target crashed.
    Crashed(CrashReport),

    /// The target exited.
    Exited(i32),

    /// The debugger detached from the target.
    Detached,
}

/// Decodes the response lines of a command, along with the process events
/// detected while they were read.
pub fn decode(lines: Vec<String>, events: &[ProcessEvent]) -> CommandResult {
    let succeeded = !lines
        .iter()
        .any(|line| line.trim_start().starts_with("error:"));

    let outcome = events
        .iter()
        .rev()
        .find_map(|event| match event {
            ProcessEvent::Launched { .. } | ProcessEvent::Resumed { .. } => Some(Outcome::Running),
            ProcessEvent::Stopped { stop, .. } => Some(Outcome::Stopped(stop.clone())),
            ProcessEvent::Crashed { crash, .. } => Some(Outcome::Crashed(crash.clone())),
            ProcessEvent::Exited { code, .. } => Some(Outcome::Exited(*code)),
            ProcessEvent::Detached { .. } => Some(Outcome::Detached),
            ProcessEvent::AttachFailed { .. } => None,
        })
        .unwrap_or(Outcome::Completed);

    let start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(start, |end| end + 1);

    CommandResult {
        output: lines[start..end].join("\n"),
        succeeded,
        outcome,
    }
}

/// Decoder of debugger output into lines.
///
/// Invalid UTF-8 (e.g., from the target's own output) is replaced rather
/// than treated as an error.
#[derive(Debug, Default)]
pub struct LineDecoder;

impl Decoder for LineDecoder {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };

        let line = src.split_to(newline + 1);
        Ok(Some(to_line(&line[..newline])))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if src.is_empty() {
            Ok(None)
        } else {
            let rest = src.split();
            Ok(Some(to_line(&rest)))
        }
    }
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use tokio_util::bytes::BytesMut;
    use tokio_util::codec::Decoder;

    use super::{CommandProtocol, LineDecoder, Outcome, ReadProgress, decode};
    use crate::detector::{ProcessEvent, StopInfo};

    #[test]
    fn encoded_sentinel_differs_from_printed_marker() {
        let mut protocol = CommandProtocol::with_nonce(0xabcd);
        let encoded = protocol.encode("thread list").expect("encode");

        assert_eq!(
            encoded.text,
            "thread list\nscript print(\"__XCDEBUG_\" + \"000000000000abcd_1__\")\n"
        );
        assert!(!encoded.text.contains("__XCDEBUG_000000000000abcd_1__"));
    }

    #[test]
    fn multi_line_commands_are_rejected() {
        let mut protocol = CommandProtocol::new();
        let err = protocol.encode("expression 1\nprocess kill").unwrap_err();
        assert!(matches!(err, crate::Error::InvalidParams(_)));
    }

    #[test]
    fn reader_completes_on_own_sentinel_and_drops_echoes() {
        let mut protocol = CommandProtocol::with_nonce(7);
        let encoded = protocol.encode("frame variable").expect("encode");
        let mut reader = protocol.reader(&encoded);

        assert_eq!(
            reader.push("(lldb) frame variable".to_owned()),
            ReadProgress::Pending
        );
        assert_eq!(reader.push("(Int) x = 5".to_owned()), ReadProgress::Pending);
        assert_eq!(
            reader.push(format!("(lldb) {}", encoded.sentinel_command)),
            ReadProgress::Pending
        );
        assert_eq!(
            reader.push("__XCDEBUG_0000000000000007_1__".to_owned()),
            ReadProgress::Complete
        );

        assert_eq!(reader.into_lines(), vec!["(Int) x = 5".to_owned()]);
    }

    #[test]
    fn reader_discards_output_of_abandoned_commands() {
        let mut protocol = CommandProtocol::with_nonce(7);
        let _abandoned = protocol.encode("expression sleep(100)").expect("encode");
        let encoded = protocol.encode("thread list").expect("encode");
        let mut reader = protocol.reader(&encoded);

        reader.push("(int) $0 = 0".to_owned());
        assert_eq!(
            reader.push("__XCDEBUG_0000000000000007_1__".to_owned()),
            ReadProgress::Resynced { stale_seq: 1 }
        );
        assert!(reader.lines().is_empty());

        reader.push("* thread #1: tid = 0x1".to_owned());
        assert_eq!(
            reader.push("__XCDEBUG_0000000000000007_2__".to_owned()),
            ReadProgress::Complete
        );
        assert_eq!(reader.into_lines(), vec!["* thread #1: tid = 0x1".to_owned()]);
    }

    #[test]
    fn reader_keeps_unterminated_target_output() {
        let mut protocol = CommandProtocol::with_nonce(1);
        let encoded = protocol.encode("process continue").expect("encode");
        let mut reader = protocol.reader(&encoded);

        let progress = reader.push("progress: 50%__XCDEBUG_0000000000000001_1__".to_owned());
        assert_eq!(progress, ReadProgress::Complete);
        assert_eq!(reader.into_lines(), vec!["progress: 50%".to_owned()]);
    }

    #[test]
    fn sentinel_of_another_session_is_plain_output() {
        let mut protocol = CommandProtocol::with_nonce(1);
        let encoded = protocol.encode("process status").expect("encode");
        let mut reader = protocol.reader(&encoded);

        let progress = reader.push("__XCDEBUG_0000000000000002_1__".to_owned());
        assert_eq!(progress, ReadProgress::Pending);
        assert_eq!(reader.lines().len(), 1);
    }

    #[test]
    fn decode_classifies_errors_and_outcome() {
        let lines = vec![
            String::new(),
            "error: Command requires a process which is currently stopped.".to_owned(),
            String::new(),
        ];
        let result = decode(lines, &[]);
        assert!(!result.succeeded);
        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(
            result.output,
            "error: Command requires a process which is currently stopped."
        );

        let events = [
            ProcessEvent::Resumed { pid: 1 },
            ProcessEvent::Stopped {
                pid: 1,
                stop: StopInfo {
                    thread_index: Some(1),
                    reason: "step over".to_owned(),
                },
            },
        ];
        let result = decode(vec!["Process 1 resuming".to_owned()], &events);
        assert!(result.succeeded);
        assert!(matches!(result.outcome, Outcome::Stopped(stop) if stop.reason == "step over"));
    }

    #[test]
    fn line_decoder_is_lossy_and_flushes_on_eof() {
        let mut decoder = LineDecoder;
        let mut buf = BytesMut::from(&b"ok\r\nbad \xff byte\npartial"[..]);

        assert_eq!(decoder.decode(&mut buf).expect("decode"), Some("ok".to_owned()));
        assert_eq!(
            decoder.decode(&mut buf).expect("decode"),
            Some("bad \u{fffd} byte".to_owned())
        );
        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
        assert_eq!(
            decoder.decode_eof(&mut buf).expect("decode"),
            Some("partial".to_owned())
        );
        assert_eq!(decoder.decode_eof(&mut buf).expect("decode"), None);
    }
}
