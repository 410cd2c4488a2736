//! The rmate wire protocol (C1): a line-oriented command parser and a pair
//! of frame serializers. See spec.md §4.1.
//!
//! ```text
//! <command-name>\n
//! <key>: <value>\n
//! ...
//! data: <N>\n            <- if present, MUST be the last key
//! <N bytes of payload>\n
//! .\n                     <- terminates the command stream
//! ```

use std::io::{BufRead, Write};

pub use crate::error::ProtocolError;

/// One `open` command parsed from the wire, owned by the session for the
/// lifetime of the file it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// `"host:..."` or an arbitrary client-chosen label.
    pub display_name: String,
    /// Absolute remote path; used to derive the mirror path.
    pub real_path: String,
    /// Opaque token correlating later `save`/`close` frames.
    pub token: String,
    /// Whether the client wants change notifications.
    pub data_on_save: bool,
    /// Forwarded verbatim, never interpreted by the core (spec.md §9 OQ2).
    pub re_activate: bool,
    /// Optional cursor/selection range, forwarded but not interpreted.
    pub selection: Option<String>,
    /// Optional file-type hint, forwarded but not interpreted.
    pub file_type: Option<String>,
    /// Optional initial file contents.
    pub data: Option<Vec<u8>>,
}

/// Read every command from `reader` up to the `.` terminator or EOF,
/// returning the `open` requests in wire order. Unknown command names are
/// logged and skipped.
///
/// This collects the whole stream before returning, which is convenient for
/// tests and offline parsing; the session orchestrator instead drives
/// [`read_command`] one command at a time so it can act on each `open` as
/// soon as it arrives rather than waiting for the `.` terminator.
pub fn parse_commands<R: BufRead>(reader: &mut R) -> Result<Vec<OpenRequest>, ProtocolError> {
    let mut requests = Vec::new();
    while let Some(Command::Open(request)) = read_command(reader)? {
        requests.push(request);
    }
    Ok(requests)
}

/// One command read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A client `open` request.
    Open(OpenRequest),
}

/// Read a single command from `reader`, skipping over unknown command
/// names and blank lines. Returns `Ok(None)` once the `.` terminator or EOF
/// is reached.
pub fn read_command<R: BufRead>(reader: &mut R) -> Result<Option<Command>, ProtocolError> {
    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if line.is_empty() {
            continue;
        }
        if line == "." {
            return Ok(None);
        }

        match line.as_str() {
            "open" => return Ok(Some(Command::Open(parse_open(reader)?))),
            other => {
                tracing::warn!(command = other, "skipping unknown command");
                skip_header_block(reader)?;
            }
        }
    }
}

fn parse_open<R: BufRead>(reader: &mut R) -> Result<OpenRequest, ProtocolError> {
    let mut display_name = None;
    let mut real_path = None;
    let mut token = None;
    let mut data_on_save = false;
    let mut re_activate = false;
    let mut selection = None;
    let mut file_type = None;
    let mut data = None;

    loop {
        let line = read_line(reader)?.ok_or(ProtocolError::TruncatedStream)?;
        if line.is_empty() {
            break;
        }

        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };

        match key {
            "display-name" => display_name = Some(value.to_string()),
            "real-path" => real_path = Some(value.to_string()),
            "token" => token = Some(value.to_string()),
            "data-on-save" => data_on_save = value == "yes",
            "re-activate" => re_activate = value == "yes",
            "selection" => selection = Some(value.to_string()),
            "file-type" => file_type = Some(value.to_string()),
            "data" => {
                let n: u64 = value
                    .parse()
                    .map_err(|_| ProtocolError::MalformedNumber(value.to_string()))?;
                data = Some(read_payload(reader, n)?);
                break;
            }
            _ => {}
        }
    }

    Ok(OpenRequest {
        display_name: display_name.ok_or(ProtocolError::MalformedCommand("display-name"))?,
        real_path: real_path.ok_or(ProtocolError::MalformedCommand("real-path"))?,
        token: token.ok_or(ProtocolError::MalformedCommand("token"))?,
        data_on_save,
        re_activate,
        selection,
        file_type,
        data,
    })
}

fn read_payload<R: BufRead>(reader: &mut R, n: u64) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; n as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|_| ProtocolError::ShortPayload { expected: n })?;

    // Trailing newline after the payload.
    let mut terminator = [0u8; 1];
    reader
        .read_exact(&mut terminator)
        .map_err(|_| ProtocolError::ShortPayload { expected: n })?;

    Ok(buf)
}

/// Consume an unrecognized command's header block without interpreting it.
fn skip_header_block<R: BufRead>(reader: &mut R) -> Result<(), ProtocolError> {
    loop {
        match read_line(reader)? {
            None => break,
            Some(line) if line.is_empty() => break,
            Some(_) => continue,
        }
    }
    Ok(())
}

/// Read one `\n`-delimited line, stripping the trailing newline and any
/// trailing carriage returns. Returns `None` on a clean EOF with no data.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

/// Serialize a `save` frame: `save\ntoken: <token>\ndata: <len>\n<bytes>\n`.
pub fn write_save<W: Write>(w: &mut W, token: &str, bytes: &[u8]) -> std::io::Result<()> {
    write!(w, "save\ntoken: {token}\ndata: {}\n", bytes.len())?;
    w.write_all(bytes)?;
    w.write_all(b"\n")
}

/// Serialize a `close` frame: `close\ntoken: <token>\n\n`.
pub fn write_close<W: Write>(w: &mut W, token: &str) -> std::io::Result<()> {
    write!(w, "close\ntoken: {token}\n\n")
}
