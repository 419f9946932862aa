//! The line protocol spoken over the control channels.
//!
//! ```text
//!   Compile:<script>|Vars:<vars>|IR:<ir>   →  OK: <pid> <script> <vars> <ir>
//!                                          →  ERROR: <message>
//!   Exit:<pid>                             →  (no reply)
//!   Done                                   →  All finished
//! ```
//!
//! Only the first `:` of a field separates its tag, so paths may contain
//! colons. The IR path is the last field and may also contain `|`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::compiler::CompileRequest;

/// Identifier the scheduler hands out for each admitted pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("unknown request: {0}")]
    Unknown(String),
    #[error("malformed Compile request, expected Compile:<script>|Vars:<path>|IR:<path>: {0}")]
    MalformedCompile(String),
    #[error("invalid process id: {0}")]
    BadProcessId(String),
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Compile(CompileRequest),
    Exit(ProcessId),
    Done,
}

impl FromStr for Request {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if line == "Done" {
            return Ok(Request::Done);
        }

        let (tag, rest) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::Unknown(line.to_string()))?;
        match tag {
            "Exit" => rest
                .trim()
                .parse()
                .map(|id| Request::Exit(ProcessId(id)))
                .map_err(|_| ProtocolError::BadProcessId(rest.to_string())),
            "Compile" => parse_compile(line).map(Request::Compile),
            _ => Err(ProtocolError::Unknown(line.to_string())),
        }
    }
}

fn parse_compile(line: &str) -> Result<CompileRequest, ProtocolError> {
    let malformed = || ProtocolError::MalformedCompile(line.to_string());

    let mut fields = line.splitn(3, '|');
    let mut field = |expected: &str| -> Result<PathBuf, ProtocolError> {
        let (tag, value) = fields.next().and_then(|f| f.split_once(':')).ok_or_else(malformed)?;
        if tag != expected || value.is_empty() {
            return Err(malformed());
        }
        Ok(PathBuf::from(value))
    };

    let script = field("Compile")?;
    let vars = field("Vars")?;
    let ir = field("IR")?;
    Ok(CompileRequest { script, vars, ir })
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Compile(req) => write!(
                f,
                "Compile:{}|Vars:{}|IR:{}",
                req.script.display(),
                req.vars.display(),
                req.ir.display()
            ),
            Request::Exit(pid) => write!(f, "Exit:{pid}"),
            Request::Done => write!(f, "Done"),
        }
    }
}

/// A reply to Compile or Done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok {
        pid: ProcessId,
        request: CompileRequest,
    },
    Error(String),
    AllFinished,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok { pid, request } => writeln!(
                f,
                "OK: {pid} {} {} {}",
                request.script.display(),
                request.vars.display(),
                request.ir.display()
            ),
            // Keep the reply on one line.
            Response::Error(message) => writeln!(f, "ERROR: {}", message.replace('\n', " ")),
            Response::AllFinished => write!(f, "All finished"),
        }
    }
}

impl FromStr for Response {
    type Err = ProtocolError;

    /// Parse a reply as a client reads it.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim_end_matches('\n');
        if text == "All finished" {
            return Ok(Response::AllFinished);
        }
        if let Some(message) = text.strip_prefix("ERROR: ") {
            return Ok(Response::Error(message.to_string()));
        }
        let body = text
            .strip_prefix("OK: ")
            .ok_or_else(|| ProtocolError::Unknown(text.to_string()))?;
        let mut words = body.splitn(4, ' ');
        let bad = || ProtocolError::Unknown(text.to_string());
        let pid = words
            .next()
            .and_then(|w| w.parse().ok())
            .map(ProcessId)
            .ok_or_else(bad)?;
        let mut path = || words.next().filter(|w| !w.is_empty()).map(PathBuf::from).ok_or_else(bad);
        let script = path()?;
        let vars = path()?;
        let ir = path()?;
        Ok(Response::Ok {
            pid,
            request: CompileRequest { script, vars, ir },
        })
    }
}
