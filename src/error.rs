use std::fmt;

#[derive(Debug)]
pub enum SmaError {
    Timeout,
    Disconnected,
    Io(std::io::Error),
    Checkbit { expected: u8, actual: u8 },
    SelfEcho,
    InvalidFrame(String),
    RetriesExhausted { operation: &'static str, attempts: u32 },
    RecordOverflow(usize),
    ShortFrame { needed: usize, got: usize },
    NoDataAvailable,
    AuthenticationFailed,
    CommandNotFound(String),
    Script { line: usize, message: String },
    KeyTable { line: usize, message: String },
    InvalidAddress(String),
    InvalidDate(String),
    Labels(String),
    Output(String),
}

impl fmt::Display for SmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmaError::Timeout => write!(f, "Timed out waiting for data"),
            SmaError::Disconnected => write!(f, "Connection closed by peer"),
            SmaError::Io(e) => write!(f, "IO error: {}", e),
            SmaError::Checkbit { expected, actual } => write!(
                f,
                "Header checkbit mismatch (expected {:02x}, got {:02x})",
                expected, actual
            ),
            SmaError::SelfEcho => write!(f, "Received our own frame back"),
            SmaError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            SmaError::RetriesExhausted {
                operation,
                attempts,
            } => write!(f, "{} failed after {} attempts", operation, attempts),
            SmaError::RecordOverflow(limit) => {
                write!(f, "Record exceeds {} bytes, stream is malformed", limit)
            }
            SmaError::ShortFrame { needed, got } => write!(
                f,
                "Frame too short: needed {} bytes, got {}",
                needed, got
            ),
            SmaError::NoDataAvailable => write!(f, "Inverter reports no data available"),
            SmaError::AuthenticationFailed => {
                write!(f, "Authentication failed, check password")
            }
            SmaError::CommandNotFound(name) => write!(f, "Command '{}' not found in script", name),
            SmaError::Script { line, message } => write!(f, "Script line {}: {}", line, message),
            SmaError::KeyTable { line, message } => {
                write!(f, "Key table line {}: {}", line, message)
            }
            SmaError::InvalidAddress(addr) => write!(f, "Invalid Bluetooth address: {}", addr),
            SmaError::InvalidDate(date) => write!(f, "Invalid date: {}", date),
            SmaError::Labels(msg) => write!(f, "Label lookup: {}", msg),
            SmaError::Output(msg) => write!(f, "Output encoding: {}", msg),
        }
    }
}

impl SmaError {
    /// Transport and frame integrity faults. These are retried by the
    /// interpreter; everything else unwinds the current command.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            SmaError::Timeout
                | SmaError::Disconnected
                | SmaError::Io(_)
                | SmaError::Checkbit { .. }
                | SmaError::SelfEcho
                | SmaError::InvalidFrame(_)
        )
    }
}

impl std::error::Error for SmaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SmaError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SmaError {
    fn from(err: std::io::Error) -> SmaError {
        SmaError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, SmaError>;
