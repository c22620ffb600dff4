pub mod any_transport;
pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod keys;
pub mod labels;
pub mod link;
pub mod output;
pub mod record;
pub mod script;
pub mod serial;
pub mod session;
pub mod sink;
pub mod transport;

pub use any_transport::AnyTransport;
pub use config::{Config, DateRange};
pub use error::{Result, SmaError};
pub use interpreter::{DEFAULT_COMMANDS, Interpreter, Phase};
pub use keys::{KeyEntry, KeyTable, Precision, Tag};
pub use labels::{LabelLookup, LabelMap, NoLabels};
pub use link::{Link, ReceivedFrame};
pub use output::{ArchiveDataEntry, LiveDataEntry, Readings};
pub use record::{Record, RecordReader};
pub use script::{Placeholder, Script};
pub use serial::SerialTransport;
pub use session::{BtAddress, Session};
pub use sink::{ConsoleSink, JsonSink, LineProtocolSink, OutputSink};
pub use transport::{StreamTransport, TcpTransport, Transport};
