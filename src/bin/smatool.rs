#[path = "../bin_common.rs"]
mod common;

use clap::{Parser, Subcommand, ValueEnum};
use common::{parse_bt_address, parse_date_arg, parse_offset, print_session};
use sma_rs::serial::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE};
use sma_rs::{
    AnyTransport, BtAddress, Config, ConsoleSink, DEFAULT_COMMANDS, DateRange, Interpreter,
    JsonSink, KeyTable, LabelMap, LineProtocolSink, OutputSink, Script, SerialTransport,
    TcpTransport,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smatool")]
#[command(about = "Read live and archive data from SMA inverters over Bluetooth")]
struct Args {
    #[command(subcommand)]
    transport: TransportCmd,

    /// Inverter Bluetooth address (e.g. 00:80:25:1D:AC:53)
    #[arg(short, long, value_parser = parse_bt_address)]
    address: BtAddress,

    /// Inverter user password
    #[arg(long, default_value = sma_rs::config::DEFAULT_PASSWORD)]
    password: String,

    /// Command script
    #[arg(short, long, default_value = "/etc/sma.in")]
    script: PathBuf,

    /// Key table (defaults to the command script)
    #[arg(short, long)]
    keys: Option<PathBuf>,

    /// JSON map of status label indices to text
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Inverter name to report before the type label has been read
    #[arg(long)]
    inverter: Option<String>,

    /// Read timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Start of archive range, "YYYY-MM-DD HH:MM:SS" UTC
    #[arg(long, value_parser = parse_date_arg, requires = "to")]
    from: Option<chrono::DateTime<chrono::Utc>>,

    /// End of archive range, "YYYY-MM-DD HH:MM:SS" UTC
    #[arg(long, value_parser = parse_date_arg, requires = "from")]
    to: Option<chrono::DateTime<chrono::Utc>>,

    /// Seconds east of UTC to report to the inverter (host offset if unset)
    #[arg(long, value_parser = parse_offset, allow_hyphen_values = true)]
    utc_offset: Option<i32>,

    /// Report the host offset as is during daylight saving time
    #[arg(long)]
    keep_dst: bool,

    /// Commands to run, in order
    #[arg(short, long, value_delimiter = ',')]
    commands: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Console)]
    format: Format,
}

#[derive(Subcommand)]
enum TransportCmd {
    /// Connect via an RFCOMM tty
    Serial {
        /// Serial port path
        #[arg(short, long, default_value = DEFAULT_DEVICE)]
        port: String,

        /// Baud rate
        #[arg(short = 'r', long, default_value_t = DEFAULT_BAUD_RATE)]
        baud_rate: u32,
    },
    /// Connect via a TCP bridge to the inverter's RFCOMM channel
    Tcp {
        /// host:port of the bridge
        #[arg(long)]
        addr: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Console,
    LineProtocol,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();

    let script = Script::load(&args.script)?;
    let keys = KeyTable::load(args.keys.as_ref().unwrap_or(&args.script))?;
    tracing::info!(
        "Loaded {} commands and {} keys",
        script.blocks().len(),
        keys.len()
    );

    let date_range = match (args.from, args.to) {
        (Some(from), Some(to)) => DateRange { from, to },
        _ => DateRange::since_2000(chrono::Utc::now()),
    };
    let config = Config {
        address: args.address,
        password: args.password,
        read_timeout: Duration::from_secs(args.timeout.max(1)),
        date_range: Some(date_range),
        utc_offset: args.utc_offset,
        dst_adjust: !args.keep_dst,
        ..Config::default()
    };

    let transport: AnyTransport = match args.transport {
        TransportCmd::Serial { port, baud_rate } => {
            tracing::info!("Opening {} at {} baud...", port, baud_rate);
            SerialTransport::new(&port, baud_rate).await?.into()
        }
        TransportCmd::Tcp { addr } => {
            tracing::info!("Connecting to {}...", addr);
            TcpTransport::connect(&addr).await?.into()
        }
    };
    tracing::info!("Connected via {}", transport.kind());

    let mut interpreter = Interpreter::new(transport, script, keys, config);
    if let Some(path) = &args.labels {
        interpreter = interpreter.with_labels(LabelMap::load(path)?);
    }
    if let Some(name) = args.inverter {
        interpreter.session_mut().inverter_name = Some(name);
    }

    let commands: Vec<&str> = if args.commands.is_empty() {
        DEFAULT_COMMANDS.to_vec()
    } else {
        args.commands.iter().map(String::as_str).collect()
    };
    let result = interpreter.run_commands(&commands).await;

    let readings = interpreter.take_readings();
    let stdout = std::io::stdout();
    let mut sink: Box<dyn OutputSink> = match args.format {
        Format::Console => {
            print_session(interpreter.session());
            Box::new(ConsoleSink::new(stdout))
        }
        Format::LineProtocol => Box::new(LineProtocolSink::new(stdout)),
        Format::Json => Box::new(JsonSink::new(stdout)),
    };
    sink.write(&readings)?;

    result?;
    Ok(())
}
