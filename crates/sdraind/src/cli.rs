use std::fmt::Display;
use std::time::Duration;

use clap::{error::ErrorKind, Args as ClapArgs, CommandFactory, Parser, Subcommand};

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(name = "sdraind")]
#[command(version)]
#[command(about = "SDRainer - combine a pasta strainer with an SDR...")]
#[command(max_term_width = 100)]
pub struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable the scope sink for insights into the inner workings
    #[arg(long, global = true, hide = true)]
    pub scope: bool,

    /// Destination address of the scope sink
    #[arg(long = "scope-address", global = true, default_value = ":35369")]
    #[arg(hide = true)]
    pub scope_address: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Detect and decode calling CW signals from an IQ stream
    Strain {
        #[command(flatten)]
        strain: StrainArgs,

        #[command(subcommand)]
        transport: StrainTransport,
    },

    /// Decode a CW signal at the current VFO frequency
    Decode {
        /// The debounce threshold for the CW signal detection
        #[arg(long, default_value_t = 1, global = true)]
        debounce: usize,

        #[command(subcommand)]
        transport: DecodeTransport,
    },
}

#[derive(ClapArgs, Clone, Debug)]
pub struct StrainArgs {
    /// The threshold in dB over noise that a signal must exceed to be
    /// detected
    #[arg(long, default_value_t = 15.0, global = true)]
    pub threshold: f32,

    /// The debounce threshold for the CW signal detection
    #[arg(long, default_value_t = 1, global = true)]
    pub debounce: usize,

    /// The time of silence until the next random peak is selected
    #[arg(long, default_value = "10s", value_parser = parse_duration, global = true)]
    pub silence: Duration,

    /// The time of decoding a busy signal until the next random peak is
    /// selected
    #[arg(long, default_value = "1m", value_parser = parse_duration, global = true)]
    pub busy: Duration,

    /// The port of the telnet cluster interface
    #[arg(long = "telnet_port", default_value_t = 7373, global = true)]
    pub telnet_port: u16,

    /// The reporter callsign of the cluster spots
    #[arg(long = "telnet_call", default_value = "local-#", global = true)]
    pub telnet_call: String,

    /// The time period after an active callsign is spotted again
    #[arg(long = "spot_every", default_value = "1m", value_parser = parse_duration, global = true)]
    pub spot_every: Duration,
}

#[derive(Subcommand, Clone, Debug)]
pub enum StrainTransport {
    /// Use a TCI IQ stream
    Tci {
        /// The TCI host and port
        #[arg(long, default_value = "localhost:40001")]
        host: String,

        /// The zero-based index of the TCI trx
        #[arg(long, default_value_t = 0)]
        trx: u32,
    },

    /// EXPERIMENTAL: use a KiwiSDR IQ stream
    Kiwi {
        /// The KiwiSDR host and port
        #[arg(long, default_value = "localhost:8073")]
        host: String,

        /// The KiwiSDR username
        #[arg(long, default_value = "")]
        username: String,

        /// The KiwiSDR password
        #[arg(long, default_value = "")]
        password: String,

        /// The center frequency in Hz
        #[arg(long, default_value_t = 7_020_000.0)]
        center: f64,

        /// The rx frequency in Hz
        #[arg(long, default_value_t = 0.0)]
        rx: f64,

        /// The bandwidth that is observed to find CW signals (max 12000)
        #[arg(long, default_value_t = 10_000)]
        bandwidth: usize,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum DecodeTransport {
    /// Decode at the VFO A frequency of a TCI trx
    Tci {
        /// The TCI host and port
        #[arg(long, default_value = "localhost:40001")]
        host: String,

        /// The zero-based index of the TCI trx
        #[arg(long, default_value_t = 0)]
        trx: u32,
    },

    /// Decode a single tone from the default audio input
    Pulse {
        /// The pitch frequency of the CW signal in Hz
        #[arg(long, default_value_t = 700.0)]
        pitch: f64,
    },
}

/// Parse durations like `10s`, `1m`, `2h`, or plain seconds
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let (value, unit) = match text.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => text.split_at(split),
        None => (text, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", text))?;
    let seconds = match unit.trim() {
        "s" => value,
        "m" => value * 60,
        "h" => value * 60 * 60,
        _ => return Err(format!("invalid duration unit: {:?}", unit)),
    };
    Ok(Duration::from_secs(seconds))
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    /// Create new error with a custom exit code
    pub fn new(error: anyhow::Error, code: i32) -> CliError {
        CliError {
            error,
            exit_code: code,
        }
    }

    /// Print this error to the terminal
    ///
    /// Errors from clap are printed verbatim. Other types of errors
    /// are printed indirectly via clap's fancy formatter.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print()
        }
    }

    /// Print this error to the terminal and exit
    pub fn exit(&self) -> ! {
        drop(self.print());
        std::process::exit(self.exit_code);
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> CliError {
        CliError::new(err, 1)
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        let code = if err.use_stderr() { 1 } else { 0 };
        CliError::new(err.into(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("42").unwrap(), Duration::from_secs(42));
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_strain_kiwi_args() {
        let args = Args::try_parse_from([
            "sdraind",
            "strain",
            "--threshold",
            "12",
            "--spot_every",
            "2m",
            "kiwi",
            "--host",
            "kiwi.example.org:8073",
            "--center",
            "7020000",
        ])
        .unwrap();

        let Command::Strain { strain, transport } = args.command else {
            panic!("expected strain command");
        };
        assert_eq!(strain.threshold, 12.0);
        assert_eq!(strain.spot_every, Duration::from_secs(120));
        let StrainTransport::Kiwi { host, center, .. } = transport else {
            panic!("expected kiwi transport");
        };
        assert_eq!(host, "kiwi.example.org:8073");
        assert_eq!(center, 7_020_000.0);
    }

    #[test]
    fn test_decode_pulse_args() {
        let args =
            Args::try_parse_from(["sdraind", "decode", "--debounce", "3", "pulse"]).unwrap();

        let Command::Decode { debounce, transport } = args.command else {
            panic!("expected decode command");
        };
        assert_eq!(debounce, 3);
        assert!(matches!(transport, DecodeTransport::Pulse { .. }));
    }
}
