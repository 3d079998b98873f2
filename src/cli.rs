use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "probesock",
    version,
    about = "Raw probe socket setup: device binding, socket filters, IPv4 headers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bind and filter a raw socket, then loop one TCP probe through it
    Selftest(SelftestArgs),
    /// Print the IPv4 header fields and serializer options of a probe
    Header(HeaderArgs),
    /// Load a `tcpdump -ddd` program and check it fits the kernel descriptor
    Filter(FilterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SelftestArgs {
    /// Network interface to bind the receiving socket to
    #[arg(long, default_value = "lo")]
    pub interface: String,

    /// Source address stamped on the probe
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    pub source: Ipv4Addr,

    /// Destination address of the probe
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    pub target: Ipv4Addr,

    /// Destination TCP port of the probe
    #[arg(long, default_value_t = 33434)]
    pub port: u16,

    /// Type-of-service byte (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0", value_parser = parse_tos)]
    pub tos: u8,

    /// How long to wait for the probe, in milliseconds [default: 1000]
    #[arg(long, default_value_t = 1000, value_parser = validate_timeout_ms)]
    pub timeout_ms: u64,

    /// Attach this `tcpdump -ddd` program instead of the built-in port filter
    #[arg(long)]
    pub filter_file: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "pretty")]
    pub format: OutputFormat,
}

impl SelftestArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct HeaderArgs {
    /// Type-of-service byte (decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0", value_parser = parse_tos)]
    pub tos: u8,

    /// Source address
    #[arg(long)]
    pub source: Ipv4Addr,

    /// Destination address
    #[arg(long)]
    pub destination: Ipv4Addr,

    /// Output format
    #[arg(long, default_value = "pretty")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// File holding `tcpdump -ddd` output
    pub path: PathBuf,

    /// Also attach the program to a throwaway UDP socket so the kernel verifies it
    #[arg(long)]
    pub kernel_check: bool,

    /// Output format
    #[arg(long, default_value = "pretty")]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_tos(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("'{s}' is not a valid TOS byte (0-255)"))
}

fn validate_timeout_ms(s: &str) -> Result<u64, String> {
    let val: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val < 10 {
        Err("timeout-ms must be at least 10".to_string())
    } else if val > 30_000 {
        Err("timeout-ms must be at most 30000".to_string())
    } else {
        Ok(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ut_tos_decimal_and_hex() {
        assert_eq!(parse_tos("0"), Ok(0));
        assert_eq!(parse_tos("184"), Ok(184));
        assert_eq!(parse_tos("0xb8"), Ok(0xb8));
        assert_eq!(parse_tos("0XFF"), Ok(0xff));
        assert!(parse_tos("256").is_err());
        assert!(parse_tos("0x100").is_err());
        assert!(parse_tos("abc").is_err());
    }

    #[test]
    fn ut_timeout_bounds() {
        assert!(validate_timeout_ms("9").is_err());
        assert_eq!(validate_timeout_ms("10"), Ok(10));
        assert_eq!(validate_timeout_ms("30000"), Ok(30_000));
        assert!(validate_timeout_ms("30001").is_err());
        assert!(validate_timeout_ms("x").is_err());
    }

    #[test]
    fn ut_selftest_defaults() {
        let cli = Cli::try_parse_from(["probesock", "selftest"]).unwrap();
        let Command::Selftest(args) = cli.command else {
            panic!("expected selftest");
        };
        assert_eq!(args.interface, "lo");
        assert_eq!(args.target, Ipv4Addr::LOCALHOST);
        assert_eq!(args.port, 33434);
        assert_eq!(args.timeout(), Duration::from_secs(1));
        assert_eq!(args.format, OutputFormat::Pretty);
        assert!(args.filter_file.is_none());
    }

    #[test]
    fn ut_header_requires_addresses() {
        assert!(Cli::try_parse_from(["probesock", "header", "--source", "10.0.0.1"]).is_err());
        let cli = Cli::try_parse_from([
            "probesock",
            "header",
            "--source",
            "10.0.0.1",
            "--destination",
            "10.0.0.2",
            "--tos",
            "0x10",
            "--format",
            "json",
        ])
        .unwrap();
        let Command::Header(args) = cli.command else {
            panic!("expected header");
        };
        assert_eq!(args.tos, 0x10);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn ut_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
