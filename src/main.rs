use std::io;
use std::net::UdpSocket;

use clap::Parser;

use probesock::cli::{Cli, Command, FilterArgs, HeaderArgs, SelftestArgs};
use probesock::error::ProbeError;
use probesock::filter::FilterProgram;
use probesock::header::{build_ipv4_header, serialization_options};
use probesock::output::{self, FilterReport, HeaderReport};
use probesock::packet::TCP_HLEN;
use probesock::selftest::{self, SelftestConfig};
use probesock::socket::attach_filter;

/// Setup failed: bad arguments, bind, attach, or socket errors.
const EXIT_FAILURE: i32 = 1;
/// Probe was sent but never seen on the filtered socket.
const EXIT_NOT_OBSERVED: i32 = 2;
/// The requested operation has no backend on this platform.
const EXIT_UNSUPPORTED: i32 = 3;

fn exit_code(err: &ProbeError) -> i32 {
    match err {
        ProbeError::UnsupportedPlatform { .. } => EXIT_UNSUPPORTED,
        _ => EXIT_FAILURE,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(code) = e.os_code() {
                eprintln!("os error code: {code}");
            }
            std::process::exit(exit_code(&e));
        }
    }
}

fn run(cli: Cli) -> Result<i32, ProbeError> {
    match cli.command {
        Command::Selftest(args) => run_selftest(&args),
        Command::Header(args) => run_header(&args),
        Command::Filter(args) => run_filter(&args),
    }
}

fn run_selftest(args: &SelftestArgs) -> Result<i32, ProbeError> {
    let filter = match &args.filter_file {
        Some(path) => Some(FilterProgram::parse_ddd(&std::fs::read_to_string(path)?)?),
        None => None,
    };

    let config = SelftestConfig {
        interface: args.interface.clone(),
        source: args.source,
        target: args.target,
        port: args.port,
        tos: args.tos,
        timeout: args.timeout(),
        filter,
    };
    log::info!(
        "self-test on {} -> {}:{}",
        config.interface,
        config.target,
        config.port
    );

    let report = selftest::run(&config)?;
    output::write_selftest(&report, args.format, &mut io::stdout().lock())?;

    if report.observed {
        Ok(0)
    } else {
        log::warn!("probe not observed within {} ms", args.timeout_ms);
        Ok(EXIT_NOT_OBSERVED)
    }
}

fn run_header(args: &HeaderArgs) -> Result<i32, ProbeError> {
    let report = HeaderReport {
        header: build_ipv4_header(args.tos, TCP_HLEN as u16, args.source, args.destination),
        options: serialization_options(),
    };
    output::write_header(&report, args.format, &mut io::stdout().lock())?;
    Ok(0)
}

fn run_filter(args: &FilterArgs) -> Result<i32, ProbeError> {
    let program = FilterProgram::parse_ddd(&std::fs::read_to_string(&args.path)?)?;
    program.descriptor()?;

    if args.kernel_check {
        let sock = UdpSocket::bind("127.0.0.1:0")?;
        attach_filter(&sock, &program)?;
        log::info!("kernel accepted {}-instruction program", program.len());
    }

    let report = FilterReport {
        path: args.path.display().to_string(),
        instructions: program.len(),
        kernel_checked: args.kernel_check,
    };
    output::write_filter(&report, args.format, &mut io::stdout().lock())?;
    Ok(0)
}
