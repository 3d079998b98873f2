use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::ProbeError;
use crate::header::{Ipv4HeaderFields, SerializeOptions};
use crate::selftest::SelftestReport;

/// Header fields together with the serializer policy they are sent with.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderReport {
    pub header: Ipv4HeaderFields,
    pub options: SerializeOptions,
}

/// Result of loading (and optionally kernel-checking) a filter program.
#[derive(Debug, Clone, Serialize)]
pub struct FilterReport {
    pub path: String,
    pub instructions: usize,
    pub kernel_checked: bool,
}

pub fn write_selftest(
    report: &SelftestReport,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), ProbeError> {
    match format {
        OutputFormat::Json => write_json(report, writer),
        OutputFormat::Pretty => {
            writeln!(writer, "interface      {}", report.interface)?;
            writeln!(writer, "target         {}:{}", report.target, report.port)?;
            writeln!(writer, "filter         {} instructions", report.filter_len)?;
            write_header_lines(&report.header, &report.options, writer)?;
            writeln!(writer, "probe          {} bytes", report.probe_len)?;
            writeln!(
                writer,
                "observed       {}",
                if report.observed { "yes" } else { "no" }
            )?;
            writeln!(writer, "other packets  {}", report.other_packets)?;
            writeln!(writer, "elapsed        {} us", report.elapsed_us)?;
            Ok(())
        }
    }
}

pub fn write_header(
    report: &HeaderReport,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), ProbeError> {
    match format {
        OutputFormat::Json => write_json(report, writer),
        OutputFormat::Pretty => write_header_lines(&report.header, &report.options, writer),
    }
}

pub fn write_filter(
    report: &FilterReport,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), ProbeError> {
    match format {
        OutputFormat::Json => write_json(report, writer),
        OutputFormat::Pretty => {
            writeln!(writer, "program        {}", report.path)?;
            writeln!(writer, "instructions   {}", report.instructions)?;
            writeln!(
                writer,
                "kernel check   {}",
                if report.kernel_checked { "passed" } else { "skipped" }
            )?;
            Ok(())
        }
    }
}

fn write_header_lines(
    header: &Ipv4HeaderFields,
    options: &SerializeOptions,
    writer: &mut impl Write,
) -> Result<(), ProbeError> {
    writeln!(
        writer,
        "header         v{} tos=0x{:02x} proto={} ttl={} {} -> {}",
        header.version, header.tos, header.protocol, header.ttl, header.source, header.destination
    )?;
    writeln!(
        writer,
        "serializer     checksums={} lengths={}",
        options.compute_checksums, options.fix_lengths
    )?;
    Ok(())
}

fn write_json<T: Serialize>(value: &T, writer: &mut impl Write) -> Result<(), ProbeError> {
    serde_json::to_writer_pretty(&mut *writer, value)
        .map_err(|e| ProbeError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::header::{build_ipv4_header, serialization_options};

    fn header_report() -> HeaderReport {
        HeaderReport {
            header: build_ipv4_header(
                0x10,
                20,
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
            ),
            options: serialization_options(),
        }
    }

    #[test]
    fn ut_header_pretty() {
        let mut buf = Vec::new();
        write_header(&header_report(), OutputFormat::Pretty, &mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("v4 tos=0x10 proto=TCP ttl=64 10.0.0.1 -> 10.0.0.2"));
        assert!(out.contains("checksums=true lengths=true"));
    }

    #[test]
    fn ut_header_json() {
        let mut buf = Vec::new();
        write_header(&header_report(), OutputFormat::Json, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["header"]["version"], 4);
        assert_eq!(v["header"]["destination"], "10.0.0.2");
        assert_eq!(v["options"]["compute_checksums"], true);
        assert_eq!(v["options"]["fix_lengths"], true);
    }

    #[test]
    fn ut_selftest_pretty_reports_observation() {
        let h = header_report();
        let report = SelftestReport {
            interface: "lo".to_string(),
            target: Ipv4Addr::LOCALHOST,
            port: 33434,
            filter_len: 9,
            header: h.header,
            options: h.options,
            probe_len: 40,
            observed: false,
            other_packets: 2,
            elapsed_us: 1000,
        };
        let mut buf = Vec::new();
        write_selftest(&report, OutputFormat::Pretty, &mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("observed       no"));
        assert!(out.contains("127.0.0.1:33434"));
    }

    #[test]
    fn ut_filter_json() {
        let report = FilterReport {
            path: "ip.bpf".to_string(),
            instructions: 4,
            kernel_checked: false,
        };
        let mut buf = Vec::new();
        write_filter(&report, OutputFormat::Json, &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["instructions"], 4);
        assert_eq!(v["kernel_checked"], false);
    }
}
