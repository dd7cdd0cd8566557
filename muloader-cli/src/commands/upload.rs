//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use log::debug;
use muloader::{BAUD_RATE, BlockSource, LinkConfig, SerialLink, UploadReport, UploadSession};
use std::path::Path;

use crate::config::Config;
use crate::operator::ConsoleOperator;
use crate::{Cli, get_port, use_fancy_output};

/// Upload a payload file to tags.
pub(crate) fn cmd_upload(cli: &Cli, config: &mut Config, file: &Path, json: bool) -> Result<()> {
    // Validate the payload before any port is touched
    let source = BlockSource::open(file)
        .with_context(|| format!("Failed to load payload {}", file.display()))?;
    let session_config = config.session_config(cli.strict)?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({} bytes, {} blocks of {} bytes)",
            style("📦").cyan(),
            file.display(),
            source.original_size(),
            source.block_count(),
            muloader::BLOCK_SIZE
        );
    }

    let port = get_port(cli, config)?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(BAUD_RATE);
    if !cli.quiet {
        eprintln!("{} Using {port} at {baud} baud", style("🔌").cyan());
    }

    let link = SerialLink::open(&LinkConfig::new(&port).with_baud_rate(baud))
        .with_context(|| format!("Failed to open {port}"))?;

    if !cli.quiet {
        eprintln!("{} Waiting for the device...", style("⏳").yellow());
    }

    let total = source.total_padded_size();
    let operator = ConsoleOperator::new(total, !cli.non_interactive, cli.quiet, use_fancy_output());
    let mut session = UploadSession::new(link, source, operator, session_config);
    let result = session.run();
    session.operator().finish();
    let report = result?;

    debug!("Upload report: {report:?}");
    print_report(cli, &report, json)
}

fn print_report(cli: &Cli, report: &UploadReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.is_complete() {
        if !cli.quiet {
            eprintln!(
                "\n{} Uploaded {} bytes to {} tag(s)",
                style("🎉").green().bold(),
                report.bytes_written,
                report.tags_programmed
            );
        }
    } else {
        eprintln!(
            "\n{} Upload finished incomplete: {} of {} bytes{}",
            style("⚠").yellow().bold(),
            report.bytes_written,
            report.expected_bytes,
            if report.all_done { "" } else { ", no ALL_DONE from device" }
        );
    }

    if !cli.quiet && (report.block_retries > 0 || report.anomalies > 0) {
        eprintln!(
            "  {} {} block resend(s), {} protocol anomaly(ies)",
            style("•").dim(),
            report.block_retries,
            report.anomalies
        );
    }

    Ok(())
}
