use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use colored::*;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL};
use dir2txt_core::{AppError, BlockStats, Document, RenderOutcome};
use log;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tiktoken_rs::cl100k_base;

/// Writes the document to `path`, or to stdout when `path` is `None`.
pub fn write_document(text: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => write_to_file(path, text)?,
        None => write_to_stdout(text)?,
    }
    Ok(())
}

/// Confirmation line, tree and totals. Goes to stderr when the document
/// itself went to stdout.
pub fn print_summary(doc: &Document, path: Option<&Path>) -> Result<()> {
    let mut out: Box<dyn Write> = match path {
        Some(_) => Box::new(io::stdout().lock()),
        None => Box::new(io::stderr().lock()),
    };

    match path {
        Some(path) => writeln!(
            out,
            "{} Document written to: {}",
            "✅".green(),
            path.display().to_string().blue()
        )?,
        None => writeln!(out, "{} Document written to standard output", "✅".green())?,
    }
    writeln!(out)?;
    write!(out, "{}", doc.tree_text)?;
    writeln!(out)?;

    let skipped = doc
        .blocks
        .iter()
        .filter(|b| b.outcome != RenderOutcome::Full)
        .count();
    writeln!(
        out,
        "{:<20} {}",
        "Tree:".green(),
        doc.summary.to_string().cyan()
    )?;
    writeln!(
        out,
        "{:<20} {}",
        "Files rendered:".green(),
        format!("{} ({} not in full)", doc.blocks.len(), skipped).cyan()
    )?;
    writeln!(
        out,
        "{:<20} {}",
        "Output size:".green(),
        readable_size(doc.text.len() as u64).cyan()
    )?;
    match estimate_tokens(&doc.text) {
        Some(tokens) => writeln!(out, "{:<20} {}", "Est. tokens:".green(), tokens.to_string().cyan())?,
        None => writeln!(out, "{:<20} {}", "Est. tokens:".green(), "unavailable".yellow())?,
    }
    out.flush().context("Failed to flush run summary")?;
    Ok(())
}

pub fn print_stats_table(blocks: &[BlockStats]) {
    if blocks.is_empty() {
        eprintln!("\n{}", "(No files selected)".yellow());
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Path").fg(Color::Green),
        Cell::new("Outcome").fg(Color::Green),
        Cell::new("Lines").fg(Color::Green),
        Cell::new("Size").fg(Color::Green),
    ]);
    for block in blocks {
        let lines = match block.total_lines {
            Some(total) if total != block.lines_shown => format!("{}/{}", block.lines_shown, total),
            Some(total) => total.to_string(),
            None => "-".to_string(),
        };
        let size = block.size.map(readable_size).unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&block.path).fg(Color::Cyan),
            Cell::new(block.outcome).fg(outcome_color(block.outcome)),
            Cell::new(lines).set_alignment(CellAlignment::Right),
            Cell::new(size)
                .set_alignment(CellAlignment::Right)
                .fg(Color::DarkGrey),
        ]);
    }
    eprintln!("\n{table}");
}

fn outcome_color(outcome: RenderOutcome) -> Color {
    match outcome {
        RenderOutcome::Full => Color::Reset,
        RenderOutcome::Truncated | RenderOutcome::Skipped => Color::Yellow,
        RenderOutcome::Binary | RenderOutcome::ArchiveSkipped => Color::DarkGrey,
        RenderOutcome::ReadError | RenderOutcome::ArchiveError => Color::Red,
    }
}

fn estimate_tokens(text: &str) -> Option<usize> {
    match cl100k_base() {
        Ok(bpe) => Some(bpe.encode_ordinary(text).len()),
        Err(e) => {
            log::warn!("Token estimate unavailable: {}", e);
            None
        }
    }
}

fn readable_size(bytes: u64) -> String {
    Byte::from_u64(bytes)
        .get_appropriate_unit(UnitType::Binary)
        .to_string()
}

fn write_to_file(path: &Path, content: &str) -> Result<()> {
    let write_err = |source| AppError::FileWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(write_err)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut file = File::create(path)
        .map_err(write_err)
        .with_context(|| format!("Failed to create file {}", path.display()))?;
    file.write_all(content.as_bytes())
        .map_err(write_err)
        .with_context(|| format!("Failed to write to file {}", path.display()))?;
    log::debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

fn write_to_stdout(content: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(content.as_bytes())
        .map_err(AppError::Io)
        .context("Failed to write to stdout")?;
    handle
        .flush()
        .map_err(AppError::Io)
        .context("Failed to flush stdout")?;
    Ok(())
}
