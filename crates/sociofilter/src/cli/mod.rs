//! Command-line interface for sociofilter.
//!
//! This module provides the CLI structure and the page-file reader for the
//! `sofi` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::content::ImageUnit;
use crate::error::{Error, Result};
use crate::page::MemoryPage;

pub use commands::{
    CheckCommand, ClearCommand, ConfigCommand, ContentTypeArg, HistoryCommand, RecoverCommand,
    ScanCommand, SetArgs, StatsCommand,
};

/// Line prefix marking an image node in a page file.
const IMAGE_DIRECTIVE: &str = "@image";

/// sofi - Filter explicit content out of pages, and put it back on request
///
/// Masks denylisted words, asks a remote classifier about the rest, and keeps
/// a per-domain history so every redaction can be recovered.
#[derive(Debug, Parser)]
#[command(name = "sofi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Filter a page file and print the result
    Scan(ScanCommand),

    /// Evaluate a single piece of text
    Check(CheckCommand),

    /// Show redaction history
    History(HistoryCommand),

    /// Recover redacted content
    Recover(RecoverCommand),

    /// Drop a domain's redaction history
    Clear(ClearCommand),

    /// Show or reset filtering statistics
    Stats(StatsCommand),

    /// Probe the classifier endpoint
    Health,

    /// View or modify configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}

/// Build a page from a page file.
///
/// Every non-blank line is a text node, except lines of the form
/// `@image <url> <W>x<H>`, which are image nodes.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] for an image line that cannot be parsed.
pub fn parse_page(domain: &str, body: &str) -> Result<MemoryPage> {
    let page = MemoryPage::new(domain);
    for (number, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.trim_start().strip_prefix(IMAGE_DIRECTIVE) {
            Some(rest) => {
                let image = parse_image(rest).ok_or_else(|| {
                    Error::malformed(format!(
                        "line {}: expected `{IMAGE_DIRECTIVE} <url> <W>x<H>`",
                        number + 1
                    ))
                })?;
                page.add_image(image);
            }
            None => {
                page.add_text(line);
            }
        }
    }
    Ok(page)
}

fn parse_image(rest: &str) -> Option<ImageUnit> {
    let mut parts = rest.split_whitespace();
    let source = parts.next()?;
    let (width, height) = parts.next()?.split_once(['x', 'X'])?;
    if parts.next().is_some() {
        return None;
    }
    Some(ImageUnit::new(source, width.parse().ok()?, height.parse().ok()?))
}
