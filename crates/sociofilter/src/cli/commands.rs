//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::content::ContentType;
use crate::settings::SettingsPatch;

/// Scan command arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Page file: one text node per line, `@image <url> <W>x<H>` for images
    pub file: PathBuf,

    /// Domain the page belongs to
    #[arg(short, long)]
    pub domain: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Check command arguments.
#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Text to evaluate
    pub text: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Domain to show; lists domains with history when omitted
    pub domain: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Recover command arguments.
#[derive(Debug, Args)]
pub struct RecoverCommand {
    /// Domain of the redaction
    pub domain: String,

    /// Content type of the entry
    #[arg(short = 't', long = "type", value_enum, default_value = "text")]
    pub content_type: ContentTypeArg,

    /// Index of the entry within its content type
    #[arg(short, long, required_unless_present = "all")]
    pub index: Option<usize>,

    /// Recover every entry of the domain
    #[arg(short, long, conflicts_with = "index")]
    pub all: bool,
}

/// Clear command arguments.
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Domain whose history to drop
    pub domain: String,
}

/// Stats command arguments.
#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Reset the counters to zero
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration and persisted settings
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Update persisted filter settings
    Set(SetArgs),
}

/// Settings to change; anything not given is left alone.
#[derive(Debug, Args)]
pub struct SetArgs {
    /// Turn filtering on or off
    #[arg(long)]
    pub enabled: Option<bool>,

    /// Turn text filtering on or off
    #[arg(long)]
    pub filter_text: Option<bool>,

    /// Turn image filtering on or off
    #[arg(long)]
    pub filter_images: Option<bool>,

    /// Classifier endpoint
    #[arg(long, value_name = "URL", conflicts_with = "clear_api_url")]
    pub api_url: Option<String>,

    /// Forget the classifier endpoint
    #[arg(long)]
    pub clear_api_url: bool,
}

impl SetArgs {
    /// The settings patch these arguments describe.
    #[must_use]
    pub fn to_patch(&self) -> SettingsPatch {
        let api_url = if self.clear_api_url {
            Some(None)
        } else {
            self.api_url.clone().map(Some)
        };
        SettingsPatch {
            enabled: self.enabled,
            filter_text: self.filter_text,
            filter_images: self.filter_images,
            api_url,
            ..SettingsPatch::default()
        }
    }
}

/// Content type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContentTypeArg {
    /// Text entries
    Text,
    /// Image entries
    #[value(alias = "images")]
    Image,
}

impl From<ContentTypeArg> for ContentType {
    fn from(arg: ContentTypeArg) -> Self {
        match arg {
            ContentTypeArg::Text => Self::Text,
            ContentTypeArg::Image => Self::Image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_arg_conversion() {
        assert_eq!(ContentType::from(ContentTypeArg::Text), ContentType::Text);
        assert_eq!(ContentType::from(ContentTypeArg::Image), ContentType::Image);
    }

    #[test]
    fn test_set_args_to_patch() {
        let args = SetArgs {
            enabled: Some(false),
            filter_text: None,
            filter_images: Some(true),
            api_url: Some("https://mod.test".to_string()),
            clear_api_url: false,
        };
        let patch = args.to_patch();
        assert_eq!(patch.enabled, Some(false));
        assert_eq!(patch.filter_text, None);
        assert_eq!(patch.api_url, Some(Some("https://mod.test".to_string())));
    }

    #[test]
    fn test_clear_api_url_patch() {
        let args = SetArgs {
            enabled: None,
            filter_text: None,
            filter_images: None,
            api_url: None,
            clear_api_url: true,
        };
        assert_eq!(args.to_patch().api_url, Some(None));
    }

    #[test]
    fn test_empty_set_args() {
        let args = SetArgs {
            enabled: None,
            filter_text: None,
            filter_images: None,
            api_url: None,
            clear_api_url: false,
        };
        assert!(args.to_patch().is_empty());
    }
}
