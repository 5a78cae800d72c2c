//! `sofi` - CLI for sociofilter
//!
//! This binary runs the filtering pipeline over page files and manages the
//! redaction history, statistics and settings it persists.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use sociofilter::cli::{
    parse_page, CheckCommand, Cli, Command, ConfigCommand, HistoryCommand, RecoverCommand,
    ScanCommand, StatsCommand,
};
use sociofilter::page::MemoryPage;
use sociofilter::{init_logging, Config, ContentType, Pipeline, RemoteClassifier, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd).await,
        command => run(&config, command).await,
    }
}

async fn run(config: &Config, command: Command) -> anyhow::Result<()> {
    let pipeline = open_pipeline(config)?;
    match command {
        Command::Scan(cmd) => handle_scan(&pipeline, &cmd).await,
        Command::Check(cmd) => handle_check(&pipeline, &cmd).await,
        Command::History(cmd) => handle_history(&pipeline, &cmd),
        Command::Recover(cmd) => handle_recover(&pipeline, &cmd).await,
        Command::Clear(cmd) => {
            if pipeline.ledger().clear_domain(&cmd.domain).await? {
                println!("Cleared history for {}", cmd.domain);
            } else {
                println!("No history for {}", cmd.domain);
            }
            Ok(())
        }
        Command::Stats(cmd) => handle_stats(&pipeline, &cmd).await,
        Command::Health => handle_health(config, &pipeline).await,
        Command::Config(config_cmd) => handle_config(config, config_cmd).await,
    }
}

fn open_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening store at {}", path.display()))?;
    Ok(Pipeline::new(config, Arc::new(store))?)
}

async fn handle_scan(pipeline: &Pipeline, cmd: &ScanCommand) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("reading {}", cmd.file.display()))?;
    let page = parse_page(&cmd.domain, &body)?;

    let report = pipeline.scan_and_filter(&page, &page.units()).await;

    if cmd.json {
        let output = serde_json::json!({
            "report": report,
            "page": page.views(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", page.render());
        eprintln!(
            "{} redaction(s), {} text node(s), {} image(s) checked, {} skipped",
            report.redactions.len(),
            report.text_checked,
            report.images_checked,
            report.skipped
        );
        if report.remote_failures > 0 {
            eprintln!(
                "{} classifier call(s) failed; those nodes were left unchanged",
                report.remote_failures
            );
        }
        if report.local_only > 0 {
            eprintln!(
                "{} node(s) judged by local rules only: {}",
                report.local_only,
                sociofilter::Error::ConfigurationMissing
            );
        }
    }
    Ok(())
}

async fn handle_check(pipeline: &Pipeline, cmd: &CheckCommand) -> anyhow::Result<()> {
    let resolution = pipeline.evaluate_text(&cmd.text).await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    match (&resolution.redaction, resolution.method) {
        (Some(redaction), Some(method)) => {
            println!("{}", redaction.replacement_content());
            eprintln!("filtered ({method})");
        }
        _ => {
            println!("{}", cmd.text);
            match &resolution.verdict {
                Some(verdict) if verdict.is_failed() => eprintln!(
                    "unchanged (classifier failed: {})",
                    verdict.error.as_deref().unwrap_or("unknown error")
                ),
                _ => eprintln!("unchanged"),
            }
        }
    }
    Ok(())
}

fn handle_history(pipeline: &Pipeline, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let Some(domain) = &cmd.domain else {
        let domains = pipeline.ledger().domains()?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&domains)?);
        } else if domains.is_empty() {
            println!("No history recorded.");
        } else {
            for domain in domains {
                let history = pipeline.history(&domain)?;
                println!(
                    "{domain}  ({} entries, {} pending)",
                    history.len(),
                    history.pending()
                );
            }
        }
        return Ok(());
    };

    let history = pipeline.history(domain)?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!("History for {domain}");
    println!("{}", "=".repeat(12 + domain.len()));
    for content_type in ContentType::ALL {
        let bucket = history.bucket(content_type);
        println!();
        println!("[{content_type}]");
        if bucket.is_empty() {
            println!("  (none)");
        }
        for (index, record) in bucket.iter().enumerate() {
            println!(
                "  {index:>3}  {}  {}  {:?} -> {:?}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                if record.recovered { "recovered" } else { "filtered " },
                record.original_content,
                record.replacement_content
            );
        }
    }
    Ok(())
}

async fn handle_recover(pipeline: &Pipeline, cmd: &RecoverCommand) -> anyhow::Result<()> {
    // No page is rendered from the CLI, so only the ledger changes.
    let page = MemoryPage::new(cmd.domain.as_str());

    if cmd.all {
        let changed = pipeline.recover_all(&page).await?;
        println!("Recovered {changed} entries for {}", cmd.domain);
        return Ok(());
    }

    let Some(index) = cmd.index else {
        bail!("either --index or --all is required");
    };
    let original = pipeline
        .recover(&page, cmd.content_type.into(), index)
        .await?;
    println!("{original}");
    Ok(())
}

async fn handle_stats(pipeline: &Pipeline, cmd: &StatsCommand) -> anyhow::Result<()> {
    let stats = if cmd.reset {
        pipeline.reset_stats().await?
    } else {
        pipeline.stats()?
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Text filtered:   {}", stats.text_filtered);
        println!("Images filtered: {}", stats.images_filtered);
        if let Some(at) = stats.last_updated {
            println!("Last updated:    {}", at.to_rfc3339());
        }
    }
    Ok(())
}

async fn handle_health(config: &Config, pipeline: &Pipeline) -> anyhow::Result<()> {
    let settings = pipeline.settings();
    let Some(url) = settings.api_url.as_deref() else {
        bail!("no classifier endpoint configured; only local filtering is available");
    };
    let classifier =
        RemoteClassifier::new(url, config.classifier_timeout(), config.classifier.max_text_bytes)?;
    classifier
        .health()
        .await
        .with_context(|| format!("classifier at {url} is not healthy"))?;
    println!("Classifier at {url} is healthy.");
    Ok(())
}

async fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let pipeline = open_pipeline(config)?;
            let settings = pipeline.settings();
            if json {
                let output = serde_json::json!({
                    "config": config,
                    "settings": settings,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Settings]");
                println!("  Enabled:            {}", settings.enabled);
                println!("  Filter text:        {}", settings.filter_text);
                println!("  Filter images:      {}", settings.filter_images);
                println!(
                    "  Classifier:         {}",
                    settings.api_url.as_deref().unwrap_or("(local only)")
                );
                println!();
                println!("[Thresholds]");
                let t = &settings.thresholds;
                println!("  Adult:              {}", t.adult);
                println!("  Violence:           {}", t.violence);
                println!("  Racy:               {}", t.racy);
                println!("  Medical:            {}", t.medical);
                println!("  Safe floor:         {}", t.safe_floor);
                println!("  Text confidence:    {}", t.text_confidence);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
        ConfigCommand::Set(args) => {
            let patch = args.to_patch();
            if patch.is_empty() {
                bail!("nothing to set; see `sofi config set --help`");
            }
            let pipeline = open_pipeline(config)?;
            let settings = pipeline.update_settings(patch).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
