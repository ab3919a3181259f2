//! Hypha Build CLI
//!
//! Builds a set of configuration sources and prints the resulting definitions as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use hypha_config::{
    BuildOrchestrator, HyphaConfig, SharedStream, SourceHandle, TracingListener,
};
use tracing_subscriber::EnvFilter;
use url::Url;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "hypha-build")]
#[command(about = "Build XML configuration sources into one definition set")]
#[command(version)]
struct Cli {
    /// Sources: `classpath:NAME`, `file://`/`http(s)://` URLs, `-` for stdin, or file paths
    sources: Vec<String>,

    /// Add every *.xml file under this directory (sorted by path)
    #[arg(long, value_name = "DIR")]
    scan: Vec<PathBuf>,

    /// Extra classpath root, searched before the configured roots
    #[arg(long, value_name = "DIR")]
    classpath: Vec<PathBuf>,

    /// Config file to load (optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Name recorded on the built resource
    #[arg(short, long, default_value = "hypha")]
    name: String,

    /// Print compact JSON
    #[arg(long)]
    compact: bool,

    /// Log each lifecycle event
    #[arg(long)]
    events: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    show_config: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match HyphaConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if !cli.classpath.is_empty() {
        let mut roots = cli.classpath.clone();
        roots.extend(config.classpath.roots.drain(..));
        config.classpath.roots = roots;
    }

    if let Err(e) = run(cli, &config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: &HyphaConfig) -> anyhow::Result<()> {
    if cli.show_config {
        println!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let mut orchestrator = BuildOrchestrator::from_config(config);
    for raw in &cli.sources {
        let handle = parse_source(raw)?;
        if !orchestrator.add_source(handle)? {
            eprintln!("⚠️  Skipping duplicate source {}", raw);
        }
    }
    for dir in &cli.scan {
        for path in scan_xml(dir)? {
            orchestrator.add_source(path)?;
        }
    }
    if orchestrator.sources().is_empty() {
        bail!("no sources given (pass paths, URLs, classpath: names or --scan DIR)");
    }

    if cli.events {
        orchestrator.subscribe(TracingListener);
    }

    let resource = orchestrator
        .build(&cli.name, None)
        .map_err(|failure| {
            let merged = failure.partial().len();
            anyhow::Error::new(failure).context(format!("{} definitions merged before the failure", merged))
        })?;

    let output = serde_json::json!({
        "source_name": resource.source_name(),
        "created_at": resource.created_at(),
        "namespaces": resource.namespaces().namespaces().collect::<Vec<_>>(),
        "definitions": resource.definitions(),
    });
    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", rendered);
    Ok(())
}

fn parse_source(raw: &str) -> anyhow::Result<SourceHandle> {
    if raw == "-" {
        return Ok(SourceHandle::stream(SharedStream::forward_only(std::io::stdin())));
    }
    if let Some(name) = raw.strip_prefix("classpath:") {
        return Ok(SourceHandle::classpath(name)?);
    }
    if raw.starts_with("file://") || raw.starts_with("http://") || raw.starts_with("https://") {
        let url = Url::parse(raw).with_context(|| format!("invalid URL '{}'", raw))?;
        return Ok(SourceHandle::url(url));
    }
    Ok(SourceHandle::file(raw)?)
}

fn scan_xml(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("--scan target {} is not a directory", dir.display());
    }
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map(|ext| ext == "xml").unwrap_or(false))
        .collect();
    found.sort();
    Ok(found)
}
