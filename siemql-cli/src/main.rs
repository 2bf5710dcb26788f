use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use siemql::config::Config;
use siemql::index::IndexResolver;
use siemql::observability::init_logging;
use siemql::{DataStream, Dialect, EventStore, FilterSpec, QueryCompiler, TimeRange};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "siemql")]
#[command(about = "siemql - query SIEM event stores across storage dialects")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "SIEMQL_CONFIG")]
    config: Option<PathBuf>,

    /// Storage URL (overrides config)
    #[arg(long, env = "SIEMQL_URL")]
    url: Option<String>,

    /// Storage dialect: legacy, modern, modern-rollover or 1.7, 7, 7.17
    #[arg(long, env = "SIEMQL_DIALECT")]
    dialect: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct RangeArgs {
    /// Range start: unix seconds or RFC 3339
    #[arg(long)]
    begin: String,

    /// Range end (inclusive): unix seconds or RFC 3339
    #[arg(long)]
    end: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the search body for a filter without contacting storage
    Compile {
        /// Filter document (JSON)
        #[arg(short, long)]
        filter: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        /// Group-by fields ("field [as alias], ...")
        #[arg(short, long)]
        group_by: Option<String>,
    },

    /// Print the indices a time range resolves to
    Indices {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Group events by the filter's fields and print one JSON row per group
    GroupBy {
        /// Filter document (JSON)
        #[arg(short, long)]
        filter: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Stream raw events as JSON lines
    Events {
        /// Filter document (JSON)
        #[arg(short, long)]
        filter: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        /// Stop after N events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Detect and print the storage dialect
    Detect,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.storage.url = url;
    }
    if let Some(dialect) = cli.dialect {
        config.storage.dialect = Some(dialect);
    }
    config.validate()?;
    init_logging(&config.logging)?;
    tracing::debug!("Using storage {}", config.storage.url);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Compile {
            filter,
            range,
            group_by,
        } => {
            let dialect = pinned_dialect(&config)?
                .context("compile needs a dialect (--dialect or storage.dialect)")?;
            let spec = load_filter(&filter)?;
            let range = range.parse()?;
            let compiler = QueryCompiler::from_config(&config)?;

            let body = match group_by {
                Some(fields) => compiler
                    .compile_aggregation_query(&spec, &fields, &range, dialect)?
                    .search_body(0),
                None if !spec.fields.is_empty() => compiler
                    .compile_grouped(&spec, &spec.fields, &range, dialect)?
                    .search_body(0),
                None => compiler
                    .compile_filter_query(&spec, &range, dialect)?
                    .search_body(config.query.batch_size),
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        Commands::Indices { range } => {
            let range = range.parse()?;
            let names = match pinned_dialect(&config)? {
                Some(dialect) if dialect != Dialect::ModernRollover => {
                    let resolver =
                        IndexResolver::new(config.indices.clone(), config.storage.timezone_offset()?);
                    resolver.resolve(&range, dialect, &Vec::<DataStream>::new())?
                }
                _ => EventStore::connect(&config)?.resolve_indices(&range)?,
            };
            for name in names {
                writeln!(out, "{}", name)?;
            }
        }
        Commands::GroupBy { filter, range } => {
            let spec = load_filter(&filter)?;
            if spec.fields.is_empty() {
                bail!("filter {} has no fields to group by", filter.display());
            }
            let store = EventStore::connect(&config)?;
            for row in store.group_by(&spec, range.parse()?)? {
                writeln!(out, "{}", serde_json::Value::Object(row))?;
            }
        }
        Commands::Events {
            filter,
            range,
            limit,
        } => {
            let spec = load_filter(&filter)?;
            let store = EventStore::connect(&config)?;
            let events = store.events(&spec, range.parse()?)?;
            for event in events.take(limit.unwrap_or(usize::MAX)) {
                writeln!(out, "{}", event?)?;
            }
        }
        Commands::Detect => {
            // A pinned dialect would skip detection
            config.storage.dialect = None;
            let store = EventStore::connect(&config)?;
            writeln!(out, "{} ({})", store.dialect(), store.dialect().version_tag())?;
        }
    }

    Ok(())
}

impl RangeArgs {
    fn parse(&self) -> Result<TimeRange> {
        Ok(TimeRange::new(parse_time(&self.begin)?, parse_time(&self.end)?)?)
    }
}

fn parse_time(value: &str) -> Result<i64> {
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("'{}' is neither unix seconds nor RFC 3339", value))?;
    Ok(parsed.timestamp())
}

fn pinned_dialect(config: &Config) -> Result<Option<Dialect>> {
    Ok(config
        .storage
        .dialect
        .as_deref()
        .map(str::parse::<Dialect>)
        .transpose()?)
}

fn load_filter(path: &Path) -> Result<FilterSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading filter {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing filter {}", path.display()))
}
