//! Hotlist - query A-share platform hot lists from the command line.
//!
//! Intersects limit-up boards and popularity rankings across 开盘啦,
//! 同花顺 and 东方财富, and tracks entities through them over time.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hotlist_common::config::Config;
use hotlist_common::logging::init_logging;
use hotlist_engine::{
    parse_trade_date, Category, DateSpec, EntityFlag, HotlistFilters, HotlistService,
    QueryFailure, QueryOutput, SourceId,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hotlist")]
#[command(version)]
#[command(about = "Aggregate and intersect A-share hot lists.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.hotlist/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of an aligned table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show ranked entities per source
    Hot {
        /// Sources, comma separated (kpl, ths, eastmoney)
        #[arg(short, long, value_delimiter = ',', required = true)]
        source: Vec<SourceId>,

        /// Ranking category (concept, hot-stock, limit-up, limit-down, exploded, auction)
        #[arg(short, long)]
        category: Category,

        /// Trade date or range (YYYYMMDD or YYYYMMDD-YYYYMMDD)
        #[arg(short, long)]
        date: DateSpec,

        /// Top-N per snapshot
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only entities whose name or code contains this text
        #[arg(long)]
        name: Option<String>,

        /// Only entities at or above this strength (0.0 - 1.0)
        #[arg(long)]
        min_strength: Option<f64>,

        /// Only entities carrying this flag (limit-up, limit-down, exploded)
        #[arg(long)]
        flag: Option<EntityFlag>,
    },

    /// Entities present in every listed ranking
    Intersect {
        /// Ranking category
        #[arg(short, long)]
        category: Category,

        /// Default trade date for requests without one (YYYYMMDD)
        #[arg(short, long)]
        date: Option<String>,

        /// Requests as SOURCE or SOURCE@YYYYMMDD
        #[arg(required = true)]
        requests: Vec<String>,
    },

    /// Rank of one entity across a date range
    Trajectory {
        /// Canonical code, source code, or sector name
        code: String,

        #[arg(short, long)]
        source: SourceId,

        #[arg(short, long)]
        category: Category,

        /// Date range (YYYYMMDD-YYYYMMDD)
        #[arg(short, long)]
        range: DateSpec,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_and_validate_from(cli.config.as_deref())?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::debug!("Hotlist v{}", env!("CARGO_PKG_VERSION"));

    let service = HotlistService::from_config(config)?;
    let facade = service.facade();

    let result = match cli.command {
        Commands::Hot {
            source,
            category,
            date,
            limit,
            name,
            min_strength,
            flag,
        } => {
            let filters = HotlistFilters {
                limit,
                name_contains: name,
                min_strength,
                flag,
            };
            facade.query_hotlist(&source, category, &date, &filters).await
        }
        Commands::Intersect {
            category,
            date,
            requests,
        } => {
            let default_date = date.as_deref().map(parse_trade_date).transpose()?;
            let requests = requests
                .iter()
                .map(|r| parse_request(r, default_date))
                .collect::<Result<Vec<_>>>()?;
            facade.query_intersection(&requests, category).await
        }
        Commands::Trajectory {
            code,
            source,
            category,
            range,
        } => {
            let (start, end) = range.bounds();
            facade
                .query_trajectory(&code, source, category, start, end)
                .await
        }
    };

    print_result(result, cli.json)
}

/// `SOURCE@YYYYMMDD`, or `SOURCE` with the default date.
fn parse_request(s: &str, default_date: Option<NaiveDate>) -> Result<(SourceId, NaiveDate)> {
    let (source, date) = match s.split_once('@') {
        Some((source, date)) => (source, Some(parse_trade_date(date)?)),
        None => (s, default_date),
    };
    let source: SourceId = source.parse()?;
    let date = date.with_context(|| format!("request '{}' has no date and --date was not given", s))?;
    Ok((source, date))
}

fn print_result(result: std::result::Result<QueryOutput, QueryFailure>, json: bool) -> Result<()> {
    match result {
        Ok(output) if json => {
            println!("{}", serde_json::to_string_pretty(&output.to_json())?);
            Ok(())
        }
        Ok(output) => {
            print!("{}", output.render());
            Ok(())
        }
        Err(failure) if json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "error": failure }))?
            );
            std::process::exit(2);
        }
        Err(failure) => Err(anyhow::Error::new(failure).context("Query failed")),
    }
}
