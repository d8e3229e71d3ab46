//! Edgeseries CLI
//!
//! Command-line interface over a journal-backed engine:
//! - Create series and insert points
//! - Select, discover periods and aggregate
//! - Trim, compact and inspect the store
//! - Run a self-contained gateway demo

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edgeseries::query::{
    parse_duration_condition, parse_filter, parse_group_by, parse_range, parse_typed_value,
    parse_value_condition,
};
use edgeseries::{
    generate_default_config, AggregateRow, AggregationFunc, Config, DurationCondition, Engine,
    EngineConfig, Filter, GroupBy, LoggingConfig, MemoryModel, Operator, Period, Point,
    Resolution, Tag, TimeField, TimeRange, Value, ValueType, NOW,
};

#[derive(Parser)]
#[command(name = "edgeseries")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Time-series store and query engine for gateway devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Journal file, overriding the configuration
    #[arg(short, long, global = true)]
    pub journal: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a series
    Create {
        series: String,
        /// float, long, int, int16, uint8, uint16, uint32, uint64, char, string, bool, blob
        value_type: String,
    },

    /// Insert a point
    Insert {
        series: String,
        value: String,
        /// Timestamp (default: now)
        #[arg(short, long, default_value_t = NOW)]
        time: i64,
    },

    /// Most recent points, oldest first
    Last {
        series: String,
        #[arg(short, default_value_t = 10)]
        n: usize,
        /// Value condition, e.g. "> 20"
        #[arg(short = 'w', long = "where")]
        condition: Option<String>,
    },

    /// Points in a time range
    Between {
        series: String,
        /// Range "start..end"; either bound may be omitted
        #[arg(short, long, default_value = "..")]
        range: String,
        #[arg(short = 'w', long = "where")]
        condition: Option<String>,
    },

    /// Points matching value, calendar and range conditions
    Select {
        series: String,
        /// Conditions such as "value >= 20" or "hour < 18"
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,
        /// Time ranges (unioned)
        #[arg(short, long = "range")]
        ranges: Vec<String>,
    },

    /// Periods during which the conditions held
    Ranges {
        series: String,
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,
        #[arg(short, long = "range")]
        ranges: Vec<String>,
        /// Duration conditions such as ">= 60"
        #[arg(short, long = "duration")]
        durations: Vec<String>,
    },

    /// Grouped aggregation
    Aggregate {
        series: String,
        /// sum, avg, min, max, count
        func: String,
        /// none, a calendar field, or bucket:<width>
        #[arg(short, long, default_value = "none")]
        group_by: String,
        #[arg(short = 'w', long = "where")]
        conditions: Vec<String>,
        #[arg(short, long = "range")]
        ranges: Vec<String>,
    },

    /// Remove old points
    Trim {
        series: String,
        /// Remove this many oldest points
        #[arg(long, conflicts_with = "before")]
        oldest: Option<usize>,
        /// Remove points older than this timestamp
        #[arg(long)]
        before: Option<i64>,
    },

    /// Rewrite the journal from the live state
    Compact,

    /// Show store statistics
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run an in-memory gateway demo
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    let json = match cli.format.as_str() {
        "json" => true,
        "table" => false,
        other => bail!("unknown output format '{}'", other),
    };

    match &cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
            return Ok(());
        }
        Commands::Demo => return run_demo(json).await,
        _ => {}
    }

    let mut engine_config = config.engine_config()?;
    engine_config.storage.journal = match cli.journal.or(engine_config.storage.journal) {
        Some(path) => Some(path),
        None => Some(default_journal()?),
    };
    let resolution = engine_config.resolution;

    let engine = Engine::open(engine_config, Arc::new(MemoryModel::new())).await?;
    let result = run_command(&engine, cli.command, json, resolution).await;
    engine.close().await?;
    result
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("edgeseries={}", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn default_journal() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .map(|p| p.join("edgeseries"))
        .unwrap_or_else(|| PathBuf::from("./edgeseries_data"));
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("edgeseries.journal"))
}

async fn run_command(
    engine: &Engine,
    command: Commands,
    json: bool,
    resolution: Resolution,
) -> anyhow::Result<()> {
    match command {
        Commands::Create { series, value_type } => {
            let value_type = ValueType::from_str(&value_type)
                .with_context(|| format!("unknown value type '{}'", value_type))?;
            engine.create_series(&series, value_type).await?;
            println!("Created {} ({})", series, value_type);
        }

        Commands::Insert {
            series,
            value,
            time,
        } => {
            let value_type = engine.store().value_type(&series).await?;
            let value = parse_typed_value(&value, value_type)?;
            let stored = engine.insert(&series, time, value.clone()).await?;
            println!("Inserted {} at {}", value, format_time(stored, resolution));
        }

        Commands::Last {
            series,
            n,
            condition,
        } => {
            let condition = condition.as_deref().map(parse_value_condition).transpose()?;
            let points = engine.select_last_n(&series, n, condition.as_ref()).await?;
            print_points(&points, json, resolution)?;
        }

        Commands::Between {
            series,
            range,
            condition,
        } => {
            let range = parse_range(&range)?;
            let condition = condition.as_deref().map(parse_value_condition).transpose()?;
            let points = engine
                .select_between(&series, range, condition.as_ref())
                .await?;
            print_points(&points, json, resolution)?;
        }

        Commands::Select {
            series,
            conditions,
            ranges,
        } => {
            let filter = parse_filter(conditions.as_slice(), ranges.as_slice())?;
            let points = engine.select(&series, &filter).await?;
            print_points(&points, json, resolution)?;
        }

        Commands::Ranges {
            series,
            conditions,
            ranges,
            durations,
        } => {
            let filter = parse_filter(conditions.as_slice(), ranges.as_slice())?;
            let duration = DurationCondition {
                conditions: durations
                    .iter()
                    .map(|d| parse_duration_condition(d))
                    .collect::<Result<_, _>>()?,
            };
            let periods = engine.select_time_ranges(&series, &filter, &duration).await?;
            print_periods(&periods, json, resolution)?;
        }

        Commands::Aggregate {
            series,
            func,
            group_by,
            conditions,
            ranges,
        } => {
            let func = AggregationFunc::from_str(&func)
                .with_context(|| format!("unknown aggregation '{}'", func))?;
            let group_by = parse_group_by(&group_by)?;
            let filter = parse_filter(conditions.as_slice(), ranges.as_slice())?;
            let rows = engine.aggregate(&series, func, &filter, group_by).await?;
            print_rows(&rows, json, resolution)?;
        }

        Commands::Trim {
            series,
            oldest,
            before,
        } => {
            let removed = match (oldest, before) {
                (Some(n), _) => engine.delete_oldest(&series, n).await?,
                (None, Some(t)) => engine.delete_before(&series, t).await?,
                (None, None) => bail!("trim needs --oldest or --before"),
            };
            println!("Removed {} points from {}", removed, series);
        }

        Commands::Compact => {
            engine.compact().await?;
            println!("Journal compacted");
        }

        Commands::Stats => {
            let stats = engine.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Edgeseries v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("  Series:          {}", stats.series_count);
                println!("  Points:          {}", stats.total_points);
                match stats.journal_entries {
                    Some(n) => println!("  Journal entries: {}", n),
                    None => println!("  Journal:         disabled"),
                }
                for id in engine.series_ids().await {
                    let len = engine.store().len(&id).await?;
                    let value_type = engine.store().value_type(&id).await?;
                    println!("    {:<30} {:<8} {}", id, value_type, len);
                }
            }
        }

        Commands::Config { .. } | Commands::Demo => {}
    }
    Ok(())
}

fn format_time(ts: i64, resolution: Resolution) -> String {
    let dt = match resolution {
        Resolution::Seconds => chrono::DateTime::from_timestamp(ts, 0),
        Resolution::Milliseconds => chrono::DateTime::from_timestamp_millis(ts),
    };
    dt.map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_points(points: &[Point], json: bool, resolution: Resolution) -> anyhow::Result<()> {
    if json {
        return print_json(&points);
    }
    if points.is_empty() {
        println!("No data");
        return Ok(());
    }
    println!("{:<22} {:<22} {}", "Time", "Timestamp", "Value");
    println!("{}", "-".repeat(60));
    for p in points {
        println!("{:<22} {:<22} {}", format_time(p.time, resolution), p.time, p.value);
    }
    Ok(())
}

fn print_periods(periods: &[Period], json: bool, resolution: Resolution) -> anyhow::Result<()> {
    if json {
        return print_json(&periods);
    }
    if periods.is_empty() {
        println!("No periods");
        return Ok(());
    }
    println!("{:<22} {:<22} {}", "Start", "End", "Duration");
    println!("{}", "-".repeat(60));
    for p in periods {
        println!(
            "{:<22} {:<22} {}",
            format_time(p.start, resolution),
            format_time(p.end, resolution),
            p.duration()
        );
    }
    Ok(())
}

fn print_rows(rows: &[AggregateRow], json: bool, resolution: Resolution) -> anyhow::Result<()> {
    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No data");
        return Ok(());
    }
    println!("{:<10} {:<22} {:<8} {}", "Group", "Time", "Count", "Value");
    println!("{}", "-".repeat(60));
    for r in rows {
        println!(
            "{:<10} {:<22} {:<8} {}",
            r.group.to_string(),
            format_time(r.time, resolution),
            r.count,
            r.value
        );
    }
    Ok(())
}

/// Build a small plant, sample it for an hour of synthetic time and query it
async fn run_demo(json: bool) -> anyhow::Result<()> {
    let temperature = Tag::new("usage", "Temperature");
    let model = Arc::new(MemoryModel::new());
    model.add_device("plant", "Plant", None, vec![])?;
    model.add_device("boiler", "Boiler", Some("plant"), vec![temperature.clone()])?;
    model.add_variable("boiler", "temp", Value::Float(20.0), vec![])?;
    model.add_variable("boiler", "burner", Value::Bool(false), vec![])?;
    model.add_device("pump", "Pump", Some("plant"), vec![])?;
    model.add_variable("pump", "inlet", Value::Float(35.0), vec![temperature.clone()])?;

    let engine = Engine::open(EngineConfig::default(), model.clone()).await?;
    let start = chrono::Utc::now().timestamp() / 3600 * 3600;

    for series in ["boiler/temp", "pump/inlet"] {
        engine.create_series(series, ValueType::Float).await?;
    }
    for minute in 0..60i64 {
        let t = start + minute * 60;
        let boiler = 20.0 + 15.0 * ((minute as f64) * std::f64::consts::PI / 30.0).sin();
        let inlet = 35.0 + (minute % 7) as f64;
        engine.insert("boiler/temp", t, Value::Float(boiler)).await?;
        engine.insert("pump/inlet", t, Value::Float(inlet)).await?;
    }
    engine.sample_variable("boiler", "burner").await?;

    let hot = Filter::new().value(Operator::Gt, Value::Float(30.0));
    let periods = engine
        .select_time_ranges("boiler/temp", &hot, &DurationCondition::any().and(Operator::Gte, 300))
        .await?;
    let rows = engine
        .aggregate(
            "boiler/temp",
            AggregationFunc::Avg,
            &Filter::new().range(TimeRange::since(start)),
            GroupBy::Field(TimeField::Minute),
        )
        .await?;
    let tagged = engine.select_tagged(&[temperature], &hot).await?;
    let devices = engine.find_devices(&[Tag::new("usage", "Temperature")]).await?;

    if json {
        print_json(&serde_json::json!({
            "hot_periods": periods,
            "minute_averages": rows,
            "hot_points_by_variable": tagged,
            "temperature_devices": devices,
            "stats": engine.stats().await,
        }))?;
    } else {
        println!("Temperature devices: {}", devices.join(", "));
        println!();
        println!("Boiler above 30 for at least 5 minutes:");
        print_periods(&periods, false, Resolution::Seconds)?;
        println!();
        println!("Boiler average by minute (first 5):");
        print_rows(&rows[..rows.len().min(5)], false, Resolution::Seconds)?;
        println!();
        for series in &tagged {
            println!("{}: {} points above 30", series.series_id, series.points.len());
        }
    }

    engine.close().await?;
    if model.outstanding() != 0 {
        tracing::warn!("{} adapter nodes not released", model.outstanding());
    }
    Ok(())
}
