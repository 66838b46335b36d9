use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quarry_core::{
    Collection, CollectionConfig, FileJournal, Filter, FindOptions, IndexSpec, LogLevel,
    Pipeline, Projection, QuarryError, SortSpec,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry CLI - query a document collection from the command line")]
#[command(version)]
struct Cli {
    /// JSON array of documents to load into an in-memory collection
    #[arg(long, global = true, conflicts_with = "journal")]
    data: Option<PathBuf>,

    /// Journal file backing the collection
    #[arg(long, global = true)]
    journal: Option<PathBuf>,

    /// Index key to create before running the command, e.g. '{"title": 1}'
    #[arg(long = "index", global = true)]
    indexes: Vec<String>,

    /// Collection name
    #[arg(long, global = true, default_value = "documents")]
    name: String,

    /// ERROR, WARN, INFO, DEBUG or TRACE (defaults to QUARRY_LOG, then WARN)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a find query
    Find {
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Sort document, e.g. '{"price": -1}'
        #[arg(long)]
        sort: Option<String>,
        /// Projection document, e.g. '{"title": 1, "_id": 0}'
        #[arg(long)]
        projection: Option<String>,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents matching a filter
    Count {
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// Run an aggregation pipeline (JSON array of stages)
    Aggregate {
        #[arg(long)]
        pipeline: String,
    },
    /// Show the plan and execution statistics of a filter
    Explain {
        #[arg(long, default_value = "{}")]
        filter: String,
    },
    /// List index definitions
    Indexes,
    /// Append the documents of a JSON array file to the journal
    Import {
        /// JSON file to import
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_level {
        Some(level) => quarry_core::set_log_level(level),
        None => {
            quarry_core::init_from_env();
        }
    }

    let collection = open_collection(&cli)?;

    match cli.command {
        Commands::Find {
            filter,
            sort,
            projection,
            skip,
            limit,
        } => {
            let mut options = FindOptions::new();
            if let Some(sort) = sort {
                options = options.with_sort(SortSpec::from_json(&parse_arg(&sort, "sort")?)?);
            }
            if let Some(projection) = projection {
                options = options
                    .with_projection(Projection::from_json(&parse_arg(&projection, "projection")?)?);
            }
            options.skip = skip;
            options.limit = limit;

            let docs = collection
                .find(parse_filter(&filter)?)
                .with_options(options)
                .to_vec()
                .context("Query failed")?;
            print_json(&docs)
        }
        Commands::Count { filter } => {
            let count = collection
                .count_documents(&parse_filter(&filter)?)
                .context("Count failed")?;
            println!("{}", count);
            Ok(())
        }
        Commands::Aggregate { pipeline } => {
            let pipeline = Pipeline::from_json(&parse_arg(&pipeline, "pipeline")?)?;
            let output = collection
                .aggregate(&pipeline)
                .context("Aggregation failed")?;
            print_json(&output)
        }
        Commands::Explain { filter } => {
            let explain = collection
                .explain(&parse_filter(&filter)?)
                .context("Explain failed")?;
            print_json(&explain.to_json())
        }
        Commands::Indexes => {
            let specs: Vec<Value> = collection
                .list_indexes()
                .iter()
                .map(IndexSpec::to_json)
                .collect();
            print_json(&specs)
        }
        Commands::Import { file } => {
            if cli.journal.is_none() {
                bail!("import needs --journal");
            }
            let docs = read_documents(&file)?;
            let count = docs.len();
            collection
                .insert_many(docs)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!(
                "Imported {} documents into '{}' ({} total)",
                count,
                collection.name(),
                collection.len()
            );
            Ok(())
        }
    }
}

/// Collection from --journal or --data, with every --index created
fn open_collection(cli: &Cli) -> Result<Collection> {
    let collection = match &cli.journal {
        Some(path) => {
            let journal = FileJournal::open(path)
                .with_context(|| format!("Failed to open journal: {}", path.display()))?;
            Collection::open(cli.name.clone(), CollectionConfig::default(), Arc::new(journal))
                .with_context(|| format!("Failed to replay journal: {}", path.display()))?
        }
        None => Collection::new(cli.name.clone()),
    };

    if let Some(path) = &cli.data {
        collection
            .insert_many(read_documents(path)?)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }

    for key in &cli.indexes {
        let spec = IndexSpec::from_json(&parse_arg(key, "index")?)?;
        match collection.create_index(spec) {
            Ok(_) | Err(QuarryError::IndexExists(_)) => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to create index {}", key)),
        }
    }
    Ok(collection)
}

fn read_documents(file: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", file.display()))?;
    match data {
        Value::Array(docs) => Ok(docs),
        _ => bail!("{} must contain a JSON array of documents", file.display()),
    }
}

fn parse_arg(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON for --{}: {}", what, raw))
}

fn parse_filter(raw: &str) -> Result<Filter> {
    Ok(Filter::from_json(&parse_arg(raw, "filter")?)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
