//! Schemascope CLI - Inspect database metadata
//!
//! Usage:
//!   schemascope inspect <source> [--catalog <name>] [--schema <pattern>] [--table <pattern>]
//!   schemascope sources
//!   schemascope cache stats
//!   schemascope cache clear [--source <id>]
//!
//! Examples:
//!   schemascope inspect warehouse --schema sales --types table,view
//!   schemascope inspect local --format json
//!   schemascope cache clear --source warehouse

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use schemascope::config::Settings;
use schemascope::metadata::{CanonicalSchemaInfo, ObjectType, SchemaQuery, TableKind};
use schemascope::{DataSourceId, IntrospectionEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemascope")]
#[command(about = "Schemascope - Metadata introspection across database engines")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $SCHEMASCOPE_CONFIG, ./schemascope.toml, ~/.config/schemascope/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect one data source
    Inspect {
        /// Data source id from the settings file
        source: String,

        /// Restrict to one catalog (exact name)
        #[arg(long)]
        catalog: Option<String>,

        /// Schema name pattern (`%` and `_` wildcards, quote for exact case)
        #[arg(short, long)]
        schema: Option<String>,

        /// Table name pattern
        #[arg(short, long)]
        table: Option<String>,

        /// Object types to include
        #[arg(long, value_delimiter = ',')]
        types: Vec<TypeArg>,

        /// Output format
        #[arg(short, long, default_value = "tree")]
        format: OutputFormat,
    },

    /// List configured data sources
    Sources,

    /// Inspect or clear the metadata cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache entry counts
    Stats,

    /// Drop cached metadata
    Clear {
        /// Only drop entries of this data source
        #[arg(long)]
        source: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    Table,
    View,
    Index,
}

impl From<TypeArg> for ObjectType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Table => ObjectType::Table,
            TypeArg::View => ObjectType::View,
            TypeArg::Index => ObjectType::Index,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Indented catalog/schema/table tree
    Tree,
    /// Pretty-printed JSON
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Inspect {
            source,
            catalog,
            schema,
            table,
            types,
            format,
        } => {
            let mut query = SchemaQuery::new(source);
            if let Some(catalog) = catalog {
                query = query.catalog(catalog);
            }
            if let Some(schema) = schema {
                query = query.schema_pattern(schema);
            }
            if let Some(table) = table {
                query = query.table_pattern(table);
            }
            if !types.is_empty() {
                query = query.object_types(types.into_iter().map(ObjectType::from));
            }
            cmd_inspect(&settings, query, format).await
        }
        Commands::Sources => cmd_sources(&settings),
        Commands::Cache { command } => cmd_cache(&settings, command),
    }
}

async fn cmd_inspect(settings: &Settings, query: SchemaQuery, format: OutputFormat) -> ExitCode {
    let engine = match IntrospectionEngine::start(settings).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error starting engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = engine.introspect(&query).await;
    engine.shutdown().await;

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(info.as_ref()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Tree => print_tree(&info),
    }
    ExitCode::SUCCESS
}

fn print_tree(info: &CanonicalSchemaInfo) {
    println!("{} ({})", info.data_source, info.engine);
    for catalog in &info.catalogs {
        println!("  {}", catalog.name);
        for schema in &catalog.schemas {
            println!("    {}", schema.name);
            for table in &schema.tables {
                let kind = match table.kind {
                    TableKind::Table => "table",
                    TableKind::View => "view",
                    TableKind::MaterializedView => "materialized view",
                    TableKind::SystemTable => "system table",
                };
                println!("      {} [{}]", table.name, kind);
                for column in &table.columns {
                    let mut flags = Vec::new();
                    if column.is_primary_key {
                        flags.push("pk");
                    }
                    if !column.nullable {
                        flags.push("not null");
                    }
                    let flags = if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", flags.join(", "))
                    };
                    println!("        {} {}{}", column.name, column.data_type.native, flags);
                }
                for index in &table.indexes {
                    let unique = if index.is_unique { "unique " } else { "" };
                    println!(
                        "        {}index {} ({})",
                        unique,
                        index.name,
                        index.columns.join(", ")
                    );
                }
            }
        }
    }
    println!();
    println!("{} relation(s)", info.table_count());
}

fn cmd_sources(settings: &Settings) -> ExitCode {
    let descriptors = match settings.descriptors() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if descriptors.is_empty() {
        println!("No data sources configured.");
        return ExitCode::SUCCESS;
    }

    println!("Data sources:");
    for descriptor in &descriptors {
        let location = if descriptor.engine.is_embedded() {
            descriptor.database.clone()
        } else {
            match descriptor.port() {
                Some(port) => format!("{}:{}/{}", descriptor.host, port, descriptor.database),
                None => format!("{}/{}", descriptor.host, descriptor.database),
            }
        };
        println!("  - {} [{}] {}", descriptor.id, descriptor.engine, location);
    }
    ExitCode::SUCCESS
}

fn cmd_cache(settings: &Settings, command: CacheCommand) -> ExitCode {
    let cache = match schemascope::cache::MetadataCache::from_settings(&settings.cache) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Error opening cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats();
            match stats.persistent_entries {
                Some(n) => println!("Persistent entries: {}", n),
                None => println!("Persistent cache disabled."),
            }
        }
        CacheCommand::Clear { source: Some(id) } => {
            cache.invalidate(&DataSourceId::new(id.clone()));
            println!("Cleared cached metadata for '{}'.", id);
        }
        CacheCommand::Clear { source: None } => {
            cache.clear();
            println!("Cleared cached metadata.");
        }
    }
    ExitCode::SUCCESS
}
