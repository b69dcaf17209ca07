use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use callgraph_index::config::IndexerConfig;
use callgraph_index::database::{ConditionKind, IndexStore};
use callgraph_index::graph::{CallGraphBuilder, Populator};
use callgraph_index::project::ProjectIndex;
use callgraph_index::reporter;
use callgraph_index::scheduler::{FunctionRef, Scheduler};
use callgraph_index::ProjectCache;

#[derive(Parser)]
#[command(name = "callgraph-index")]
#[command(about = "Call graph indexer and bottom-up summarization scheduler", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database
    Init {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },

    /// Parse a project into the cache
    Index {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,

        /// Ignore any cached parse
        #[arg(long)]
        force: bool,
    },

    /// Store functions and call edges of a project
    Populate {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        #[arg(long, value_name = "DIRECTORY")]
        project: PathBuf,

        /// Only store the call tree of this function
        #[arg(long)]
        focal: Option<String>,

        /// File that defines the focal function
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        #[arg(long)]
        force: bool,
    },

    /// Print the stored tree of a function
    Query {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        #[arg(long)]
        focal: String,

        #[arg(long)]
        depth: Option<usize>,

        /// Write the tree to a JSON file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show database statistics
    Stats {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },

    /// List all stored functions
    List {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },

    /// Next function to summarize, with its source code
    Next {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Project to read source code from
        #[arg(long, value_name = "DIRECTORY")]
        project: Option<PathBuf>,
    },

    /// Functions that can be summarized in parallel
    NextBatch {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        /// Maximum batch size
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max: Option<usize>,
    },

    /// Full context for a function id
    Context {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        #[arg(long)]
        function_id: i64,

        #[arg(long, value_name = "DIRECTORY")]
        project: Option<PathBuf>,
    },

    /// Store a function summary
    Update {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        #[arg(long)]
        function: String,

        /// More precise than the name
        #[arg(long)]
        function_id: Option<i64>,

        #[arg(long)]
        summary: String,
    },

    /// Append a precondition or postcondition
    Annotate {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,

        #[arg(long)]
        function: String,

        #[arg(long)]
        function_id: Option<i64>,

        #[arg(long = "type", value_enum)]
        kind: ConditionArg,

        #[arg(long)]
        text: String,
    },

    /// Summarization progress
    Status {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
    },

    /// Build a call tree straight from the parsed project
    Graph {
        #[arg(long, value_name = "DIRECTORY")]
        project: PathBuf,

        #[arg(long)]
        focal: String,

        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Indented text instead of JSON
        #[arg(long)]
        text: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConditionArg {
    Precondition,
    Postcondition,
}

impl From<ConditionArg> for ConditionKind {
    fn from(arg: ConditionArg) -> Self {
        match arg {
            ConditionArg::Precondition => ConditionKind::Precondition,
            ConditionArg::Postcondition => ConditionKind::Postcondition,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    let config = match path {
        Some(path) => IndexerConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => IndexerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn open_store(db: &Path) -> Result<IndexStore> {
    IndexStore::open(db).with_context(|| format!("Failed to open database: {}", db.display()))
}

fn index_project(config: &IndexerConfig, project: &Path, force: bool) -> Result<ProjectIndex> {
    let mut cache = ProjectCache::new(config.clone());
    cache
        .index(project, force)
        .with_context(|| format!("Failed to index project: {}", project.display()))
}

/// Resolve a user-supplied file against the project root so it matches indexed paths.
fn file_hint(index: &ProjectIndex, file: Option<PathBuf>) -> Option<PathBuf> {
    file.map(|f| {
        let path = index.root.join(f);
        std::fs::canonicalize(&path).unwrap_or(path)
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { db } => {
            open_store(&db)?;
            println!("✅ Initialized: {}", db.display());
            Ok(())
        }
        Commands::Index { project, force } => {
            println!("🔍 Indexing project: {}", project.display());
            let mut cache = ProjectCache::new(config.clone());
            let index = cache
                .index(&project, force)
                .with_context(|| format!("Failed to index project: {}", project.display()))?;
            reporter::print_index_summary(&index, cache.stats().hits > 0);
            Ok(())
        }
        Commands::Populate {
            db,
            project,
            focal,
            file,
            force,
        } => {
            let index = index_project(&config, &project, force)?;
            let store = open_store(&db)?;
            let populator = Populator::new(&store);

            let stats = match focal {
                Some(focal) => {
                    let hint = file_hint(&index, file);
                    println!("🔍 Analyzing function: {}", focal.bold());
                    let tree = CallGraphBuilder::new(&index).build(&focal, hint.as_deref());
                    if !tree.is_resolved() {
                        println!("⚠️  Function {} not found in project.", focal);
                        return Ok(());
                    }
                    populator.populate(&tree)?
                }
                None => populator.populate_project(&index)?,
            };
            reporter::print_populate(&stats);
            Ok(())
        }
        Commands::Query {
            db,
            focal,
            depth,
            output,
        } => {
            let store = open_store(&db)?;
            let Some(function_id) = store.find_function_id(&focal)? else {
                println!("Function not found: {}", focal);
                return Ok(());
            };
            let tree = store.get_function_tree(function_id, depth)?;

            match output {
                Some(path) => {
                    let json = serde_json::to_string_pretty(&tree)?;
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("📄 Wrote to: {}", path.display());
                }
                None => print_json(&tree)?,
            }
            Ok(())
        }
        Commands::Stats { db } => {
            let store = open_store(&db)?;
            reporter::print_stats(&store.get_stats()?);
            Ok(())
        }
        Commands::List { db } => {
            let store = open_store(&db)?;
            reporter::print_function_list(&store.list_functions()?);
            Ok(())
        }
        Commands::Next { db, project } => {
            let store = open_store(&db)?;
            let index = project
                .map(|p| index_project(&config, &p, false))
                .transpose()?;
            let scheduler = Scheduler::new(&store, index.as_ref(), &config.scheduler);
            print_json(&reporter::next_json(&scheduler.find_next()?))
        }
        Commands::NextBatch { db, max } => {
            let store = open_store(&db)?;
            let scheduler = Scheduler::new(&store, None, &config.scheduler);
            let max = max.unwrap_or(config.scheduler.default_batch);
            print_json(&reporter::batch_json(&scheduler.ready_batch(max)?))
        }
        Commands::Context {
            db,
            function_id,
            project,
        } => {
            let store = open_store(&db)?;
            let index = project
                .map(|p| index_project(&config, &p, false))
                .transpose()?;
            let scheduler = Scheduler::new(&store, index.as_ref(), &config.scheduler);
            let context = scheduler.context(function_id)?;
            print_json(&reporter::context_response(function_id, context.as_ref()))
        }
        Commands::Update {
            db,
            function,
            function_id,
            summary,
        } => {
            let store = open_store(&db)?;
            let scheduler = Scheduler::new(&store, None, &config.scheduler);
            let target = FunctionRef::from_args(&function, function_id);
            let outcome = scheduler.update_summary(&target, &summary)?;
            print_json(&reporter::update_json(outcome, &function, &summary))
        }
        Commands::Annotate {
            db,
            function,
            function_id,
            kind,
            text,
        } => {
            let store = open_store(&db)?;
            let scheduler = Scheduler::new(&store, None, &config.scheduler);
            let target = FunctionRef::from_args(&function, function_id);
            let kind = ConditionKind::from(kind);
            let outcome = scheduler.add_annotation(&target, kind, &text)?;
            print_json(&reporter::annotate_json(
                outcome,
                &function,
                kind.as_str(),
                &text,
            ))
        }
        Commands::Status { db } => {
            let store = open_store(&db)?;
            let scheduler = Scheduler::new(&store, None, &config.scheduler);
            let progress = scheduler.status()?;
            reporter::print_progress(&progress);
            print_json(&progress)
        }
        Commands::Graph {
            project,
            focal,
            file,
            text,
        } => {
            let index = index_project(&config, &project, false)?;
            let hint = file_hint(&index, file);
            let tree = CallGraphBuilder::new(&index).build(&focal, hint.as_deref());
            if text {
                reporter::print_tree(&tree);
                Ok(())
            } else {
                print_json(&tree)
            }
        }
    }
}
