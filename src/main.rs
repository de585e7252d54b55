use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use code_refinery::display::{THEME, create_progress_bar, create_spinner};
use code_refinery::io::ExitCode;
use code_refinery::vector::create_generator;
use code_refinery::{
    ExtractorRegistry, FileWalker, IndexRegistry, IntentManager, KeywordRouter, KnowledgeRefinery,
    KnowledgeStore, PlaceholderIntent, QueryRouter, RefineError, SearchFacade, SearchFilter,
    Settings, StoreError, UnitKind, logging,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Knowledge refinery and vector search over source code
#[derive(Parser)]
#[command(
    name = "refinery",
    version = env!("CARGO_PKG_VERSION"),
    about = "Refine source files into annotated code units and search them",
    long_about = "Extract code units into per-file knowledge, keep their annotations across edits, \
                  and mirror them into a synchronized vector index for semantic search.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Set up .refinery directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Display active settings")]
    Config,

    #[command(
        about = "Extract code units and reconcile them with stored knowledge",
        after_help = "Examples:\n  refinery refine\n  refinery refine src/pipeline.py docs/\n  refinery refine --prune"
    )]
    Refine {
        /// Files or directories (defaults to the configured source root)
        paths: Vec<PathBuf>,

        /// Drop knowledge for source files that no longer exist
        #[arg(long)]
        prune: bool,
    },

    #[command(about = "Set the intent of a code unit and mark it current")]
    Annotate {
        /// Source file containing the unit
        file: PathBuf,
        /// Unit identifier, e.g. pipeline:DataProcessor.process
        unit_id: String,
        intent: String,
    },

    #[command(about = "Sync refined knowledge into a vector index")]
    Index {
        /// Index name (defaults to `default_index`)
        #[arg(long)]
        index: Option<String>,
    },

    #[command(
        about = "Semantic search over indexed code units",
        after_help = "Examples:\n  refinery search \"parse config file\"\n  refinery search \"retry logic\" -k 3 --kind method\n  refinery search \"which test covers login\" --route"
    )]
    Search {
        query: String,

        /// Number of results
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,

        /// Only units of this tier (gold, silver, other)
        #[arg(long)]
        tier: Option<String>,

        /// Only units of this kind (function, class, method, chunk)
        #[arg(long)]
        kind: Option<UnitKind>,

        #[arg(long, conflicts_with = "route")]
        index: Option<String>,

        /// Pick indexes from keywords in the query
        #[arg(long)]
        route: bool,
    },

    #[command(about = "Remove code units from a vector index")]
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long)]
        index: Option<String>,
    },

    #[command(about = "Show knowledge and index statistics")]
    Status,
}

fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", THEME.error_with_icon(&format!("Configuration error: {e:#}")));
            std::process::exit(ExitCode::ConfigError.into());
        }
    };
    logging::init(cli.debug || settings.debug);

    let code = match run(cli.command, &settings) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", THEME.error_with_icon(&format!("{e:#}")));
            for suggestion in recovery_suggestions(&e) {
                eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
            }
            ExitCode::from_anyhow(&e)
        }
    };
    std::process::exit(code.into());
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("loading {}", path.display()))?,
        None => Settings::load().map_err(|e| anyhow::anyhow!("{e}"))?,
    };
    settings.validate().map_err(anyhow::Error::msg)?;
    Ok(settings)
}

fn recovery_suggestions(error: &anyhow::Error) -> Vec<&'static str> {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return e.recovery_suggestions();
        }
        if let Some(e) = cause.downcast_ref::<RefineError>() {
            return e.recovery_suggestions();
        }
    }
    Vec::new()
}

fn run(command: Commands, settings: &Settings) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(ExitCode::Success)
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(settings)?);
            Ok(ExitCode::Success)
        }
        Commands::Refine { paths, prune } => refine(settings, &paths, prune),
        Commands::Annotate {
            file,
            unit_id,
            intent,
        } => {
            let file = source_arg(settings, file)?;
            let unit = IntentManager::new(knowledge_store(settings))
                .update_intent(&file, &unit_id, &intent)?;
            println!(
                "{}",
                THEME.success_with_icon(&format!("{} is now {}", unit.unit_id, unit.lifecycle_state))
            );
            Ok(ExitCode::Success)
        }
        Commands::Index { index } => {
            let mut registry = open_registry(settings)?;
            let name = index.unwrap_or_else(|| settings.default_index.clone());
            let store = registry.get_or_open(&name)?;
            let knowledge = knowledge_store(settings);

            let spinner = create_spinner(&format!("Syncing index '{name}'"));
            let result = {
                let mut store = store.write();
                match store.sync_from_refinery(&knowledge) {
                    Ok(report) => store.persist().map(|()| report),
                    Err(e) => Err(e),
                }
            };
            spinner.finish_and_clear();
            let report = result?;

            println!(
                "{}",
                THEME.success_with_icon(&format!(
                    "Index '{name}': {} added, {} deactivated, {} deleted, {} unchanged",
                    report.added, report.deactivated, report.deleted, report.skipped
                ))
            );
            Ok(ExitCode::Success)
        }
        Commands::Search {
            query,
            top_k,
            tier,
            kind,
            index,
            route,
        } => {
            let mut registry = open_registry(settings)?;
            let names = if route {
                KeywordRouter::default().route(&query)
            } else {
                vec![index.unwrap_or_else(|| settings.default_index.clone())]
            };
            let stores = names
                .iter()
                .map(|name| registry.get_or_open(name))
                .collect::<Result<Vec<_>, _>>()?;

            let filter = SearchFilter {
                source_type: None,
                tier,
                kind: kind.map(|k| k.as_str().to_string()),
            };
            let top_k = top_k.unwrap_or(settings.search.top_k);
            let rendered = SearchFacade::over(stores).query(&query, top_k, &filter)?;
            if rendered.is_empty() {
                eprintln!("{}", THEME.warning_with_icon("No results found"));
                return Ok(ExitCode::NotFound);
            }
            println!("{rendered}");
            Ok(ExitCode::Success)
        }
        Commands::Delete { ids, index } => {
            let mut registry = open_registry(settings)?;
            let name = index.unwrap_or_else(|| settings.default_index.clone());
            let store = registry.get_or_open(&name)?;
            let removed = {
                let mut store = store.write();
                let removed = store.delete(ids.as_slice())?;
                store.persist()?;
                removed
            };
            println!(
                "{}",
                THEME.success_with_icon(&format!("Removed {removed} unit(s) from '{name}'"))
            );
            Ok(if removed == 0 {
                ExitCode::NotFound
            } else {
                ExitCode::Success
            })
        }
        Commands::Status => status(settings),
    }
}

fn refine(settings: &Settings, paths: &[PathBuf], prune: bool) -> anyhow::Result<ExitCode> {
    let extractors = ExtractorRegistry::from_settings(&settings.refine)?;
    let intent = PlaceholderIntent::new(settings.refine.placeholder_intent.clone());
    let refinery = KnowledgeRefinery::new(knowledge_store(settings), extractors, Box::new(intent));

    if prune {
        for removed in refinery.prune_missing()? {
            println!("Pruned {}", THEME.apply(&THEME.path, removed.display()));
        }
    }

    let files = collect_files(settings, paths);
    let pb = create_progress_bar(files.len() as u64, "Refining");
    let result = refinery.refine_with_progress(&files, |path| {
        pb.set_message(path.display().to_string());
        pb.inc(1);
    });
    pb.finish_and_clear();
    let report = result?;

    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Refined {} file(s): {} unit(s), {} new or stale",
            report.files_refined,
            report.units.len(),
            report.changed_count()
        ))
    );
    for failure in &report.failures {
        eprintln!(
            "{}",
            THEME.error_with_icon(&format!("{}: {}", failure.path.display(), failure.error))
        );
    }
    Ok(if report.is_clean() {
        ExitCode::Success
    } else {
        ExitCode::ExtractionError
    })
}

fn status(settings: &Settings) -> anyhow::Result<ExitCode> {
    let knowledge = knowledge_store(settings);
    let sources = knowledge.sources()?;
    let units: Vec<_> = knowledge.iter_units()?.collect();
    let changed = units.iter().filter(|u| u.lifecycle_state.is_changed()).count();

    println!("{}", THEME.apply(&THEME.header, "Knowledge"));
    println!(
        "  {} source file(s), {} unit(s), {} awaiting annotation",
        THEME.apply(&THEME.number, sources.len()),
        THEME.apply(&THEME.number, units.len()),
        THEME.apply(&THEME.number, changed)
    );

    let mut registry = open_registry(settings)?;
    println!("{}", THEME.apply(&THEME.header, "Indexes"));
    for name in registry.persisted_names() {
        let store = registry.get_or_open(&name)?;
        let store = store.read();
        println!(
            "  {}: {} document(s), {} inactive, {} vector(s), {} index",
            THEME.apply(&THEME.code, &name),
            store.len(),
            store.inactive_count(),
            store.vector_count(),
            store.index_kind()
        );
    }
    Ok(ExitCode::Success)
}

fn knowledge_store(settings: &Settings) -> KnowledgeStore {
    KnowledgeStore::new(settings.source_root_path(), settings.knowledge_root_path())
}

fn open_registry(settings: &Settings) -> anyhow::Result<IndexRegistry> {
    let embedder = create_generator(&settings.embedding)?;
    IndexRegistry::from_settings(settings, embedder).map_err(anyhow::Error::msg)
}

/// Expands directories with the walker; files pass through as given.
fn collect_files(settings: &Settings, paths: &[PathBuf]) -> Vec<PathBuf> {
    let roots = if paths.is_empty() {
        vec![settings.source_root_path()]
    } else {
        paths.to_vec()
    };
    let walker = FileWalker::new(Arc::new(settings.clone()));
    roots
        .into_iter()
        .flat_map(|root| {
            if root.is_dir() {
                walker.walk(&root)
            } else {
                vec![root]
            }
        })
        .collect()
}

/// Anchors a relative file argument at the current directory when the
/// source root is absolute, so knowledge paths line up with `refine`.
fn source_arg(settings: &Settings, file: PathBuf) -> anyhow::Result<PathBuf> {
    if file.is_relative() && settings.source_root_path().is_absolute() {
        return Ok(std::env::current_dir()?.join(file));
    }
    Ok(file)
}
