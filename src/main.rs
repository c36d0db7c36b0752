use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mushroom_grader::classification::{
    ClassificationPipeline, ImagePreprocessor, InferenceEngine, Interpretation, ResultInterpreter,
    Taxonomy,
};
use mushroom_grader::config::{CONFIDENCE_THRESHOLD, GraderConfig};
use mushroom_grader::core::db::{ResultRepository, ResultStore};
use mushroom_grader::models::{Category, ClassificationResult};
use mushroom_grader::worker::ClassifierWorker;

#[derive(Parser)]
#[command(name = "mushroom_grader")]
#[command(about = "Classify mushroom photos and keep a history of the results")]
struct Cli {
    /// Result database file
    #[arg(long, global = true, env = "MUSHROOM_GRADER_DB", default_value = "mushroom_grader.db")]
    db: PathBuf,

    /// Taxonomy JSON describing the model's classes (built-in table if omitted)
    #[arg(long, global = true, env = "MUSHROOM_GRADER_TAXONOMY", value_name = "FILE")]
    taxonomy: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify one or more images
    Classify {
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,

        /// Model file (.rten)
        #[arg(long, env = "MUSHROOM_GRADER_MODEL", value_name = "FILE")]
        model: PathBuf,

        /// Minimum score for a prediction to be accepted
        #[arg(long, default_value_t = CONFIDENCE_THRESHOLD)]
        threshold: f32,

        /// Print results without storing them
        #[arg(long)]
        no_save: bool,

        /// Copy each classified image into the store's image archive
        #[arg(long, conflicts_with = "no_save")]
        keep_image: bool,

        /// Notes attached to every stored result
        #[arg(long)]
        notes: Option<String>,

        /// Save preprocessing outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },
    /// List stored results, newest first
    #[command(group(ArgGroup::new("filter").args(["category", "poisonous", "edible", "search"])))]
    History {
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        poisonous: bool,
        #[arg(long)]
        edible: bool,
        /// Case-insensitive substring of the class name
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one result with its species description
    Show { id: i64 },
    /// Print aggregate counts
    Stats,
    /// Delete one result
    Delete { id: i64 },
    /// Delete every result
    Clear,
    /// Delete results older than the given number of days
    Prune {
        #[arg(long, value_name = "DAYS")]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let taxonomy = Arc::new(match &args.taxonomy {
        Some(path) => Taxonomy::open(path)?,
        None => Taxonomy::builtin()?,
    });
    // The model must produce one score per class in the table.
    let config = GraderConfig::default().with_num_classes(taxonomy.len());

    match args.command {
        Command::Classify {
            images,
            model,
            threshold,
            no_save,
            keep_image,
            notes,
            debug_out,
        } => {
            let config = config.with_threshold(threshold);
            let store = if no_save {
                None
            } else {
                Some(ResultStore::open(&args.db).await?)
            };
            let outcome = classify(
                &config,
                &model,
                taxonomy,
                &images,
                store.as_ref(),
                keep_image,
                notes.as_deref(),
                debug_out,
            )
            .await;
            if let Some(store) = store {
                store.close().await?;
            }
            outcome?;
        }
        command => {
            let store = ResultStore::open(&args.db).await?;
            let outcome = run_store_command(&store, &taxonomy, command).await;
            store.close().await?;
            outcome?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn classify(
    config: &GraderConfig,
    model: &Path,
    taxonomy: Arc<Taxonomy>,
    images: &[PathBuf],
    store: Option<&ResultStore>,
    keep_image: bool,
    notes: Option<&str>,
    debug_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut preprocessor = ImagePreprocessor::new(config);
    if let Some(debug_dir) = debug_out {
        preprocessor = preprocessor.with_debug(debug_dir)?;
    }
    let mut engine = InferenceEngine::new(config);
    engine
        .load_file(model)
        .with_context(|| format!("Loading model {}", model.display()))?;
    let interpreter = ResultInterpreter::new(taxonomy).with_threshold(config.confidence_threshold);
    let worker = ClassifierWorker::spawn(ClassificationPipeline::new(
        preprocessor,
        engine,
        interpreter,
    )?)?;

    // Queue everything up front; results come back in submission order.
    let mut pending = Vec::with_capacity(images.len());
    for image in images {
        pending.push((image, worker.submit(image.clone())?));
    }

    let mut failures = 0;
    for (image, result) in pending {
        let classification = match result.await {
            Ok(Interpretation::Accepted(classification)) => classification,
            Ok(Interpretation::Rejected(rejection)) => {
                println!(
                    "{}: no confident match (best score {:.2}% below {:.2}%)",
                    image.display(),
                    rejection.best_score * 100.0,
                    rejection.threshold * 100.0
                );
                continue;
            }
            Err(e) => {
                error!("Failed to classify {}: {}", image.display(), e);
                failures += 1;
                continue;
            }
        };

        println!(
            "{}: {} ({:.2}%){}{}",
            image.display(),
            classification.class_name,
            classification.confidence * 100.0,
            classification
                .grade
                .as_deref()
                .map(|grade| format!(" [{}]", grade))
                .unwrap_or_default(),
            if classification.is_poisonous { " POISONOUS" } else { "" }
        );

        let Some(store) = store else { continue };
        let mut classification = classification;
        if keep_image {
            classification = classification.with_image_path(store.archive_image(image).await?);
        }
        if let Some(notes) = notes {
            classification = classification.with_notes(notes);
        }
        let id = store.insert(&classification).await?;
        info!("Saved {} as result {}", image.display(), id);
    }

    tokio::task::spawn_blocking(move || worker.shutdown()).await?;

    if failures > 0 {
        anyhow::bail!("{} of {} images could not be classified", failures, images.len());
    }
    Ok(())
}

async fn run_store_command(
    store: &ResultStore,
    taxonomy: &Taxonomy,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::History {
            category,
            poisonous,
            edible,
            search,
            limit,
        } => {
            let mut results = match (category, search) {
                (Some(category), _) => store.list_by_category(category).await?,
                (None, Some(needle)) => store.search_by_name(&needle).await?,
                (None, None) if poisonous => store.list_poisonous().await?,
                (None, None) if edible => store.list_edible().await?,
                (None, None) => match limit {
                    Some(limit) => store.list_recent(limit).await?,
                    None => store.list_all().await?,
                },
            };
            if let Some(limit) = limit {
                results.truncate(limit as usize);
            }
            if results.is_empty() {
                println!("No results.");
            }
            for result in &results {
                print_summary(result)?;
            }
        }
        Command::Show { id } => {
            let result = store
                .get_by_id(id)
                .await?
                .with_context(|| format!("No result with id {}", id))?;
            print_summary(&result)?;
            println!("Category: {}", result.category);
            if let Some(path) = &result.image_path {
                println!("Image:    {}", path.display());
            }
            if let Some(notes) = &result.notes {
                println!("Notes:    {}", notes);
            }
            println!();
            println!("{}", taxonomy.describe(result.class_index as usize));
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("Total:     {}", stats.total);
            println!("Poisonous: {}", stats.poisonous);
            println!("Edible:    {}", stats.edible);
            for (category, count) in &stats.by_category {
                println!("  {:<10} {}", category.as_str(), count);
            }
        }
        Command::Delete { id } => {
            if !store.delete_by_id(id).await? {
                anyhow::bail!("No result with id {}", id);
            }
            println!("Deleted result {}", id);
        }
        Command::Clear => {
            let deleted = store.delete_all().await?;
            println!("Deleted {} results", deleted);
        }
        Command::Prune { older_than_days } => {
            let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(older_than_days));
            let deleted = store.delete_older_than(cutoff).await?;
            println!("Deleted {} results older than {}", deleted, cutoff.format(&Rfc3339)?);
        }
        Command::Classify { .. } => anyhow::bail!("classify does not run as a store command"),
    }
    Ok(())
}

fn print_summary(result: &ClassificationResult) -> anyhow::Result<()> {
    println!(
        "#{:<5} {}  {} ({}%){}{}",
        result.id,
        result.timestamp.format(&Rfc3339)?,
        result.class_name,
        result.confidence_percentage(),
        result
            .grade
            .as_deref()
            .map(|grade| format!(" [{}]", grade))
            .unwrap_or_default(),
        if result.is_poisonous { " POISONOUS" } else { "" }
    );
    Ok(())
}
