use std::future::Future;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dreams_ai::{LayoutMode, Projection, SearchHit};
use dreams_cli::{DreamService, PolishOutcome, ServiceError};
use dreams_config::DreamsConfig;
use dreams_core::{DreamCategory, DreamDraft, DreamEntry, DreamUpdate, Milestone};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "dreams",
    version,
    about = "Dream board CLI (analyze, polish, roadmap, search, layout)"
)]
struct Cli {
    /// TOML config file (defaults to $DREAMS_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract dreams from free-form text
    Analyze(AnalyzeArgs),
    /// Save dreams from a JSON file (or stdin)
    Save(SaveArgs),
    /// List every saved dream
    List,
    /// Show one dream
    Show(IdArgs),
    /// Change fields of a dream
    Update(UpdateArgs),
    /// Delete a dream
    Delete(IdArgs),
    /// Rewrite a dream as a SMART goal
    Polish(IdArgs),
    /// Break a dream into dated milestones
    Roadmap(RoadmapArgs),
    /// Find dreams similar to a query
    Search(SearchArgs),
    /// 3D coordinates for every dream
    Layout,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Text to analyze (read from stdin when omitted)
    text: Option<String>,
    /// Save the extracted dreams
    #[arg(long)]
    save: bool,
}

#[derive(Args)]
struct SaveArgs {
    /// JSON file holding a dream, a list of dreams, or `{"dreams": [...]}`
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct IdArgs {
    id: String,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, value_parser = parse_category)]
    category: Option<DreamCategory>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    completed: Option<bool>,
}

#[derive(Args)]
struct RoadmapArgs {
    id: String,
    /// Assumed age of the dreamer
    #[arg(long, default_value_t = dreams_ai::DEFAULT_AGE)]
    age: u32,
    /// Print the model's answer as it arrives instead of saving milestones
    #[arg(long)]
    stream: bool,
}

#[derive(Args)]
struct SearchArgs {
    query: String,
    /// Maximum number of results (defaults to `search.default_limit`)
    #[arg(long)]
    limit: Option<usize>,
}

fn parse_category(text: &str) -> std::result::Result<DreamCategory, String> {
    DreamCategory::parse_label(text).ok_or_else(|| {
        let labels: Vec<&str> = DreamCategory::ALL.iter().map(|c| c.label()).collect();
        format!("unknown category; expected one of: {}", labels.join(", "))
    })
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            err.downcast_ref::<ServiceError>()
                .map_or(2, ServiceError::exit_code)
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config =
        DreamsConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    dreams_config::init_tracing(&config.logging);

    // Built before any runtime exists: embedding backends may use blocking HTTP.
    let service = DreamService::from_config(&config)?;
    let json = cli.json;

    match cli.command {
        Command::Analyze(args) => {
            let text = match args.text {
                Some(text) => text,
                None => read_stdin()?,
            };
            let drafts = block_on(service.analyze(&text, CancellationToken::new()))??;
            if args.save {
                let entries = drafts.into_iter().map(DreamDraft::into_entry).collect();
                print_output(&service.save_batch(entries)?, json)?;
            } else {
                print_output(&drafts, json)?;
            }
        }
        Command::Save(args) => {
            let text = match args.file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => read_stdin()?,
            };
            let saved = service.save_batch(parse_batch(&text)?)?;
            print_output(&saved, json)?;
        }
        Command::List => print_output(&service.list()?, json)?,
        Command::Show(args) => print_output(&service.get(&args.id)?, json)?,
        Command::Update(args) => {
            let update = DreamUpdate {
                title: args.title,
                category: args.category,
                suggested_target_year: args.year,
                completed: args.completed,
                ..DreamUpdate::default()
            };
            if update.is_empty() {
                return Err(ServiceError::InvalidInput("nothing to update".into()).into());
            }
            print_output(&service.update(&args.id, update)?, json)?;
        }
        Command::Delete(args) => {
            service.delete(&args.id)?;
            print_output(&Deleted { deleted: args.id }, json)?;
        }
        Command::Polish(args) => {
            let outcome = block_on(service.polish(&args.id, CancellationToken::new()))??;
            print_output(&outcome, json)?;
        }
        Command::Roadmap(args) if args.stream => {
            block_on(stream_roadmap(&service, &args))??;
        }
        Command::Roadmap(args) => {
            let milestones =
                block_on(service.roadmap(&args.id, args.age, CancellationToken::new()))??;
            print_output(&milestones, json)?;
        }
        Command::Search(args) => {
            print_output(&service.search(&args.query, args.limit)?, json)?;
        }
        Command::Layout => print_output(&service.layout()?, json)?,
    }

    Ok(0)
}

/// Run `future` to completion on a runtime that lives only for this call.
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

async fn stream_roadmap(service: &DreamService, args: &RoadmapArgs) -> Result<()> {
    let mut stream = service
        .roadmap_stream(&args.id, args.age, CancellationToken::new())
        .await?;
    let mut stdout = std::io::stdout().lock();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read stdin")?;
    Ok(text)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Batch {
    List(Vec<DreamEntry>),
    Envelope { dreams: Vec<DreamEntry> },
    One(DreamEntry),
}

fn parse_batch(text: &str) -> Result<Vec<DreamEntry>, ServiceError> {
    match serde_json::from_str::<Batch>(text) {
        Ok(Batch::List(dreams)) | Ok(Batch::Envelope { dreams }) => Ok(dreams),
        Ok(Batch::One(dream)) => Ok(vec![dream]),
        Err(_) => Err(ServiceError::InvalidInput(
            "expected a dream, a list of dreams, or {\"dreams\": [...]}".into(),
        )),
    }
}

#[derive(Serialize)]
struct Deleted {
    deleted: String,
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    // Human output for key types. Everything else falls back to pretty JSON.
    let any = value as &dyn std::any::Any;
    if let Some(drafts) = any.downcast_ref::<Vec<DreamDraft>>() {
        for draft in drafts {
            println!(
                "[{}] {} ({})",
                draft.category, draft.title, draft.suggested_target_year
            );
        }
    } else if let Some(dreams) = any.downcast_ref::<Vec<DreamEntry>>() {
        for dream in dreams {
            print_dream_line(dream);
        }
    } else if let Some(dream) = any.downcast_ref::<DreamEntry>() {
        print_dream_line(dream);
        if let Some(goal) = &dream.smart_data {
            println!("  specific: {}", goal.specific);
            println!("  measurable: {}", goal.measurable);
            println!("  achievable: {}", goal.achievable);
            println!("  relevant: {}", goal.relevant);
            println!("  time_bound: {}", goal.time_bound);
        }
        for milestone in &dream.milestones {
            let mark = if milestone.completed { "x" } else { " " };
            println!("  [{mark}] {} {}", milestone.target_year, milestone.title);
        }
    } else if let Some(milestones) = any.downcast_ref::<Vec<Milestone>>() {
        for milestone in milestones {
            println!("{} {}", milestone.target_year, milestone.title);
        }
    } else if let Some(outcome) = any.downcast_ref::<PolishOutcome>() {
        println!("{}", outcome.goal.polished_title);
        println!("  specific: {}", outcome.goal.specific);
        println!("  measurable: {}", outcome.goal.measurable);
        println!("  achievable: {}", outcome.goal.achievable);
        println!("  relevant: {}", outcome.goal.relevant);
        println!("  time_bound: {}", outcome.goal.time_bound);
        if let Some(reason) = &outcome.degraded {
            println!("not saved: {reason}");
        }
    } else if let Some(hits) = any.downcast_ref::<Vec<SearchHit>>() {
        for hit in hits {
            println!("{:.3}  {}  {}", hit.score, hit.dream.id, hit.dream.title);
        }
    } else if let Some(projection) = any.downcast_ref::<Projection>() {
        match &projection.mode {
            LayoutMode::Pca => println!("mode: pca"),
            LayoutMode::Trivial => println!("mode: trivial"),
            LayoutMode::Fallback { reason } => println!("mode: fallback ({reason})"),
            LayoutMode::Degraded { reason } => println!("mode: degraded ({reason})"),
        }
        for point in &projection.points {
            println!(
                "{:>8.3} {:>8.3} {:>8.3}  {}  {}",
                point.x, point.y, point.z, point.id, point.title
            );
        }
    } else if let Some(deleted) = any.downcast_ref::<Deleted>() {
        println!("deleted {}", deleted.deleted);
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }

    Ok(())
}

fn print_dream_line(dream: &DreamEntry) {
    let done = if dream.completed { " (done)" } else { "" };
    println!(
        "{}  [{}] {} ({}){done}",
        dream.id, dream.category, dream.title, dream.suggested_target_year
    );
}
