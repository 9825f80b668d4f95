use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tabletalk_core::dictionary::Dictionary;
use tabletalk_core::key_manager::KeyManager;
use tabletalk_core::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use tabletalk_core::pipeline::{Pipeline, PipelineConfig};
use tabletalk_core::prompt::PromptTemplate;
use tabletalk_core::session::{list_sessions, Session, Turn};
use tabletalk_core::table::Table;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "tabletalk — ask natural-language questions about a tabular file")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one question through the full pipeline
    Ask {
        #[arg(long)]
        table: PathBuf,
        /// Optional dictionary CSV (column_name,data_type,description), used
        /// verbatim instead of a generated one
        #[arg(long)]
        dictionary: Option<PathBuf>,
        /// Custom query prompt template file; must contain {question},
        /// {table_name}, {dictionary_text} and {sample_rows}
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long)]
        question: String,
        /// Also print the generated snippet
        #[arg(long, default_value_t = false)]
        show_code: bool,
    },
    /// Interactive chat over one table
    Chat {
        #[arg(long)]
        table: PathBuf,
        #[arg(long)]
        dictionary: Option<PathBuf>,
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Generate a data dictionary for a table and print it as CSV
    Dictionary {
        #[arg(long)]
        table: PathBuf,
    },
    /// Environment checks: key presence, model, endpoint
    Doctor,
    /// List persisted sessions, newest first
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_tracing();
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask { table, dictionary, template, question, show_code } => {
            cmd_ask(&table, dictionary.as_deref(), template.as_deref(), &question, show_code).await
        }
        Commands::Chat { table, dictionary, template } => {
            cmd_chat(&table, dictionary.as_deref(), template.as_deref()).await
        }
        Commands::Dictionary { table } => cmd_dictionary(&table).await,
        Commands::Doctor => cmd_doctor(),
        Commands::Sessions { limit } => cmd_sessions(limit),
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Credential and endpoint resolution happens once, before any remote call;
/// a missing key fails here, not mid-turn.
fn build_pipeline(
    table_path: &Path,
    dictionary_path: Option<&Path>,
    template_path: Option<&Path>,
    session: Session,
) -> Result<Pipeline> {
    let api_key = KeyManager::new()?.resolve()?;
    let cfg = PipelineConfig {
        api_key,
        model: std::env::var("TABLETALK_MODEL").ok(),
        base_url: std::env::var("TABLETALK_BASE_URL").ok(),
    };

    let table = Table::from_csv_path(table_path)
        .with_context(|| format!("loading table from {}", table_path.display()))?;
    tracing::info!(table = %table.name, rows = table.n_rows(), cols = table.n_cols(), "table loaded");

    let dictionary = match dictionary_path {
        Some(p) => Some(
            Dictionary::from_csv_path(p).with_context(|| format!("loading dictionary from {}", p.display()))?,
        ),
        None => None,
    };
    let template = match template_path {
        Some(p) => Some(load_template(p)?),
        None => None,
    };
    Ok(Pipeline::new(cfg, table, dictionary, template, session))
}

fn load_template(path: &Path) -> Result<PromptTemplate> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading template from {}", path.display()))?;
    Ok(PromptTemplate::custom(text)?)
}

fn print_turn(turn: &Turn, show_code: bool) {
    if show_code {
        if let Some(snippet) = &turn.snippet {
            println!("--- snippet ---");
            println!("{snippet}");
            println!("---------------");
        }
    }
    if let Some(answer) = &turn.answer_text {
        println!("Result: {answer}");
    }
    println!("{}", turn.message());
}

async fn cmd_ask(
    table: &Path,
    dictionary: Option<&Path>,
    template: Option<&Path>,
    question: &str,
    show_code: bool,
) -> Result<()> {
    let mut pipeline = build_pipeline(table, dictionary, template, Session::create(None)?)?;
    let turn = pipeline.run_turn(question).await?;
    print_turn(turn, show_code);
    Ok(())
}

async fn cmd_chat(table: &Path, dictionary: Option<&Path>, template: Option<&Path>) -> Result<()> {
    let mut pipeline = build_pipeline(table, dictionary, template, Session::create(None)?)?;
    println!(
        "Loaded `{}` ({} rows, {} columns). Ask a question, or :help for commands.",
        pipeline.table().name,
        pipeline.table().n_rows(),
        pipeline.table().n_cols()
    );
    if pipeline.dictionary().is_none() {
        println!("Generating data dictionary...");
        match pipeline.build_dictionary().await {
            Ok(d) => println!("Dictionary ready ({} columns described).", d.len()),
            Err(e) => println!("Could not generate dictionary: {e}"),
        }
    }

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').map(|(a, b)| (a, b.trim())).unwrap_or((line, "")) {
            (":quit", _) | (":q", _) => break,
            (":help", _) => print_help(),
            (":history", _) => {
                if pipeline.session().is_empty() {
                    println!("(history is empty)");
                }
                for turn in pipeline.session().turns() {
                    println!("[you] {}", turn.question);
                    println!("[tabletalk] {}", turn.message());
                }
            }
            (":snippet", _) => match pipeline.session().last().and_then(|t| t.snippet.as_deref()) {
                Some(snippet) => println!("{snippet}"),
                None => println!("(no snippet yet)"),
            },
            (":dictionary", _) => match pipeline.dictionary() {
                Some(d) => print!("{}", d.to_csv_text()),
                None => println!("(no dictionary yet)"),
            },
            (":template", path) if !path.is_empty() => match load_template(Path::new(path)) {
                Ok(t) => {
                    pipeline.set_template(t);
                    println!("Template replaced.");
                }
                Err(e) => println!("Template rejected: {e}"),
            },
            (":template", _) => println!("usage: :template <file>"),
            (":clear", _) => {
                pipeline.clear_history();
                println!("History cleared.");
            }
            (cmd, _) if cmd.starts_with(':') => println!("Unknown command {cmd}; try :help"),
            _ => match pipeline.run_turn(line).await {
                Ok(turn) => print_turn(turn, false),
                Err(e) => println!("Error: {e}"),
            },
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "\
:history          show all turns, oldest first
:snippet          show the last generated snippet
:dictionary       show the active data dictionary as CSV
:template FILE    replace the query prompt template
:clear            clear the turn history
:quit             exit"
    );
}

async fn cmd_dictionary(table: &Path) -> Result<()> {
    let mut pipeline = build_pipeline(table, None, None, Session::in_memory())?;
    let dict = pipeline.build_dictionary().await?;
    print!("{}", dict.to_csv_text());
    Ok(())
}

fn cmd_doctor() -> Result<()> {
    println!("tabletalk doctor:");
    match KeyManager::new().and_then(|km| km.resolve()) {
        Ok(key) => println!(" - API key: present ({})", KeyManager::fingerprint(&key)),
        Err(e) => println!(" - API key: MISSING ({e})"),
    }
    let model = std::env::var("TABLETALK_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let base = std::env::var("TABLETALK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    println!(" - model: {model}");
    println!(" - endpoint: {base}");
    Ok(())
}

fn cmd_sessions(limit: usize) -> Result<()> {
    let sessions = list_sessions(limit)?;
    if sessions.is_empty() {
        println!("No persisted sessions.");
        return Ok(());
    }
    for s in sessions {
        let n_turns = std::fs::read_dir(&s.dir).map(|it| it.count()).unwrap_or(0);
        println!("- {}  [{} turn(s)]  {}", s.id, n_turns, s.dir.display());
    }
    Ok(())
}
