use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

mod app;
mod book;
mod chat;
mod config;
mod handler;
mod rag;
mod tui;
mod ui;

use app::App;
use book::Book;
use config::Config;
use rag::RagClient;

#[derive(Parser)]
#[command(name = "ragbook")]
#[command(about = "Read a documentation book in the terminal, with RAG-backed Q&A")]
struct Cli {
    /// Book directory (overrides config and RAGBOOK_BOOK_DIR)
    #[arg(long, global = true)]
    book_dir: Option<PathBuf>,

    /// RAG backend URL (overrides config and RAGBOOK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the backend a one-shot question
    Ask {
        /// Your question
        question: String,
        /// Scope the question to a passage of text
        #[arg(short, long)]
        selected_text: Option<String>,
    },
    /// Print the table of contents
    Toc,
    /// Keyword search over chapter text
    Search {
        /// Search query
        query: String,
        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|_| Config::new());

    let api_url = cli
        .api_url
        .clone()
        .unwrap_or_else(|| config.effective_api_url());
    let book_dir = cli
        .book_dir
        .clone()
        .unwrap_or_else(|| config.effective_book_dir());
    let rag = RagClient::new(&api_url, config.effective_top_k());

    match cli.command {
        Some(Commands::Ask {
            question,
            selected_text,
        }) => {
            init_cli_tracing();
            ask(&rag, &question, selected_text.as_deref()).await
        }
        Some(Commands::Toc) => {
            init_cli_tracing();
            let book = Book::load(&book_dir).await?;
            print_toc(&book);
            Ok(())
        }
        Some(Commands::Search { query, limit }) => {
            init_cli_tracing();
            let book = Book::load(&book_dir).await?;
            print_search(&book, &query, limit);
            Ok(())
        }
        None => run_tui(book_dir, rag).await,
    }
}

async fn run_tui(book_dir: PathBuf, rag: RagClient) -> Result<()> {
    // Log to a file; stderr hosts the terminal backend
    let _guard = init_file_tracing()?;

    let book = Book::load(&book_dir)
        .await
        .with_context(|| format!("Failed to load book from {:?}", book_dir))?;
    let mut app = App::new(book, rag);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let result = run_loop(&mut terminal, &mut events, &mut app).await;
    tui::restore()?;
    result
}

async fn run_loop(
    terminal: &mut tui::Tui,
    events: &mut tui::EventHandler,
    app: &mut App,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(app, event)?;
        }

        // Apply the outcome of a finished query; the tick event keeps this
        // polled while the user is idle
        if app.chat.pending_finished() {
            app.chat.resolve_pending().await;
        }
    }
    Ok(())
}

async fn ask(rag: &RagClient, question: &str, selected_text: Option<&str>) -> Result<()> {
    if question.trim().is_empty() {
        println!("{}", "Nothing to ask".yellow());
        return Ok(());
    }

    println!("{} {}\n", "Asking".bold().magenta(), rag.base_url().dimmed());

    let result = match selected_text {
        Some(text) => rag.query_selected_text(text, question).await,
        None => rag.query(question).await,
    };

    match result {
        Ok(response) => {
            let answer = if response.answer.trim().is_empty() {
                chat::FALLBACK_ANSWER.to_string()
            } else {
                response.answer
            };
            println!("{}", "Answer:".bold().green());
            println!("{}", answer);

            if !response.sources.is_empty() {
                println!("\n{}", "Sources:".bold().blue());
                for source in response.sources.iter().take(chat::SOURCE_LIMIT) {
                    match &source.module {
                        Some(module) => println!(
                            "- {} {}",
                            source.title.yellow(),
                            format!("({})", module).dimmed()
                        ),
                        None => println!("- {}", source.title.yellow()),
                    }
                }
            }
        }
        Err(e) => {
            println!("{}: {:#}", "Error querying the RAG backend".red(), e);
            println!(
                "Make sure the backend is running at {}",
                rag.base_url().bold()
            );
        }
    }

    Ok(())
}

fn print_toc(book: &Book) {
    println!("\n{}", "Table of Contents".bold().blue());
    println!("{}", "=".repeat(40).dimmed());

    for module in book.modules() {
        println!("\n{}", module.bold().green());
        for &idx in book.chapters_in(module) {
            if let Some(chapter) = book.chapter(idx) {
                println!(
                    "  - {} {}",
                    chapter.title,
                    chapter.path.display().to_string().dimmed()
                );
            }
        }
    }
}

fn print_search(book: &Book, query: &str, limit: usize) {
    println!("Searching for: {}", query.bold().cyan());

    let hits = book.search(query, limit);

    if hits.is_empty() {
        println!("{}", "No results found".red());
        return;
    }

    println!("\n{} results found:\n", hits.len().to_string().bold().green());

    for (i, hit) in hits.iter().enumerate() {
        if let Some(chapter) = book.chapter(hit.chapter) {
            println!(
                "{}. {} - {}",
                (i + 1).to_string().bold().blue(),
                chapter.title.bold().yellow(),
                chapter.module.dimmed()
            );
            println!("   {}\n", hit.line);
        }
    }
}

fn init_cli_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn init_file_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let log_dir = Config::log_dir()?;
    std::fs::create_dir_all(&log_dir)?;
    let appender = tracing_appender::rolling::never(&log_dir, "ragbook.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
