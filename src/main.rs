use clap::{CommandFactory, Parser};
use inquire::InquireError;
use nlquery::cli::{self, Args};
use nlquery::config::{Config, OutputFormat};
use nlquery::database::{QueryEngine, create_query_engine};
use nlquery::llm::QueryGenerator;
use nlquery::logging;
use nlquery::session::{Session, SessionOutcome};
use nlquery::table::{NO_RESULTS_MESSAGE, NormalizedTable};
use nlquery::validate::validate;
use nu_ansi_term::{Color, Style};
use std::error::Error as StdError;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info};

const DEFAULT_EXPORT_FILE: &str = "results.csv";

/// How results are shown after execution
struct OutputSettings<'a> {
    format: OutputFormat,
    max_rows: usize,
    export: Option<&'a Path>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", Color::Red.bold().paint("Error:"), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn StdError>> {
    if let Some(shell) = args.completions {
        print_completions(shell);
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(args.config.as_deref())?;
    let _log_guard = match logging::init(&config.logging, args.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: Failed to initialize logging: {e}");
            None
        }
    };
    debug!("nlquery started with {:?}", args);

    let connection_info = args.connection_info(&config)?;
    info!("Using {} database", connection_info.database_type);
    let engine = create_query_engine(connection_info, &config.database);

    if args.schema {
        let schema = engine.schema().await?;
        println!("{}", schema.to_json_pretty());
        return Ok(ExitCode::SUCCESS);
    }

    let display = OutputSettings {
        format: args.output_format(&config),
        max_rows: config.output.max_rows_displayed,
        export: args.output.as_deref(),
    };

    if let Some(ref text) = args.query {
        let session = Session::without_generator(engine);
        let outcome = session.execute_text(text).await;
        return Ok(show_outcome(&outcome, &display));
    }

    config.validate()?;
    let generator = QueryGenerator::from_config(&config.llm)?;
    debug!("Using LLM provider {}", generator.provider_name());
    let mut session = Session::new(engine, generator);

    match args.question {
        Some(ref question) => one_shot(&mut session, question, args.execute, &display).await,
        None => interactive(&mut session, &display).await,
    }
}

fn print_completions(shell: cli::Shell) {
    let mut cmd = Args::command();
    let name = "nlquery";
    match shell {
        cli::Shell::Bash => {
            clap_complete::generate(clap_complete::shells::Bash, &mut cmd, name, &mut io::stdout())
        }
        cli::Shell::Zsh => {
            clap_complete::generate(clap_complete::shells::Zsh, &mut cmd, name, &mut io::stdout())
        }
        cli::Shell::Fish => {
            clap_complete::generate(clap_complete::shells::Fish, &mut cmd, name, &mut io::stdout())
        }
        cli::Shell::PowerShell => clap_complete::generate(
            clap_complete::shells::PowerShell,
            &mut cmd,
            name,
            &mut io::stdout(),
        ),
        cli::Shell::Elvish => {
            clap_complete::generate(clap_complete::shells::Elvish, &mut cmd, name, &mut io::stdout())
        }
    }
}

async fn one_shot(
    session: &mut Session,
    question: &str,
    execute: bool,
    display: &OutputSettings<'_>,
) -> Result<ExitCode, Box<dyn StdError>> {
    let query = match session.generate(question).await {
        Ok(query) => query,
        Err(e) => {
            eprintln!("{} {}", Color::Red.bold().paint("Error:"), e.user_message());
            return Ok(ExitCode::FAILURE);
        }
    };

    if !execute {
        println!("{}", query.text);
        if let Err(e) = validate(query) {
            eprintln!("{} {}", Color::Yellow.paint("Warning:"), e);
            return Ok(ExitCode::FAILURE);
        }
        return Ok(ExitCode::SUCCESS);
    }
    print_query(&query.text, &query.dialect.to_string());

    let outcome = session.execute().await;
    Ok(show_outcome(&outcome, display))
}

async fn interactive(
    session: &mut Session,
    display: &OutputSettings<'_>,
) -> Result<ExitCode, Box<dyn StdError>> {
    println!(
        "{}",
        Color::Cyan
            .bold()
            .paint(format!("nlquery: ask your {} database a question", session.database_type()))
    );

    loop {
        let question = match inquire::Text::new("Question:")
            .with_help_message("Empty input or Esc to quit")
            .prompt_skippable()
        {
            Ok(Some(question)) if !question.trim().is_empty() => question,
            Ok(_) | Err(InquireError::OperationInterrupted) => break,
            Err(e) => return Err(e.into()),
        };

        match session.generate(&question).await {
            Ok(query) => print_query(&query.text, &query.dialect.to_string()),
            Err(e) => {
                eprintln!("{} {}", Color::Red.bold().paint("Error:"), e.user_message());
                continue;
            }
        }

        let confirmed = inquire::Confirm::new("Execute this query?")
            .with_default(true)
            .prompt_skippable()?;
        if confirmed != Some(true) {
            continue;
        }

        // Exports are offered interactively instead of written unconditionally
        let outcome = session.execute().await;
        show_outcome(
            &outcome,
            &OutputSettings {
                export: None,
                ..*display
            },
        );

        if let SessionOutcome::Table(ref table) = outcome {
            offer_export(table, display.export)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn offer_export(table: &NormalizedTable, default_path: Option<&Path>) -> Result<(), Box<dyn StdError>> {
    let wanted = inquire::Confirm::new("Export results to CSV?")
        .with_default(false)
        .prompt_skippable()?;
    if wanted != Some(true) {
        return Ok(());
    }

    let default = default_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| DEFAULT_EXPORT_FILE.to_string());
    if let Some(path) = inquire::Text::new("File name:")
        .with_default(&default)
        .prompt_skippable()?
    {
        export_csv(table, Path::new(&path));
    }
    Ok(())
}

fn print_query(text: &str, dialect: &str) {
    println!(
        "{} {}",
        Style::new().dimmed().paint(format!("Generated {dialect} query:")),
        Color::Green.paint(text)
    );
}

fn export_csv(table: &NormalizedTable, path: &Path) -> bool {
    match table.write_csv(path) {
        Ok(()) => {
            println!("Results exported to {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("{} {}", Color::Red.bold().paint("Export failed:"), e);
            false
        }
    }
}

/// Print an outcome and map it to an exit code
fn show_outcome(outcome: &SessionOutcome, display: &OutputSettings<'_>) -> ExitCode {
    match outcome {
        SessionOutcome::Table(table) => {
            let printed = match display.format {
                OutputFormat::Table => Ok(table.render(Some(display.max_rows))),
                OutputFormat::Json => table.to_json_pretty(),
                OutputFormat::Csv => table.to_csv(),
            };
            match printed {
                Ok(text) => println!("{}", text.trim_end()),
                Err(e) => {
                    eprintln!("{} {}", Color::Red.bold().paint("Error:"), e);
                    return ExitCode::FAILURE;
                }
            }
            match display.export {
                Some(path) if !export_csv(table, path) => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
        SessionOutcome::NoResults => {
            println!("{}", Color::Yellow.paint(NO_RESULTS_MESSAGE));
            ExitCode::SUCCESS
        }
        SessionOutcome::Rejected(e) => {
            eprintln!(
                "{} {}",
                Color::Red.bold().paint("Query validation failed:"),
                e
            );
            ExitCode::FAILURE
        }
        SessionOutcome::Failed(message) => {
            eprintln!("{}", Color::Red.paint(message));
            ExitCode::FAILURE
        }
    }
}
