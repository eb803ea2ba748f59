use std::io::{self, BufRead, Write};
use std::process::{Command, ExitCode};

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nus_sync::config::ConfigLoader;
use nus_sync::domain::TitleId;
use nus_sync::error::NusError;
use nus_sync::fetch::{Endpoints, HttpFetcher};
use nus_sync::progress::ConsoleProgress;
use nus_sync::sync::{BatchSummary, PostRunHook, SyncOptions, Syncer};
use nus_sync::titledb::{HttpTitleDb, NoTitleDb, TitleNameLookup};

#[derive(Parser)]
#[command(name = "nus-sync")]
#[command(about = "Explore and download 3DS/Wii U title contents from the Nintendo Update Server")]
#[command(version, author)]
struct Cli {
    /// One or more title ids (16 hex characters)
    #[arg(required = true)]
    title_ids: Vec<String>,

    #[arg(long)]
    config: Option<String>,

    /// Directory to save downloaded contents
    #[arg(long)]
    download_dir: Option<Utf8PathBuf>,

    /// Directory holding {titleid}.tik files
    #[arg(long)]
    ticket_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    /// Re-download even if the file already exists
    #[arg(long)]
    force: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors and the final summary
    #[arg(short, long)]
    quiet: bool,

    /// Write a {titleid}_report.json per title
    #[arg(long)]
    json: bool,

    /// Disable hash checking
    #[arg(long)]
    nohash: bool,

    /// Also download .h3 hash tree files for each content
    #[arg(long)]
    h3: bool,

    /// Don't move files into a per-title folder or copy the ticket
    #[arg(long)]
    no_organize: bool,

    /// Skip the remote title name lookup
    #[arg(long)]
    no_title_db: bool,

    /// Command to offer after the run when a ticket was attached
    #[arg(long)]
    decrypt_command: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<NusError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &NusError) -> u8 {
    match error {
        NusError::InvalidTitleId(_)
        | NusError::MissingConfig(_)
        | NusError::ConfigRead(_)
        | NusError::ConfigParse(_) => 2,
        NusError::NotFound(_) | NusError::Transfer { .. } | NusError::TransferStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let progress = if cli.quiet {
        ConsoleProgress::hidden()
    } else {
        ConsoleProgress::new()
    };
    let log_writer = progress.log_writer();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(move || log_writer.clone())
        .init();

    let titles = cli
        .title_ids
        .iter()
        .map(|value| value.parse::<TitleId>())
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;

    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "loaded config");
    }

    let fetcher = HttpFetcher::new(config.connect_timeout, config.timeout).into_diagnostic()?;
    let endpoints = Endpoints::new(cli.base_url.as_deref().unwrap_or(&config.base_url));
    let options = SyncOptions {
        download_dir: cli.download_dir.unwrap_or(config.download_dir),
        ticket_dir: cli.ticket_dir.unwrap_or(config.ticket_dir),
        force: cli.force,
        verify_hashes: !cli.nohash,
        fetch_h3: cli.h3,
        organize: !cli.no_organize,
        workers: cli.workers.unwrap_or(config.workers).max(1),
        report_dir: cli.json.then(|| Utf8PathBuf::from(".")),
    };
    std::fs::create_dir_all(options.download_dir.as_std_path()).into_diagnostic()?;

    let title_db_fetcher = fetcher.clone();
    let syncer = Syncer::new(fetcher, endpoints, options);
    let http_db = HttpTitleDb::new(&title_db_fetcher, config.title_db_url.clone());
    let lookup: &dyn TitleNameLookup = if cli.no_title_db {
        &NoTitleDb
    } else {
        &http_db
    };

    let summary = syncer.run_batch(&titles, lookup, &progress);
    print_batch_summary(&summary);

    DecryptPrompt {
        command: cli.decrypt_command,
    }
    .after_batch(&summary);
    Ok(())
}

fn print_batch_summary(summary: &BatchSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}NUS sync summary{reset}");
    for report in &summary.titles {
        let color = if report.stats.failed + report.stats.hash_fail > 0 {
            yellow
        } else {
            green
        };
        println!(
            "{color}[=] {} ({}): {}{reset}",
            report.title_name, report.title_id, report.stats
        );
        if let Some(organized) = &report.organized {
            println!("{color}    folder: {}{reset}", organized.title_dir);
        }
    }
    for failure in &summary.failures {
        println!(
            "{red}[!] {} ({}): {}{reset}",
            failure.title_name, failure.title_id, failure.error
        );
    }
    println!("{cyan}[=] total: {}{reset}", summary.totals);
}

struct DecryptPrompt {
    command: Option<String>,
}

impl PostRunHook for DecryptPrompt {
    fn after_batch(&self, summary: &BatchSummary) {
        if !summary.ticket_attached() {
            println!("No valid ticket was found. Skipping decryption step.");
            return;
        }
        let Some(command) = &self.command else {
            println!("A ticket was attached; pass --decrypt-command to decrypt after download.");
            return;
        };

        print!("A valid ticket was found. Do you want to decrypt the game? (y/n): ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return;
        }
        if !answer.trim().eq_ignore_ascii_case("y") {
            return;
        }

        let Some(parts) = split_command(command) else {
            eprintln!("Empty or malformed decrypt command.");
            return;
        };
        println!("Running {command} ...");
        match Command::new(&parts[0]).args(&parts[1..]).status() {
            Ok(status) if status.success() => {}
            Ok(status) => eprintln!("Decrypt command exited with {status}"),
            Err(err) => eprintln!("Failed to run {command}: {err}"),
        }
    }
}

/// Shell-style split; `None` for an empty or malformed command.
fn split_command(command: &str) -> Option<Vec<String>> {
    shlex::split(command).filter(|parts| !parts.is_empty())
}
