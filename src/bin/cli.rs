//! nos CLI tool
//!
//! Post a note to every configured relay at once, then check which relays
//! actually hold it.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use nos::storage::{CredentialStore, FileStore, SECRET_KEY};
use nos::transport::WebSocketConnector;
use nos::{
    AddOutcome, EventBuilder, FanOutConfig, Identity, PublishError, Publisher, RelayList,
    Verifier,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Matches shown per relay by `nos verify`
const MATCHES_SHOWN: usize = 3;

/// Characters of content shown per match by `nos verify`
const CONTENT_PREVIEW_CHARS: usize = 50;

/// nos: publish a note to many relays and verify it landed
#[derive(Parser)]
#[command(name = "nos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory (default: ~/.nos)
    #[arg(long, env = "NOS_HOME", global = true)]
    home: Option<PathBuf>,

    /// Connection timeout per relay, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    connect_timeout: Option<u64>,

    /// Publish timeout per relay, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    send_timeout: Option<u64>,

    /// Time box for collecting verify results per relay, in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    collect_timeout: Option<u64>,

    /// Contact relays one at a time, in list order
    #[arg(long, global = true)]
    sequential: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Message to post
    message: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a message (useful when it starts with a command name)
    Post {
        /// Message to post
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Manage the relay list
    Relay {
        #[command(subcommand)]
        action: Option<RelayCommand>,
    },

    /// Check which relays hold your recent posts
    Verify,

    /// Manage your signing key
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },

    /// Delete the stored key and relay list
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RelayCommand {
    /// List current relays
    List,

    /// Add a relay
    Add {
        /// Relay URL (wss:// or ws://)
        url: String,
    },

    /// Remove a relay
    Remove {
        /// Relay URL to remove
        url: String,
    },

    /// Go back to the default relays
    Reset,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Generate and store a new signing key
    Generate {
        /// Replace an existing key
        #[arg(short, long)]
        force: bool,
    },

    /// Store a hex secret key read from stdin
    Import {
        /// Replace an existing key
        #[arg(short, long)]
        force: bool,
    },

    /// Display your public key
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("nos=warn".parse()?),
        )
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let home = match &cli.home {
        Some(home) => home.clone(),
        None => default_home()?,
    };
    let store = Arc::new(FileStore::open(&home));
    let relays = RelayList::new(Arc::clone(&store));

    match cli.command {
        Some(Commands::Post { ref message }) => {
            let config = load_config(&cli, &home)?;
            cmd_publish(&store, &relays, config, &message.join(" ")).await
        }
        Some(Commands::Relay { ref action }) => cmd_relay(&relays, action.as_ref()),
        Some(Commands::Verify) => {
            let config = load_config(&cli, &home)?;
            cmd_verify(&store, &relays, config).await
        }
        Some(Commands::Key { ref action }) => cmd_key(&store, action),
        Some(Commands::Reset { yes }) => cmd_reset(&store, &relays, yes),
        None if cli.message.is_empty() => {
            Cli::command().print_help()?;
            println!();
            bail!("Please provide a message to post")
        }
        None => {
            let config = load_config(&cli, &home)?;
            cmd_publish(&store, &relays, config, &cli.message.join(" ")).await
        }
    }
}

fn default_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(home.join(".nos"))
}

/// File config with command-line overrides applied on top
fn load_config(cli: &Cli, home: &Path) -> Result<FanOutConfig> {
    let mut config = FanOutConfig::load(home)?;
    if let Some(ms) = cli.connect_timeout {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.send_timeout {
        config.send_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.collect_timeout {
        config.collect_timeout = Duration::from_millis(ms);
    }
    if cli.sequential {
        config.max_concurrency = 1;
    }
    Ok(config)
}

fn load_identity(store: &FileStore) -> Result<Identity> {
    let secret = store
        .get(SECRET_KEY)?
        .ok_or_else(|| anyhow!("No key configured. Run 'nos key generate' or 'nos key import' first."))?;
    Identity::from_secret_hex(&secret).context("Stored key is invalid")
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Cancelling...");
            trigger.cancel();
        }
    });
    token
}

async fn cmd_publish(
    store: &FileStore,
    relays: &RelayList<Arc<FileStore>>,
    config: FanOutConfig,
    message: &str,
) -> Result<()> {
    let identity = load_identity(store)?;
    println!("Your public key: {}", identity.public_key());

    let event = EventBuilder::text_note(message).sign(&identity);
    println!("Event ID: {}", event.id());
    println!("Created at: {}", format_rfc3339(event.created_at()));
    println!("Content: {}", event.content());
    println!();

    let targets = relays.list();
    println!("Publishing to {} relays...", targets.len());

    let publisher = Publisher::new(WebSocketConnector::new(), config);
    let report = match publisher.publish(&event, &targets, &cancel_on_ctrl_c()).await {
        Ok(report) => report,
        Err(PublishError::AllFailed { report }) => {
            for outcome in report.outcomes() {
                println!("  ✗ {}", outcome.failure_detail().unwrap_or_default());
            }
            println!();
            bail!("Failed to publish to any relay");
        }
        Err(e) => return Err(e.into()),
    };

    for outcome in report.outcomes() {
        match outcome.failure_detail() {
            None => println!(
                "  ✓ {} published ({} ms)",
                outcome.relay,
                outcome.elapsed.as_millis()
            ),
            Some(detail) => println!("  ✗ {}", detail),
        }
    }

    println!();
    if report.is_degraded() {
        println!("Failed relays:");
        for failure in report.failures() {
            println!("  - {}", failure);
        }
        println!();
    }
    println!(
        "Successfully published to {}/{} relays",
        report.succeeded(),
        report.total()
    );
    Ok(())
}

async fn cmd_verify(
    store: &FileStore,
    relays: &RelayList<Arc<FileStore>>,
    config: FanOutConfig,
) -> Result<()> {
    let identity = load_identity(store)?;
    println!("Verifying posts");
    println!("Your public key: {}", identity.public_key());
    println!("Checking relays for your recent posts...");
    println!();

    let targets = relays.list();
    let verifier = Verifier::new(WebSocketConnector::new(), config);
    let report = verifier
        .verify(identity.public_key(), &targets, &cancel_on_ctrl_c())
        .await?;

    for check in report.checks() {
        print!("→ {}: ", check.relay);
        if check.found() {
            println!("found {} posts", check.matches.len());
            for found in check.matches.iter().take(MATCHES_SHOWN) {
                println!(
                    "    • [{}] {}",
                    format_short(found.created_at()),
                    truncate(found.content(), CONTENT_PREVIEW_CHARS)
                );
            }
        } else {
            match &check.error {
                Some(error) => println!("no posts found ({})", error),
                None => println!("no posts found"),
            }
        }
    }

    println!();
    if report.total() == 0 {
        println!("No posts found on any relay.");
        println!("This could mean:");
        println!("  - Your posts haven't propagated yet (wait a few seconds)");
        println!("  - The relays rejected your posts");
        println!("  - There's an issue with your key");
    } else {
        println!(
            "Total posts found: {} on {}/{} relays",
            report.total(),
            report.relays_with_matches(),
            report.checks().len()
        );
    }
    Ok(())
}

fn cmd_relay(relays: &RelayList<Arc<FileStore>>, action: Option<&RelayCommand>) -> Result<()> {
    match action.unwrap_or(&RelayCommand::List) {
        RelayCommand::List => {
            println!("Current Relay List");
            if relays.is_default() {
                println!("(Using default relays)");
            }
            println!();
            for (i, relay) in relays.list().iter().enumerate() {
                println!("• {}. {}", i + 1, relay);
            }
        }
        RelayCommand::Add { url } => match relays.add(url)? {
            AddOutcome::Added => println!("✓ Added relay: {}", url.trim()),
            AddOutcome::AlreadyPresent => println!("Relay already in list: {}", url.trim()),
        },
        RelayCommand::Remove { url } => {
            relays.remove(url)?;
            println!("✓ Removed relay: {}", url.trim());
        }
        RelayCommand::Reset => {
            relays.reset()?;
            println!("✓ Reset to default relays");
        }
    }
    Ok(())
}

fn cmd_key(store: &FileStore, action: &KeyCommand) -> Result<()> {
    match action {
        KeyCommand::Generate { force } => {
            ensure_no_key(store, *force)?;
            let identity = Identity::generate();
            store.set(SECRET_KEY, &identity.secret_hex())?;

            println!("Key created successfully!");
            println!();
            println!("Your public key:");
            println!("{}", identity.public_key());
            println!();
            println!("Key saved to: {}", store.path().display());
        }
        KeyCommand::Import { force } => {
            ensure_no_key(store, *force)?;
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read secret key from stdin")?;
            let identity = Identity::from_secret_hex(&line).context("Invalid secret key")?;
            store.set(SECRET_KEY, &identity.secret_hex())?;

            println!("✓ Key stored");
            println!("Your public key: {}", identity.public_key());
        }
        KeyCommand::Show => {
            let identity = load_identity(store)?;
            println!("Your public key:");
            println!("{}", identity.public_key());
        }
    }
    Ok(())
}

fn ensure_no_key(store: &FileStore, force: bool) -> Result<()> {
    if !force && store.get(SECRET_KEY)?.is_some() {
        bail!(
            "A key is already stored at {}. Use --force to overwrite.",
            store.path().display()
        );
    }
    Ok(())
}

fn cmd_reset(store: &FileStore, relays: &RelayList<Arc<FileStore>>, yes: bool) -> Result<()> {
    if store.get(SECRET_KEY)?.is_none() && relays.is_default() {
        println!("No stored data found.");
        return Ok(());
    }

    if !yes {
        println!("Reset nos");
        println!("This will delete your stored key and relay configuration!");
        print!("Are you sure? [y/N] ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    store.delete(SECRET_KEY).context("Error deleting key")?;
    relays.reset().context("Error deleting relay list")?;

    println!("✓ All data has been reset!");
    println!("Run 'nos key generate' or 'nos key import' to set up a new key.");
    Ok(())
}

fn timestamp(unix_secs: u64) -> DateTime<Utc> {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

fn format_rfc3339(unix_secs: u64) -> String {
    timestamp(unix_secs).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_short(unix_secs: u64) -> String {
    timestamp(unix_secs).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}
