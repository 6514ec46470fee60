//! credvault CLI - Command line interface for the credential vault.
//!
//! Every command unlocks the vault, performs one operation and locks it
//! again. `shell` keeps a single session open across many commands.

mod shell;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use credvault_common::Error;
use credvault_crypto::KdfProfile;
use credvault_storage::{FileStore, VaultStore};
use credvault_vault::{
    generate_password, AccessThrottle, Clock, CoreConfig, EntryPatch, GuardedUnlock, NewEntry,
    SessionManager, SessionToken, SystemClock, VaultEntry,
};

/// Throttle key for the local terminal.
const LOCAL_CLIENT: &str = "local";

/// Length used when a password is generated without an explicit length.
const DEFAULT_GENERATED_LENGTH: usize = 20;

#[derive(Parser)]
#[command(name = "credvault")]
#[command(about = "credvault - Encrypted credential vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vault file location (overrides the configuration).
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty vault.
    Init {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Add a credential.
    Add {
        /// Display name of the site.
        #[arg(short, long)]
        site: String,

        /// Domain or URL the credential belongs to.
        #[arg(short, long)]
        domain: String,

        /// Account name.
        #[arg(short, long, default_value = "")]
        username: String,

        /// Free-form notes.
        #[arg(short, long)]
        notes: Option<String>,

        /// Generate a password of this length instead of prompting.
        #[arg(short, long)]
        generate: Option<usize>,

        /// Restrict generated passwords to letters and digits.
        #[arg(long)]
        no_symbols: bool,
    },

    /// List credentials, optionally filtered by a search term.
    List {
        /// Case-insensitive match on site, username or domain.
        query: Option<String>,
    },

    /// List credentials applicable to a domain or URL.
    Match {
        /// Domain or URL being visited.
        url: String,
    },

    /// Show one credential.
    Show {
        /// Entry id.
        id: String,

        /// Print the password instead of masking it.
        #[arg(short, long)]
        reveal: bool,
    },

    /// Change fields of a credential.
    Update {
        /// Entry id.
        id: String,

        #[arg(short, long)]
        site: Option<String>,

        #[arg(short, long)]
        domain: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        /// New notes; an empty string clears them.
        #[arg(short, long)]
        notes: Option<String>,

        /// Prompt for a new password.
        #[arg(short, long)]
        password: bool,

        /// Replace the password with a generated one of this length.
        #[arg(short, long, conflicts_with = "password")]
        generate: Option<usize>,

        /// Restrict generated passwords to letters and digits.
        #[arg(long)]
        no_symbols: bool,
    },

    /// Remove a credential.
    Remove {
        /// Entry id.
        id: String,
    },

    /// Change the master password.
    Passwd,

    /// Show vault file information without unlocking.
    Status,

    /// Print a random password.
    Gen {
        /// Number of characters.
        #[arg(default_value_t = DEFAULT_GENERATED_LENGTH)]
        length: usize,

        /// Letters and digits only.
        #[arg(long)]
        no_symbols: bool,
    },

    /// Unlock once and run commands interactively.
    Shell,
}

/// The core wired up for one process.
struct App {
    config: CoreConfig,
    store: Arc<FileStore>,
    guard: GuardedUnlock,
}

impl App {
    fn new(config: CoreConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(FileStore::new(&config.vault_path));
        let sessions = SessionManager::from_config(&config, store.clone(), clock.clone())
            .context("Invalid configuration")?;
        let throttle =
            AccessThrottle::new(&config.throttle, clock).context("Invalid throttle settings")?;

        Ok(Self {
            config,
            store,
            guard: GuardedUnlock::new(Arc::new(throttle), Arc::new(sessions)),
        })
    }

    fn sessions(&self) -> &SessionManager {
        self.guard.sessions()
    }

    fn vault_path(&self) -> &Path {
        &self.config.vault_path
    }

    /// Unlock through the throttle, rendering failures for the terminal.
    async fn unlock(&self, password: &[u8], create_if_missing: bool) -> Result<SessionToken> {
        let outcome = self
            .guard
            .unlock(LOCAL_CLIENT, password, create_if_missing)
            .await
            .map_err(|e| self.unlock_failure(e))?;
        debug!(entries = outcome.entry_count, "Session opened");
        Ok(outcome.token)
    }

    /// Prompt for the master password and unlock the existing vault.
    async fn open(&self) -> Result<SessionToken> {
        let password = prompt_password("Master password: ")?;
        self.unlock(&password, false).await
    }

    fn unlock_failure(&self, err: Error) -> anyhow::Error {
        match err {
            Error::VaultNotFound => anyhow!(
                "No vault at {}; run `credvault init` first",
                self.vault_path().display()
            ),
            other => anyhow!(other.public_message()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Gen { length, no_symbols } = &cli.command {
        return cmd_gen(*length, !no_symbols);
    }

    let mut config = load_config(cli.config.as_deref(), cli.vault).await?;

    let app = match &cli.command {
        Commands::Init {
            profile: Some(name),
        } => {
            config.kdf = KdfProfile::from_name(name).ok_or_else(|| {
                anyhow!(
                    "Invalid profile '{}'. Use: interactive, moderate, or sensitive",
                    name
                )
            })?;
            App::new(config)?
        }
        _ => App::new(config)?,
    };

    let result = run(&app, cli.command).await;
    app.sessions().shutdown().await;
    result
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => cmd_init(app).await,

        Commands::Add {
            site,
            domain,
            username,
            notes,
            generate,
            no_symbols,
        } => {
            let entry = NewEntry {
                site,
                domain,
                username,
                password: String::new(),
                notes,
            };
            cmd_add(app, entry, generate, !no_symbols).await
        }

        Commands::List { query } => cmd_list(app, query.as_deref()).await,

        Commands::Match { url } => cmd_match(app, &url).await,

        Commands::Show { id, reveal } => cmd_show(app, &id, reveal).await,

        Commands::Update {
            id,
            site,
            domain,
            username,
            notes,
            password,
            generate,
            no_symbols,
        } => {
            let patch = EntryPatch {
                site,
                domain,
                username,
                password: None,
                notes,
            };
            let new_password = match (password, generate) {
                (_, Some(length)) => PasswordSource::Generate(length, !no_symbols),
                (true, None) => PasswordSource::Prompt,
                (false, None) => PasswordSource::Keep,
            };
            cmd_update(app, &id, patch, new_password).await
        }

        Commands::Remove { id } => cmd_remove(app, &id).await,

        Commands::Passwd => cmd_passwd(app).await,

        Commands::Status => cmd_status(app).await,

        Commands::Shell => shell::run(app).await,

        Commands::Gen { length, no_symbols } => cmd_gen(length, !no_symbols),
    }
}

/// Read the configuration file if given, then apply command-line overrides.
async fn load_config(path: Option<&Path>, vault: Option<PathBuf>) -> Result<CoreConfig> {
    let mut config = match path {
        Some(path) => CoreConfig::load(path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => CoreConfig::default(),
    };

    if let Some(vault) = vault {
        config.vault_path = vault;
    }
    config.validate().context("Invalid configuration")?;

    debug!(vault = %config.vault_path.display(), "Configuration loaded");
    Ok(config)
}

/// Prompt for a secret securely.
fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let secret = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(secret))
}

/// Prompt for a password as bytes.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let secret = prompt_secret(prompt)?;
    Ok(Zeroizing::new(secret.as_bytes().to_vec()))
}

/// Prompt twice for a new password.
fn prompt_new_password(label: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = prompt_password(&format!("Enter {}: ", label))?;
    let confirm = prompt_password(&format!("Confirm {}: ", label))?;

    if password != confirm {
        bail!("Passwords do not match");
    }

    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    Ok(password)
}

/// Where a new entry password comes from.
enum PasswordSource {
    Keep,
    Prompt,
    Generate(usize, bool),
}

impl PasswordSource {
    fn resolve(self) -> Result<Option<String>> {
        match self {
            PasswordSource::Keep => Ok(None),
            PasswordSource::Generate(length, symbols) => {
                let password = generate_password(length, symbols)?;
                println!("Generated a {}-character password.", length);
                Ok(Some(password))
            }
            PasswordSource::Prompt => {
                let password = prompt_secret("Entry password (leave empty to generate): ")?;
                if password.is_empty() {
                    PasswordSource::Generate(DEFAULT_GENERATED_LENGTH, true).resolve()
                } else {
                    Ok(Some(password.as_str().to_owned()))
                }
            }
        }
    }
}

/// Create a new vault.
async fn cmd_init(app: &App) -> Result<()> {
    let path = app.vault_path();
    if app
        .store
        .exists()
        .await
        .context("Failed to inspect vault location")?
    {
        bail!("A vault already exists at {}", path.display());
    }

    info!("Creating new vault at {}", path.display());
    let password = prompt_new_password("master password")?;
    app.unlock(&password, true).await?;

    println!("Vault created successfully!");
    println!("  Location: {}", path.display());
    println!(
        "  KDF: {} KiB, {} iterations, parallelism {}",
        app.config.kdf.memory_cost, app.config.kdf.time_cost, app.config.kdf.parallelism
    );

    Ok(())
}

/// Add a credential.
async fn cmd_add(app: &App, mut entry: NewEntry, generate: Option<usize>, symbols: bool) -> Result<()> {
    let token = app.open().await?;

    let source = match generate {
        Some(length) => PasswordSource::Generate(length, symbols),
        None => PasswordSource::Prompt,
    };
    if let Some(password) = source.resolve()? {
        entry.password = password;
    }

    let stored = app
        .sessions()
        .add_entry(&token, entry)
        .await
        .context("Failed to add entry")?;

    println!("Entry added: {} ({})", stored.site, stored.id);

    Ok(())
}

/// List credentials.
async fn cmd_list(app: &App, query: Option<&str>) -> Result<()> {
    let token = app.open().await?;

    let entries = app
        .sessions()
        .list_entries(&token, query)
        .await
        .context("Failed to list entries")?;

    print_entries(&entries);
    Ok(())
}

/// List credentials for a domain.
async fn cmd_match(app: &App, url: &str) -> Result<()> {
    let token = app.open().await?;

    let entries = app
        .sessions()
        .entries_for_domain(&token, url)
        .await
        .context("Failed to look up domain")?;

    print_entries(&entries);
    Ok(())
}

/// Show one credential.
async fn cmd_show(app: &App, id: &str, reveal: bool) -> Result<()> {
    let token = app.open().await?;

    let entry = app
        .sessions()
        .get_entry(&token, id)
        .await
        .context("Failed to read entry")?;

    print_entry(&entry, reveal);
    Ok(())
}

/// Update a credential.
async fn cmd_update(
    app: &App,
    id: &str,
    mut patch: EntryPatch,
    password: PasswordSource,
) -> Result<()> {
    if patch.is_empty() && matches!(password, PasswordSource::Keep) {
        bail!("Nothing to update");
    }

    let token = app.open().await?;
    patch.password = password.resolve()?;

    let updated = app
        .sessions()
        .update_entry(&token, id, patch)
        .await
        .context("Failed to update entry")?;

    println!("Entry updated: {} ({})", updated.site, updated.id);

    Ok(())
}

/// Remove a credential.
async fn cmd_remove(app: &App, id: &str) -> Result<()> {
    let token = app.open().await?;

    app.sessions()
        .delete_entry(&token, id)
        .await
        .context("Failed to remove entry")?;

    println!("Entry removed: {}", id);

    Ok(())
}

/// Change the master password.
async fn cmd_passwd(app: &App) -> Result<()> {
    info!("Changing master password");

    let current = prompt_password("Current master password: ")?;
    let token = app.unlock(&current, false).await?;
    let new_password = prompt_new_password("new master password")?;

    app.sessions()
        .change_password(&token, &current, &new_password)
        .await
        .map_err(|e| anyhow!(e.public_message()))
        .context("Failed to change password")?;

    println!("Password changed successfully!");

    Ok(())
}

/// Show vault file information.
async fn cmd_status(app: &App) -> Result<()> {
    let path = app.vault_path();
    println!("Vault: {}", path.display());

    if !app
        .store
        .exists()
        .await
        .context("Failed to inspect vault location")?
    {
        println!("  No vault yet; run `credvault init`.");
        return Ok(());
    }

    let file = app.store.read().await.context("Failed to read vault file")?;

    println!("  Format version: {}", file.version);
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", file.kdf.memory_cost);
    println!("    Time: {} iterations", file.kdf.time_cost);
    println!("    Parallelism: {}", file.kdf.parallelism);
    println!(
        "  Integrity tag: {}",
        if file.integrity.is_some() { "present" } else { "absent" }
    );
    println!(
        "  Auto-lock: {}",
        match app.config.idle_timeout() {
            Some(timeout) => format!("after {}s idle", timeout.as_secs()),
            None => "disabled".to_string(),
        }
    );

    Ok(())
}

/// Print a generated password.
fn cmd_gen(length: usize, symbols: bool) -> Result<()> {
    let password = Zeroizing::new(generate_password(length, symbols)?);
    println!("{}", password.as_str());
    Ok(())
}

fn print_entries(entries: &[VaultEntry]) {
    if entries.is_empty() {
        println!("No entries.");
        return;
    }

    println!("{:<36}  {:<20}  {:<24}  USERNAME", "ID", "SITE", "DOMAIN");
    for entry in entries {
        println!(
            "{:<36}  {:<20}  {:<24}  {}",
            entry.id, entry.site, entry.domain, entry.username
        );
    }
}

fn print_entry(entry: &VaultEntry, reveal: bool) {
    println!("{}", entry.site);
    println!("  ID: {}", entry.id);
    println!("  Domain: {}", entry.domain);
    println!("  Username: {}", entry.username);
    if reveal {
        println!("  Password: {}", entry.password);
    } else {
        println!("  Password: ********");
    }
    if let Some(notes) = &entry.notes {
        println!("  Notes: {}", notes);
    }
    println!("  Created: {}", entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Modified: {}", entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}
