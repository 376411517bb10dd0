//! git-credential-hubkey
//!
//! Git credential helper that answers with GitHub App installation tokens
//! or stored personal tokens, chosen by URL pattern.
//!
//! # Usage
//!
//! ```bash
//! # Register with git (prints the commands, runs nothing)
//! git-credential-hubkey git-config
//!
//! # Store an App private key for the source named "ci-bot"
//! git-credential-hubkey import-key ci-bot --file ~/keys/ci-bot.pem
//!
//! # Called by git
//! printf 'protocol=https\nhost=github.com\npath=org/repo\n\n' | git-credential-hubkey get
//! ```

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hubkey_core::git_config::{helper_commands, shell_line};
use hubkey_core::{
    Config, CredentialHelper, CredentialRequest, Operation, Outcome, SecretKind, SecretsStore,
    SourceMatcher,
};
use tokio::runtime::{Builder, Runtime};
use tracing_subscriber::{EnvFilter, fmt};

mod secrets;

use secrets::TokenInput;

/// Keyring service name all entries are filed under.
const KEYRING_SERVICE: &str = "hubkey";

/// Environment variable holding the log filter.
const LOG_ENV: &str = "HUBKEY_LOG";

/// How long runtime shutdown waits for blocking tasks before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "git-credential-hubkey")]
#[command(about = "Dynamic git credentials from GitHub Apps and stored tokens")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "HUBKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Match this pattern instead of the requested host and path
    #[arg(long, global = true)]
    pattern: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a credential request on stdin (called by git)
    Get,

    /// Accept a store request from git; credentials are never persisted
    Store,

    /// Accept an erase request from git; there is nothing to erase
    Erase,

    /// Store a GitHub App private key
    ImportKey {
        /// Source name
        name: String,

        /// Owner-only PEM file (PKCS#1 or PKCS#8)
        #[arg(long)]
        file: PathBuf,
    },

    /// Store a static token, read from stdin unless --file or --from-env is given
    ImportToken {
        /// Source name
        name: String,

        /// Owner-only file holding the token
        #[arg(long, conflicts_with = "from_env")]
        file: Option<PathBuf>,

        /// Environment variable holding the token
        #[arg(long, value_name = "VAR")]
        from_env: Option<String>,
    },

    /// Remove a stored secret from every backend
    DeleteSecret {
        kind: KindArg,

        /// Source name
        name: String,
    },

    /// Show which source would answer for a URL
    Resolve {
        /// e.g. https://github.com/org/repo.git
        url: String,
    },

    /// Print the git config commands that register this helper
    GitConfig {
        /// Helper command git should run (defaults to this executable)
        #[arg(long)]
        binary: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Key,
    Token,
}

impl From<KindArg> for SecretKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Key => SecretKind::PrivateKey,
            KindArg::Token => SecretKind::Token,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = build_runtime()
        .context("starting the async runtime")
        .and_then(|runtime| run_to_completion(runtime, run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("git-credential-hubkey: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_runtime() -> std::io::Result<Runtime> {
    Builder::new_multi_thread().enable_all().build()
}

/// Drive `fut` to completion, then shut the runtime down without waiting on
/// keyring calls that were abandoned after their timeout.
///
/// Dropping a runtime joins every `spawn_blocking` thread, so a hung keyring
/// would otherwise keep git waiting after the answer has been written.
fn run_to_completion<F: Future>(runtime: Runtime, fut: F) -> F::Output {
    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    output
}

/// Log to stderr only; stdout belongs to the credential protocol.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    // store and erase never need the configuration, so a broken one must
    // not fail them.
    let load = || Config::load(cli.config.as_deref()).context("loading configuration");

    match cli.command {
        Commands::Get => get(&load()?, cli.pattern).await,
        Commands::Store | Commands::Erase => {
            tracing::debug!("credentials are generated per request; nothing to store or erase");
            Ok(())
        }
        Commands::ImportKey { name, file } => {
            let config = load()?;
            let store = open_store(&config).await?;
            secrets::import_key(&store, &config, &name, &file).await?;
            Ok(())
        }
        Commands::ImportToken { name, file, from_env } => {
            let input = match (file, from_env) {
                (Some(path), _) => TokenInput::File(path),
                (None, Some(var)) => TokenInput::Env(var),
                (None, None) => TokenInput::Stdin,
            };
            let config = load()?;
            let store = open_store(&config).await?;
            secrets::import_token(&store, &config, &name, &input, std::io::stdin().lock()).await?;
            Ok(())
        }
        Commands::DeleteSecret { kind, name } => {
            let config = load()?;
            let store = open_store(&config).await?;
            secrets::delete_secret(&store, &config, &name, kind.into()).await
        }
        Commands::Resolve { url } => resolve(load()?, &url, cli.pattern),
        Commands::GitConfig { binary } => git_config(&load()?, binary),
    }
}

async fn open_store(config: &Config) -> Result<SecretsStore> {
    let data_dir = config.settings.data_dir()?;
    Ok(SecretsStore::detect(KEYRING_SERVICE, data_dir, config.settings.keyring_timeout()).await)
}

async fn get(config: &Config, pattern: Option<String>) -> Result<()> {
    let store = Arc::new(open_store(config).await?);
    let helper = CredentialHelper::from_config(config, store)?.with_pattern_override(pattern);

    let stdin = std::io::stdin().lock();
    let mut stdout = std::io::stdout().lock();
    let outcome = helper.handle(Operation::Get, stdin, &mut stdout).await?;
    stdout.flush()?;

    if outcome == Outcome::Declined {
        tracing::debug!("request declined, deferring to other helpers");
    }
    Ok(())
}

fn resolve(config: Config, url: &str, pattern: Option<String>) -> Result<()> {
    let request = CredentialRequest::read_from(format!("url={}\n", url).as_bytes())?;
    let key = request.lookup_key(pattern.as_deref())?;
    let matcher = SourceMatcher::new(config.sources)?;

    match matcher.resolve(&key) {
        Some(found) => println!(
            "{} -> {} (pattern {}, priority {})",
            key,
            found.source,
            found.pattern,
            found.source.priority()
        ),
        None => println!("{} -> no match", key),
    }
    Ok(())
}

fn git_config(config: &Config, binary: Option<String>) -> Result<()> {
    let binary = match binary {
        Some(binary) => binary,
        None => std::env::current_exe()
            .context("locating the helper executable")?
            .display()
            .to_string(),
    };

    let commands = helper_commands(&config.sources, &binary)?;
    if commands.is_empty() {
        eprintln!("No sources configured; add [[source]] entries first.");
    }
    for command in commands {
        println!("{}", shell_line(&command));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use async_trait::async_trait;
    use clap::CommandFactory;
    use hubkey_core::{Backend, EncryptedFileStore, Secret, SecretOrigin, SecretStore, StoreError};
    use tempfile::TempDir;

    /// A keyring whose blocking call never returns in time, like a locked
    /// Keychain waiting on a prompt.
    struct StuckKeyring;

    impl StuckKeyring {
        async fn stall<T>() -> Result<T, StoreError> {
            let _ = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(6))).await;
            Err(StoreError::KeyringUnavailable {
                message: "keyring call returned late".to_string(),
            })
        }
    }

    #[async_trait]
    impl SecretStore for StuckKeyring {
        async fn get(&self, _key: &str) -> Result<Option<Secret>, StoreError> {
            Self::stall().await
        }

        async fn set(&self, _key: &str, _secret: &Secret) -> Result<(), StoreError> {
            Self::stall().await
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Self::stall().await
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("git-credential-hubkey").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_stuck_keyring_thread_does_not_delay_exit() {
        let temp = TempDir::new().unwrap();
        let started = Instant::now();

        let backend = run_to_completion(build_runtime().unwrap(), async {
            let store = SecretsStore::new(
                Some(Arc::new(StuckKeyring)),
                EncryptedFileStore::new(temp.path()),
                Duration::from_millis(300),
            );
            store
                .put(
                    "ci-bot",
                    SecretKind::PrivateKey,
                    &Secret::new("pem"),
                    &SecretOrigin::File(temp.path().join("ci-bot.pem")),
                )
                .await
        })
        .unwrap();

        assert_eq!(backend, Backend::Filesystem);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "runtime shutdown waited {:?} for the keyring thread",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_store_and_erase_ignore_broken_config() {
        let temp = TempDir::new().unwrap();
        let unparsable = temp.path().join("bad.toml");
        std::fs::write(&unparsable, "[[source]\ntype = ").unwrap();
        let missing = temp.path().join("missing.toml");

        for config in [&unparsable, &missing] {
            let config = config.to_str().unwrap();
            for op in ["store", "erase"] {
                run(parse(&["--config", config, op])).await.unwrap();
            }
        }

        // get still reports the broken file.
        let config = unparsable.to_str().unwrap();
        let err = run(parse(&["--config", config, "get"])).await.unwrap_err();
        assert!(format!("{:#}", err).contains("loading configuration"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_pattern_before_operation() {
        let cli = Cli::try_parse_from([
            "git-credential-hubkey",
            "--pattern",
            "github.com/org",
            "get",
        ])
        .unwrap();
        assert_eq!(cli.pattern.as_deref(), Some("github.com/org"));
        assert!(matches!(cli.command, Commands::Get));
    }

    #[test]
    fn test_import_token_sources_conflict() {
        let result = Cli::try_parse_from([
            "git-credential-hubkey",
            "import-token",
            "personal",
            "--file",
            "/tmp/token",
            "--from-env",
            "TOKEN",
        ]);
        assert!(result.is_err());
    }
}
