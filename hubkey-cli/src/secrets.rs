//! Secret import and removal commands.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use hubkey_core::jwt::validate_key;
use hubkey_core::store::read_key_file;
use hubkey_core::{Backend, Config, CredentialSource, Secret, SecretKind, SecretOrigin, SecretsStore};

/// Where `import-token` reads the token from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenInput {
    File(PathBuf),
    Env(String),
    Stdin,
}

/// Store id and recorded backend for `name`, taken from the matching source
/// when one is configured.
fn locate(config: &Config, name: &str, kind: SecretKind) -> Result<(String, Option<Backend>)> {
    match config.source(name) {
        Some(source) if source.secret_kind() != kind => {
            bail!("{} does not take a {}", source, kind)
        }
        Some(CredentialSource::App(app)) => Ok((app.key.id.clone(), Some(app.key.backend))),
        Some(CredentialSource::Token(token)) => {
            Ok((token.token.id.clone(), Some(token.token.backend)))
        }
        None => Ok((name.to_string(), None)),
    }
}

fn report(name: &str, stored: Backend, recorded: Option<Backend>) {
    println!("Stored secret for '{}' in the {} store", name, stored);
    if let Some(recorded) = recorded {
        if recorded != stored {
            eprintln!(
                "warning: source '{}' references the {} backend; set its backend to \"{}\"",
                name, recorded, stored
            );
        }
    }
}

/// Import an App private key from an owner-only PEM file.
pub async fn import_key(
    store: &SecretsStore,
    config: &Config,
    name: &str,
    file: &Path,
) -> Result<Backend> {
    let (id, recorded) = locate(config, name, SecretKind::PrivateKey)?;
    let pem = read_key_file(file).with_context(|| format!("reading {}", file.display()))?;
    validate_key(&pem)?;

    let backend = store
        .put(&id, SecretKind::PrivateKey, &pem, &SecretOrigin::File(file.to_path_buf()))
        .await?;
    report(name, backend, recorded);
    Ok(backend)
}

/// Read a token from `input`; `stdin` is used for [`TokenInput::Stdin`].
pub fn read_token(input: &TokenInput, mut stdin: impl Read) -> Result<(Secret, SecretOrigin)> {
    let (raw, origin) = match input {
        TokenInput::File(path) => {
            let contents = read_key_file(path).with_context(|| format!("reading {}", path.display()))?;
            (contents, SecretOrigin::File(path.clone()))
        }
        TokenInput::Env(var) => {
            let value = std::env::var(var)
                .with_context(|| format!("environment variable {} is not set", var))?;
            (
                Secret::new(value),
                SecretOrigin::Transient {
                    description: format!("environment variable {}", var),
                },
            )
        }
        TokenInput::Stdin => {
            let mut value = String::new();
            stdin.read_to_string(&mut value).context("reading token from stdin")?;
            (
                Secret::new(value),
                SecretOrigin::Transient {
                    description: "standard input".to_string(),
                },
            )
        }
    };

    let token = Secret::new(raw.expose().trim());
    if token.is_empty() {
        bail!("token is empty");
    }
    Ok((token, origin))
}

/// Import a static token.
pub async fn import_token(
    store: &SecretsStore,
    config: &Config,
    name: &str,
    input: &TokenInput,
    stdin: impl Read,
) -> Result<Backend> {
    let (id, recorded) = locate(config, name, SecretKind::Token)?;
    let (token, origin) = read_token(input, stdin)?;
    tracing::debug!(name, token = %token.describe(), origin = %origin, "importing token");

    let backend = store.put(&id, SecretKind::Token, &token, &origin).await?;
    report(name, backend, recorded);
    Ok(backend)
}

/// Remove a secret from every backend.
pub async fn delete_secret(
    store: &SecretsStore,
    config: &Config,
    name: &str,
    kind: SecretKind,
) -> Result<()> {
    let (id, _) = locate(config, name, kind)?;
    store.delete(&id, kind).await?;
    println!("Deleted {} for '{}'", kind, name);
    Ok(())
}
