//! `git config` commands that register hubkey as a credential helper.
//!
//! Commands are only generated here. Running them is left to the user.

use crate::matcher::{Pattern, PatternError};
use crate::model::CredentialSource;

/// Build the `git config --global` argument vectors for `sources`.
///
/// `binary` is the helper command git should run, usually the absolute path
/// of `git-credential-hubkey`.
pub fn helper_commands(
    sources: &[CredentialSource],
    binary: &str,
) -> Result<Vec<Vec<String>>, PatternError> {
    let mut hosts: Vec<String> = Vec::new();
    let mut helpers: Vec<(String, String)> = Vec::new();

    for source in sources {
        for raw in source.patterns() {
            let pattern = Pattern::parse(raw)?;

            let (key, value) = match pattern.host() {
                Some(host) => {
                    if !hosts.iter().any(|h| h == host) {
                        hosts.push(host.to_string());
                    }
                    if pattern.is_literal() {
                        let scoped = pattern.normalized();
                        (
                            format!("credential.https://{}.helper", scoped),
                            format!("{} --pattern {}", binary, scoped),
                        )
                    } else {
                        (format!("credential.https://{}.helper", host), binary.to_string())
                    }
                }
                None => ("credential.helper".to_string(), binary.to_string()),
            };

            if !helpers.iter().any(|(k, _)| *k == key) {
                helpers.push((key, value));
            }
        }
    }

    let path_settings = hosts.into_iter().map(|host| {
        git_config(format!("credential.https://{}.useHttpPath", host), "true".to_string())
    });
    let helper_settings = helpers.into_iter().map(|(key, value)| git_config(key, value));

    Ok(path_settings.chain(helper_settings).collect())
}

fn git_config(key: String, value: String) -> Vec<String> {
    vec![
        "git".to_string(),
        "config".to_string(),
        "--global".to_string(),
        key,
        value,
    ]
}

/// Render an argument vector as a copy-pasteable shell line.
pub fn shell_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if !arg.is_empty()
                && arg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c))
            {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
