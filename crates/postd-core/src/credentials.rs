//! Access-token discovery for the git host.
//!
//! Sources are tried in order; the first non-empty value wins. A subprocess
//! that times out, fails to spawn, exits non-zero or prints nothing is just a
//! miss, and resolution moves on to the next source.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// First set environment variable among these names.
    Env(Vec<String>),
    /// `git credential fill` for `https://<host>`; reads the `password=` line.
    GitCredentialFill { host: String },
    /// Arbitrary command whose trimmed stdout is the token (e.g. `gh auth token`).
    Command { program: String, args: Vec<String> },
}

impl CredentialSource {
    fn describe(&self) -> String {
        match self {
            CredentialSource::Env(names) => format!("env {}", names.join("/")),
            CredentialSource::GitCredentialFill { host } => format!("git credential ({host})"),
            CredentialSource::Command { program, args } => {
                format!("{program} {}", args.join(" "))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CredentialResolver {
    sources: Vec<CredentialSource>,
    timeout: Duration,
}

impl CredentialResolver {
    pub fn new(sources: Vec<CredentialSource>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    /// `GITHUB_TOKEN`/`GH_TOKEN`, then the git credential helper, then the `gh` CLI.
    pub fn github_default(timeout: Duration) -> Self {
        Self::new(
            vec![
                CredentialSource::Env(vec!["GITHUB_TOKEN".into(), "GH_TOKEN".into()]),
                CredentialSource::GitCredentialFill {
                    host: "github.com".into(),
                },
                CredentialSource::Command {
                    program: "gh".into(),
                    args: vec!["auth".into(), "token".into()],
                },
            ],
            timeout,
        )
    }

    pub async fn resolve(&self) -> Result<String> {
        for source in &self.sources {
            if let Some(token) = self.try_source(source).await {
                tracing::debug!(source = %source.describe(), "credential resolved");
                return Ok(token);
            }
        }
        let tried: Vec<String> = self.sources.iter().map(CredentialSource::describe).collect();
        Err(Error::AuthMissing(format!("tried {}", tried.join(", "))))
    }

    async fn try_source(&self, source: &CredentialSource) -> Option<String> {
        let raw = match source {
            CredentialSource::Env(names) => names.iter().find_map(|n| std::env::var(n).ok()),
            CredentialSource::GitCredentialFill { host } => {
                git_credential_fill(host, self.timeout).await
            }
            CredentialSource::Command { program, args } => {
                command_stdout(program, args, self.timeout).await
            }
        };
        raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }
}

async fn command_stdout(program: &str, args: &[String], timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let out = tokio::time::timeout(timeout, cmd.output())
        .await
        .ok()?
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok()
}

async fn git_credential_fill(host: &str, timeout: Duration) -> Option<String> {
    let mut child = Command::new("git")
        .args(["credential", "fill"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .ok()?;

    let query = format!("protocol=https\nhost={host}\n\n");
    let mut stdin = child.stdin.take()?;
    let run = async move {
        stdin.write_all(query.as_bytes()).await.ok()?;
        drop(stdin);
        child.wait_with_output().await.ok()
    };

    let out = tokio::time::timeout(timeout, run).await.ok()??;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    password_line(&text)
}

fn password_line(text: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.strip_prefix("password="))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CredentialSource {
        CredentialSource::Command {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn password_line_is_extracted() {
        let out = "protocol=https\nhost=github.com\nusername=x\npassword=ghp_abc\n";
        assert_eq!(password_line(out).as_deref(), Some("ghp_abc"));
        assert!(password_line("protocol=https\n").is_none());
    }

    #[tokio::test]
    async fn env_source_wins_when_set() {
        std::env::set_var("POSTD_CRED_TEST_PRIMARY", "  tok-env \n");
        let r = CredentialResolver::new(
            vec![
                CredentialSource::Env(vec![
                    "POSTD_CRED_TEST_UNSET".into(),
                    "POSTD_CRED_TEST_PRIMARY".into(),
                ]),
                sh("echo tok-cmd"),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(r.resolve().await.unwrap(), "tok-env");
    }

    #[tokio::test]
    async fn failing_sources_fall_through_in_order() {
        let r = CredentialResolver::new(
            vec![
                CredentialSource::Env(vec!["POSTD_CRED_TEST_NEVER_SET".into()]),
                sh("exit 1"),
                sh("printf '   '"),
                CredentialSource::Command {
                    program: "postd-definitely-not-installed".into(),
                    args: vec![],
                },
                sh("echo tok-last"),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(r.resolve().await.unwrap(), "tok-last");
    }

    #[tokio::test]
    async fn slow_source_times_out_and_exhaustion_is_auth_missing() {
        let r = CredentialResolver::new(vec![sh("sleep 5; echo late")], Duration::from_millis(100));
        let err = r.resolve().await.unwrap_err();
        assert!(matches!(err, Error::AuthMissing(_)));
    }
}
