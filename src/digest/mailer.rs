//! Mail delivery through mutt, with the SMTP secret decrypted by gpg.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SmtpConfig;
use crate::error::{DigestError, Result};

pub trait Mailer {
  fn send(&self, to: &str, subject: &str, html: &str) -> impl Future<Output = Result<()>> + Send;
}

/// `VAR=value` pair handed to the mail client's environment.
#[derive(Clone)]
pub struct SmtpSecret {
  pub var: String,
  value: String,
}

impl fmt::Debug for SmtpSecret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SmtpSecret")
      .field("var", &self.var)
      .finish_non_exhaustive()
  }
}

impl SmtpSecret {
  pub fn parse(plaintext: &str) -> Result<Self> {
    let (var, value) = plaintext
      .trim()
      .split_once('=')
      .ok_or_else(|| DigestError::MailFailed("decrypted secret is not VAR=value".to_string()))?;

    let var = var.trim();
    if var.is_empty() {
      return Err(DigestError::MailFailed(
        "decrypted secret has no variable name".to_string(),
      ));
    }

    Ok(Self {
      var: var.to_string(),
      value: value.trim().to_string(),
    })
  }

  /// Decrypt `<recipient>.gpg` in the working directory.
  pub async fn decrypt(gpg_recipient: &str) -> Result<Self> {
    let path = format!("{}.gpg", gpg_recipient);
    debug!("Decrypting {}", path);

    let output = Command::new("gpg")
      .args(["--batch", "--quiet", "--decrypt", &path])
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|e| DigestError::MailFailed(format!("failed to run gpg: {}", e)))?;

    if !output.status.success() {
      return Err(DigestError::MailFailed(format!(
        "gpg could not decrypt {}: {}",
        path,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    Self::parse(&String::from_utf8_lossy(&output.stdout))
  }
}

/// Sends HTML mail with `mutt -F <muttrc>`.
///
/// Sender and SMTP server come from the config; the muttrc can refer to the
/// decrypted secret through its environment variable.
#[derive(Debug, Clone)]
pub struct MuttMailer {
  muttrc: PathBuf,
  from: String,
  smtp_url: String,
  secret: Option<SmtpSecret>,
}

impl MuttMailer {
  pub fn new(smtp: &SmtpConfig, secret: Option<SmtpSecret>) -> Result<Self> {
    let smtp_url = smtp_url(smtp);
    for (name, value) in [("smtp.from", &smtp.from), ("smtp url", &smtp_url)] {
      if value.chars().any(char::is_control) {
        return Err(DigestError::MailFailed(format!(
          "{} contains a control character",
          name
        )));
      }
    }

    Ok(Self {
      muttrc: smtp.muttrc.clone(),
      from: smtp.from.clone(),
      smtp_url,
      secret,
    })
  }

  fn command(&self, to: &str, subject: &str) -> Command {
    let mut command = Command::new("mutt");
    command
      .arg("-F")
      .arg(&self.muttrc)
      .arg("-e")
      .arg(format!("set from={}", mutt_quote(&self.from)))
      .arg("-e")
      .arg(format!("set smtp_url={}", mutt_quote(&self.smtp_url)))
      .args(["-e", "set content_type=text/html", "-s", subject, "--", to])
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(secret) = &self.secret {
      command.env(&secret.var, &secret.value);
    }
    command
  }
}

impl Mailer for MuttMailer {
  async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
    let mut child = self
      .command(to, subject)
      .spawn()
      .map_err(|e| DigestError::MailFailed(format!("failed to run mutt: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(html.as_bytes())
        .await
        .map_err(|e| DigestError::MailFailed(format!("failed to write to mutt: {}", e)))?;
    }

    let output = child
      .wait_with_output()
      .await
      .map_err(|e| DigestError::MailFailed(format!("mutt did not finish: {}", e)))?;

    if !output.status.success() {
      return Err(DigestError::MailFailed(
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
      ));
    }

    info!("Sent digest to {}", to);
    Ok(())
  }
}

/// `scheme://[user@]host`, with the user only when authentication is on.
fn smtp_url(smtp: &SmtpConfig) -> String {
  let (scheme, host) = smtp.url.split_once("://").unwrap_or(("smtp", smtp.url.as_str()));
  match (&smtp.uname, smtp.authentication) {
    (Some(user), true) => format!("{}://{}@{}", scheme, user, host),
    _ => format!("{}://{}", scheme, host),
  }
}

/// Double-quote `value` for a muttrc command. Inside double quotes mutt
/// treats a backslash as an escape and expands `$VAR` and backticks.
fn mutt_quote(value: &str) -> String {
  let mut quoted = String::with_capacity(value.len() + 2);
  quoted.push('"');
  for c in value.chars() {
    if matches!(c, '"' | '\\' | '$' | '`') {
      quoted.push('\\');
    }
    quoted.push(c);
  }
  quoted.push('"');
  quoted
}
