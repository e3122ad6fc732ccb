//! Password sources for password-authenticated servers.

use std::io::{self, Write};
use std::sync::Arc;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use sshtop_engine::{ConnectionError, Secret, SecretProvider, StaticSecret};
use tracing::{debug, info};

use crate::config::{AuthMethod, ServerEntry};

/// Reads the password from an environment variable each time it is needed.
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn is_set(&self) -> bool {
        std::env::var_os(&self.var).is_some_and(|v| !v.is_empty())
    }
}

impl SecretProvider for EnvSecret {
    fn secret(&self) -> Result<Secret, ConnectionError> {
        match std::env::var(&self.var) {
            Ok(v) if !v.is_empty() => Ok(Secret::new(v)),
            _ => Err(ConnectionError::AuthFailure(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

/// A password typed on the terminal at startup, kept only in memory.
pub struct PromptedSecret(StaticSecret);

impl PromptedSecret {
    pub fn prompt(server: &str) -> io::Result<Self> {
        let value = read_hidden(&format!("Password for '{server}': "))?;
        Ok(Self(StaticSecret::new(Secret::new(value))))
    }
}

impl SecretProvider for PromptedSecret {
    fn secret(&self) -> Result<Secret, ConnectionError> {
        self.0.secret()
    }
}

/// Read a line without echo. Esc or Ctrl-C aborts.
fn read_hidden(prompt: &str) -> io::Result<String> {
    let mut err = io::stderr();
    write!(err, "{prompt}")?;
    err.flush()?;

    enable_raw_mode()?;
    let res = read_hidden_raw();
    disable_raw_mode()?;
    writeln!(err)?;
    res
}

fn read_hidden_raw() -> io::Result<String> {
    let mut buf = String::new();
    loop {
        let Event::Key(k) = event::read()? else {
            continue;
        };
        if k.kind == KeyEventKind::Release {
            continue;
        }
        match k.code {
            KeyCode::Enter => return Ok(buf),
            KeyCode::Esc => return Err(io::Error::new(io::ErrorKind::Interrupted, "password entry cancelled")),
            KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "password entry cancelled"))
            }
            KeyCode::Backspace => {
                buf.pop();
            }
            KeyCode::Char(c) => buf.push(c),
            _ => {}
        }
    }
}

/// Secret provider for `entry`, or `None` for key authentication.
///
/// `password_env` wins when that variable is set; otherwise the user is
/// prompted once.
pub fn provider_for(entry: &ServerEntry) -> io::Result<Option<Arc<dyn SecretProvider>>> {
    if entry.auth != AuthMethod::Password {
        return Ok(None);
    }
    if let Some(var) = entry.password_env.as_deref() {
        let env = EnvSecret::new(var);
        if env.is_set() {
            debug!(server = %entry.name, var, "password taken from environment");
            return Ok(Some(Arc::new(env)));
        }
        info!(server = %entry.name, var, "password variable unset, prompting");
    }
    Ok(Some(Arc::new(PromptedSecret::prompt(&entry.name)?)))
}
