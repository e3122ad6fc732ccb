//! "Add server" dialog.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use sshtop_engine::Secret;

use crate::config::{AuthMethod, ServerEntry};
use crate::ui::util::centered;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Host,
    Port,
    Username,
    Auth,
    KeyPath,
    Password,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Name => "Server name",
            Field::Host => "Host (IP or hostname)",
            Field::Port => "Port",
            Field::Username => "Username",
            Field::Auth => "Authentication",
            Field::KeyPath => "SSH key path",
            Field::Password => "Password",
        }
    }
}

pub enum FormAction {
    None,
    Cancel,
    /// A validated entry; the secret is present for password auth only.
    Submit(ServerEntry, Option<Secret>),
}

pub struct AddForm {
    name: String,
    host: String,
    port: String,
    username: String,
    auth: AuthMethod,
    key_path: String,
    password: String,
    focus: Field,
    error: Option<String>,
}

impl Default for AddForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            port: "22".into(),
            username: "ubuntu".into(),
            auth: AuthMethod::Key,
            key_path: "~/.ssh/id_rsa".into(),
            password: String::new(),
            focus: Field::Name,
            error: None,
        }
    }
}

impl AddForm {
    pub fn new() -> Self {
        Self::default()
    }

    fn fields(&self) -> [Field; 6] {
        let secret = match self.auth {
            AuthMethod::Key => Field::KeyPath,
            AuthMethod::Password => Field::Password,
        };
        [
            Field::Name,
            Field::Host,
            Field::Port,
            Field::Username,
            Field::Auth,
            secret,
        ]
    }

    fn value_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Name => Some(&mut self.name),
            Field::Host => Some(&mut self.host),
            Field::Port => Some(&mut self.port),
            Field::Username => Some(&mut self.username),
            Field::KeyPath => Some(&mut self.key_path),
            Field::Password => Some(&mut self.password),
            Field::Auth => None,
        }
    }

    fn value(&self, field: Field) -> String {
        match field {
            Field::Name => self.name.clone(),
            Field::Host => self.host.clone(),
            Field::Port => self.port.clone(),
            Field::Username => self.username.clone(),
            Field::KeyPath => self.key_path.clone(),
            Field::Password => "*".repeat(self.password.chars().count()),
            Field::Auth => match self.auth {
                AuthMethod::Key => "< SSH key >".into(),
                AuthMethod::Password => "< password >".into(),
            },
        }
    }

    fn step(&mut self, forward: bool) {
        let fields = self.fields();
        let idx = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        let next = if forward {
            (idx + 1) % fields.len()
        } else {
            (idx + fields.len() - 1) % fields.len()
        };
        self.focus = fields[next];
    }

    fn toggle_auth(&mut self) {
        self.auth = match self.auth {
            AuthMethod::Key => AuthMethod::Password,
            AuthMethod::Password => AuthMethod::Key,
        };
    }

    pub fn handle_key(&mut self, k: KeyEvent) -> FormAction {
        match k.code {
            KeyCode::Esc => return FormAction::Cancel,
            KeyCode::Char('s') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                return self.submit()
            }
            KeyCode::Enter => {
                if self.focus == self.fields()[5] {
                    return self.submit();
                }
                self.step(true);
            }
            KeyCode::Tab | KeyCode::Down => self.step(true),
            KeyCode::BackTab | KeyCode::Up => self.step(false),
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ') if self.focus == Field::Auth => {
                self.toggle_auth()
            }
            KeyCode::Backspace => {
                if let Some(v) = self.value_mut(self.focus) {
                    v.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(v) = self.value_mut(self.focus) {
                    v.push(c);
                }
            }
            _ => {}
        }
        FormAction::None
    }

    fn submit(&mut self) -> FormAction {
        let port = match self.port.trim().parse::<u16>() {
            Ok(p) => p,
            Err(_) => {
                self.error = Some("port must be a number between 1 and 65535".into());
                self.focus = Field::Port;
                return FormAction::None;
            }
        };
        let entry = ServerEntry {
            name: self.name.trim().to_string(),
            host: self.host.trim().to_string(),
            port,
            username: self.username.trim().to_string(),
            auth: self.auth,
            key_path: match self.auth {
                AuthMethod::Key => Some(self.key_path.trim().to_string()),
                AuthMethod::Password => None,
            },
            password_env: None,
        };
        if let Err(e) = entry.validate() {
            self.error = Some(e.to_string());
            return FormAction::None;
        }
        let secret = match self.auth {
            AuthMethod::Key => None,
            AuthMethod::Password if self.password.is_empty() => {
                self.error = Some("password cannot be empty".into());
                self.focus = Field::Password;
                return FormAction::None;
            }
            AuthMethod::Password => Some(Secret::new(std::mem::take(&mut self.password))),
        };
        FormAction::Submit(entry, secret)
    }

    /// Show an error coming from outside the form (e.g. a duplicate name).
    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.error = Some(msg.into());
    }

    pub fn draw(&self, f: &mut ratatui::Frame<'_>, screen: Rect) {
        let area = centered(screen, 64, 17);
        f.render_widget(Clear, area);

        let mut lines = Vec::new();
        for field in self.fields() {
            let focused = field == self.focus;
            let label_style = if focused {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            lines.push(Line::from(Span::styled(field.label(), label_style)));
            let cursor = if focused && field != Field::Auth { "_" } else { "" };
            lines.push(Line::from(format!("  {}{cursor}", self.value(field))));
        }
        lines.push(Line::from(""));
        match &self.error {
            Some(e) => lines.push(Line::from(Span::styled(
                e.clone(),
                Style::default().fg(Color::Red),
            ))),
            None => lines.push(Line::from(Span::styled(
                "Tab/↑/↓ move, ←/→ auth, Enter next/submit, Ctrl-S submit, Esc cancel",
                Style::default().add_modifier(Modifier::DIM),
            ))),
        }

        let p = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Add server")
                .border_style(Style::default().fg(Color::Cyan)),
        );
        f.render_widget(p, area);
    }
}
