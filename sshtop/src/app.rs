//! App state and main loop: input handling, engine commands, snapshot refresh and drawing.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    widgets::Paragraph,
    Terminal,
};
use sshtop_engine::{
    MetricsSnapshot, MonitorSettings, Secret, SecretProvider, StaticSecret, SupervisorHandle,
};
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::{Config, ServerEntry};
use crate::ui::confirm::draw_confirm_delete;
use crate::ui::form::{AddForm, FormAction};
use crate::ui::header::{draw_header, draw_status_bar};
use crate::ui::server::{draw_server, panel_height, PanelOpts};

// input is polled this often; snapshots follow ui_refresh_interval
const INPUT_TICK: Duration = Duration::from_millis(50);
const MESSAGE_TTL: Duration = Duration::from_secs(5);

enum Mode {
    Normal,
    Adding(AddForm),
    ConfirmDelete(String),
}

pub struct App {
    config: Config,
    // None in demo mode: nothing is written back
    config_path: Option<PathBuf>,
    settings: MonitorSettings,
    demo: bool,

    snapshot: Option<MetricsSnapshot>,
    addresses: HashMap<String, String>,
    selected: usize,
    // panels whose collapse state differs from display.start_collapsed
    toggled: HashSet<String>,
    mode: Mode,
    message: Option<(String, Instant)>,
    spinner_tick: usize,
    last_refresh: Option<Instant>,
    should_quit: bool,
}

impl App {
    pub fn new(config: Config, config_path: Option<PathBuf>, demo: bool) -> anyhow::Result<Self> {
        let settings = config.settings()?;
        Ok(Self {
            config,
            config_path,
            settings,
            demo,
            snapshot: None,
            addresses: HashMap::new(),
            selected: 0,
            toggled: HashSet::new(),
            mode: Mode::Normal,
            message: None,
            spinner_tick: 0,
            last_refresh: None,
            should_quit: false,
        })
    }

    pub async fn run(&mut self, engine: &SupervisorHandle) -> anyhow::Result<()> {
        // Terminal setup
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        // Main loop
        let res = self.event_loop(&mut terminal, engine).await;

        // Teardown
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        res
    }

    async fn event_loop<B: Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
        engine: &SupervisorHandle,
    ) -> anyhow::Result<()> {
        loop {
            // Input (non-blocking)
            while event::poll(Duration::from_millis(10))? {
                if let Event::Key(k) = event::read()? {
                    if k.kind != KeyEventKind::Release {
                        self.handle_key(k, engine).await;
                    }
                }
            }
            if self.should_quit {
                break;
            }

            let due = self
                .last_refresh
                .map_or(true, |t| t.elapsed() >= self.settings.ui_refresh_interval);
            if due {
                self.refresh(engine);
            }

            terminal.draw(|f| self.draw(f))?;
            sleep(INPUT_TICK).await;
        }
        Ok(())
    }

    fn refresh(&mut self, engine: &SupervisorHandle) {
        let snap = engine.snapshot();
        self.addresses = engine
            .list_targets()
            .iter()
            .map(|t| (t.name.clone(), t.address()))
            .collect();
        self.selected = self.selected.min(snap.targets.len().saturating_sub(1));
        self.snapshot = Some(snap);
        self.spinner_tick = self.spinner_tick.wrapping_add(1);
        self.last_refresh = Some(Instant::now());
        if self
            .message
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() >= MESSAGE_TTL)
        {
            self.message = None;
        }
    }

    fn flash(&mut self, msg: impl Into<String>) {
        self.message = Some((msg.into(), Instant::now()));
    }

    fn selected_name(&self) -> Option<String> {
        self.snapshot
            .as_ref()?
            .targets
            .get(self.selected)
            .map(|t| t.name.clone())
    }

    fn is_collapsed(&self, name: &str) -> bool {
        self.config.display.start_collapsed != self.toggled.contains(name)
    }

    async fn handle_key(&mut self, k: KeyEvent, engine: &SupervisorHandle) {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Adding(mut form) => match form.handle_key(k) {
                FormAction::None => self.mode = Mode::Adding(form),
                FormAction::Cancel => {}
                FormAction::Submit(entry, secret) => {
                    if let Err(msg) = self.add_server(entry, secret, engine).await {
                        form.set_error(msg);
                        self.mode = Mode::Adding(form);
                    }
                }
            },
            Mode::ConfirmDelete(name) => match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    self.delete_server(&name, engine)
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {}
                _ => self.mode = Mode::ConfirmDelete(name),
            },
            Mode::Normal => self.handle_normal_key(k, engine),
        }
    }

    fn handle_normal_key(&mut self, k: KeyEvent, engine: &SupervisorHandle) {
        let count = self.snapshot.as_ref().map_or(0, |s| s.targets.len());
        match k.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < count {
                    self.selected += 1;
                }
            }
            KeyCode::Char('r') => {
                engine.refresh_now();
                self.flash("refresh requested");
            }
            KeyCode::Char('a') => self.mode = Mode::Adding(AddForm::new()),
            KeyCode::Char('d') => {
                if let Some(name) = self.selected_name() {
                    self.mode = Mode::ConfirmDelete(name);
                }
            }
            KeyCode::Char('c') => {
                if let Some(name) = self.selected_name() {
                    if !self.toggled.remove(&name) {
                        self.toggled.insert(name);
                    }
                }
            }
            _ => {}
        }
    }

    /// Register the server with the engine, then record it in the config.
    async fn add_server(
        &mut self,
        entry: ServerEntry,
        secret: Option<Secret>,
        engine: &SupervisorHandle,
    ) -> Result<(), String> {
        let name = entry.name.clone();
        let provider = secret.map(|s| Arc::new(StaticSecret::new(s)) as Arc<dyn SecretProvider>);
        let target = entry
            .to_target(&self.settings, provider)
            .map_err(|e| e.to_string())?;
        self.config
            .add_server(entry)
            .map_err(|e| e.to_string())?;
        if let Err(e) = engine.add_target(target).await {
            self.config.remove_server(&name);
            return Err(e.to_string());
        }
        info!(server = %name, "server added from the dashboard");
        self.persist();
        self.flash(format!("added {name}"));
        self.refresh(engine);
        if let Some(idx) = self
            .snapshot
            .as_ref()
            .and_then(|s| s.targets.iter().position(|t| t.name == name))
        {
            self.selected = idx;
        }
        Ok(())
    }

    fn delete_server(&mut self, name: &str, engine: &SupervisorHandle) {
        if let Err(e) = engine.registry().remove(name) {
            self.flash(e.to_string());
            return;
        }
        self.config.remove_server(name);
        self.toggled.remove(name);
        info!(server = %name, "server deleted from the dashboard");
        self.persist();
        self.flash(format!("deleted {name}"));
        self.refresh(engine);
    }

    fn persist(&mut self) {
        let Some(path) = self.config_path.as_ref() else {
            return;
        };
        if let Err(e) = self.config.save(path) {
            error!(error = %e, "could not save configuration");
            self.flash(format!("could not save config: {e}"));
        }
    }

    pub fn draw(&self, f: &mut ratatui::Frame<'_>) {
        let area = f.area();

        // Root rows: header, server panels, status bar
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);

        draw_header(f, rows[0], self.config.servers.len(), self.demo);
        self.draw_servers(f, rows[1]);
        draw_status_bar(
            f,
            rows[2],
            self.snapshot.as_ref(),
            self.message.as_ref().map(|(m, _)| m.as_str()),
            &self.config.display,
        );

        match &self.mode {
            Mode::Normal => {}
            Mode::Adding(form) => form.draw(f, area),
            Mode::ConfirmDelete(name) => draw_confirm_delete(f, area, name),
        }
    }

    fn draw_servers(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let Some(snap) = self.snapshot.as_ref() else {
            return;
        };
        if snap.targets.is_empty() {
            f.render_widget(
                Paragraph::new("No servers configured. Press 'a' to add one."),
                area,
            );
            return;
        }

        let heights: Vec<u16> = snap
            .targets
            .iter()
            .map(|t| panel_height(t, self.is_collapsed(&t.name)))
            .collect();
        let first = first_visible(&heights, self.selected, area.height);

        let mut y = area.y;
        let bottom = area.y + area.height;
        for (i, view) in snap.targets.iter().enumerate().skip(first) {
            let h = heights[i].min(bottom - y);
            if h < 3 {
                break;
            }
            let rect = Rect::new(area.x, y, area.width, h);
            let opts = PanelOpts {
                address: self.addresses.get(&view.name).map(String::as_str),
                selected: i == self.selected,
                collapsed: self.is_collapsed(&view.name),
                spinner_tick: self.spinner_tick,
            };
            draw_server(f, rect, view, &opts, &self.config.display);
            y += h;
            if y >= bottom {
                break;
            }
        }
    }
}

/// Index of the first panel to draw so that `selected` is fully on screen.
fn first_visible(heights: &[u16], selected: usize, available: u16) -> usize {
    if heights.is_empty() {
        return 0;
    }
    let selected = selected.min(heights.len() - 1);
    let mut first = selected;
    let mut used = heights[selected] as u32;
    while first > 0 && used + heights[first - 1] as u32 <= available as u32 {
        first -= 1;
        used += heights[first] as u32;
    }
    first
}
