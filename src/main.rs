//! keyfuse - record, fuse and replay rhythm-game key timing
//!
//! Terminal front end over a [`Session`]: record takes, rebuild the timing
//! map and play it back with the configured lead-in.

use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode as CtKeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use std::fs::OpenOptions;
use std::io::stdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keyfuse::{
    config::Config,
    hotkeys::HotkeyListener,
    keyboard::{open_source, LogicalKey},
    playback::{EmitError, EnigoEmitter, MemoryEmitter, OutputEmitter},
    session::{Session, SessionState},
    store,
    ui::{App, AppState, AppView, HelpPanel, SamplesPanel, StatusBar, TabBar, TimingMapPanel},
};

/// Log to a file in the data dir; the terminal belongs to the UI
fn init_logging() {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    let file = store::data_dir().ok().and_then(|dir| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("keyfuse.log"))
            .ok()
    });
    match file {
        Some(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

fn open_emitter() -> (Box<dyn OutputEmitter>, Option<String>) {
    match EnigoEmitter::new() {
        Ok(emitter) => (Box::new(emitter), None),
        Err(e) => {
            log::warn!("[PLAYBACK] {}; playback goes to memory only", e);
            (
                Box::new(MemoryEmitter::new()),
                Some(format!("Key output unavailable ({}), playback is a dry run", e)),
            )
        }
    }
}

fn main() -> Result<()> {
    init_logging();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("[SESSION] config not loaded, using defaults: {}", e);
            Config::default()
        }
    };

    let source = open_source(&config.capture).context("opening key capture")?;
    let (emitter, emitter_warning) = open_emitter();
    let mut session = Session::new(config.clone(), source, emitter);
    session.set_emitter_factory(Box::new(|| Ok::<_, EmitError>(open_emitter().0)));

    if config.hotkeys.enabled {
        match open_source(&config.capture).and_then(|hot| HotkeyListener::start(hot, &config)) {
            Ok(listener) => session.attach_hotkeys(listener),
            Err(e) => log::warn!("[SESSION] global hotkeys unavailable, terminal keys only: {}", e),
        }
    }

    let data_dir = match store::data_dir() {
        Ok(dir) => {
            match store::load_samples(&dir.join(store::SAMPLES_FILE)) {
                Ok(samples) if !samples.is_empty() => {
                    session.restore_samples(samples)?;
                    session.rebuild()?;
                }
                Ok(_) => {}
                Err(e) => log::warn!("[STORE] samples not restored: {}", e),
            }
            Some(dir)
        }
        Err(e) => {
            log::warn!("[STORE] no data directory: {}", e);
            None
        }
    };

    let greeting = emitter_warning.unwrap_or_else(|| format!("Capture: {}", session.capture_backend()));
    let mut app = App::new(session, data_dir);
    app.set_status(greeting);

    // SIGINT from outside the terminal still goes through cleanup
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut app, &config, &shutdown);

    // Held keys are released before the terminal is restored
    app.quit();

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result?;

    println!("\nkeyfuse session complete.");
    println!("Samples: {}", app.session.sample_summaries().len());
    println!("Session duration: {}", app.elapsed_formatted());

    Ok(())
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    config: &Config,
    shutdown: &AtomicBool,
) -> Result<()> {
    let tick_rate = config.refresh_interval();

    loop {
        app.tick();

        // Draw UI
        terminal.draw(|frame| {
            let size = frame.area();

            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1), // Tab bar
                    Constraint::Min(8),    // Main content
                    Constraint::Length(1), // Status bar
                ])
                .split(size);

            let tab_names: Vec<&str> = AppView::all().iter().map(|v| v.name()).collect();
            frame.render_widget(TabBar::new(&tab_names, app.view.index(), app.colors), chunks[0]);

            match app.view {
                AppView::Samples => {
                    let samples = app.session.sample_summaries();
                    frame.render_widget(SamplesPanel::new(&samples, app.selected, app.colors), chunks[1]);
                }
                AppView::TimingMap => {
                    let map = app.session.timing_map();
                    let panel = TimingMapPanel::new(&map, app.session.aggregation_report(), app.colors);
                    frame.render_widget(panel, chunks[1]);
                }
                AppView::Help => frame.render_widget(HelpPanel::new(app.colors), chunks[1]),
            }

            let elapsed = app.elapsed_formatted();
            let status = StatusBar::new(
                app.state_label(),
                app.session.capture_backend(),
                &elapsed,
                app.session.sample_summaries().len(),
                app.colors,
            )
            .message(app.get_status());
            frame.render_widget(status, chunks[2]);
        })?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(app, key.code, key.modifiers);
                }
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            app.quit();
        }

        if app.state == AppState::Quitting {
            return Ok(());
        }
    }
}

/// Terminal keys that can also be bound as global hotkeys
fn logical_key(code: CtKeyCode) -> Option<LogicalKey> {
    match code {
        CtKeyCode::F(n) => Some(LogicalKey::F(n)),
        CtKeyCode::Char(c) => Some(LogicalKey::char(c)),
        _ => None,
    }
}

fn handle_key(app: &mut App, code: CtKeyCode, modifiers: KeyModifiers) {
    // Global hotkeys arrive through the session; the terminal copy is ignored
    if logical_key(code).map_or(false, |key| app.session.is_hotkey(key)) {
        return;
    }

    // Tracked keys also reach the terminal, so while a take or a playback
    // runs only the matching stop keys do anything
    match app.session.state() {
        SessionState::Recording => {
            if matches!(code, CtKeyCode::Char('r') | CtKeyCode::F(9) | CtKeyCode::Esc) {
                app.toggle_recording();
            }
            return;
        }
        SessionState::Playing => {
            if matches!(code, CtKeyCode::Char('p') | CtKeyCode::F(10) | CtKeyCode::Esc) {
                app.toggle_playback();
            }
            return;
        }
        SessionState::Idle | SessionState::Rebuilding => {}
    }

    match code {
        CtKeyCode::Char('q') | CtKeyCode::Esc => app.quit(),
        CtKeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => app.quit(),
        CtKeyCode::Tab if modifiers.contains(KeyModifiers::SHIFT) => app.prev_view(),
        CtKeyCode::BackTab => app.prev_view(),
        CtKeyCode::Tab => app.next_view(),
        CtKeyCode::Up => app.select_prev(),
        CtKeyCode::Down => app.select_next(),
        CtKeyCode::Char('r') | CtKeyCode::F(9) => app.toggle_recording(),
        CtKeyCode::Char('p') | CtKeyCode::F(10) => app.toggle_playback(),
        CtKeyCode::Enter => app.play_selected(),
        CtKeyCode::Char('b') => app.rebuild(),
        CtKeyCode::Char('d') => app.dry_run(),
        CtKeyCode::Char('c') => app.clear_samples(),
        CtKeyCode::Char('x') => app.delete_selected(),
        CtKeyCode::Char('s') => app.save_samples(),
        CtKeyCode::Char('o') => app.reload_samples(),
        CtKeyCode::Char('l') => app.load_timing_map(),
        CtKeyCode::Char('e') => app.export(),
        CtKeyCode::Char('t') => app.cycle_theme(),
        CtKeyCode::Char('?') => app.view = AppView::Help,
        _ => {}
    }
}
