use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use anyhow::Result;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use puppet_core::control::ControlHandle;
use puppet_core::ocr::{NoText, TextReader};
use puppet_core::{logger, orchestrator, settings::Settings};
use puppet_core::platform::{create_platform, hotkey};
use puppet_core::types::{Command, OrchestratorState};

fn main() -> Result<()> {
    let force_stub = std::env::args().any(|a| a == "--stub");

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let bots_dir = cwd.join("bots");
    let settings_path = cwd.join("settings.json");
    let settings = Settings::load(&settings_path);

    logger::init(&cwd.join("logs"), settings.log_level);

    let platform = create_platform(force_stub);

    let mut entries = orchestrator::load_bots(&bots_dir);
    orchestrator::scan_instances(&mut entries, platform.as_ref());
    for entry in &mut entries {
        if settings.enabled_bots.contains(&entry.name) {
            entry.enabled = true;
        }
    }
    logger::info(&format!("loaded {} bot(s), scanning windows", entries.len()));

    let state = Arc::new(Mutex::new(entries));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Stopped));
    let control = ControlHandle::new(&settings.control);

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

    logger::set_tui_sender(log_tx);
    logger::info("puppet started");

    hotkey::start_hotkey_listener(control.clone());

    // No OCR engine is bundled; scripts that verify hover text need one plugged in here.
    let reader: Arc<dyn TextReader> = Arc::new(NoText);
    let orchestrator = {
        let (state, orch_state, control) = (Arc::clone(&state), Arc::clone(&orch_state), control.clone());
        thread::spawn(move || {
            orchestrator::orchestrate(state, orch_state, platform, settings, control, reader, cmd_rx);
        })
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = puppet_tui::App::new(
        Arc::clone(&state),
        Arc::clone(&orch_state),
        control.clone(),
        log_rx,
        cmd_tx,
        settings_path,
    );

    let result = puppet_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    // unblock any in-flight gesture or sleep before joining
    control.request_terminate();
    orchestrator.join().ok();

    result
}
