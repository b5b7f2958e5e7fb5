use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};

use puppet_core::control::{ControlHandle, RunStatus};
use puppet_core::settings::Settings;
use puppet_core::types::{BotEntry, Command, OrchestratorState};

use crate::confirm::ConfirmDialog;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct App {
    pub state: Arc<Mutex<Vec<BotEntry>>>,
    pub orch_state: Arc<Mutex<OrchestratorState>>,
    pub control: ControlHandle,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub settings_path: PathBuf,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        state: Arc<Mutex<Vec<BotEntry>>>,
        orch_state: Arc<Mutex<OrchestratorState>>,
        control: ControlHandle,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            state,
            orch_state,
            control,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            settings_path,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        let len = lock(&self.state).len();
        if self.selected + 1 < len {
            self.selected += 1;
        }
    }

    /// Flip the selected bot and persist the enabled set.
    pub fn toggle_selected(&mut self) {
        let enabled: Vec<String> = {
            let mut entries = lock(&self.state);
            let Some(entry) = entries.get_mut(self.selected) else { return };
            entry.enabled = !entry.enabled;
            entries.iter().filter(|e| e.enabled).map(|e| e.name.clone()).collect()
        };
        let mut settings = Settings::load(&self.settings_path);
        settings.enabled_bots = enabled;
        settings.save(&self.settings_path);
        self.cmd_tx.send(Command::Toggle(self.selected)).ok();
    }

    pub fn start_stop(&mut self) {
        {
            let mut orch = lock(&self.orch_state);
            *orch = match *orch {
                OrchestratorState::Running => OrchestratorState::Stopping,
                OrchestratorState::Stopped => OrchestratorState::Running,
                OrchestratorState::Stopping => return,
            };
        }
        self.cmd_tx.send(Command::StartStop).ok();
    }

    pub fn restart_selected(&mut self) {
        self.cmd_tx.send(Command::Restart(self.selected)).ok();
    }

    pub fn toggle_pause(&mut self) {
        self.control.toggle_pause();
    }

    pub fn run_status(&self) -> RunStatus {
        self.control.status()
    }

    /// Ask before raising the terminate flag; it cannot be undone.
    pub fn ask_terminate(&mut self) {
        if !self.control.is_terminated() {
            self.confirm = Some(ConfirmDialog::new("Terminate all bots?"));
        }
    }

    /// Close the open dialog, acting on it if Yes was selected.
    pub fn resolve_confirm(&mut self, accept: bool) {
        if let Some(dialog) = self.confirm.take() {
            if accept && dialog.selected {
                self.control.request_terminate();
            }
        }
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn app(dir: &std::path::Path) -> (App, mpsc::Receiver<Command>) {
        let entries = vec![BotEntry {
            name: "woodcut".into(),
            window_pattern: "RuneScape".into(),
            description: String::new(),
            enabled: false,
            instances: Vec::new(),
            error: None,
            script_path: dir.join("woodcut/main.lua"),
        }];
        let (_log_tx, log_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let control = ControlHandle::with_timing(Duration::from_millis(10), Duration::from_secs(1));
        let app = App::new(
            Arc::new(Mutex::new(entries)),
            Arc::new(Mutex::new(OrchestratorState::Stopped)),
            control,
            log_rx,
            cmd_tx,
            dir.join("settings.json"),
        );
        (app, cmd_rx)
    }

    #[test]
    fn toggle_persists_enabled_bots() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, rx) = app(dir.path());
        app.toggle_selected();
        assert!(matches!(rx.try_recv(), Ok(Command::Toggle(0))));
        let saved = Settings::load(&app.settings_path);
        assert_eq!(saved.enabled_bots, vec!["woodcut".to_string()]);
    }

    #[test]
    fn start_stop_cycles_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = app(dir.path());
        app.start_stop();
        assert_eq!(*lock(&app.orch_state), OrchestratorState::Running);
        app.start_stop();
        assert_eq!(*lock(&app.orch_state), OrchestratorState::Stopping);
        app.start_stop();
        assert_eq!(*lock(&app.orch_state), OrchestratorState::Stopping);
    }

    #[test]
    fn terminate_needs_a_yes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = app(dir.path());
        app.ask_terminate();
        app.resolve_confirm(true);
        assert!(!app.control.is_terminated());

        app.ask_terminate();
        if let Some(d) = app.confirm.as_mut() {
            d.toggle();
        }
        app.resolve_confirm(true);
        assert!(app.control.is_terminated());
        assert!(app.confirm.is_none());
    }

    #[test]
    fn pause_key_flips_status() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _rx) = app(dir.path());
        app.toggle_pause();
        assert_eq!(app.run_status(), RunStatus::Paused);
        app.toggle_pause();
        assert_eq!(app.run_status(), RunStatus::Running);
    }
}
