use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::{Duration, Instant};

use crate::control::{ControlHandle, RunStatus};
use crate::error::Error;
use crate::lua_rt::{BotContext, LuaBot};
use crate::motion::Mouse;
use crate::ocr::TextReader;
use crate::platform::Platform;
use crate::region::Rect;
use crate::settings::Settings;
use crate::types::*;
use crate::logger;

const IDLE: Duration = Duration::from_millis(100);
const DEFAULT_COOLDOWN_MS: u64 = 5000;

/// Lock that shrugs off poisoning; the data is plain bookkeeping.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recursively find all directories containing `main.lua` under `dir`.
pub fn find_bot_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut results = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return results,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if !name.starts_with('.') && name != "assets" {
                let main_lua = path.join("main.lua");
                if main_lua.is_file() {
                    results.push(main_lua);
                } else {
                    results.extend(find_bot_dirs(&path));
                }
            }
        }
    }
    results.sort();
    results
}

/// Derive bot name from main.lua path: bots/osrs/woodcut/main.lua -> osrs/woodcut
pub fn derive_bot_name(path: &Path, root: &Path) -> String {
    let bot_dir = path.parent().unwrap_or(path);
    let rel = bot_dir.strip_prefix(root).unwrap_or(bot_dir);
    rel.to_string_lossy().replace('\\', "/")
}

/// Load all bots from a directory, returning BotEntry list.
pub fn load_bots(bots_dir: &Path) -> Vec<BotEntry> {
    let mut entries = Vec::new();
    for path in find_bot_dirs(bots_dir) {
        let name = derive_bot_name(&path, bots_dir);
        match LuaBot::load_meta(&path) {
            Ok((pattern, description)) => entries.push(BotEntry {
                name,
                window_pattern: pattern,
                description,
                enabled: false,
                instances: Vec::new(),
                error: None,
                script_path: path,
            }),
            Err(e) => logger::error(&format!("failed to load bot {}: {}", name, e)),
        }
    }
    entries
}

/// Scan for windows matching each bot's pattern, populate instances.
pub fn scan_instances(entries: &mut [BotEntry], platform: &dyn Platform) {
    for entry in entries.iter_mut() {
        entry.instances = platform
            .get_instances(&entry.window_pattern)
            .into_iter()
            .map(|(wid, title)| Instance::new(&entry.name, wid, title))
            .collect();
    }
}

/// Everything the actor thread owns.
struct Actor<'a> {
    state: &'a Mutex<Vec<BotEntry>>,
    orch_state: &'a Mutex<OrchestratorState>,
    platform: &'a dyn Platform,
    ctx: Rc<BotContext>,
    bots: HashMap<String, LuaBot>,
    cooldowns: HashMap<String, Instant>,
}

impl Actor<'_> {
    fn spawn_bot(&mut self, entry: &BotEntry, inst: &Instance) {
        let win = self.platform.create_window(&entry.window_pattern, inst.window_id);
        match LuaBot::new(&entry.script_path, &inst.id, win, self.ctx.clone()) {
            Ok(bot) => {
                self.bots.insert(inst.id.clone(), bot);
            }
            Err(e) => logger::error(&format!("failed to start {}: {}", inst.id, e)),
        }
    }

    fn stop_bot(&mut self, id: &str) {
        if let Some(mut b) = self.bots.remove(id) {
            b.stop().ok();
        }
        self.cooldowns.remove(id);
    }

    fn stop_all(&mut self) {
        for (_, mut bot) in self.bots.drain() {
            bot.stop().ok();
        }
        self.cooldowns.clear();
    }

    fn current(&self) -> OrchestratorState {
        *lock(self.orch_state)
    }

    fn is_running(&self) -> bool {
        self.current() == OrchestratorState::Running
    }

    /// Rescan windows: drop instances whose window is gone, add new ones.
    fn rescan(&mut self) {
        let mut entries = lock(self.state);
        let mut dead = Vec::new();
        for entry in entries.iter_mut() {
            let wins = self.platform.get_instances(&entry.window_pattern);
            entry.instances.retain(|i| {
                let alive = wins.iter().any(|(w, _)| *w == i.window_id);
                if !alive {
                    dead.push(i.id.clone());
                }
                alive
            });
            for (wid, title) in &wins {
                if !entry.instances.iter().any(|i| i.window_id == *wid) {
                    entry.instances.push(Instance::new(&entry.name, *wid, title.clone()));
                }
            }
        }
        drop(entries);
        for id in dead {
            self.stop_bot(&id);
        }
    }

    /// Start bots for every enabled instance that has none yet.
    fn start_enabled(&mut self, only: Option<usize>) {
        let entries: Vec<(BotEntry, Vec<Instance>)> = lock(self.state)
            .iter()
            .enumerate()
            .filter(|(i, e)| e.enabled && only.map_or(true, |o| o == *i))
            .map(|(_, e)| (shallow(e), e.instances.iter().map(copy_instance).collect()))
            .collect();
        for (entry, instances) in entries {
            for inst in instances {
                match self.bots.get(&inst.id) {
                    Some(bot) => {
                        bot.reset().ok();
                    }
                    None => self.spawn_bot(&entry, &inst),
                }
            }
        }
    }

    /// Drain pending commands. Returns false on Quit.
    fn process_commands(&mut self, cmd_rx: &mpsc::Receiver<Command>) -> bool {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Quit => {
                    logger::info("shutting down");
                    self.stop_all();
                    *lock(self.orch_state) = OrchestratorState::Stopped;
                    return false;
                }
                Command::Toggle(idx) => {
                    self.rescan();
                    let (enabled, ids) = {
                        let entries = lock(self.state);
                        let Some(entry) = entries.get(idx) else { continue };
                        logger::info(&format!("enable {}: {}", entry.name, entry.enabled));
                        (entry.enabled, entry.instances.iter().map(|i| i.id.clone()).collect::<Vec<_>>())
                    };
                    if enabled && self.is_running() {
                        self.start_enabled(Some(idx));
                    } else if !enabled {
                        for id in ids {
                            self.stop_bot(&id);
                        }
                    }
                }
                Command::StartStop => match self.current() {
                    OrchestratorState::Stopping => logger::info("orchestrator stopping..."),
                    OrchestratorState::Running => {
                        logger::info("orchestrator started");
                        self.start_enabled(None);
                    }
                    OrchestratorState::Stopped => {}
                },
                Command::Restart(idx) => {
                    if !self.is_running() {
                        continue;
                    }
                    let ids: Vec<String> = {
                        let entries = lock(self.state);
                        let Some(entry) = entries.get(idx).filter(|e| e.enabled) else { continue };
                        logger::info(&format!("restarting bot {}", entry.name));
                        entry.instances.iter().map(|i| i.id.clone()).collect()
                    };
                    for id in &ids {
                        self.stop_bot(id);
                    }
                    self.start_enabled(Some(idx));
                }
            }
        }
        true
    }

    fn write_status(&self, id: &str, status: Option<String>, err: Option<String>) {
        let mut entries = lock(self.state);
        if let Some(inst) = entries.iter_mut().flat_map(|e| e.instances.iter_mut()).find(|i| i.id == id) {
            inst.status = status.unwrap_or_default();
            inst.error = err;
        }
    }

    /// Tick one bot between rest checkpoints. `false` when termination was seen.
    fn tick(&mut self, id: &str) -> bool {
        let Some(bot) = self.bots.get(id) else { return true };
        bot.set_active(true);
        bot.activate();
        std::thread::sleep(Duration::from_millis(200));

        let control = self.ctx.control.clone();
        let outcome = control.guarded(|| Ok(bot.tick()));
        bot.set_active(false);

        let (cd, status, err) = match outcome {
            Ok(Ok(ms)) => (ms.unwrap_or(DEFAULT_COOLDOWN_MS), bot.get_status().ok(), None),
            Ok(Err(_)) | Err(Error::Terminated) if control.is_terminated() => return false,
            Ok(Err(e)) => {
                logger::error(&format!("tick error {}: {}", id, e));
                (DEFAULT_COOLDOWN_MS, None, Some(e.to_string()))
            }
            Err(e) => {
                logger::warn(&format!("tick skipped {}: {}", id, e));
                (DEFAULT_COOLDOWN_MS, None, Some(e.to_string()))
            }
        };
        self.cooldowns.insert(id.to_string(), Instant::now() + Duration::from_millis(cd));
        self.write_status(id, status, err);
        true
    }

    fn terminate(&mut self) {
        logger::warn("termination requested, stopping all bots");
        self.stop_all();
        *lock(self.orch_state) = OrchestratorState::Stopped;
    }
}

fn shallow(e: &BotEntry) -> BotEntry {
    BotEntry {
        name: e.name.clone(),
        window_pattern: e.window_pattern.clone(),
        description: e.description.clone(),
        enabled: e.enabled,
        instances: Vec::new(),
        error: None,
        script_path: e.script_path.clone(),
    }
}

fn copy_instance(i: &Instance) -> Instance {
    Instance {
        id: i.id.clone(),
        window_id: i.window_id,
        window_title: i.window_title.clone(),
        status: String::new(),
        error: None,
    }
}

/// Main orchestration loop. Runs on a background thread and owns the only
/// `Mouse`; bots are ticked round-robin so cursor use never overlaps.
pub fn orchestrate(
    state: Arc<Mutex<Vec<BotEntry>>>,
    orch_state: Arc<Mutex<OrchestratorState>>,
    platform: Box<dyn Platform>,
    settings: Settings,
    control: ControlHandle,
    reader: Arc<dyn TextReader>,
    cmd_rx: mpsc::Receiver<Command>,
) {
    let mouse = Mouse::new(platform.create_input(), control.clone(), settings.motion.clone());
    let [x0, y0, x1, y1] = settings.hover_area.0;
    let ctx = Rc::new(BotContext {
        mouse: Rc::new(RefCell::new(mouse)),
        reader,
        control: control.clone(),
        hover_area: Rect::new(x0, y0, x1, y1),
    });
    let mut actor = Actor {
        state: &state,
        orch_state: &orch_state,
        platform: platform.as_ref(),
        ctx,
        bots: HashMap::new(),
        cooldowns: HashMap::new(),
    };

    loop {
        if !actor.process_commands(&cmd_rx) {
            return;
        }
        if control.is_terminated() {
            actor.terminate();
            return;
        }

        let current = *lock(&orch_state);
        if current == OrchestratorState::Stopping {
            actor.stop_all();
            *lock(&orch_state) = OrchestratorState::Stopped;
            logger::info("orchestrator stopped");
            continue;
        }
        // paused or on break: keep answering commands, tick nothing
        if current != OrchestratorState::Running || !matches!(control.status(), RunStatus::Running) {
            std::thread::sleep(IDLE);
            continue;
        }

        let ready: Vec<String> = {
            let entries = lock(&state);
            entries
                .iter()
                .filter(|e| e.enabled)
                .flat_map(|e| e.instances.iter())
                .filter(|i| {
                    actor.bots.contains_key(&i.id)
                        && actor.cooldowns.get(&i.id).map_or(true, |t| Instant::now() >= *t)
                })
                .map(|i| i.id.clone())
                .collect()
        };

        for id in &ready {
            if !actor.process_commands(&cmd_rx) {
                return;
            }
            if !actor.is_running() {
                break;
            }
            if !actor.tick(id) {
                actor.terminate();
                return;
            }
        }

        std::thread::sleep(IDLE);
    }
}
