use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use image::RgbaImage;
use mlua::prelude::*;

use crate::colorbox::find_color_box;
use crate::control::ControlHandle;
use crate::error::Error;
use crate::guard::{InteractOptions, Interactor, Locator, Target};
use crate::matcher::{find_subimage, ScaleRange};
use crate::motion::Mouse;
use crate::ocr::{HueBand, TextReader};
use crate::platform::WindowHandle;
use crate::region::{Rect, Region};
use crate::types::*;
use crate::sleep;
use crate::logger;

/// Shared by every bot on the actor thread.
pub struct BotContext {
    pub mouse: Rc<RefCell<Mouse>>,
    pub reader: Arc<dyn TextReader>,
    pub control: ControlHandle,
    /// Window-relative box holding hover text.
    pub hover_area: Rect,
}

fn to_lua(e: Error) -> LuaError {
    LuaError::external(e)
}

/// Wrapper around a WindowHandle for Lua userdata.
struct LuaWindow {
    inner: Rc<RefCell<Box<dyn WindowHandle>>>,
    active: Rc<Cell<bool>>,
    ctx: Rc<BotContext>,
    assets: PathBuf,
    templates: RefCell<HashMap<String, Rc<RgbaImage>>>,
}

impl LuaWindow {
    fn frame(&self) -> LuaResult<RgbaImage> {
        self.inner
            .borrow_mut()
            .capture(None)
            .map(|c| c.to_rgba())
            .ok_or_else(|| to_lua(Error::Capture("window returned no pixels".into())))
    }

    fn template(&self, file: &str) -> LuaResult<Rc<RgbaImage>> {
        if let Some(t) = self.templates.borrow().get(file) {
            return Ok(t.clone());
        }
        let img = image::open(self.assets.join(file)).map_err(|e| to_lua(Error::Image(e)))?.to_rgba8();
        let img = Rc::new(img);
        self.templates.borrow_mut().insert(file.to_string(), img.clone());
        Ok(img)
    }

    fn screen_point(&self, x_ratio: f64, y_ratio: f64) -> LuaResult<Point> {
        let mut win = self.inner.borrow_mut();
        win.update();
        win.region()
            .map(|r| r.at_ratio(x_ratio, y_ratio))
            .ok_or_else(|| to_lua(Error::Capture(format!("window {} is gone", win.id()))))
    }

    fn interact(&self, target: &Target, options: &InteractOptions) -> LuaResult<(bool, Option<String>)> {
        let mut mouse = self.ctx.mouse.borrow_mut();
        let mut win = self.inner.borrow_mut();
        let mut it = Interactor::new(&mut *mouse, &mut **win, &*self.ctx.reader, self.ctx.hover_area);
        match it.interact(target, options) {
            Ok(_) => Ok((true, None)),
            Err(Error::Terminated) => Err(to_lua(Error::Terminated)),
            Err(e) => Ok((false, Some(e.to_string()))),
        }
    }

    /// Run a mouse action between rest checkpoints.
    fn with_mouse(&self, f: impl FnOnce(&mut Mouse) -> crate::error::Result<()>) -> LuaResult<()> {
        let mut mouse = self.ctx.mouse.borrow_mut();
        self.ctx.control.guarded(|| f(&mut *mouse)).map_err(to_lua)
    }

    fn inactive(&self, what: &str) -> bool {
        if self.active.get() {
            return false;
        }
        logger::warn(&format!("dropped win:{}, window not active", what));
        true
    }
}

fn region_table(lua: &Lua, region: &Region) -> LuaResult<LuaTable> {
    let bb = region.bounding_box();
    let t = lua.create_table()?;
    t.set("x0", bb.x0)?;
    t.set("y0", bb.y0)?;
    t.set("x1", bb.x1)?;
    t.set("y1", bb.y1)?;
    t.set("confidence", region.confidence)?;
    t.set("scale", region.scale)?;
    Ok(t)
}

/// A locate miss is `nil` to scripts; anything else is raised.
fn found_or_nil(lua: &Lua, res: crate::error::Result<Region>) -> LuaResult<LuaValue> {
    match res {
        Ok(region) => Ok(LuaValue::Table(region_table(lua, &region)?)),
        Err(e) if e.is_locate_miss() => Ok(LuaNil),
        Err(e) => Err(to_lua(e)),
    }
}

fn options_from(opts: &LuaTable) -> LuaResult<InteractOptions> {
    let mut options = InteractOptions::default();
    if let Some(n) = opts.get::<Option<u32>>("retry_match")? {
        options.retry_match = n;
    }
    if let Some(n) = opts.get::<Option<u32>>("retry_hover")? {
        options.retry_hover = n;
    }
    if let Some(name) = opts.get::<Option<String>>("button")? {
        options.button = MouseButton::parse(&name)
            .ok_or_else(|| LuaError::runtime(format!("unknown button '{}'", name)))?;
    }
    match opts.get::<LuaValue>("keywords")? {
        LuaValue::String(s) => options.keywords = vec![s.to_str()?.to_string()],
        LuaValue::Table(t) => options.keywords = t.sequence_values::<String>().collect::<LuaResult<_>>()?,
        _ => {}
    }
    Ok(options)
}

fn scales_from(min: Option<f64>, max: Option<f64>, step: Option<f64>) -> ScaleRange {
    let min = min.unwrap_or(1.0);
    ScaleRange::new(min, max.unwrap_or(min), step.unwrap_or(0.1))
}

impl LuaUserData for LuaWindow {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("find_color", |lua, this, (r, g, b, tol): (u8, u8, u8, Option<u8>)| {
            if this.inactive("find_color") {
                return Ok(LuaNil);
            }
            let frame = this.frame()?;
            found_or_nil(lua, find_color_box(&frame, [r, g, b], tol.unwrap_or(10)))
        });

        methods.add_method(
            "find_image",
            |lua, this, (file, min_scale, max_scale): (String, Option<f64>, Option<f64>)| {
                if this.inactive("find_image") {
                    return Ok(LuaNil);
                }
                let template = this.template(&file)?;
                let frame = this.frame()?;
                found_or_nil(lua, find_subimage(&frame, &template, scales_from(min_scale, max_scale, None)))
            },
        );

        methods.add_method("click_color", |_, this, opts: LuaTable| {
            if this.inactive("click_color") {
                return Ok((false, Some("window not active".to_string())));
            }
            let rgb = [opts.get::<u8>("r")?, opts.get::<u8>("g")?, opts.get::<u8>("b")?];
            let target = Target {
                name: opts.get::<Option<String>>("name")?.unwrap_or_else(|| format!("colour {:?}", rgb)),
                locator: Locator::Color {
                    rgb,
                    tolerance: opts.get::<Option<u8>>("tol")?.unwrap_or(10),
                    tolerance_step: opts.get::<Option<u8>>("step")?.unwrap_or(0),
                },
            };
            this.interact(&target, &options_from(&opts)?)
        });

        methods.add_method("click_image", |_, this, opts: LuaTable| {
            if this.inactive("click_image") {
                return Ok((false, Some("window not active".to_string())));
            }
            let file: String = opts.get("file")?;
            let template = this.template(&file)?;
            let scales = scales_from(
                opts.get::<Option<f64>>("min_scale")?,
                opts.get::<Option<f64>>("max_scale")?,
                opts.get::<Option<f64>>("step")?,
            );
            let target = Target {
                name: opts.get::<Option<String>>("name")?.unwrap_or_else(|| file.clone()),
                locator: Locator::Template {
                    image: (*template).clone(),
                    scales,
                    min_confidence: opts.get::<Option<f64>>("min_confidence")?.unwrap_or(0.8),
                },
            };
            this.interact(&target, &options_from(&opts)?)
        });

        methods.add_method("click", |_, this, (x_ratio, y_ratio): (f64, f64)| {
            if this.inactive("click") {
                return Ok(());
            }
            let to = this.screen_point(x_ratio, y_ratio)?;
            this.with_mouse(|m| m.move_and_click(to, MouseButton::Left))
        });

        methods.add_method("move", |_, this, (x_ratio, y_ratio): (f64, f64)| {
            if this.inactive("move") {
                return Ok(());
            }
            let to = this.screen_point(x_ratio, y_ratio)?;
            this.with_mouse(|m| m.move_to(to, None))
        });

        methods.add_method("tap", |_, this, key: String| {
            if this.inactive("tap") {
                return Ok(());
            }
            this.with_mouse(|m| m.tap(&key))
        });

        methods.add_method("type", |_, this, text: String| {
            if this.inactive("type") {
                return Ok(());
            }
            this.with_mouse(|m| m.type_text(&text))
        });

        methods.add_method("read_number", |_, this, (x0, y0, x1, y1): (i32, i32, i32, i32)| {
            if this.inactive("read_number") {
                return Ok(None);
            }
            let frame = this.frame()?;
            match Region::rect(x0, y0, x1, y1).extract_number(&frame, &HueBand::default(), &*this.ctx.reader) {
                Ok(n) => Ok(Some(n)),
                Err(Error::Ocr { reason, .. }) => {
                    logger::debug_p("ocr", &reason);
                    Ok(None)
                }
                Err(e) => Err(to_lua(e)),
            }
        });
    }
}

/// A loaded Lua bot instance, owning its own Lua VM.
pub struct LuaBot {
    lua: Lua,
    bot_key: LuaRegistryKey,
    win: Rc<RefCell<Box<dyn WindowHandle>>>,
    active: Rc<Cell<bool>>,
}

/// Helper to convert mlua::Error -> anyhow::Error
fn lua_err(e: mlua::Error) -> anyhow::Error {
    anyhow!("{}", e)
}

fn load_table(lua: &Lua, path: &Path) -> Result<LuaTable> {
    // Set package.path so require() finds modules in the bot's directory
    if let Some(bot_dir) = path.parent() {
        let dir_str = bot_dir.to_string_lossy();
        let pkg: LuaTable = lua.globals().get("package").map_err(lua_err)?;
        pkg.set("path", format!("{}/?.lua;{}/?/init.lua", dir_str, dir_str)).map_err(lua_err)?;
    }

    let code = std::fs::read_to_string(path)?;
    lua.load(&code).set_name(path.to_string_lossy()).eval().map_err(lua_err)
}

impl LuaBot {
    /// Load a bot script just to extract metadata (window_pattern, description).
    /// Does NOT call start(). Used during bot discovery.
    pub fn load_meta(path: &Path) -> Result<(String, String)> {
        let lua = Lua::new();
        register_globals(&lua, "", &ControlHandle::default()).map_err(lua_err)?;
        let table = load_table(&lua, path)?;

        let pattern: String = table.get("window_pattern").map_err(lua_err)?;
        let description: String = table.get("description").map_err(lua_err)?;
        let _: LuaFunction = table.get("tick").map_err(lua_err)?;

        Ok((pattern, description))
    }

    /// Create a new LuaBot, load the script, and call start(win).
    pub fn new(
        script_path: &Path,
        instance_id: &str,
        win_handle: Box<dyn WindowHandle>,
        ctx: Rc<BotContext>,
    ) -> Result<Self> {
        let lua = Lua::new();
        register_globals(&lua, instance_id, &ctx.control).map_err(lua_err)?;
        let table = load_table(&lua, script_path)?;
        let bot_key = lua.create_registry_value(table.clone()).map_err(lua_err)?;

        let win = Rc::new(RefCell::new(win_handle));
        let active = Rc::new(Cell::new(false));
        let assets = script_path.parent().map(|d| d.join("assets")).unwrap_or_else(|| PathBuf::from("assets"));

        let win_ud = lua
            .create_userdata(LuaWindow {
                inner: Rc::clone(&win),
                active: Rc::clone(&active),
                ctx,
                assets,
                templates: RefCell::new(HashMap::new()),
            })
            .map_err(lua_err)?;

        if let Ok(start_fn) = table.get::<LuaFunction>("start") {
            start_fn.call::<()>(win_ud).map_err(lua_err)?;
        }

        Ok(Self { lua, bot_key, win, active })
    }

    /// Call tick() -> Option<cooldown_ms>
    pub fn tick(&self) -> Result<Option<u64>> {
        let table: LuaTable = self.lua.registry_value(&self.bot_key).map_err(lua_err)?;
        let tick_fn: LuaFunction = table.get("tick").map_err(lua_err)?;
        let result: LuaValue = tick_fn.call(()).map_err(lua_err)?;
        match result {
            LuaValue::Integer(ms) => Ok(Some(ms.max(0) as u64)),
            LuaValue::Number(ms) => Ok(Some(ms.max(0.0) as u64)),
            _ => Ok(None),
        }
    }

    /// Call get_status() -> String
    pub fn get_status(&self) -> Result<String> {
        let table: LuaTable = self.lua.registry_value(&self.bot_key).map_err(lua_err)?;
        match table.get::<LuaFunction>("get_status") {
            Ok(f) => f.call::<String>(()).map_err(lua_err),
            Err(_) => Ok(String::new()),
        }
    }

    /// Call reset()
    pub fn reset(&self) -> Result<()> {
        let table: LuaTable = self.lua.registry_value(&self.bot_key).map_err(lua_err)?;
        if let Ok(f) = table.get::<LuaFunction>("reset") {
            f.call::<()>(()).map_err(lua_err)?;
        }
        Ok(())
    }

    /// Call stop()
    pub fn stop(&mut self) -> Result<()> {
        let table: LuaTable = self.lua.registry_value(&self.bot_key).map_err(lua_err)?;
        if let Ok(f) = table.get::<LuaFunction>("stop") {
            f.call::<()>(()).map_err(lua_err)?;
        }
        Ok(())
    }

    /// Activate the window (bring to foreground).
    pub fn activate(&self) {
        self.win.borrow_mut().activate();
    }

    /// Set whether the window is currently active (controls whether win actions are allowed).
    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }
}

/// Register the F.* global table into a Lua state.
fn register_globals(lua: &Lua, tag: &str, control: &ControlHandle) -> mlua::Result<()> {
    let f_table = lua.create_table()?;

    // F.sleep(seconds), jittered and cut short by termination
    let sleeper = control.clone();
    let sleep_fn = lua.create_function(move |_, secs: f64| sleep::sleep_jitter(&sleeper, secs).map_err(to_lua))?;
    f_table.set("sleep", sleep_fn)?;

    // F.propose_break(probability, min_secs, max_secs) -> scheduled?
    let breaker = control.clone();
    let break_fn = lua.create_function(move |_, (p, lo, hi): (f64, f64, f64)| {
        breaker.propose_break(p, lo..=hi).map(|d| d.is_some()).map_err(to_lua)
    })?;
    f_table.set("propose_break", break_fn)?;

    // F.log(msg), prefixed with the instance tag
    let tag = tag.to_string();
    if !tag.is_empty() {
        logger::register_prefix(&tag, logger::COLOR_BLUE);
    }
    let log_fn = lua.create_function(move |_, msg: String| {
        if tag.is_empty() {
            logger::info(&msg);
        } else {
            logger::info_p(&tag, &msg);
        }
        Ok(())
    })?;
    f_table.set("log", log_fn)?;

    lua.globals().set("F", f_table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::Rgba;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect as IpRect;

    use crate::platform::stub::{StubInput, StubWindow};
    use crate::settings::MotionSettings;

    fn write_bot(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("main.lua");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn context(reader: Arc<dyn TextReader>) -> Rc<BotContext> {
        let control = ControlHandle::with_timing(Duration::from_millis(20), Duration::from_secs(30));
        let input = StubInput::at(Point::new(150, 120));
        let mouse = Mouse::with_seed(Box::new(input), control.clone(), MotionSettings::default(), 3);
        Rc::new(BotContext {
            mouse: Rc::new(RefCell::new(mouse)),
            reader,
            control,
            hover_area: Rect::new(0, 0, 100, 20),
        })
    }

    fn green_window() -> Box<dyn WindowHandle> {
        let mut frame = RgbaImage::from_pixel(320, 240, Rgba([10, 10, 10, 255]));
        draw_filled_rect_mut(&mut frame, IpRect::at(40, 60).of_size(20, 20), Rgba([0, 255, 0, 255]));
        Box::new(StubWindow::with_frame(7, WindowRect::new(100, 100, 320, 240), frame))
    }

    #[test]
    fn meta_requires_tick() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write_bot(dir.path(), "return { window_pattern = 'RuneLite', description = 'demo', tick = function() end }");
        assert_eq!(LuaBot::load_meta(&ok).unwrap(), ("RuneLite".to_string(), "demo".to_string()));

        let missing = write_bot(dir.path(), "return { window_pattern = 'x', description = 'y' }");
        assert!(LuaBot::load_meta(&missing).is_err());
    }

    #[test]
    fn tick_sees_colour_boxes_and_returns_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            local win
            local seen = "none"
            return {
                window_pattern = "stub", description = "finder",
                start = function(w) win = w end,
                tick = function()
                    local box = win:find_color(0, 255, 0, 5)
                    local none = win:find_color(255, 0, 255, 5)
                    if box and not none then seen = box.x0 .. "," .. box.y0 end
                    return 250
                end,
                get_status = function() return seen end,
            }
            "#,
        );
        let bot = LuaBot::new(&path, "finder-7", green_window(), context(Arc::new(crate::ocr::NoText))).unwrap();
        bot.set_active(true);
        assert_eq!(bot.tick().unwrap(), Some(250));
        let status = bot.get_status().unwrap();
        let (x, y) = status.split_once(',').unwrap();
        assert!((40..=42).contains(&x.parse::<i32>().unwrap()), "{}", status);
        assert!((60..=62).contains(&y.parse::<i32>().unwrap()), "{}", status);
    }

    #[test]
    fn inactive_window_drops_actions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            local win
            return {
                window_pattern = "stub", description = "idle",
                start = function(w) win = w end,
                tick = function() return win:find_color(0, 255, 0) == nil and 1 or 2 end,
            }
            "#,
        );
        let bot = LuaBot::new(&path, "idle-7", green_window(), context(Arc::new(crate::ocr::NoText))).unwrap();
        assert_eq!(bot.tick().unwrap(), Some(1));
    }

    #[test]
    fn click_color_reports_verification_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            local win
            local msg = ""
            return {
                window_pattern = "stub", description = "clicker",
                start = function(w) win = w end,
                tick = function()
                    local ok, err = win:click_color{ r = 0, g = 255, b = 0, tol = 5,
                        keywords = { "chop" }, retry_hover = 2 }
                    msg = err or ""
                    return ok and 1 or 0
                end,
                get_status = function() return msg end,
            }
            "#,
        );
        let reader: Arc<dyn TextReader> = Arc::new(|_: &image::GrayImage| Some("Walk here".to_string()));
        let bot = LuaBot::new(&path, "clicker-7", green_window(), context(reader)).unwrap();
        bot.set_active(true);
        assert_eq!(bot.tick().unwrap(), Some(0));
        assert!(bot.get_status().unwrap().contains("2 attempt"));
    }

    #[test]
    fn termination_surfaces_as_a_lua_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            return {
                window_pattern = "stub", description = "sleeper",
                tick = function() F.sleep(5); return 1 end,
            }
            "#,
        );
        let ctx = context(Arc::new(crate::ocr::NoText));
        let control = ctx.control.clone();
        let bot = LuaBot::new(&path, "sleeper-7", green_window(), ctx).unwrap();
        control.request_terminate();
        let err = bot.tick().unwrap_err();
        assert!(err.to_string().contains("termination requested"), "{}", err);
    }

    #[test]
    fn propose_break_is_exposed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            return {
                window_pattern = "stub", description = "rest",
                tick = function() return F.propose_break(1.0, 30, 60) and 1 or 0 end,
            }
            "#,
        );
        let ctx = context(Arc::new(crate::ocr::NoText));
        let control = ctx.control.clone();
        let bot = LuaBot::new(&path, "rest-7", green_window(), ctx).unwrap();
        assert_eq!(bot.tick().unwrap(), Some(1));
        assert!(control.break_remaining().is_some());
    }

    #[test]
    fn unusable_numbers_raise_lua_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bot(
            dir.path(),
            r#"
            local seen = ""
            return {
                window_pattern = "stub", description = "bad numbers",
                tick = function()
                    local failed = 0
                    for _, f in ipairs({
                        function() F.sleep(0/0) end,
                        function() F.sleep(1/0) end,
                        function() F.propose_break(0/0, 1, 2) end,
                        function() F.propose_break(1, 1, 1/0) end,
                    }) do
                        local ok, err = pcall(f)
                        if not ok then
                            failed = failed + 1
                            seen = tostring(err)
                        end
                    end
                    local long = F.propose_break(1, 1e300, 1e300)
                    return failed + (long and 10 or 0)
                end,
                get_status = function() return seen end,
            }
            "#,
        );
        let ctx = context(Arc::new(crate::ocr::NoText));
        let control = ctx.control.clone();
        let bot = LuaBot::new(&path, "bad-7", green_window(), ctx).unwrap();
        assert_eq!(bot.tick().unwrap(), Some(14));
        assert!(bot.get_status().unwrap().contains("invalid argument"));
        assert!(control.break_remaining().unwrap() <= Duration::from_secs(30));
    }
}
