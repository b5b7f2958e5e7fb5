pub mod types;
pub mod error;
pub mod logger;
pub mod settings;
pub mod control;
pub mod sleep;

pub mod region;
pub mod matcher;
pub mod colorbox;
pub mod ocr;
pub mod motion;
pub mod guard;

pub mod platform;
pub mod lua_rt;
pub mod orchestrator;
