use sightline_core::MonitorConfig;

use super::{Context, fail};

pub fn show(ctx: &Context) {
    let config = ctx.load_config();
    match serde_json::to_string_pretty(&config) {
        Ok(s) => println!("{s}"),
        Err(e) => fail(&format!("cannot encode settings: {e}")),
    }
}

pub fn path(ctx: &Context) {
    match ctx.settings_path() {
        Some(p) => println!("{}", p.display()),
        None => fail("no configuration directory on this platform; pass --config"),
    }
}

pub fn reset(ctx: &Context) {
    let Some(path) = ctx.settings_path() else {
        fail("no configuration directory on this platform; pass --config");
    };
    match MonitorConfig::reset(&path) {
        Ok(_) => println!("Wrote default settings to {}", path.display()),
        Err(e) => fail(&e.to_string()),
    }
}
