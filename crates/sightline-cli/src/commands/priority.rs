use sightline_core::{FeedKind, PriorityLevel};

use super::{Context, fail, find_process};

pub fn run(ctx: &Context, pid: u32, level: &str) {
    let level: PriorityLevel = level.parse().unwrap_or_else(|e: sightline_core::TelemetryError| {
        let names: Vec<_> = PriorityLevel::ALL.iter().map(|l| l.label()).collect();
        fail(&format!("{e} (expected one of: {})", names.join(", ")))
    });

    let config = ctx.load_config();
    let mut console = ctx.start(&config, &[FeedKind::Processes]);
    let target = find_process(&mut console, pid);
    let Some(actions) = console.actions() else {
        fail("this backend cannot act on processes");
    };

    if let Err(e) = actions.set_priority(&target, level) {
        fail(&e.to_string());
    }
    match actions.full_path(&target) {
        Ok(path) => println!("{} ({path}) priority set to {level}.", target.name),
        Err(_) => println!("{} (pid {pid}) priority set to {level}.", target.name),
    }
    console.stop();
}
