use std::io::{BufRead, Write};

use sightline_core::{ActionOutcome, FeedKind, ProcessRecord};

use super::{Context, fail, find_process};

fn confirm(target: &ProcessRecord) -> bool {
    print!(
        "Terminate {} (pid {}, {:.1} MB)? [y/N] ",
        target.name, target.pid, target.memory_mb
    );
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn run(ctx: &Context, pid: u32, yes: bool) {
    let config = ctx.load_config();
    let mut console = ctx.start(&config, &[FeedKind::Processes]);
    let target = find_process(&mut console, pid);
    let Some(actions) = console.actions() else {
        fail("this backend cannot act on processes");
    };

    let result = actions.terminate(&target, |t| yes || confirm(t));
    match result {
        Ok(ActionOutcome::Done) => println!("Terminated {} (pid {pid}).", target.name),
        Ok(ActionOutcome::Declined) => println!("Cancelled."),
        Err(e) => fail(&e.to_string()),
    }
    console.stop();
}
