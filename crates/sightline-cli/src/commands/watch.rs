//! `sightline watch`: print change events from the running feeds until Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sightline_core::{ChangeSet, Console, ConsoleEvent, FeedKind};

use super::{Context, fail};

const PUMP_INTERVAL: Duration = Duration::from_millis(100);

fn parse_feeds(list: Option<&str>) -> Vec<FeedKind> {
    let Some(list) = list else {
        return FeedKind::ALL.to_vec();
    };
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            FeedKind::ALL
                .into_iter()
                .find(|k| k.label() == name.to_ascii_lowercase())
                .unwrap_or_else(|| fail(&format!("unknown feed '{name}'")))
        })
        .collect()
}

fn describe<Id: std::fmt::Debug>(label: &str, changes: &ChangeSet<Id>) -> String {
    let mut line = format!(
        "{label}: +{} ~{} -{}",
        changes.added.len(),
        changes.changed.len(),
        changes.removed.len()
    );
    if changes.selection_cleared {
        line.push_str(" (selection cleared)");
    }
    line
}

fn print_event(console: &Console, event: &ConsoleEvent) {
    match event {
        ConsoleEvent::ConnectionsChanged(changes) => {
            let total = console
                .connections()
                .map_or(0, |m| m.feed().collection().len());
            println!("{} ({total} rows)", describe("connections", changes));
        }
        ConsoleEvent::ConnectionSummaryChanged(s) => {
            println!("connections: TCP {} UDP {} total {}", s.tcp, s.udp, s.total);
        }
        ConsoleEvent::ProcessesChanged(changes) => {
            let total = console.processes().map_or(0, |m| m.process_count());
            println!("{} ({total} rows)", describe("processes", changes));
        }
        ConsoleEvent::PerformanceChanged(p) => {
            println!(
                "performance: CPU {:.1}%  memory {:.1}%  {} processes  {} handles",
                p.cpu_percent, p.memory_percent, p.process_count, p.handle_count
            );
        }
        ConsoleEvent::StatsChanged(s) => {
            println!(
                "stats: CPU {:.1}%  read {:.2} MB/s  write {:.2} MB/s",
                s.cpu_percent, s.disk_read_mb_s, s.disk_write_mb_s
            );
        }
    }
}

pub fn run(ctx: &Context, feeds: Option<&str>, interval_ms: Option<u64>) {
    let mut config = ctx.load_config();
    if let Some(ms) = interval_ms {
        config.connection_interval_ms = ms;
    }
    let kinds = parse_feeds(feeds);
    let mut console = ctx.start(&config, &kinds);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        fail(&format!("cannot install Ctrl+C handler: {e}"));
    }

    eprintln!("Watching {} feed(s). Press Ctrl+C to stop.", kinds.len());
    while running.load(Ordering::SeqCst) {
        for event in console.pump() {
            print_event(&console, &event);
        }
        std::thread::sleep(PUMP_INTERVAL);
    }

    eprintln!("Stopping...");
    console.stop();
}
