//! `sightline processes`: process table plus the global performance figures.

use std::time::Duration;

use sightline_core::{FeedKind, PriorityLevel, ProcessRecord};

use super::{Context, sample, truncate};

/// Rates are deltas, so a second cycle this far after the first gives
/// meaningful CPU and disk numbers.
const RATE_WINDOW: Duration = Duration::from_millis(500);

pub fn run(ctx: &Context, filter: Option<&str>, sort: &str, top: Option<usize>, json: bool) {
    let config = ctx.load_config();
    let mut console = ctx.start(&config, &[FeedKind::Processes]);
    sample(&mut console, FeedKind::Processes);
    std::thread::sleep(RATE_WINDOW);
    sample(&mut console, FeedKind::Processes);

    let Some(monitor) = console.processes_mut() else {
        return;
    };
    if let Some(text) = filter {
        monitor.feed_mut().set_filter(text);
    }
    let mut rows: Vec<&ProcessRecord> = monitor.feed().visible();
    match sort {
        "memory" => rows.sort_by(|a, b| b.memory_mb.total_cmp(&a.memory_mb)),
        "pid" => rows.sort_by_key(|r| r.pid),
        "name" => rows.sort_by_key(|r| r.name.to_lowercase()),
        _ => rows.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent)),
    }
    if let Some(n) = top {
        rows.truncate(n);
    }
    let perf = monitor.performance().cloned().unwrap_or_default();

    if json {
        let out = serde_json::json!({
            "performance": perf,
            "processes": rows,
        });
        match serde_json::to_string_pretty(&out) {
            Ok(s) => println!("{s}"),
            Err(e) => super::fail(&format!("cannot encode processes: {e}")),
        }
    } else {
        println!(
            "CPU {:.1}%  |  Memory {:.1}% ({:.0} / {:.0} MB, committed {:.0} MB)  |  {} processes, {} threads, {} handles",
            perf.cpu_percent,
            perf.memory_percent,
            perf.total_physical_mb - perf.available_physical_mb,
            perf.total_physical_mb,
            perf.committed_mb,
            perf.process_count,
            perf.thread_count,
            perf.handle_count,
        );
        if perf.cpu_temperature > 0.0 {
            println!("CPU temperature {:.1} C", perf.cpu_temperature);
        }
        println!();
        println!(
            "{:>7}  {:<28} {:>6} {:>9} {:>8} {:>8} {:>7} {:>7}  PRIORITY",
            "PID", "NAME", "CPU%", "MEM MB", "READ/s", "WRITE/s", "THREADS", "HANDLES"
        );
        for r in &rows {
            let priority = u32::try_from(r.priority_class)
                .ok()
                .and_then(PriorityLevel::from_class)
                .map_or("?", PriorityLevel::label);
            println!(
                "{:>7}  {:<28} {:>6.1} {:>9.1} {:>8.2} {:>8.2} {:>7} {:>7}  {}",
                r.pid,
                truncate(&r.name, 28),
                r.cpu_percent,
                r.memory_mb,
                r.disk_read_mb_s,
                r.disk_write_mb_s,
                r.thread_count,
                r.handle_count,
                priority
            );
        }
    }

    console.stop();
}
