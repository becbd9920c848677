//! `sightline connections`: one reconciled snapshot of the connection table.

use sightline_core::FeedKind;

use super::{Context, sample, truncate};

pub fn run(ctx: &Context, tcp_only: bool, udp_only: bool, filter: Option<&str>, json: bool) {
    let mut config = ctx.load_config();
    if tcp_only || udp_only {
        config.show_tcp = tcp_only;
        config.show_udp = udp_only;
    }

    let mut console = ctx.start(&config, &[FeedKind::Connections]);
    sample(&mut console, FeedKind::Connections);

    let Some(monitor) = console.connections_mut() else {
        return;
    };
    if let Some(text) = filter {
        monitor.feed_mut().set_filter(text);
    }
    let summary = monitor.summary();
    let rows = monitor.feed().visible();

    if json {
        match serde_json::to_string_pretty(&rows) {
            Ok(s) => println!("{s}"),
            Err(e) => super::fail(&format!("cannot encode connections: {e}")),
        }
    } else {
        println!(
            "{:<5} {:<21} {:<21} {:<13} {:>7}  PROCESS",
            "PROTO", "LOCAL", "REMOTE", "STATE", "PID"
        );
        for view in &rows {
            let r = &view.record;
            println!(
                "{:<5} {:<21} {:<21} {:<13} {:>7}  {}",
                r.protocol.to_string(),
                r.local_endpoint(),
                r.remote_endpoint(),
                r.state.display_name(),
                r.pid,
                truncate(&view.process_name, 32)
            );
        }
        println!();
        println!(
            "{} shown  |  TCP {}  UDP {}  total {}",
            rows.len(),
            summary.tcp,
            summary.udp,
            summary.total
        );
    }

    console.stop();
}
