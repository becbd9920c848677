use sightline_core::FeedKind;

use super::{Context, fail};

pub fn run(ctx: &Context, count: u32, json: bool) {
    let config = ctx.load_config();
    let mut console = ctx.start(&config, &[FeedKind::Stats]);
    let interval = config.stats_interval();

    // The first sample only primes the rate counters.
    super::sample(&mut console, FeedKind::Stats);
    for i in 0..count.max(1) {
        std::thread::sleep(interval);
        super::sample(&mut console, FeedKind::Stats);
        let Some(stats) = console.stats().and_then(|s| s.current()) else {
            fail("no stats sample was produced");
        };
        if json {
            match serde_json::to_string(&stats) {
                Ok(s) => println!("{s}"),
                Err(e) => fail(&format!("cannot encode stats: {e}")),
            }
        } else {
            println!(
                "[{:>3}] CPU {:>5.1}%  disk read {:>8.2} MB/s  write {:>8.2} MB/s",
                i + 1,
                stats.cpu_percent,
                stats.disk_read_mb_s,
                stats.disk_write_mb_s
            );
        }
    }

    console.stop();
}
