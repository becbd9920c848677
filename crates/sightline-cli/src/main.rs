//! CLI for sightline: live connections, processes and system load.

mod commands;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sightline")]
#[command(about = "sightline: watch connections, processes and system load from the terminal")]
#[command(version = sightline_core::VERSION)]
struct Cli {
    /// Settings file (default: <config dir>/sightline/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Load telemetry providers from this shared library instead of the built-in backend
    #[arg(long, global = true)]
    native_lib: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active connection table once
    Connections {
        /// Only TCP connections
        #[arg(long, conflicts_with = "udp_only")]
        tcp_only: bool,

        /// Only UDP endpoints
        #[arg(long)]
        udp_only: bool,

        /// Case-insensitive text filter over every column
        #[arg(long)]
        filter: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the process list and the global performance snapshot once
    Processes {
        /// Case-insensitive filter on name or pid
        #[arg(long)]
        filter: Option<String>,

        /// Sort column
        #[arg(long, default_value = "cpu", value_parser = ["cpu", "memory", "pid", "name"])]
        sort: String,

        /// Show at most this many rows
        #[arg(long)]
        top: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Sample CPU load and disk throughput
    Stats {
        /// Number of samples to take
        #[arg(long, default_value = "1")]
        count: u32,

        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Stream change events from every feed until Ctrl+C
    Watch {
        /// Comma-separated feeds: connections, processes, stats (default: all)
        #[arg(long)]
        feeds: Option<String>,

        /// Connection poll interval in milliseconds (minimum 100)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Terminate a process after confirmation
    Kill {
        pid: u32,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Change a process's scheduling priority
    Priority {
        pid: u32,

        /// realtime, high, above-normal, normal, below-normal or low
        level: String,
    },

    /// Inspect or reset persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Write default settings back to disk
    Reset,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = commands::Context {
        config_path: cli.config,
        native_lib: cli.native_lib,
    };

    match cli.command {
        Commands::Connections {
            tcp_only,
            udp_only,
            filter,
            json,
        } => commands::connections::run(&ctx, tcp_only, udp_only, filter.as_deref(), json),
        Commands::Processes {
            filter,
            sort,
            top,
            json,
        } => commands::processes::run(&ctx, filter.as_deref(), &sort, top, json),
        Commands::Stats { count, json } => commands::stats::run(&ctx, count, json),
        Commands::Watch { feeds, interval_ms } => {
            commands::watch::run(&ctx, feeds.as_deref(), interval_ms)
        }
        Commands::Kill { pid, yes } => commands::kill::run(&ctx, pid, yes),
        Commands::Priority { pid, level } => commands::priority::run(&ctx, pid, &level),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&ctx),
            ConfigAction::Path => commands::config::path(&ctx),
            ConfigAction::Reset => commands::config::reset(&ctx),
        },
    }
}
