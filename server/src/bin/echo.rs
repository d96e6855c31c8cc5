//! Echo server demo.

use clap::Parser;
use riffle::{metrics, Action, Config, Conn, Events, Server};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "riffle-echo")]
#[command(about = "Event-driven echo server")]
struct Args {
    /// Address to serve, e.g. tcp://127.0.0.1:6000 or udp://127.0.0.1:6000
    #[arg(long, default_value = "tcp://127.0.0.1:6000")]
    addr: String,

    /// Number of worker loops (default: cores minus one)
    #[arg(long)]
    workers: Option<usize>,

    /// Run the global ticker (logs a stats line every 10 seconds)
    #[arg(long)]
    tick: bool,

    /// Load settings from a TOML file instead of flags
    #[arg(long)]
    config: Option<PathBuf>,
}

struct Echo;

impl Events for Echo {
    fn data(&self, _conn: &mut Conn, input: Option<&[u8]>) -> (Vec<u8>, Action) {
        (input.map(<[u8]>::to_vec).unwrap_or_default(), Action::None)
    }

    fn tick(&self) -> (Duration, Action) {
        tracing::info!(
            accepted = metrics::CONNECTIONS_ACCEPTED.value(),
            active = metrics::CONNECTIONS_ACTIVE.value(),
            bytes_in = metrics::BYTES_RECEIVED.value(),
            bytes_out = metrics::BYTES_SENT.value(),
            "stats"
        );
        (Duration::from_secs(10), Action::None)
    }
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => {
            let mut config = Config::new(args.addr);
            config.workers = args.workers;
            config.tick = args.tick;
            config
        }
    };

    riffle::logging::init(&config.logging);

    let server = match Server::bind(config, Echo) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to start: {e}");
            std::process::exit(1);
        }
    };
    riffle::signal::install(server.shutdown_handle());

    if let Err(e) = server.run() {
        eprintln!("engine error: {e}");
        std::process::exit(1);
    }
}
