use clap::Parser as _;
use komfovent_c6_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Channels(commands::channels::Args),
    Poll(commands::poll::Args),
    Set(commands::set::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter = std::env::var("KOMFOVENT_C6_TOOLS_LOG")
        .ok()
        .and_then(|v| v.parse::<tracing_subscriber::filter::targets::Targets>().ok())
        .unwrap_or_else(|| {
            tracing_subscriber::filter::targets::Targets::new()
                .with_default(tracing::level_filters::LevelFilter::WARN)
        });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Channels(args) => end(commands::channels::run(args)),
        Commands::Poll(args) => end(commands::poll::run(args)),
        Commands::Set(args) => end(commands::set::run(args)),
    }
}
