pub mod channels {
    use crate::channels::{Channel, LegalValues};
    use crate::output;
    use crate::registers::Codec;

    /// List the channel table: where each channel reads from, where it
    /// writes to and which values it accepts.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list channels whose key or description contains this string
        /// (case-insensitive).
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not produce the channel listing")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    struct ChannelSchema {
        key: String,
        block: Option<crate::channels::Block>,
        word: Option<u16>,
        codec: &'static str,
        write_address: Option<u16>,
        accepts: Option<String>,
        description: &'static str,
    }

    fn codec_name(codec: Codec) -> &'static str {
        match codec {
            Codec::RawUint16 => "rawUint16",
            Codec::SignedTenths => "signedTenths",
            Codec::PercentUint16 => "percentUint16",
            Codec::Uint32BE => "uint32BE",
            Codec::SelectorLevel { .. } => "selectorLevel",
        }
    }

    fn accepts(legal: LegalValues) -> String {
        match legal {
            LegalValues::Toggle => "on/off".to_string(),
            LegalValues::Levels(levels) => levels
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join("|"),
            LegalValues::Range(lo, hi) => format!("{lo}..={hi}"),
        }
    }

    fn schema(channel: &Channel) -> ChannelSchema {
        ChannelSchema {
            key: channel.key.to_string(),
            block: channel.read.map(|r| r.block),
            word: channel.read.map(|r| (r.byte_offset / 2) as u16),
            codec: codec_name(channel.read.map(|r| r.codec).or(channel.write.map(|w| w.codec))
                .unwrap_or(Codec::RawUint16)),
            write_address: channel.write.map(|w| w.address),
            accepts: channel.write.map(|w| accepts(w.legal)),
            description: channel.description,
        }
    }

    fn is_match(channel: &Channel, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        channel.key.to_string().to_uppercase().contains(&pattern)
            || channel.description.to_uppercase().contains(&pattern)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut writer = args.output.to_writer()?;
        writer.headers(&["Channel", "Block", "Word", "Codec", "Write", "Accepts", "Description"])?;
        for channel in Channel::all() {
            if let Some(pattern) = &args.filter {
                if !is_match(channel, pattern) {
                    continue;
                }
            }
            let schema = schema(channel);
            writer.record(
                || {
                    vec![
                        schema.key.clone(),
                        schema.block.map(|b| format!("{b:?}")).unwrap_or_default(),
                        schema.word.map(|w| w.to_string()).unwrap_or_default(),
                        schema.codec.to_string(),
                        schema.write_address.map(|a| a.to_string()).unwrap_or_default(),
                        schema.accepts.clone().unwrap_or_default(),
                        schema.description.to_string(),
                    ]
                },
                || &schema,
            )?;
        }
        writer.finish()?;
        Ok(())
    }
}

pub mod poll {
    use crate::poll::Poller;
    use crate::sync::{StateSink, Update};
    use crate::{connection, output};
    use tracing::{info, warn};

    /// Periodically read the controller and print the channels that changed.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Pause between the end of one poll cycle and the start of the
        /// next.
        #[arg(long, default_value = "30s")]
        interval: humantime::Duration,
        /// Run a single poll cycle and exit. A failed cycle fails the
        /// command instead of being retried.
        #[arg(long)]
        once: bool,
        /// Compare the controller clock against the local wall clock every
        /// cycle and correct the fields that drifted.
        #[arg(long)]
        sync_clock: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("table output buffers until exit; use jsonl or csv for polling")]
        TableOutput,
        #[error("could not set up the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not write a state update")]
        Output(#[from] output::Error),
        #[error("the poll cycle failed")]
        Cycle(#[from] connection::Error),
    }

    struct EventSink<'w> {
        writer: &'w mut output::Writer,
        failed: Option<output::Error>,
    }

    impl StateSink for EventSink<'_> {
        fn push(&mut self, update: Update<'_>) {
            if self.failed.is_some() {
                return;
            }
            let cells = || {
                vec![
                    update.channel.to_string(),
                    update.numeric.to_string(),
                    update.text.to_string(),
                    update.timed_out.to_string(),
                ]
            };
            if let Err(e) = self.writer.record(cells, || &update) {
                self.failed = Some(e);
            }
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        if let output::Format::Table = args.output.format() {
            return Err(Error::TableOutput);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(run_loop(args))
    }

    async fn run_loop(args: Args) -> Result<(), Error> {
        let interval = *args.interval;
        let mut writer = args.output.to_writer()?;
        writer.headers(&["channel", "numeric", "text", "timed_out"])?;
        let mut poller = Poller::new(args.sync_clock);
        loop {
            let mut sink = EventSink { writer: &mut writer, failed: None };
            let outcome = poller.run_cycle(&args.connection, &mut sink).await;
            if let Some(e) = sink.failed.take() {
                return Err(Error::Output(e));
            }
            match outcome {
                Ok(summary) => info!(
                    message = "cycle complete",
                    emitted = summary.emitted,
                    suppressed = summary.suppressed,
                    decode_failures = summary.decode_failures,
                    failed_blocks = summary.failed_blocks,
                    clock_writes = summary.clock_writes,
                ),
                Err(e) if args.once => return Err(Error::Cycle(e)),
                Err(e) => warn!(
                    message = "cycle failed, will retry on the next tick",
                    error = &e as &dyn std::error::Error,
                ),
            }
            if args.once {
                return Ok(writer.finish()?);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

pub mod set {
    use crate::channels::ChannelKey;
    use crate::connection;
    use crate::dispatch::{self, Action, Command};
    use crate::sync::{StateSink, StateStore, Update};
    use std::str::FromStr as _;

    /// Write a value to a single writable channel.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// The channel key, as listed by the `channels` subcommand.
        channel: String,
        /// `on`, `off`, or a numeric level.
        value: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("`{1}` does not name a channel")]
        UnknownChannel(#[source] strum::ParseError, String),
        #[error("`{1}` is neither on/off nor a numeric level")]
        InvalidValue(#[source] std::num::ParseIntError, String),
        #[error("could not set up the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("the controller did not accept the command")]
        Rejected(#[from] dispatch::Rejection),
    }

    struct Announce;

    impl StateSink for Announce {
        fn push(&mut self, update: Update<'_>) {
            println!("{} = {}", update.channel, update.text);
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let channel = ChannelKey::from_str(&args.channel)
            .map_err(|e| Error::UnknownChannel(e, args.channel.clone()))?;
        let action = match &*args.value.to_lowercase() {
            "on" => Action::On,
            "off" => Action::Off,
            other => Action::SetLevel(
                other.parse().map_err(|e| Error::InvalidValue(e, args.value.clone()))?,
            ),
        };
        let command = Command { channel, action };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let mut store = StateStore::new();
        runtime.block_on(dispatch::dispatch(&command, &args.connection, &mut store, &mut Announce))?;
        Ok(())
    }
}
