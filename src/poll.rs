use crate::channels::{Block, ChannelKey};
use crate::connection::{self, Session};
use crate::registers::{DecodeError, RegisterWindow, Value};
use crate::sync::{Applied, ChannelState, StateSink, StateStore, Update};
use tracing::{debug, info, warn};

/// Counts for one heartbeat, mostly for the cycle-outcome log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleSummary {
    pub emitted: usize,
    pub suppressed: usize,
    pub decode_failures: usize,
    pub failed_blocks: usize,
    pub clock_writes: usize,
}

/// Drives one poll cycle per tick: open a session, read the core and
/// monitoring blocks, decode every channel and hand the results to the
/// state store. Cycles never overlap and never share a session; a cycle
/// that fails is simply retried in full on the next tick.
pub struct Poller {
    sync_clock: bool,
    pub store: StateStore,
}

impl Poller {
    pub fn new(sync_clock: bool) -> Self {
        Self { sync_clock, store: StateStore::new() }
    }

    /// One heartbeat. Returns an error only when no session could be
    /// opened; read failures inside the cycle degrade to a partial sync.
    pub async fn run_cycle(
        &mut self,
        args: &connection::Args,
        sink: &mut dyn StateSink,
    ) -> Result<CycleSummary, connection::Error> {
        let reference = jiff::Zoned::now();
        let mut session = Session::open(args).await?;
        let summary = self.cycle_io(&mut session, &reference, sink).await;
        session.close().await;
        debug!(message = "cycle finished", ?summary);
        Ok(summary)
    }

    async fn cycle_io(
        &mut self,
        session: &mut Session,
        reference: &jiff::Zoned,
        sink: &mut dyn StateSink,
    ) -> CycleSummary {
        let mut summary = CycleSummary::default();
        match session.read_block(Block::Core).await {
            Ok(window) => self.sync_block(Block::Core, &window, sink, &mut summary),
            Err(e) => {
                // The first read failing means the link is bad; close now
                // rather than waiting out another timeout on the next block.
                summary.failed_blocks += 1;
                warn!(
                    message = "core block read failed, ending the cycle early",
                    error = &e as &dyn std::error::Error
                );
                return summary;
            }
        }
        if self.sync_clock {
            self.sync_clock_registers(session, reference, &mut summary).await;
        }
        match session.read_block(Block::Monitoring).await {
            Ok(window) => self.sync_block(Block::Monitoring, &window, sink, &mut summary),
            Err(e) => {
                summary.failed_blocks += 1;
                warn!(
                    message = "monitoring block read failed, its channels keep their previous state",
                    error = &e as &dyn std::error::Error
                );
            }
        }
        summary
    }

    /// Decode every channel bound to `block` and push the changed ones. A
    /// decode failure skips that one channel, never its siblings.
    fn sync_block(
        &mut self,
        block: Block,
        window: &RegisterWindow,
        sink: &mut dyn StateSink,
        summary: &mut CycleSummary,
    ) {
        let mut mode_level = None;
        for channel in block.channels() {
            let Some(read) = channel.read else { continue };
            let value = match read.codec.decode(window, read.byte_offset) {
                Ok(value) => value,
                Err(e) => {
                    summary.decode_failures += 1;
                    warn!(
                        message = "could not decode channel",
                        channel = %channel.key,
                        error = &e as &dyn std::error::Error
                    );
                    continue;
                }
            };
            if channel.key == ChannelKey::Mode {
                if let Value::Level(level) = value {
                    mode_level = Some(level);
                }
            }
            self.apply(channel.key, value, sink, summary);
        }
        if let Some(level) = mode_level {
            self.sync_override_dimmers(level, sink, summary);
        }
    }

    /// Mode levels 50 and 60 are the kitchen and fireplace overrides; the
    /// unit reports them through the mode register only, so their dimmer
    /// channels are derived rather than read.
    fn sync_override_dimmers(
        &mut self,
        mode_level: u16,
        sink: &mut dyn StateSink,
        summary: &mut CycleSummary,
    ) {
        let kitchen = if mode_level == 50 { 5 } else { 0 };
        let fireplace = if mode_level == 60 { 5 } else { 0 };
        self.apply(ChannelKey::Kitchen, Value::U16(kitchen), sink, summary);
        self.apply(ChannelKey::Fireplace, Value::U16(fireplace), sink, summary);
    }

    fn apply(
        &mut self,
        key: ChannelKey,
        value: Value,
        sink: &mut dyn StateSink,
        summary: &mut CycleSummary,
    ) {
        let state = ChannelState::from_value(value);
        match self.store.apply(key, state) {
            Applied::Suppressed => summary.suppressed += 1,
            Applied::Emitted => {
                summary.emitted += 1;
                // apply() stored the state we just built; borrow it back for
                // the sink so the update and the store can never disagree.
                let state = self.store.get(key).expect("state was just stored");
                sink.push(Update {
                    channel: key,
                    numeric: state.numeric,
                    text: &state.text,
                    timed_out: state.timed_out,
                });
            }
        }
    }

    async fn sync_clock_registers(
        &mut self,
        session: &mut Session,
        reference: &jiff::Zoned,
        summary: &mut CycleSummary,
    ) {
        let window = match session.read_block(Block::Clock).await {
            Ok(window) => window,
            Err(e) => {
                summary.failed_blocks += 1;
                warn!(
                    message = "clock block read failed, skipping clock sync",
                    error = &e as &dyn std::error::Error
                );
                return;
            }
        };
        let corrections = match clock_corrections(&window, &reference.datetime()) {
            Ok(corrections) => corrections,
            Err(e) => {
                summary.decode_failures += 1;
                warn!(
                    message = "clock block too short, skipping clock sync",
                    error = &e as &dyn std::error::Error
                );
                return;
            }
        };
        for correction in corrections {
            match session.write_register(correction.address, correction.value).await {
                Ok(()) => {
                    summary.clock_writes += 1;
                    info!(
                        message = "corrected controller clock drift",
                        address = correction.address,
                        value = correction.value
                    );
                }
                Err(e) => {
                    warn!(
                        message = "clock correction write failed",
                        address = correction.address,
                        error = &e as &dyn std::error::Error
                    );
                    return;
                }
            }
        }
    }
}

pub(crate) struct ClockWrite {
    pub address: u16,
    pub value: u16,
}

/// Compare the packed clock registers against a reference wall-clock sample
/// and produce writes only for the fields that drifted. Matching fields are
/// never rewritten.
pub(crate) fn clock_corrections(
    window: &RegisterWindow,
    now: &jiff::civil::DateTime,
) -> Result<Vec<ClockWrite>, DecodeError> {
    let base = Block::Clock.address();
    let packed_time = window.u16_at(0)?;
    let year = window.u16_at(2)?;
    let packed_date = window.u16_at(4)?;

    let now_hour = u16::from(now.hour() as u8);
    let now_minute = u16::from(now.minute() as u8);
    let now_year = now.year() as u16;
    let now_month = u16::from(now.month() as u8);
    let now_day = u16::from(now.day() as u8);

    let mut writes = Vec::new();
    if (packed_time >> 8, packed_time & 0xFF) != (now_hour, now_minute) {
        writes.push(ClockWrite { address: base, value: now_hour << 8 | now_minute });
    }
    if year != now_year {
        writes.push(ClockWrite { address: base + 1, value: now_year });
    }
    if (packed_date >> 8, packed_date & 0xFF) != (now_month, now_day) {
        writes.push(ClockWrite { address: base + 2, value: now_month << 8 | now_day });
    }
    Ok(writes)
}
