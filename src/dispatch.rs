use crate::channels::{Channel, ChannelKey, LegalValues};
use crate::connection::{self, Session};
use crate::registers::{Value, Words};
use crate::sync::{Applied, ChannelState, StateSink, StateStore, Update};
use tracing::info;

/// An abstract inbound command from the host platform.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub channel: ChannelKey,
    pub action: Action,
}

#[derive(Debug, Clone, Copy)]
pub enum Action {
    On,
    Off,
    SetLevel(u16),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::On => f.write_str("On"),
            Action::Off => f.write_str("Off"),
            Action::SetLevel(level) => write!(f, "SetLevel({level})"),
        }
    }
}

/// Why a command was not applied. Validation rejections are the caller's
/// to act on; they are never logged as transport faults.
#[derive(thiserror::Error, Debug)]
pub enum Rejection {
    #[error("channel {0} is not writable")]
    NotWritable(ChannelKey),
    #[error("channel {channel} does not accept {action}")]
    UnsupportedAction { channel: ChannelKey, action: Action },
    #[error("level {level} is not a legal value for channel {channel}")]
    InvalidLevel { channel: ChannelKey, level: u16 },
    #[error("transport failure while applying the command")]
    Transport(#[source] connection::Error),
}

#[derive(Debug)]
pub(crate) struct PreparedWrite {
    pub address: u16,
    pub words: Words,
    /// What the channel state becomes once the write goes through.
    pub optimistic: Value,
}

/// Validate a command against the channel table and encode it. Pure; runs
/// to completion before any transport resource is touched.
pub(crate) fn prepare(command: &Command) -> Result<PreparedWrite, Rejection> {
    let channel = Channel::by_key(command.channel);
    let Some(write) = channel.write else {
        return Err(Rejection::NotWritable(command.channel));
    };
    let value = match (write.legal, command.action) {
        (LegalValues::Toggle, Action::On) => Value::U16(1),
        (LegalValues::Toggle, Action::Off) => Value::U16(0),
        (LegalValues::Levels(set), Action::SetLevel(level)) => {
            if !set.contains(&level) {
                return Err(Rejection::InvalidLevel { channel: command.channel, level });
            }
            Value::Level(level)
        }
        (LegalValues::Range(min, max), Action::SetLevel(level)) => {
            if !(min..=max).contains(&level) {
                return Err(Rejection::InvalidLevel { channel: command.channel, level });
            }
            Value::U16(level)
        }
        (_, action) => {
            return Err(Rejection::UnsupportedAction { channel: command.channel, action });
        }
    };
    let words = write.codec.encode(value).map_err(|_| Rejection::InvalidLevel {
        channel: command.channel,
        level: match command.action {
            Action::SetLevel(level) => level,
            Action::On => 1,
            Action::Off => 0,
        },
    })?;
    Ok(PreparedWrite { address: write.address, words, optimistic: value })
}

/// Validate, encode, write, then update the state store optimistically so
/// the host reflects the command before the next poll confirms it. A
/// transport failure surfaces as a rejection after the session is closed;
/// the optimistic update is not applied in that case.
pub async fn dispatch(
    command: &Command,
    args: &connection::Args,
    store: &mut StateStore,
    sink: &mut dyn StateSink,
) -> Result<(), Rejection> {
    let prepared = prepare(command)?;
    let mut session = Session::open(args).await.map_err(Rejection::Transport)?;
    let mut outcome = Ok(());
    for (offset, word) in prepared.words.as_slice().iter().enumerate() {
        let address = prepared.address + offset as u16;
        if let Err(e) = session.write_register(address, *word).await {
            outcome = Err(Rejection::Transport(e));
            break;
        }
    }
    session.close().await;
    outcome?;
    info!(
        message = "command applied",
        channel = %command.channel,
        action = %command.action
    );
    let state = ChannelState::from_value(prepared.optimistic);
    if let Applied::Emitted = store.apply(command.channel, state) {
        let state = store.get(command.channel).expect("state was just stored");
        sink.push(Update {
            channel: command.channel,
            numeric: state.numeric,
            text: &state.text,
            timed_out: state.timed_out,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_level(channel: ChannelKey, level: u16) -> Command {
        Command { channel, action: Action::SetLevel(level) }
    }

    #[test]
    fn mode_level_outside_the_legal_set_is_rejected_before_any_io() {
        let rejection = prepare(&set_level(ChannelKey::Mode, 25)).unwrap_err();
        assert!(matches!(
            rejection,
            Rejection::InvalidLevel { channel: ChannelKey::Mode, level: 25 }
        ));
    }

    #[test]
    fn mode_level_encodes_to_the_compact_wire_value() {
        let prepared = prepare(&set_level(ChannelKey::Mode, 30)).unwrap();
        assert_eq!(prepared.address, 4);
        assert_eq!(prepared.words.as_slice(), &[3]);
        assert_eq!(prepared.optimistic, Value::Level(30));
    }

    #[test]
    fn temperature_control_encodes_with_its_display_base() {
        let prepared = prepare(&set_level(ChannelKey::TempControlType, 30)).unwrap();
        assert_eq!(prepared.address, 10);
        assert_eq!(prepared.words.as_slice(), &[2]);
    }

    #[test]
    fn toggles_map_on_off_to_single_words() {
        let on = prepare(&Command { channel: ChannelKey::Eco, action: Action::On }).unwrap();
        assert_eq!((on.address, on.words.as_slice()), (2, &[1][..]));
        let off = prepare(&Command { channel: ChannelKey::OnOff, action: Action::Off }).unwrap();
        assert_eq!((off.address, off.words.as_slice()), (0, &[0][..]));
    }

    #[test]
    fn read_only_channels_are_not_writable() {
        let rejection =
            prepare(&Command { channel: ChannelKey::OutdoorTemp, action: Action::On }).unwrap_err();
        assert!(matches!(rejection, Rejection::NotWritable(ChannelKey::OutdoorTemp)));
    }

    #[test]
    fn action_kind_must_match_the_channel() {
        assert!(matches!(
            prepare(&set_level(ChannelKey::Eco, 1)).unwrap_err(),
            Rejection::UnsupportedAction { .. }
        ));
        assert!(matches!(
            prepare(&Command { channel: ChannelKey::Mode, action: Action::On }).unwrap_err(),
            Rejection::UnsupportedAction { .. }
        ));
    }

    #[test]
    fn dimmer_levels_are_range_checked() {
        let prepared = prepare(&set_level(ChannelKey::Kitchen, 50)).unwrap();
        assert_eq!((prepared.address, prepared.words.as_slice()), (5130, &[50][..]));
        assert!(matches!(
            prepare(&set_level(ChannelKey::Fireplace, 101)).unwrap_err(),
            Rejection::InvalidLevel { .. }
        ));
    }
}
