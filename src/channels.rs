use crate::registers::Codec;

/// One contiguous block of registers fetched in a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Block {
    /// On/off, eco, auto, mode and the temperature-control selector.
    Core,
    /// Packed time-of-day, year and date words.
    Clock,
    /// Temperatures, fan and actuator percentages, filter status and the
    /// cumulative energy region.
    Monitoring,
}

impl Block {
    pub const fn address(self) -> u16 {
        match self {
            Block::Core => 0,
            Block::Clock => 28,
            Block::Monitoring => 900,
        }
    }

    pub const fn words(self) -> u16 {
        match self {
            Block::Core => 11,
            Block::Clock => 3,
            Block::Monitoring => 47,
        }
    }

    pub fn channels(self) -> impl Iterator<Item = &'static Channel> {
        CHANNELS.iter().filter(move |c| c.read.is_some_and(|r| r.block == self))
    }
}

/// The minimal set of block reads covering every readable channel in one
/// poll. The clock block is read separately and only when clock
/// synchronization is enabled.
pub const READ_PLAN: [Block; 2] = [Block::Core, Block::Monitoring];

/// A stable identifier for one logical data point on the unit.
///
/// The string forms are the channel keys the host platform sees; downstream
/// automations match on them, so they never change spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[derive(serde::Serialize)]
#[repr(usize)]
pub enum ChannelKey {
    OnOff,
    #[strum(serialize = "ECO")]
    #[serde(rename = "ECO")]
    Eco,
    Auto,
    Mode,
    TempControlType,
    SupplyTemp,
    ExtractTemp,
    OutdoorTemp,
    WaterTemp,
    SupplyFanIntensity,
    ExtractFanIntensity,
    HeatExchanger,
    ElectricHeater,
    WaterHeater,
    WaterCooler,
    #[strum(serialize = "DXUnit")]
    #[serde(rename = "DXUnit")]
    DxUnit,
    FilterImpurity,
    CurrentPowerConsumption,
    CurrentHeaterPower,
    CurrentHeatRecovery,
    CurrentExchangeEfficiency,
    CurrentEnergySaving,
    TotalEnergyConsumption,
    TotalHeaterConsumption,
    TotalEnergyRecovered,
    PanelTemp,
    PanelHumidity,
    Kitchen,
    Fireplace,
}

pub const CHANNEL_COUNT: usize = 29;

#[derive(Debug, Clone, Copy)]
pub struct ReadBinding {
    pub block: Block,
    /// Offset into the block, in bytes. Register word N sits at byte 2N.
    pub byte_offset: usize,
    pub codec: Codec,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteBinding {
    /// Absolute register address of the single-word write.
    pub address: u16,
    pub codec: Codec,
    pub legal: LegalValues,
}

/// The values a writable channel accepts, checked before anything touches
/// the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegalValues {
    /// Accepts only the On/Off actions.
    Toggle,
    /// Accepts SetLevel with a level from this set.
    Levels(&'static [u16]),
    /// Accepts SetLevel with a level in this inclusive range.
    Range(u16, u16),
}

pub struct Channel {
    pub key: ChannelKey,
    pub read: Option<ReadBinding>,
    pub write: Option<WriteBinding>,
    pub description: &'static str,
}

impl Channel {
    pub fn by_key(key: ChannelKey) -> &'static Channel {
        &CHANNELS[key as usize]
    }

    pub fn all() -> &'static [Channel] {
        &CHANNELS
    }
}

const MODE_LEVELS: &[u16] = &[10, 20, 30, 40];
const TEMP_CONTROL_LEVELS: &[u16] = &[10, 20, 30, 40];

// The cumulative counters hide behind a packed record: 6 single bytes, 17
// shorts and 5 ints precede the first 32-bit total, and every subsequent
// total is separated by 8 more bytes. The meanings of the skipped bytes are
// not modeled; only the offsets matter for wire compatibility.
const ENERGY_STREAM_SKIP: usize = 6 + 17 * 2 + 5 * 4;
const ENERGY_COUNTER_GAP: usize = 8;
const TOTAL_ENERGY_AT: usize = ENERGY_STREAM_SKIP;
const TOTAL_HEATER_AT: usize = TOTAL_ENERGY_AT + 4 + ENERGY_COUNTER_GAP;
const TOTAL_RECOVERED_AT: usize = TOTAL_HEATER_AT + 4 + ENERGY_COUNTER_GAP;

const fn ro(key: ChannelKey, block: Block, word: usize, codec: Codec, description: &'static str) -> Channel {
    Channel {
        key,
        read: Some(ReadBinding { block, byte_offset: word * 2, codec }),
        write: None,
        description,
    }
}

const fn ro_bytes(key: ChannelKey, block: Block, byte_offset: usize, codec: Codec, description: &'static str) -> Channel {
    Channel {
        key,
        read: Some(ReadBinding { block, byte_offset, codec }),
        write: None,
        description,
    }
}

const fn rw(key: ChannelKey, block: Block, word: usize, codec: Codec, legal: LegalValues, description: &'static str) -> Channel {
    Channel {
        key,
        read: Some(ReadBinding { block, byte_offset: word * 2, codec }),
        write: Some(WriteBinding { address: block.address() + word as u16, codec, legal }),
        description,
    }
}

const fn wo(key: ChannelKey, address: u16, codec: Codec, legal: LegalValues, description: &'static str) -> Channel {
    Channel {
        key,
        read: None,
        write: Some(WriteBinding { address, codec, legal }),
        description,
    }
}

use Block::{Core, Monitoring};
use Codec::{PercentUint16, RawUint16, SignedTenths, Uint32BE};
const LEVEL: Codec = Codec::SelectorLevel { base: 0 };
const LEVEL10: Codec = Codec::SelectorLevel { base: 10 };

/// The active channel table. Entries are ordered by [`ChannelKey`]
/// discriminant; the table is immutable for the lifetime of the process.
static CHANNELS: [Channel; CHANNEL_COUNT] = [
    rw(ChannelKey::OnOff, Core, 0, RawUint16, LegalValues::Toggle, "Unit on/off"),
    rw(ChannelKey::Eco, Core, 2, RawUint16, LegalValues::Toggle, "Eco mode"),
    rw(ChannelKey::Auto, Core, 3, RawUint16, LegalValues::Toggle, "Auto mode"),
    rw(ChannelKey::Mode, Core, 4, LEVEL, LegalValues::Levels(MODE_LEVELS), "Working mode selector"),
    rw(ChannelKey::TempControlType, Core, 10, LEVEL10, LegalValues::Levels(TEMP_CONTROL_LEVELS), "Temperature flow control selector"),
    ro(ChannelKey::SupplyTemp, Monitoring, 1, SignedTenths, "Supply air temperature"),
    ro(ChannelKey::ExtractTemp, Monitoring, 2, SignedTenths, "Extract air temperature"),
    ro(ChannelKey::OutdoorTemp, Monitoring, 3, SignedTenths, "Outdoor temperature"),
    ro(ChannelKey::WaterTemp, Monitoring, 4, SignedTenths, "Water temperature"),
    ro(ChannelKey::SupplyFanIntensity, Monitoring, 9, PercentUint16, "Supply fan intensity"),
    ro(ChannelKey::ExtractFanIntensity, Monitoring, 10, PercentUint16, "Extract fan intensity"),
    ro(ChannelKey::HeatExchanger, Monitoring, 11, PercentUint16, "Heat exchanger actuator"),
    ro(ChannelKey::ElectricHeater, Monitoring, 12, PercentUint16, "Electric heater actuator"),
    ro(ChannelKey::WaterHeater, Monitoring, 13, PercentUint16, "Water heater actuator"),
    ro(ChannelKey::WaterCooler, Monitoring, 14, PercentUint16, "Water cooler actuator"),
    ro(ChannelKey::DxUnit, Monitoring, 15, PercentUint16, "DX unit actuator"),
    ro(ChannelKey::FilterImpurity, Monitoring, 16, PercentUint16, "Filter impurity"),
    ro(ChannelKey::CurrentPowerConsumption, Monitoring, 20, RawUint16, "Current power consumption"),
    ro(ChannelKey::CurrentHeaterPower, Monitoring, 21, RawUint16, "Current heater power"),
    ro(ChannelKey::CurrentHeatRecovery, Monitoring, 22, RawUint16, "Current heat recovery"),
    ro(ChannelKey::CurrentExchangeEfficiency, Monitoring, 23, PercentUint16, "Current exchange efficiency"),
    ro(ChannelKey::CurrentEnergySaving, Monitoring, 24, PercentUint16, "Current energy saving"),
    ro_bytes(ChannelKey::TotalEnergyConsumption, Monitoring, TOTAL_ENERGY_AT, Uint32BE, "Total energy consumed"),
    ro_bytes(ChannelKey::TotalHeaterConsumption, Monitoring, TOTAL_HEATER_AT, Uint32BE, "Total heater consumption"),
    ro_bytes(ChannelKey::TotalEnergyRecovered, Monitoring, TOTAL_RECOVERED_AT, Uint32BE, "Total energy recovered"),
    ro(ChannelKey::PanelTemp, Monitoring, 45, SignedTenths, "Panel temperature"),
    ro(ChannelKey::PanelHumidity, Monitoring, 46, RawUint16, "Panel humidity"),
    wo(ChannelKey::Kitchen, 5130, RawUint16, LegalValues::Range(0, 100), "Kitchen override dimmer"),
    wo(ChannelKey::Fireplace, 5137, RawUint16, LegalValues::Range(0, 100), "Fireplace override dimmer"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn table_order_matches_key_discriminants() {
        for (index, channel) in CHANNELS.iter().enumerate() {
            assert_eq!(channel.key as usize, index, "{}", channel.key);
        }
        assert_eq!(ChannelKey::iter().count(), CHANNEL_COUNT);
    }

    #[test]
    fn keys_round_trip_through_their_string_form() {
        for key in ChannelKey::iter() {
            assert_eq!(ChannelKey::from_str(&key.to_string()), Ok(key));
        }
        assert_eq!(ChannelKey::from_str("ECO"), Ok(ChannelKey::Eco));
        assert!(ChannelKey::from_str("NoSuchChannel").is_err());
    }

    #[test]
    fn read_bindings_fit_inside_their_blocks() {
        for channel in Channel::all() {
            let Some(read) = channel.read else { continue };
            let end = read.byte_offset + read.codec.span_words() * 2;
            assert!(
                end <= usize::from(read.block.words()) * 2,
                "{} reads past its block",
                channel.key
            );
            assert!(READ_PLAN.contains(&read.block), "{} not covered by a poll", channel.key);
        }
    }

    #[test]
    fn energy_counters_sit_at_the_observed_byte_offsets() {
        let total = Channel::by_key(ChannelKey::TotalEnergyConsumption).read.unwrap();
        let heater = Channel::by_key(ChannelKey::TotalHeaterConsumption).read.unwrap();
        let recovered = Channel::by_key(ChannelKey::TotalEnergyRecovered).read.unwrap();
        assert_eq!(total.byte_offset, 60);
        assert_eq!(heater.byte_offset, 72);
        assert_eq!(recovered.byte_offset, 84);
    }

    #[test]
    fn write_addresses_match_the_device_layout() {
        let addr = |key| Channel::by_key(key).write.unwrap().address;
        assert_eq!(addr(ChannelKey::OnOff), 0);
        assert_eq!(addr(ChannelKey::Eco), 2);
        assert_eq!(addr(ChannelKey::Auto), 3);
        assert_eq!(addr(ChannelKey::Mode), 4);
        assert_eq!(addr(ChannelKey::TempControlType), 10);
        assert_eq!(addr(ChannelKey::Kitchen), 5130);
        assert_eq!(addr(ChannelKey::Fireplace), 5137);
        assert!(Channel::by_key(ChannelKey::OutdoorTemp).write.is_none());
    }
}
