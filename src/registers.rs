/// A read-only view over the 16-bit words returned by one block read.
///
/// The window remembers the starting register address of the read so that
/// callers can address values either by register offset or, for the packed
/// regions of the monitoring block, by byte offset. All accesses are
/// bounds-checked against the length of the response.
pub struct RegisterWindow {
    base: u16,
    bytes: Vec<u8>,
}

impl RegisterWindow {
    pub fn new(base: u16, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn from_words(base: u16, words: &[u16]) -> Self {
        let bytes = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Self { base, bytes }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn words(&self) -> usize {
        self.bytes.len() / 2
    }

    fn chunk<const N: usize>(&self, byte_offset: usize) -> Result<[u8; N], DecodeError> {
        let Some(slice) = self.bytes.get(byte_offset..byte_offset + N) else {
            return Err(DecodeError::WindowTooShort {
                base: self.base,
                needed: byte_offset + N,
                have: self.bytes.len(),
            });
        };
        Ok(slice.try_into().expect("slice length is N"))
    }

    pub fn u16_at(&self, byte_offset: usize) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.chunk(byte_offset)?))
    }

    pub fn i16_at(&self, byte_offset: usize) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.chunk(byte_offset)?))
    }

    /// Two consecutive words composed most-significant first.
    pub fn u32_at(&self, byte_offset: usize) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.chunk(byte_offset)?))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("register window at {base} is too short ({have} bytes, need {needed})")]
    WindowTooShort { base: u16, needed: usize, have: usize },
}

/// How the on-wire register words of a channel map to a domain value.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Codec {
    /// The register word as-is.
    RawUint16,
    /// A two's-complement word holding tenths of a unit. Temperatures use
    /// this; they may be negative.
    SignedTenths,
    /// An unsigned word representing a 0-100 percentage. Values outside that
    /// range pass through unmodified; the device is the source of truth.
    PercentUint16,
    /// An unsigned 32-bit counter spanning two words, most-significant word
    /// first.
    Uint32BE,
    /// A compact on-wire enumeration (0, 1, 2, ...) presented to the host as
    /// `raw * 10 + base` (10, 20, 30, ... for base 0).
    SelectorLevel { base: u16 },
}

impl Codec {
    pub const fn span_words(self) -> usize {
        match self {
            Codec::Uint32BE => 2,
            _ => 1,
        }
    }

    pub fn decode(self, window: &RegisterWindow, byte_offset: usize) -> Result<Value, DecodeError> {
        Ok(match self {
            Codec::RawUint16 => Value::U16(window.u16_at(byte_offset)?),
            Codec::SignedTenths => Value::Tenths(window.i16_at(byte_offset)?),
            Codec::PercentUint16 => Value::Percent(window.u16_at(byte_offset)?),
            Codec::Uint32BE => Value::Counter(window.u32_at(byte_offset)?),
            Codec::SelectorLevel { base } => {
                // Garbage words saturate rather than wrap; the device is the
                // source of truth and must not be able to panic a decode.
                Value::Level(window.u16_at(byte_offset)?.saturating_mul(10).saturating_add(base))
            }
        })
    }

    /// Turn a domain value back into the register word(s) to write.
    ///
    /// `SelectorLevel` levels that do not map back onto an exact on-wire
    /// integer are a validation error, never silently truncated.
    pub fn encode(self, value: Value) -> Result<Words, EncodeError> {
        match (self, value) {
            (Codec::RawUint16, Value::U16(v)) => Ok(Words::one(v)),
            (Codec::SignedTenths, Value::Tenths(v)) => Ok(Words::one(v as u16)),
            (Codec::PercentUint16, Value::Percent(v)) => Ok(Words::one(v)),
            (Codec::Uint32BE, Value::Counter(v)) => {
                Ok(Words::two((v >> 16) as u16, (v & 0xFFFF) as u16))
            }
            (Codec::SelectorLevel { base }, Value::Level(level)) => {
                let Some(shifted) = level.checked_sub(base) else {
                    return Err(EncodeError::InexactLevel { level, base });
                };
                if shifted % 10 != 0 {
                    return Err(EncodeError::InexactLevel { level, base });
                }
                Ok(Words::one(shifted / 10))
            }
            (codec, value) => Err(EncodeError::ValueKindMismatch { codec, value }),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Codec::RawUint16 => "u16",
            Codec::SignedTenths => "i16/10",
            Codec::PercentUint16 => "u16 %",
            Codec::Uint32BE => "u32 be",
            Codec::SelectorLevel { base: 0 } => "level",
            Codec::SelectorLevel { .. } => "level+",
        })
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("level {level} does not map onto an on-wire integer (base {base}, step 10)")]
    InexactLevel { level: u16, base: u16 },
    #[error("value {value} cannot be encoded with the {codec} codec")]
    ValueKindMismatch { codec: Codec, value: Value },
}

/// The register words produced by one encode. Writes on this protocol carry
/// a single word each, so a two-word value becomes two writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Words {
    words: [u16; 2],
    len: usize,
}

impl Words {
    fn one(w: u16) -> Self {
        Self { words: [w, 0], len: 1 }
    }

    fn two(hi: u16, lo: u16) -> Self {
        Self { words: [hi, lo], len: 2 }
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.words[..self.len]
    }
}

/// A decoded domain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    U16(u16),
    /// Holds the raw word; the represented value is this divided by 10.
    Tenths(i16),
    Percent(u16),
    Counter(u32),
    Level(u16),
}

impl Value {
    /// The integer representation handed to the state sink.
    ///
    /// Tenths and counters carry their payload in the text representation
    /// only; the numeric slot is an integer and cannot hold them faithfully.
    pub fn numeric(&self) -> i64 {
        match *self {
            Value::U16(v) => v.into(),
            Value::Tenths(_) => 0,
            Value::Percent(v) => v.into(),
            Value::Counter(_) => 0,
            Value::Level(v) => v.into(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::U16(v) => write!(f, "{v}"),
            Value::Tenths(v) => write!(f, "{:.1}", f64::from(v) / 10.0),
            Value::Percent(v) => write!(f, "{v}"),
            Value::Counter(v) => write!(f, "{v}"),
            Value::Level(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(words: &[u16]) -> RegisterWindow {
        RegisterWindow::from_words(900, words)
    }

    #[test]
    fn signed_tenths_reinterprets_twos_complement() {
        let w = window(&[0, (-50i16) as u16, 215]);
        assert_eq!(Codec::SignedTenths.decode(&w, 2).unwrap(), Value::Tenths(-50));
        assert_eq!(Codec::SignedTenths.decode(&w, 2).unwrap().to_string(), "-5.0");
        assert_eq!(Codec::SignedTenths.decode(&w, 4).unwrap().to_string(), "21.5");
    }

    #[test]
    fn signed_tenths_ignores_surrounding_words() {
        let a = window(&[0xFFFF, 123, 0xFFFF]);
        let b = window(&[0x0000, 123, 0x0000]);
        assert_eq!(
            Codec::SignedTenths.decode(&a, 2).unwrap(),
            Codec::SignedTenths.decode(&b, 2).unwrap()
        );
    }

    #[test]
    fn percent_passes_out_of_range_values_through() {
        let w = window(&[101, 65535]);
        assert_eq!(Codec::PercentUint16.decode(&w, 0).unwrap(), Value::Percent(101));
        assert_eq!(Codec::PercentUint16.decode(&w, 2).unwrap(), Value::Percent(65535));
    }

    #[test]
    fn uint32_be_composes_most_significant_word_first() {
        let w = window(&[0x0001, 0x86A0]);
        assert_eq!(Codec::Uint32BE.decode(&w, 0).unwrap(), Value::Counter(100_000));
    }

    #[test]
    fn uint32_be_round_trips_across_the_range() {
        for v in [0u32, 1, 0xFFFF, 0x1_0000, 0xDEAD_BEEF, u32::MAX] {
            let words = Codec::Uint32BE.encode(Value::Counter(v)).unwrap();
            let w = RegisterWindow::from_words(0, words.as_slice());
            assert_eq!(Codec::Uint32BE.decode(&w, 0).unwrap(), Value::Counter(v));
        }
    }

    #[test]
    fn selector_level_round_trips_multiples_of_ten() {
        let codec = Codec::SelectorLevel { base: 0 };
        for level in [0u16, 10, 20, 30, 40, 120] {
            let words = codec.encode(Value::Level(level)).unwrap();
            let w = RegisterWindow::from_words(0, words.as_slice());
            assert_eq!(codec.decode(&w, 0).unwrap(), Value::Level(level));
        }
    }

    #[test]
    fn selector_level_rejects_inexact_levels() {
        let codec = Codec::SelectorLevel { base: 0 };
        assert_eq!(
            codec.encode(Value::Level(25)),
            Err(EncodeError::InexactLevel { level: 25, base: 0 })
        );
    }

    #[test]
    fn selector_level_saturates_on_garbage_words() {
        // A corrupt register can hold any word; the decode clamps instead
        // of overflowing.
        let w = window(&[0xFFFF]);
        assert_eq!(
            Codec::SelectorLevel { base: 10 }.decode(&w, 0).unwrap(),
            Value::Level(u16::MAX)
        );
        assert_eq!(
            Codec::SelectorLevel { base: 0 }.decode(&w, 0).unwrap(),
            Value::Level(u16::MAX)
        );
    }

    #[test]
    fn selector_level_with_base_shifts_both_ways() {
        let codec = Codec::SelectorLevel { base: 10 };
        let w = window(&[2]);
        assert_eq!(codec.decode(&w, 0).unwrap(), Value::Level(30));
        assert_eq!(codec.encode(Value::Level(30)).unwrap().as_slice(), &[2]);
        // A level below the base can never be encoded.
        assert!(codec.encode(Value::Level(5)).is_err());
    }

    #[test]
    fn short_window_fails_with_decode_error() {
        let w = window(&[1, 2]);
        assert_eq!(
            Codec::Uint32BE.decode(&w, 2),
            Err(DecodeError::WindowTooShort { base: 900, needed: 6, have: 4 })
        );
        assert!(Codec::RawUint16.decode(&w, 2).is_ok());
    }
}
