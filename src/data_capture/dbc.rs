//! Minimal DBC database used as the bus decode table.
//!
//! Only what is needed to turn a frame into physical signal values is
//! understood: `BO_` message definitions and their `SG_` signals (byte order,
//! sign, factor/offset, simple multiplexing). Everything else in the file
//! (nodes, comments, attributes, value tables) is ignored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::{debug, info};
use regex::Regex;

use crate::error_handling::types::DecodeError;

use super::bus_capture::DecodeTable;

/// Bit 31 marks an extended (29-bit) identifier in DBC files.
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;
/// Largest payload (CAN FD, 64 bytes) in bits.
const MAX_PAYLOAD_BITS: u32 = 64 * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Multiplex {
    None,
    Multiplexor,
    Multiplexed(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDef {
    pub name: String,
    pub start_bit: u32,
    pub length: u32,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub multiplex: Multiplex,
}

impl SignalDef {
    fn raw_value(&self, data: &[u8]) -> Option<u64> {
        let bit_at = |bit: u32| -> Option<u64> {
            let byte = data.get((bit / 8) as usize)?;
            Some(u64::from((byte >> (bit % 8)) & 1))
        };

        let mut raw = 0u64;
        match self.byte_order {
            ByteOrder::LittleEndian => {
                for i in 0..self.length {
                    raw |= bit_at(self.start_bit.checked_add(i)?)? << i;
                }
            }
            ByteOrder::BigEndian => {
                // start bit is the MSB, walking the sawtooth bit numbering
                let mut bit = self.start_bit;
                for i in 0..self.length {
                    raw = (raw << 1) | bit_at(bit)?;
                    if i + 1 < self.length {
                        bit = if bit % 8 == 0 {
                            bit.checked_add(15)?
                        } else {
                            bit - 1
                        };
                    }
                }
            }
        }
        Some(raw)
    }

    fn physical(&self, raw: u64) -> f64 {
        let value = if self.signed && self.length < 64 && raw & (1 << (self.length - 1)) != 0 {
            (raw | (!0u64 << self.length)) as i64 as f64
        } else if self.signed {
            raw as i64 as f64
        } else {
            raw as f64
        };
        value * self.factor + self.offset
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub frame_id: u32,
    pub name: String,
    pub length: usize,
    pub signals: Vec<SignalDef>,
}

#[derive(Debug, Clone, Default)]
pub struct DbcDatabase {
    messages: HashMap<u32, MessageDef>,
}

impl DbcDatabase {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DecodeError::IoError(format!("{}: {}", path.display(), e)))?;
        let db = Self::parse(&content)?;
        info!(
            "Loaded {} message definition(s) from {}",
            db.messages.len(),
            path.display()
        );
        Ok(db)
    }

    pub fn parse(content: &str) -> Result<Self, DecodeError> {
        let message_re = Regex::new(r"^BO_\s+(\d+)\s+(\w+)\s*:\s*(\d+)")
            .map_err(|e| DecodeError::ParseFailed { line: 0, reason: e.to_string() })?;
        let signal_re = Regex::new(
            r#"^SG_\s+(\w+)\s*(M|m\d+)?\s*:\s*(\d+)\|(\d+)@([01])([+-])\s*\(\s*([^,\s]+)\s*,\s*([^)\s]+)\s*\)"#,
        )
        .map_err(|e| DecodeError::ParseFailed { line: 0, reason: e.to_string() })?;

        let mut messages: HashMap<u32, MessageDef> = HashMap::new();
        let mut current: Option<u32> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            let fail = |reason: String| DecodeError::ParseFailed {
                line: line_no,
                reason,
            };

            if line.starts_with("BO_ ") {
                let caps = message_re
                    .captures(line)
                    .ok_or_else(|| fail("malformed message definition".into()))?;
                let raw_id: u32 = caps[1].parse().map_err(|e| fail(format!("{}", e)))?;
                let frame_id = raw_id & !EXTENDED_ID_FLAG;
                let length: usize = caps[3].parse().map_err(|e| fail(format!("{}", e)))?;
                messages.insert(
                    frame_id,
                    MessageDef {
                        frame_id,
                        name: caps[2].to_string(),
                        length,
                        signals: Vec::new(),
                    },
                );
                current = Some(frame_id);
            } else if line.starts_with("SG_ ") {
                let msg = match current {
                    Some(id) => messages.get_mut(&id),
                    None => None,
                }
                .ok_or_else(|| fail("signal outside of a message".into()))?;
                let caps = signal_re
                    .captures(line)
                    .ok_or_else(|| fail("malformed signal definition".into()))?;
                let multiplex = match caps.get(2).map(|m| m.as_str()) {
                    None => Multiplex::None,
                    Some("M") => Multiplex::Multiplexor,
                    Some(m) => Multiplex::Multiplexed(
                        m[1..].parse().map_err(|e| fail(format!("{}", e)))?,
                    ),
                };
                let length: u32 = caps[4].parse().map_err(|e| fail(format!("{}", e)))?;
                if length == 0 || length > 64 {
                    return Err(fail(format!("unsupported signal length {}", length)));
                }
                let start_bit: u32 = caps[3].parse().map_err(|e| fail(format!("{}", e)))?;
                if start_bit >= MAX_PAYLOAD_BITS {
                    return Err(fail(format!(
                        "start bit {} beyond a 64 byte payload",
                        start_bit
                    )));
                }
                msg.signals.push(SignalDef {
                    name: caps[1].to_string(),
                    start_bit,
                    length,
                    byte_order: if &caps[5] == "1" {
                        ByteOrder::LittleEndian
                    } else {
                        ByteOrder::BigEndian
                    },
                    signed: &caps[6] == "-",
                    factor: caps[7].parse().map_err(|e| fail(format!("bad factor: {}", e)))?,
                    offset: caps[8].parse().map_err(|e| fail(format!("bad offset: {}", e)))?,
                    multiplex,
                });
            } else if !line.is_empty() && !raw_line.starts_with(char::is_whitespace) {
                current = None;
            }
        }

        debug!("Parsed DBC with {} message(s)", messages.len());
        Ok(Self { messages })
    }

    pub fn message(&self, frame_id: u32) -> Option<&MessageDef> {
        self.messages.get(&frame_id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl DecodeTable for DbcDatabase {
    fn known_ids(&self) -> HashSet<u32> {
        self.messages.keys().copied().collect()
    }

    fn decode(&self, frame_id: u32, data: &[u8]) -> Result<BTreeMap<String, f64>, DecodeError> {
        let msg = self
            .messages
            .get(&frame_id)
            .ok_or(DecodeError::UnknownFrame(frame_id))?;
        if data.len() < msg.length {
            return Err(DecodeError::PayloadTooShort {
                id: frame_id,
                expected: msg.length,
                actual: data.len(),
            });
        }

        let selector = msg
            .signals
            .iter()
            .find(|s| s.multiplex == Multiplex::Multiplexor)
            .and_then(|s| s.raw_value(data));

        let mut values = BTreeMap::new();
        for signal in &msg.signals {
            if let Multiplex::Multiplexed(id) = signal.multiplex {
                if selector != Some(id) {
                    continue;
                }
            }
            let raw = signal.raw_value(data).ok_or(DecodeError::PayloadTooShort {
                id: frame_id,
                expected: (signal.start_bit as usize + signal.length as usize).div_ceil(8),
                actual: data.len(),
            })?;
            values.insert(signal.name.clone(), signal.physical(raw));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOTOHAWK: &str = r#"VERSION ""

NS_ :

BU_: PCM1 FOO

BO_ 496 ExampleMessage: 8 PCM1
 SG_ Enable : 7|1@0- (1,0) [0|0] "-" Vector__XXX
 SG_ AverageRadius : 6|6@0+ (0.1,0) [0|5] "m" Vector__XXX
 SG_ Temperature : 0|12@0- (0.01,250) [229.52|270.47] "degK" Vector__XXX

BO_ 2364540158 EEC1: 8 Vector__XXX
 SG_ EngineSpeed : 24|16@1+ (0.125,0) [0|8031.875] "rpm" Vector__XXX

BO_ 300 Muxed: 2 FOO
 SG_ Mode M : 0|8@1+ (1,0) [0|255] "" Vector__XXX
 SG_ SpeedA m1 : 8|8@1+ (1,0) [0|255] "" Vector__XXX
 SG_ SpeedB m2 : 8|8@1- (2,0) [0|255] "" Vector__XXX

CM_ SG_ 496 Enable "enable flag";
"#;

    #[test]
    fn parses_messages_and_strips_extended_flag() {
        let db = DbcDatabase::parse(MOTOHAWK).unwrap();
        assert_eq!(db.len(), 3);
        let ids = db.known_ids();
        assert!(ids.contains(&496));
        assert!(ids.contains(&(2364540158 & 0x1fff_ffff)));
        assert_eq!(db.message(496).unwrap().signals.len(), 3);
    }

    #[test]
    fn decodes_little_endian_signal() {
        let db = DbcDatabase::parse(MOTOHAWK).unwrap();
        let id = 2364540158 & 0x1fff_ffff;
        // EngineSpeed raw 0x1F40 = 8000 -> 1000 rpm
        let data = [0, 0, 0, 0x40, 0x1f, 0, 0, 0];
        let values = db.decode(id, &data).unwrap();
        assert_eq!(values["EngineSpeed"], 1000.0);
    }

    #[test]
    fn decodes_big_endian_signed_signals() {
        let db = DbcDatabase::parse(MOTOHAWK).unwrap();
        // Enable=1 (bit 7), AverageRadius raw 3 (bits 6..1), Temperature raw 0x0ff
        // spread over byte 0 bit 0, byte 1 and the top three bits of byte 2
        let data = [0x86, 0x1f, 0xe0, 0, 0, 0, 0, 0];
        let values = db.decode(496, &data).unwrap();
        assert_eq!(values["Enable"], -1.0);
        assert!((values["AverageRadius"] - 0.3).abs() < 1e-9);
        assert!((values["Temperature"] - 252.55).abs() < 1e-9);
    }

    #[test]
    fn multiplexed_signals_follow_selector() {
        let db = DbcDatabase::parse(MOTOHAWK).unwrap();
        let a = db.decode(300, &[1, 10]).unwrap();
        assert_eq!(a["Mode"], 1.0);
        assert_eq!(a["SpeedA"], 10.0);
        assert!(!a.contains_key("SpeedB"));

        let b = db.decode(300, &[2, 0xff]).unwrap();
        assert_eq!(b["SpeedB"], -2.0);
        assert!(!b.contains_key("SpeedA"));
    }

    #[test]
    fn short_payload_and_unknown_id_fail() {
        let db = DbcDatabase::parse(MOTOHAWK).unwrap();
        assert_eq!(
            db.decode(496, &[0, 1]),
            Err(DecodeError::PayloadTooShort {
                id: 496,
                expected: 8,
                actual: 2
            })
        );
        assert_eq!(db.decode(7, &[0; 8]), Err(DecodeError::UnknownFrame(7)));
    }

    #[test]
    fn start_bit_beyond_payload_is_rejected() {
        let err = DbcDatabase::parse(
            "BO_ 1 A: 8 X\n SG_ Far : 4294967290|8@1+ (1,0) [0|0] \"\" X\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::ParseFailed { line: 2, .. }));
    }

    #[test]
    fn out_of_range_bits_decode_as_too_short() {
        let far = SignalDef {
            name: "Far".into(),
            start_bit: u32::MAX - 2,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            signed: false,
            factor: 1.0,
            offset: 0.0,
            multiplex: Multiplex::None,
        };
        assert_eq!(far.raw_value(&[0xff; 8]), None);

        let motorola = SignalDef {
            start_bit: u32::MAX - 7,
            byte_order: ByteOrder::BigEndian,
            ..far
        };
        assert_eq!(motorola.raw_value(&[0xff; 8]), None);
    }

    #[test]
    fn malformed_signal_reports_line() {
        let err = DbcDatabase::parse("BO_ 1 A: 8 X\n SG_ Broken : nonsense\n").unwrap_err();
        assert!(matches!(err, DecodeError::ParseFailed { line: 2, .. }));
    }
}
