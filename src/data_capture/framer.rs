//! Byte-at-a-time framing of the receiver stream.
//!
//! The receiver interleaves NMEA sentences, UBX binary frames and occasional
//! noise on a single serial line without any boundary metadata. The framer
//! looks at a two byte window (previous byte + current byte) and cuts the
//! stream whenever the window matches one of three markers:
//!
//! | window       | meaning              |
//! |--------------|----------------------|
//! | `$G`         | NMEA sentence starts |
//! | `\r\n`       | NMEA sentence ends   |
//! | `0xB5 0x62`  | UBX frame starts     |
//!
//! Every byte fed in ends up in exactly one emitted [`Message`], in order.
//!
//! Known limitation: a UBX payload that happens to contain `\r\n` ends the
//! binary frame at that point. The remaining bytes of the frame are then
//! reported as `Unclassified`. Resolving this needs length-prefixed parsing of
//! UBX, which the framer deliberately does not do.

use log::trace;

use super::types::{CaptureEpoch, Clock, Message, MessageFamily, SystemClock};

/// Window that opens an NMEA sentence.
pub const TEXT_START: [u8; 2] = *b"$G";
/// Window that terminates an NMEA sentence.
pub const TEXT_END: [u8; 2] = *b"\r\n";
/// UBX sync characters.
pub const BINARY_SYNC: [u8; 2] = [0xb5, 0x62];

/// Single-pass classifier turning a byte stream into [`Message`]s.
///
/// The framer owns all of its state; one instance serves exactly one capture
/// run. Timestamps are taken from `clock` at the moment a boundary is
/// recognised and stored as microsecond offsets from `epoch`.
pub struct StreamFramer<C: Clock = SystemClock> {
    epoch: CaptureEpoch,
    clock: C,
    queue: Vec<u8>,
    previous_byte: Option<u8>,
    in_binary_frame: bool,
    text_started_at: Option<i64>,
    binary_started_at: Option<i64>,
    /// Attribution time for bytes that precede any recognised frame.
    idle_since: i64,
}

impl StreamFramer<SystemClock> {
    pub fn new(epoch: CaptureEpoch) -> Self {
        Self::with_clock(epoch, SystemClock)
    }
}

impl<C: Clock> StreamFramer<C> {
    pub fn with_clock(epoch: CaptureEpoch, clock: C) -> Self {
        Self {
            epoch,
            clock,
            queue: Vec::with_capacity(256),
            previous_byte: None,
            in_binary_frame: false,
            text_started_at: None,
            binary_started_at: None,
            idle_since: 0,
        }
    }

    /// Number of bytes held back waiting for a boundary.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_binary_frame(&self) -> bool {
        self.in_binary_frame
    }

    /// Consumes one byte, returning the message it completed, if any.
    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        let previous = match self.previous_byte {
            Some(p) if !self.queue.is_empty() => p,
            _ => {
                self.queue.push(byte);
                self.previous_byte = Some(byte);
                return None;
            }
        };

        let emitted = match [previous, byte] {
            TEXT_START => {
                let closed = self.close_pending();
                self.queue.extend_from_slice(&TEXT_START);
                self.in_binary_frame = false;
                self.text_started_at = Some(self.stamp());
                closed
            }
            TEXT_END => {
                self.queue.push(byte);
                let msg = if self.in_binary_frame {
                    // the CR/LF were UBX payload bytes; they still end the frame
                    self.in_binary_frame = false;
                    let ts = self.binary_started_at.unwrap_or(self.idle_since);
                    self.emit(ts, MessageFamily::Binary)
                } else {
                    let ts = self.text_started_at.unwrap_or(self.idle_since);
                    self.emit(ts, MessageFamily::Text)
                };
                self.idle_since = self.stamp();
                Some(msg)
            }
            BINARY_SYNC => {
                let closed = self.close_pending();
                self.queue.extend_from_slice(&BINARY_SYNC);
                self.in_binary_frame = true;
                self.binary_started_at = Some(self.stamp());
                closed
            }
            _ => {
                self.queue.push(byte);
                None
            }
        };

        self.previous_byte = if self.queue.is_empty() {
            None
        } else {
            Some(byte)
        };
        emitted
    }

    /// Flushes whatever is pending as a best-effort trailing message.
    ///
    /// Calling it again without feeding more bytes returns `None`.
    pub fn finish(&mut self) -> Option<Message> {
        self.previous_byte = None;
        if self.queue.is_empty() {
            self.in_binary_frame = false;
            return None;
        }
        let msg = if self.in_binary_frame {
            let ts = self.binary_started_at.unwrap_or(self.idle_since);
            self.emit(ts, MessageFamily::Binary)
        } else if self.queue.starts_with(&TEXT_START) {
            let ts = self.text_started_at.unwrap_or(self.idle_since);
            self.emit(ts, MessageFamily::Text)
        } else {
            self.emit(self.idle_since, MessageFamily::Unclassified)
        };
        self.in_binary_frame = false;
        Some(msg)
    }

    /// Closes the frame in progress when a new start marker arrives. The
    /// first byte of the marker is already queued and moves to the new frame.
    fn close_pending(&mut self) -> Option<Message> {
        self.queue.pop();
        if self.in_binary_frame {
            let ts = self.binary_started_at.unwrap_or(self.idle_since);
            Some(self.emit(ts, MessageFamily::Binary))
        } else if !self.queue.is_empty() {
            Some(self.emit(self.idle_since, MessageFamily::Unclassified))
        } else {
            None
        }
    }

    fn emit(&mut self, timestamp: i64, family: MessageFamily) -> Message {
        let payload = std::mem::take(&mut self.queue);
        let msg = Message::classify(timestamp, family, payload);
        trace!(
            "framed {} message, {} byte(s) at {}us",
            msg.family(),
            msg.payload().len(),
            msg.timestamp()
        );
        msg
    }

    fn stamp(&self) -> i64 {
        self.epoch.offset_micros(self.clock.now())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Advances one microsecond per reading.
    pub(crate) struct TickClock {
        base: DateTime<Utc>,
        ticks: AtomicI64,
    }

    impl TickClock {
        pub(crate) fn starting_at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                ticks: AtomicI64::new(0),
            }
        }
    }

    impl Clock for TickClock {
        fn now(&self) -> DateTime<Utc> {
            let t = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            self.base + Duration::microseconds(t)
        }
    }

    fn framer() -> StreamFramer<TickClock> {
        let epoch = CaptureEpoch::now();
        StreamFramer::with_clock(epoch, TickClock::starting_at(epoch.origin()))
    }

    fn run(framer: &mut StreamFramer<TickClock>, input: &[u8]) -> Vec<Message> {
        let mut out: Vec<Message> = input.iter().filter_map(|b| framer.feed(*b)).collect();
        out.extend(framer.finish());
        out
    }

    #[test]
    fn single_nmea_sentence() {
        let input = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
        let mut f = framer();
        let msgs: Vec<_> = input.iter().filter_map(|b| f.feed(*b)).collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].family(), MessageFamily::Text);
        assert_eq!(msgs[0].payload(), &input[..]);
        assert_eq!(f.pending_len(), 0);
        assert!(f.finish().is_none());
    }

    #[test]
    fn sentence_timestamp_is_taken_at_start_marker() {
        let mut f = framer();
        let msgs = run(&mut f, b"$GPRMC\r\n$GPVTG\r\n");
        assert_eq!(msgs.len(), 2);
        // tick 1: first $G, tick 2: idle after CRLF, tick 3: second $G
        assert_eq!(msgs[0].timestamp(), 1);
        assert_eq!(msgs[1].timestamp(), 3);
    }

    #[test]
    fn noise_and_binary_carry_their_own_stamps() {
        let mut f = framer();
        let msgs = run(&mut f, b"$GA\r\nxy\xb5\x62\x01$GB\r\n");
        // ticks: 1 first $G, 2 idle after CRLF, 3 sync, 4 second $G, 5 idle
        let got: Vec<_> = msgs
            .iter()
            .map(|m| (m.family(), m.timestamp(), m.payload().to_vec()))
            .collect();
        assert_eq!(
            got,
            vec![
                (MessageFamily::Text, 1, b"$GA\r\n".to_vec()),
                (MessageFamily::Unclassified, 2, b"xy".to_vec()),
                (MessageFamily::Binary, 3, vec![0xb5, 0x62, 0x01]),
                (MessageFamily::Text, 4, b"$GB\r\n".to_vec()),
            ]
        );
    }

    #[test]
    fn binary_frame_between_two_syncs() {
        let body = [0x01, 0x07, 0x5c, 0x00, 0x24];
        let mut input = BINARY_SYNC.to_vec();
        input.extend_from_slice(&body);
        input.extend_from_slice(&BINARY_SYNC);

        let mut f = framer();
        let msgs: Vec<_> = input.iter().filter_map(|b| f.feed(*b)).collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].family(), MessageFamily::Binary);
        assert_eq!(&msgs[0].payload()[..2], &BINARY_SYNC);
        assert_eq!(&msgs[0].payload()[2..], &body);
        // second frame already accumulating
        assert_eq!(f.pending_len(), 2);
        assert!(f.in_binary_frame());
    }

    #[test]
    fn binary_frame_closed_by_sentence_start() {
        let mut f = framer();
        let mut input = vec![0xb5, 0x62, 0x0a, 0x0b];
        input.extend_from_slice(b"$GPGSV\r\n");
        let msgs = run(&mut f, &input);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].family(), MessageFamily::Binary);
        assert_eq!(msgs[0].payload(), &[0xb5, 0x62, 0x0a, 0x0b]);
        assert_eq!(msgs[1].family(), MessageFamily::Text);
        assert_eq!(msgs[1].payload(), b"$GPGSV\r\n");
    }

    #[test]
    fn crlf_inside_binary_frame_ends_it() {
        let mut f = framer();
        let input = [0xb5, 0x62, 0x01, b'\r', b'\n', 0x02, 0x03];
        let msgs = run(&mut f, &input);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].family(), MessageFamily::Binary);
        assert_eq!(msgs[0].payload(), &[0xb5, 0x62, 0x01, b'\r', b'\n']);
        assert_eq!(msgs[1].family(), MessageFamily::Unclassified);
        assert_eq!(msgs[1].payload(), &[0x02, 0x03]);
    }

    #[test]
    fn noise_before_sentence_is_unclassified() {
        let mut f = framer();
        let msgs = run(&mut f, b"xyz$GNGLL\r\n");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].family(), MessageFamily::Unclassified);
        assert_eq!(msgs[0].payload(), b"xyz");
        // no CRLF seen yet, attributed to the epoch
        assert_eq!(msgs[0].timestamp(), 0);
        assert_eq!(msgs[1].payload(), b"$GNGLL\r\n");
    }

    #[test]
    fn non_utf8_sentence_falls_back_to_unclassified() {
        let mut f = framer();
        let msgs = run(&mut f, &[b'$', b'G', 0xc3, 0x28, b'\r', b'\n']);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].family(), MessageFamily::Unclassified);
        assert_eq!(msgs[0].payload(), &[b'$', b'G', 0xc3, 0x28, b'\r', b'\n']);
    }

    #[test]
    fn finish_flushes_partial_frame_once() {
        let mut f = framer();
        for b in b"$GPGGA,12" {
            assert!(f.feed(*b).is_none());
        }
        let tail = f.finish().expect("partial sentence flushed");
        assert_eq!(tail.family(), MessageFamily::Text);
        assert_eq!(tail.payload(), b"$GPGGA,12");
        assert!(f.finish().is_none());
    }

    #[test]
    fn finish_on_empty_framer_is_noop() {
        let mut f = framer();
        assert!(f.finish().is_none());
        assert!(f.finish().is_none());
    }

    #[test]
    fn concatenated_payloads_cover_input() {
        // deterministic LCG, biased toward marker bytes
        let alphabet = [b'$', b'G', b'\r', b'\n', 0xb5, 0x62, b'A', 0x00, 0xff, b','];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for round in 0..50 {
            let len = 50 + round * 13;
            let mut input = Vec::with_capacity(len);
            for _ in 0..len {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                input.push(alphabet[(seed >> 33) as usize % alphabet.len()]);
            }
            let mut f = framer();
            let msgs = run(&mut f, &input);
            let joined: Vec<u8> = msgs.into_iter().flat_map(Message::into_payload).collect();
            assert_eq!(joined, input, "round {}", round);
        }
    }
}
