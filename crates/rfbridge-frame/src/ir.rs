//! Infrared pulse-train compression.
//!
//! A learned IR signal is a list of pulse durations in microseconds. The
//! firmware replays a compact form: two averaged bit widths, the two
//! protocol header pulses, then run-length groups of bits (`<n>a` for zero
//! runs, `<n>b` for one runs) wrapped in `[...]` and separated by literal
//! timings.
//!
//! ```text
//! 9000 4500 500 500 1500 1500 1500 2000  ->  i3 500 1500 9000 4500 [2a3b] 2000
//! ```

use std::fmt::Write as _;

use crate::channel::Channel;
use crate::error::{BitClass, IrError};

/// Pulses up to this width are zero bits.
const ZERO_MAX: u32 = 1000;
/// Pulses below this width (and above [`ZERO_MAX`]) are one bits.
const ONE_LIMIT: u32 = 1800;
/// Literal timings are capped to the firmware's integer width.
const LITERAL_CAP: u32 = 65000;
/// Leading pulses copied through untouched.
const HEADER_LEN: usize = 2;

/// Parse a whitespace-separated list of pulse durations.
pub fn parse_pulses(text: &str) -> Result<Vec<u32>, IrError> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<u32>().map_err(|_| IrError::InvalidPulse {
                token: token.to_string(),
            })
        })
        .collect()
}

/// Compress a captured signal given as text.
///
/// The two header tokens are copied verbatim; every other token must be a
/// pulse duration.
pub fn compress_signal(channel: Channel, text: &str) -> Result<String, IrError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < HEADER_LEN {
        return Err(IrError::TooShort(tokens.len()));
    }
    let (header, body) = tokens.split_at(HEADER_LEN);
    let body = body
        .iter()
        .map(|&token| {
            let width = token.parse::<u32>().map_err(|_| IrError::InvalidPulse {
                token: token.to_string(),
            })?;
            Ok(Pulse {
                width,
                text: Some(token),
            })
        })
        .collect::<Result<Vec<_>, IrError>>()?;
    encode(channel, header, &body)
}

/// Compress a pulse train.
pub fn compress_pulses(channel: Channel, pulses: &[u32]) -> Result<String, IrError> {
    if pulses.len() < HEADER_LEN {
        return Err(IrError::TooShort(pulses.len()));
    }
    let (header, body) = pulses.split_at(HEADER_LEN);
    let header: Vec<String> = header.iter().map(u32::to_string).collect();
    let body: Vec<Pulse<'_>> = body
        .iter()
        .map(|&width| Pulse { width, text: None })
        .collect();
    encode(channel, &header, &body)
}

/// One body pulse and, when it came from text, the token it was read from.
#[derive(Debug, Clone, Copy)]
struct Pulse<'a> {
    width: u32,
    text: Option<&'a str>,
}

impl Pulse<'_> {
    /// Literal rendering: the original token unless the width is capped.
    fn literal(&self) -> String {
        match self.text {
            _ if self.width > LITERAL_CAP => LITERAL_CAP.to_string(),
            Some(text) => text.to_string(),
            None => self.width.to_string(),
        }
    }
}

fn classify(pulse: u32) -> Option<BitClass> {
    if pulse <= ZERO_MAX {
        Some(BitClass::Zero)
    } else if pulse < ONE_LIMIT {
        Some(BitClass::One)
    } else {
        None
    }
}

#[derive(Default)]
struct Widths {
    sum: u64,
    count: u64,
}

impl Widths {
    fn push(&mut self, pulse: u32) {
        self.sum += u64::from(pulse);
        self.count += 1;
    }

    fn average(&self, class: BitClass) -> Result<u64, IrError> {
        if self.count == 0 {
            return Err(IrError::MissingBitClass { class });
        }
        Ok(round_half_even(self.sum, self.count))
    }
}

/// Builds one `[...]` group out of consecutive bit runs.
#[derive(Default)]
struct RunGroup {
    text: String,
    current: Option<(BitClass, usize)>,
}

impl RunGroup {
    fn push(&mut self, class: BitClass) {
        match &mut self.current {
            Some((c, n)) if *c == class => *n += 1,
            _ => {
                self.close_run();
                self.current = Some((class, 1));
            }
        }
    }

    fn close_run(&mut self) {
        if let Some((class, n)) = self.current.take() {
            let suffix = match class {
                BitClass::Zero => 'a',
                BitClass::One => 'b',
            };
            let _ = write!(self.text, "{n}{suffix}");
        }
    }

    /// Emit the group, if any, and reset.
    fn flush_into(&mut self, out: &mut Vec<String>) {
        self.close_run();
        if !self.text.is_empty() {
            out.push(format!("[{}]", self.text));
            self.text.clear();
        }
    }
}

fn encode<S: AsRef<str>>(
    channel: Channel,
    header: &[S],
    body: &[Pulse<'_>],
) -> Result<String, IrError> {
    let mut zeros = Widths::default();
    let mut ones = Widths::default();
    let mut group = RunGroup::default();
    let mut data: Vec<String> = header.iter().map(|h| h.as_ref().to_string()).collect();

    for pulse in body {
        match classify(pulse.width) {
            Some(class) => {
                match class {
                    BitClass::Zero => zeros.push(pulse.width),
                    BitClass::One => ones.push(pulse.width),
                }
                group.push(class);
            }
            None => {
                group.flush_into(&mut data);
                data.push(pulse.literal());
            }
        }
    }
    group.flush_into(&mut data);

    let zero_avg = zeros.average(BitClass::Zero)?;
    let one_avg = ones.average(BitClass::One)?;

    Ok(format!(
        "i{} {zero_avg} {one_avg} {}",
        channel.as_char(),
        data.join(" ")
    ))
}

/// Integer division rounded to nearest, ties to even.
fn round_half_even(sum: u64, count: u64) -> u64 {
    let quotient = sum / count;
    let twice_rem = (sum % count) * 2;
    if twice_rem > count || (twice_rem == count && quotient % 2 == 1) {
        quotient + 1
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: u8) -> Channel {
        Channel::new(id).unwrap()
    }

    #[test]
    fn compresses_runs_and_literal() {
        let out = compress_pulses(ch(3), &[9000, 4500, 500, 500, 1500, 1500, 1500, 2000]).unwrap();
        assert_eq!(out, "i3 500 1500 9000 4500 [2a3b] 2000");
    }

    #[test]
    fn caps_literals_and_opens_new_group_after_literal() {
        let out = compress_signal(ch(1), "9000 4500 500 501 1500 1501 70000 600 1200").unwrap();
        assert_eq!(out, "i1 534 1400 9000 4500 [2a2b] 65000 [1a1b]");
    }

    #[test]
    fn compresses_captured_nec_signal() {
        let signal = "8851 4435 565 1644 591 512 566 537 565 1670 540 1670 541 40112 9023 2230 590";
        let out = compress_signal(ch(0), signal).unwrap();
        assert_eq!(
            out,
            "i0 556 1661 8851 4435 [1a1b5a1b1a1b1a] 40112 9023 2230 [1a]"
        );
    }

    #[test]
    fn header_tokens_are_copied_verbatim() {
        let out = compress_signal(ch(2), "0009000 +4500 500 1500").unwrap();
        assert_eq!(out, "i2 500 1500 0009000 +4500 [1a1b]");
    }

    #[test]
    fn literal_tokens_keep_their_text() {
        let out = compress_signal(ch(1), "9000 4500 500 1500 02000").unwrap();
        assert_eq!(out, "i1 500 1500 9000 4500 [1a1b] 02000");

        let capped = compress_signal(ch(1), "9000 4500 500 1500 070000").unwrap();
        assert_eq!(capped, "i1 500 1500 9000 4500 [1a1b] 65000");
    }

    #[test]
    fn class_boundaries() {
        let out = compress_pulses(ch(4), &[1, 2, 1000, 1001, 1799, 1800]).unwrap();
        assert_eq!(out, "i4 1000 1400 1 2 [1a2b] 1800");
    }

    #[test]
    fn averages_round_half_to_even() {
        assert_eq!(round_half_even(1001, 2), 500);
        assert_eq!(round_half_even(3003, 2), 1502);
        assert_eq!(round_half_even(1601, 3), 534);
        assert_eq!(round_half_even(10, 5), 2);
    }

    #[test]
    fn missing_bit_class_is_an_error() {
        assert_eq!(
            compress_pulses(ch(1), &[9000, 4500, 500, 600]),
            Err(IrError::MissingBitClass {
                class: BitClass::One
            })
        );
        assert_eq!(
            compress_pulses(ch(1), &[9000, 4500, 1500, 2000]),
            Err(IrError::MissingBitClass {
                class: BitClass::Zero
            })
        );
        assert_eq!(
            compress_pulses(ch(1), &[9000, 4500]),
            Err(IrError::MissingBitClass {
                class: BitClass::Zero
            })
        );
    }

    #[test]
    fn rejects_short_or_garbled_input() {
        assert_eq!(compress_signal(ch(1), "9000"), Err(IrError::TooShort(1)));
        assert_eq!(compress_pulses(ch(1), &[]), Err(IrError::TooShort(0)));
        assert_eq!(
            compress_signal(ch(1), "9000 4500 500 abc 1500"),
            Err(IrError::InvalidPulse {
                token: "abc".to_string()
            })
        );
    }

    #[test]
    fn parse_pulses_accepts_any_whitespace() {
        assert_eq!(parse_pulses(" 1 \t2\n3 ").unwrap(), vec![1, 2, 3]);
        assert!(parse_pulses("").unwrap().is_empty());
        assert!(parse_pulses("-5").is_err());
    }
}
