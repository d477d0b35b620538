//! Converter between one encoding and UTF-8
//!
//! A [`Converter`] is opened for an ordered pair of encodings where at least
//! one side is UTF-8. Conversion runs through a bounded output buffer, one
//! chunk at a time, and is all-or-nothing: any error discards the partial
//! output.

use encoding_rs::{Decoder, DecoderResult, Encoder, EncoderResult};
use log::trace;

use crate::{Encoding, Error, Result};

/// Size of the scratch buffer each conversion step writes into.
pub const BUFFER_SIZE: usize = 1024;

/// What to do with input that cannot be converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPolicy {
    /// Drop invalid or unrepresentable sequences and keep going
    Skip,
    /// Abort the whole conversion
    Strict,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToUtf8(Encoding),
    FromUtf8(Encoding),
}

/// Opened converter for one (source, destination) pair
#[derive(Debug)]
pub struct Converter {
    from: Encoding,
    to: Encoding,
    direction: Direction,
    policy: InvalidPolicy,
}

impl Converter {
    /// Open a converter from `from` to `to`.
    ///
    /// Fails with [`Error::UnsupportedConversion`] when either name is
    /// unknown, when neither side is UTF-8, or when the destination has no
    /// encoder.
    pub fn open(from: &str, to: &str, policy: InvalidPolicy) -> Result<Self> {
        let unsupported = || Error::UnsupportedConversion {
            from: from.to_string(),
            to: to.to_string(),
        };

        let source = Encoding::for_label(from).ok_or_else(unsupported)?;
        let target = Encoding::for_label(to).ok_or_else(unsupported)?;

        let direction = match (source, target) {
            (_, Encoding::Utf8) => Direction::ToUtf8(source),
            (Encoding::Utf8, _) if target.can_encode() => Direction::FromUtf8(target),
            _ => return Err(unsupported()),
        };

        Ok(Self {
            from: source,
            to: target,
            direction,
            policy,
        })
    }

    /// Encoding the input is read as
    pub fn from_encoding(&self) -> Encoding {
        self.from
    }

    /// Encoding the output is written in
    pub fn to_encoding(&self) -> Encoding {
        self.to
    }

    /// Policy this converter was opened with
    pub fn policy(&self) -> InvalidPolicy {
        self.policy
    }

    /// Convert `input` from the source to the target encoding
    pub fn convert(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut coder = Coder::start(self.direction);
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut output = Vec::with_capacity(input.len());
        let mut consumed = 0;
        // A chunk runs up to the next full buffer; each one must yield output.
        let mut chunk_start = 0;
        let mut chunk_written = 0;

        while consumed < input.len() {
            let position = consumed;
            let step = coder.step(&input[consumed..], &mut buffer);
            consumed += step.read;
            chunk_written += step.written;
            output.extend_from_slice(&buffer[..step.written]);

            match step.stop {
                Stop::InputEmpty | Stop::OutputFull if step.read == 0 && step.written == 0 => {
                    return Err(Error::Stalled { position });
                }
                Stop::InputEmpty => {}
                Stop::OutputFull => {
                    if chunk_written == 0 {
                        return Err(Error::NoOutput {
                            position: chunk_start,
                        });
                    }
                    chunk_start = consumed;
                    chunk_written = 0;
                }
                Stop::Malformed { at } => {
                    let position = position + at;
                    if self.policy == InvalidPolicy::Strict {
                        return Err(Error::InvalidSequence { position });
                    }
                    trace!("skipping invalid sequence at {}", position);
                }
                Stop::Unmappable { character, at } => {
                    let position = position + at;
                    if self.policy == InvalidPolicy::Strict {
                        return Err(Error::Unmappable {
                            character,
                            position,
                        });
                    }
                    trace!("skipping unmappable {:?} at {}", character, position);
                }
            }
        }

        let written = coder.finish(&mut buffer);
        output.extend_from_slice(&buffer[..written]);
        chunk_written += written;

        if chunk_start < input.len() && chunk_written == 0 {
            return Err(Error::NoOutput {
                position: chunk_start,
            });
        }

        Ok(output)
    }
}

/// Why a conversion step returned
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stop {
    InputEmpty,
    OutputFull,
    /// `at` is the offset of the bad sequence within the step's input
    Malformed { at: usize },
    Unmappable { character: char, at: usize },
}

#[derive(Debug)]
struct Step {
    stop: Stop,
    read: usize,
    written: usize,
}

impl Step {
    fn new(stop: Stop, read: usize, written: usize) -> Self {
        Self {
            stop,
            read,
            written,
        }
    }
}

/// Per-call coding state. Built fresh for every conversion.
enum Coder {
    Latin1Decode,
    AsciiDecode,
    Decode(Decoder),
    Latin1Encode,
    AsciiEncode,
    Encode { encoder: Encoder, finished: bool },
}

impl Coder {
    fn start(direction: Direction) -> Self {
        match direction {
            Direction::ToUtf8(Encoding::Latin1) => Coder::Latin1Decode,
            Direction::ToUtf8(Encoding::Ascii) => Coder::AsciiDecode,
            Direction::ToUtf8(Encoding::Utf8) => {
                Coder::Decode(encoding_rs::UTF_8.new_decoder_without_bom_handling())
            }
            Direction::ToUtf8(Encoding::Whatwg(enc)) => {
                Coder::Decode(enc.new_decoder_without_bom_handling())
            }
            Direction::FromUtf8(Encoding::Latin1) => Coder::Latin1Encode,
            Direction::FromUtf8(Encoding::Ascii) => Coder::AsciiEncode,
            Direction::FromUtf8(Encoding::Utf8) => Coder::Encode {
                encoder: encoding_rs::UTF_8.new_encoder(),
                finished: false,
            },
            Direction::FromUtf8(Encoding::Whatwg(enc)) => Coder::Encode {
                encoder: enc.new_encoder(),
                finished: false,
            },
        }
    }

    fn step(&mut self, src: &[u8], dst: &mut [u8]) -> Step {
        match self {
            Coder::Latin1Decode => decode_single_byte(src, dst, 0xFF),
            Coder::AsciiDecode => decode_single_byte(src, dst, 0x7F),
            Coder::Decode(decoder) => {
                let (result, read, written) =
                    decoder.decode_to_utf8_without_replacement(src, dst, true);
                let stop = match result {
                    DecoderResult::InputEmpty => Stop::InputEmpty,
                    DecoderResult::OutputFull => Stop::OutputFull,
                    DecoderResult::Malformed(bad, extra) => Stop::Malformed {
                        at: read.saturating_sub(usize::from(bad) + usize::from(extra)),
                    },
                };
                Step::new(stop, read, written)
            }
            _ => self.encode_step(src, dst),
        }
    }

    /// Encoders take `&str`, so only the valid UTF-8 prefix of `src` is
    /// handed over; a bad sequence at the front is reported on its own.
    fn encode_step(&mut self, src: &[u8], dst: &mut [u8]) -> Step {
        let (text, invalid) = match std::str::from_utf8(src) {
            Ok(text) => (text, None),
            Err(err) => {
                let valid = err.valid_up_to();
                let text = std::str::from_utf8(&src[..valid]).unwrap_or_default();
                (text, Some(err.error_len().unwrap_or(src.len() - valid)))
            }
        };

        if text.is_empty() {
            return match invalid {
                Some(len) => Step::new(Stop::Malformed { at: 0 }, len, 0),
                None => Step::new(Stop::InputEmpty, 0, 0),
            };
        }

        match self {
            Coder::Latin1Encode => encode_single_byte(text, dst, 0xFF),
            Coder::AsciiEncode => encode_single_byte(text, dst, 0x7F),
            Coder::Encode { encoder, finished } => {
                let last = invalid.is_none();
                let (result, read, written) =
                    encoder.encode_from_utf8_without_replacement(text, dst, last);
                let stop = match result {
                    EncoderResult::InputEmpty => {
                        *finished = last;
                        Stop::InputEmpty
                    }
                    EncoderResult::OutputFull => Stop::OutputFull,
                    EncoderResult::Unmappable(character) => Stop::Unmappable {
                        character,
                        at: read - character.len_utf8(),
                    },
                };
                Step::new(stop, read, written)
            }
            _ => unreachable!("decoders never reach encode_step"),
        }
    }

    /// Flush any shift state left in a stateful encoder (ISO-2022-JP).
    fn finish(&mut self, dst: &mut [u8]) -> usize {
        match self {
            Coder::Encode { encoder, finished } if !*finished => {
                let (_, _, written) = encoder.encode_from_utf8_without_replacement("", dst, true);
                *finished = true;
                written
            }
            _ => 0,
        }
    }
}

/// Decode a single-byte encoding whose bytes up to `max` equal their code point.
fn decode_single_byte(src: &[u8], dst: &mut [u8], max: u8) -> Step {
    let mut written = 0;
    for (read, &byte) in src.iter().enumerate() {
        if byte > max {
            return Step::new(Stop::Malformed { at: read }, read + 1, written);
        }
        let ch = char::from(byte);
        if written + ch.len_utf8() > dst.len() {
            return Step::new(Stop::OutputFull, read, written);
        }
        written += ch.encode_utf8(&mut dst[written..]).len();
    }
    Step::new(Stop::InputEmpty, src.len(), written)
}

/// Encode into a single-byte encoding covering code points up to `max`.
fn encode_single_byte(text: &str, dst: &mut [u8], max: u8) -> Step {
    let mut written = 0;
    for (read, character) in text.char_indices() {
        let Ok(byte) = u8::try_from(u32::from(character)) else {
            return Step::new(
                Stop::Unmappable { character, at: read },
                read + character.len_utf8(),
                written,
            );
        };
        if byte > max {
            return Step::new(
                Stop::Unmappable { character, at: read },
                read + character.len_utf8(),
                written,
            );
        }
        if written == dst.len() {
            return Step::new(Stop::OutputFull, read, written);
        }
        dst[written] = byte;
        written += 1;
    }
    Step::new(Stop::InputEmpty, text.len(), written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(from: &str, to: &str) -> Converter {
        Converter::open(from, to, InvalidPolicy::Strict).unwrap()
    }

    fn skipping(from: &str, to: &str) -> Converter {
        Converter::open(from, to, InvalidPolicy::Skip).unwrap()
    }

    #[test]
    fn test_latin1_to_utf8() {
        let converter = strict("ISO-8859-1", "UTF-8");
        let output = converter.convert(b"caf\xE9").unwrap();
        assert_eq!(output, "café".as_bytes());
        assert_eq!(converter.from_encoding(), Encoding::Latin1);
        assert_eq!(converter.to_encoding(), Encoding::Utf8);
    }

    #[test]
    fn test_utf8_to_latin1() {
        let converter = strict("UTF-8", "ISO-8859-1");
        let output = converter.convert("café ÿ".as_bytes()).unwrap();
        assert_eq!(output, b"caf\xE9 \xFF");
    }

    #[test]
    fn test_every_latin1_byte_converts() {
        let converter = strict("ISO-8859-1", "UTF-8");
        let all: Vec<u8> = (0..=255).collect();
        let output = converter.convert(&all).unwrap();
        let expected: String = all.iter().map(|&b| char::from(b)).collect();
        assert_eq!(output, expected.as_bytes());
    }

    #[test]
    fn test_whatwg_encodings() {
        let converter = strict("ISO-8859-15", "UTF-8");
        assert_eq!(converter.convert(&[0xA4]).unwrap(), "€".as_bytes());

        // "日本語" in Shift_JIS
        let converter = strict("Shift_JIS", "UTF-8");
        let output = converter
            .convert(&[0x93, 0xFA, 0x96, 0x7B, 0x8C, 0xEA])
            .unwrap();
        assert_eq!(output, "日本語".as_bytes());

        let converter = strict("UTF-8", "KOI8-R");
        let output = converter.convert("Привет".as_bytes()).unwrap();
        let back = strict("KOI8-R", "UTF-8").convert(&output).unwrap();
        assert_eq!(back, "Привет".as_bytes());
    }

    #[test]
    fn test_output_spanning_many_buffers() {
        let input = vec![0xE9; BUFFER_SIZE * 3 + 7];
        let output = strict("ISO-8859-1", "UTF-8").convert(&input).unwrap();
        assert_eq!(output, "é".repeat(input.len()).as_bytes());

        let back = strict("UTF-8", "ISO-8859-1").convert(&output).unwrap();
        assert_eq!(back, input);

        let text = "日本語".repeat(BUFFER_SIZE);
        let sjis = strict("UTF-8", "Shift_JIS").convert(text.as_bytes()).unwrap();
        let back = strict("Shift_JIS", "UTF-8").convert(&sjis).unwrap();
        assert_eq!(back, text.as_bytes());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(strict("ISO-8859-1", "UTF-8").convert(b"").unwrap(), b"");
        assert_eq!(strict("UTF-8", "EUC-JP").convert(b"").unwrap(), b"");
    }

    #[test]
    fn test_unsupported_pairs() {
        let err = Converter::open("ISO-8859-1", "ISO-8859-15", InvalidPolicy::Strict).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedConversion {
                from: "ISO-8859-1".to_string(),
                to: "ISO-8859-15".to_string(),
            }
        );

        assert!(Converter::open("NO-SUCH-CHARSET", "UTF-8", InvalidPolicy::Skip).is_err());
        assert!(Converter::open("UTF-8", "", InvalidPolicy::Skip).is_err());
        // decoder only
        assert!(Converter::open("UTF-8", "UTF-16LE", InvalidPolicy::Strict).is_err());
        assert!(Converter::open("UTF-16LE", "UTF-8", InvalidPolicy::Strict).is_ok());
    }

    #[test]
    fn test_strict_reports_position() {
        let err = strict("UTF-8", "ISO-8859-1")
            .convert("ab€c".as_bytes())
            .unwrap_err();
        assert_eq!(
            err,
            Error::Unmappable {
                character: '€',
                position: 2
            }
        );

        let err = strict("UTF-8", "UTF-8").convert(b"ab\xFFc").unwrap_err();
        assert_eq!(err, Error::InvalidSequence { position: 2 });

        let err = strict("UTF-8", "ISO-8859-1").convert(b"ab\xFFc").unwrap_err();
        assert_eq!(err, Error::InvalidSequence { position: 2 });

        let err = strict("US-ASCII", "UTF-8").convert(b"abc\x80").unwrap_err();
        assert_eq!(err, Error::InvalidSequence { position: 3 });

        let err = strict("UTF-8", "windows-1252")
            .convert("a日".as_bytes())
            .unwrap_err();
        assert_eq!(
            err,
            Error::Unmappable {
                character: '日',
                position: 1
            }
        );
    }

    #[test]
    fn test_skip_drops_bad_sequences() {
        let output = skipping("UTF-8", "ISO-8859-1")
            .convert("a€b".as_bytes())
            .unwrap();
        assert_eq!(output, b"ab");

        let output = skipping("UTF-8", "ISO-8859-1").convert(b"a\xFFb").unwrap();
        assert_eq!(output, b"ab");

        let output = skipping("US-ASCII", "UTF-8").convert(b"a\xE9b").unwrap();
        assert_eq!(output, b"ab");

        let output = skipping("UTF-8", "UTF-8").convert(b"a\xC3").unwrap();
        assert_eq!(output, b"a");

        let output = skipping("UTF-8", "windows-1252")
            .convert("x日y".as_bytes())
            .unwrap();
        assert_eq!(output, b"xy");
    }

    #[test]
    fn test_skip_everything_fails() {
        let err = skipping("UTF-8", "US-ASCII")
            .convert("ÄÖÜ".as_bytes())
            .unwrap_err();
        assert_eq!(err, Error::NoOutput { position: 0 });

        let err = skipping("UTF-8", "ISO-8859-1")
            .convert("日本語".as_bytes())
            .unwrap_err();
        assert_eq!(err, Error::NoOutput { position: 0 });
    }

    #[test]
    fn test_skip_across_earlier_buffer() {
        // GBK and gb18030 report four-byte sequences that went bad after
        // some bytes were already consumed
        for (label, input) in [
            ("GBK", &[0xD0, 0x35, 0xD9, 0x14][..]),
            ("gb18030", &[0xAC, 0x31, 0xE1, 0x2A][..]),
            ("GBK", &[0x81, 0x30, 0x81][..]),
            ("gb18030", &[b'a', 0x84, 0x31, 0xA4, 0xFF, b'b'][..]),
        ] {
            let converter = skipping(label, "UTF-8");
            if let Ok(output) = converter.convert(input) {
                assert!(std::str::from_utf8(&output).is_ok(), "{}", label);
            }
        }
    }

    #[test]
    fn test_stateful_encoder_is_flushed() {
        let converter = strict("UTF-8", "ISO-2022-JP");
        let output = converter.convert("日本".as_bytes()).unwrap();
        // ends back in ASCII mode
        assert!(output.ends_with(b"\x1B(B"));

        let back = strict("ISO-2022-JP", "UTF-8").convert(&output).unwrap();
        assert_eq!(back, "日本".as_bytes());
    }

    #[test]
    fn test_converter_is_reusable() {
        let converter = strict("ISO-8859-1", "UTF-8");
        assert_eq!(converter.convert(b"\xE9").unwrap(), "é".as_bytes());
        assert!(converter.convert(b"\xFF").is_ok());
        assert_eq!(converter.convert(b"\xE9").unwrap(), "é".as_bytes());
        assert_eq!(converter.policy(), InvalidPolicy::Strict);
    }
}
