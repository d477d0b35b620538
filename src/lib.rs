//! # mpc-lite - Music Player Daemon client core
//!
//! Library half of the `mpc` command-line client. The daemon speaks UTF-8 on
//! the wire while the terminal speaks whatever the process locale says, so
//! every string crossing that boundary goes through a [`CharsetBridge`].
//!
//! ## Features
//!
//! - **Locale detection** of the terminal codeset with an ISO-8859-1 fallback
//! - **Cached converter** between the local codeset and UTF-8
//! - **Never-failing facades** that hand back the input when conversion fails
//! - **Minimal MPD client** for the search and completion commands
//!
//! ## Quick Start
//!
//! ```rust
//! use mpc_lite::{CharsetBridge, InvalidPolicy};
//!
//! let mut bridge = CharsetBridge::with_charset("ISO-8859-1", InvalidPolicy::Strict);
//!
//! // "café" typed on a Latin-1 terminal
//! let wire = bridge.to_utf8(b"caf\xE9").as_bytes().to_vec();
//! assert_eq!(wire, "café".as_bytes());
//!
//! let local = bridge.from_utf8(&wire);
//! assert!(!local.is_fallback());
//! assert_eq!(local.as_bytes(), b"caf\xE9");
//! ```

#![deny(missing_docs)]

use thiserror::Error;

pub mod bridge;
pub mod client;
pub mod commands;
pub mod converter;
pub mod detection;

pub use bridge::{CharsetBridge, CharsetInfo, Converted};
pub use converter::{Converter, InvalidPolicy};
pub use detection::InvalidMode;

/// Wire encoding of the MPD protocol.
pub const UTF8: &str = "UTF-8";

/// Result type for charset operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while converting text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No converter can be opened for this pair of encodings
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source encoding name as requested
        from: String,
        /// Target encoding name as requested
        to: String,
    },
    /// Input is not valid in the source encoding
    #[error("invalid byte sequence at position {position}")]
    InvalidSequence {
        /// Offset of the first offending byte
        position: usize,
    },
    /// Character has no representation in the target encoding
    #[error("cannot encode character '{character}' at position {position}")]
    Unmappable {
        /// The unmappable character
        character: char,
        /// Offset of the character in the input
        position: usize,
    },
    /// Conversion requested before any converter was opened
    #[error("no active converter")]
    NoConverter,
    /// A conversion step neither consumed input nor produced output
    #[error("conversion stalled at position {position}")]
    Stalled {
        /// Offset where the converter stopped making progress
        position: usize,
    },
    /// A chunk of non-empty input converted to nothing at all
    #[error("no output for input starting at position {position}")]
    NoOutput {
        /// Offset of the chunk that produced nothing
        position: usize,
    },
}

/// A character encoding the converter knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8, the protocol encoding
    Utf8,
    /// 7-bit US-ASCII, what the C/POSIX locale reports
    Ascii,
    /// ISO-8859-1, every byte maps to the code point of the same value
    Latin1,
    /// Any other encoding known to `encoding_rs`
    Whatwg(&'static encoding_rs::Encoding),
}

impl Encoding {
    /// Resolve a codeset name as reported by `nl_langinfo(CODESET)` or typed
    /// by a user.
    ///
    /// ISO-8859-1 and ASCII are matched here before falling through to the
    /// WHATWG label table, which would otherwise alias both to windows-1252.
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let key: String = label
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match key.as_str() {
            "" => None,
            "UTF8" => Some(Encoding::Utf8),
            "ANSIX3.41968" | "ASCII" | "USASCII" | "646" | "ISO646US" | "CP367" => {
                Some(Encoding::Ascii)
            }
            "ISO88591" | "LATIN1" | "L1" | "CP819" | "IBM819" | "ISO88591:1987" => {
                Some(Encoding::Latin1)
            }
            _ => encoding_rs::Encoding::for_label_no_replacement(label.as_bytes()).map(|enc| {
                if enc == encoding_rs::UTF_8 {
                    Encoding::Utf8
                } else {
                    Encoding::Whatwg(enc)
                }
            }),
        }
    }

    /// Get the canonical name of this encoding
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => UTF8,
            Encoding::Ascii => "US-ASCII",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Whatwg(enc) => enc.name(),
        }
    }

    /// Check if this encoding is ASCII-compatible (ASCII bytes 0-127 have same meaning)
    pub fn is_ascii_compatible(self) -> bool {
        match self {
            Encoding::Utf8 | Encoding::Ascii | Encoding::Latin1 => true,
            Encoding::Whatwg(enc) => enc.is_ascii_compatible(),
        }
    }

    /// Check if text can be written out in this encoding.
    ///
    /// UTF-16 and the replacement encoding only exist as decoders.
    pub fn can_encode(self) -> bool {
        match self {
            Encoding::Whatwg(enc) => enc.output_encoding() == enc,
            _ => true,
        }
    }
}
