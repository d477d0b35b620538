//! Charset bridge between the terminal and the daemon
//!
//! [`CharsetBridge`] owns everything the conversion layer needs: the local
//! codeset, the single cached [`Converter`], and one result slot per
//! direction. A facade's result borrows its slot, so it stays valid until the
//! next call on the bridge and no longer.

use log::{debug, trace};
use serde::Serialize;

use crate::converter::{Converter, InvalidPolicy};
use crate::detection::{self, InvalidMode};
use crate::{Encoding, Error, Result, UTF8};

/// Outcome of a directional conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converted<'a> {
    /// The text was converted
    Clean(&'a [u8]),
    /// Conversion failed; these are the input bytes unchanged
    Fallback(&'a [u8]),
}

impl<'a> Converted<'a> {
    /// Bytes to use, converted or not
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Converted::Clean(bytes) | Converted::Fallback(bytes) => bytes,
        }
    }

    /// Whether the input was passed through untranslated
    pub fn is_fallback(&self) -> bool {
        matches!(self, Converted::Fallback(_))
    }
}

/// Summary of the bridge configuration, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CharsetInfo {
    /// Local codeset name as detected or configured
    pub charset: String,
    /// Canonical encoding the name resolved to, if any
    pub encoding: Option<&'static str>,
    /// Whether invalid sequences are dropped
    pub skip_invalid: bool,
    /// Whether ASCII text passes through unchanged
    pub ascii_compatible: bool,
}

#[derive(Debug)]
struct Active {
    from: String,
    to: String,
    converter: Converter,
}

/// Conversion context between the local codeset and UTF-8
#[derive(Debug)]
pub struct CharsetBridge {
    charset: String,
    policy: InvalidPolicy,
    active: Option<Active>,
    opens: usize,
    to_utf8_slot: Vec<u8>,
    from_utf8_slot: Vec<u8>,
}

impl CharsetBridge {
    /// Detect the locale codeset and build a bridge for it
    pub fn init(mode: InvalidMode) -> Self {
        Self::with_charset(detection::local_charset(), mode.resolve())
    }

    /// Build a bridge for an explicit local codeset
    pub fn with_charset(charset: impl Into<String>, policy: InvalidPolicy) -> Self {
        let charset = charset.into();
        debug!("local charset {} ({:?})", charset, policy);
        Self {
            charset,
            policy,
            active: None,
            opens: 0,
            to_utf8_slot: Vec::new(),
            from_utf8_slot: Vec::new(),
        }
    }

    /// Local codeset name
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Policy applied to invalid input
    pub fn policy(&self) -> InvalidPolicy {
        self.policy
    }

    /// Number of converters opened so far
    pub fn converter_opens(&self) -> usize {
        self.opens
    }

    /// Describe the bridge configuration
    pub fn info(&self) -> CharsetInfo {
        let encoding = Encoding::for_label(&self.charset);
        CharsetInfo {
            charset: self.charset.clone(),
            encoding: encoding.map(Encoding::name),
            skip_invalid: self.policy == InvalidPolicy::Skip,
            ascii_compatible: encoding.is_some_and(Encoding::is_ascii_compatible),
        }
    }

    /// Make sure the active converter goes from `from` to `to`.
    ///
    /// The requested names are the cache key. On a miss the old converter is
    /// released before the new one is opened, so a failed open leaves the
    /// bridge with no converter at all.
    pub fn set(&mut self, from: &str, to: &str) -> Result<()> {
        if let Some(active) = &self.active {
            if active.from == from && active.to == to {
                trace!("reusing converter {} -> {}", from, to);
                return Ok(());
            }
        }

        self.close();

        let converter = Converter::open(from, to, self.policy)?;
        self.opens += 1;
        debug!(
            "opened converter {} -> {} ({} -> {}, {:?})",
            from,
            to,
            converter.from_encoding().name(),
            converter.to_encoding().name(),
            converter.policy()
        );

        self.active = Some(Active {
            from: from.to_string(),
            to: to.to_string(),
            converter,
        });

        Ok(())
    }

    /// Release the active converter, if any
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            trace!("closing converter {} -> {}", active.from, active.to);
        }
    }

    /// Convert through the active converter
    pub fn convert(&self, input: &[u8]) -> Result<Vec<u8>> {
        let active = self.active.as_ref().ok_or(Error::NoConverter)?;
        active.converter.convert(input)
    }

    /// Convert local text to UTF-8 for the daemon; never fails
    pub fn to_utf8(&mut self, input: &[u8]) -> Converted<'_> {
        let charset = self.charset.clone();
        let outcome = self
            .set(&charset, UTF8)
            .and_then(|()| self.convert(input));
        fill(&mut self.to_utf8_slot, input, outcome)
    }

    /// Convert UTF-8 text from the daemon to the local codeset; never fails
    pub fn from_utf8(&mut self, input: &[u8]) -> Converted<'_> {
        let charset = self.charset.clone();
        let outcome = self
            .set(UTF8, &charset)
            .and_then(|()| self.convert(input));
        fill(&mut self.from_utf8_slot, input, outcome)
    }
}

fn fill<'a>(slot: &'a mut Vec<u8>, input: &[u8], outcome: Result<Vec<u8>>) -> Converted<'a> {
    match outcome {
        Ok(bytes) => {
            *slot = bytes;
            Converted::Clean(&slot[..])
        }
        Err(err) => {
            debug!("passing text through unconverted: {}", err);
            slot.clear();
            slot.extend_from_slice(input);
            Converted::Fallback(&slot[..])
        }
    }
}
