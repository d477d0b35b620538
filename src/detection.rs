//! Detection of the terminal's character encoding
//!
//! The codeset comes from the process locale (`LC_CTYPE`) and is read once at
//! startup. When the platform cannot tell, [`FALLBACK_CHARSET`] is used: every
//! byte value is a valid ISO-8859-1 character, so the fallback itself can
//! never fail to produce output.

use std::io::IsTerminal;

use log::debug;

use crate::InvalidPolicy;

/// Encoding assumed when the locale reports nothing usable.
pub const FALLBACK_CHARSET: &str = "ISO-8859-1";

/// How to choose the [`InvalidPolicy`] at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidMode {
    /// Skip invalid input on an interactive session, be strict otherwise
    #[default]
    Auto,
    /// Always skip
    Skip,
    /// Never skip
    Strict,
}

impl InvalidMode {
    /// Settle the mode into a concrete policy.
    ///
    /// `Auto` skips only when both stdin and stdout are terminals: a human
    /// reading the output prefers dropped characters to untranslated bytes,
    /// a pipe gets the data unaltered or not at all.
    pub fn resolve(self) -> InvalidPolicy {
        match self {
            InvalidMode::Auto => {
                Self::policy_for(std::io::stdin().is_terminal() && std::io::stdout().is_terminal())
            }
            InvalidMode::Skip => InvalidPolicy::Skip,
            InvalidMode::Strict => InvalidPolicy::Strict,
        }
    }

    fn policy_for(interactive: bool) -> InvalidPolicy {
        if interactive {
            InvalidPolicy::Skip
        } else {
            InvalidPolicy::Strict
        }
    }
}

/// Name of the locale's codeset, or [`FALLBACK_CHARSET`].
pub fn local_charset() -> String {
    resolve(query_codeset())
}

fn resolve(codeset: Option<String>) -> String {
    match codeset {
        Some(name) if !name.trim().is_empty() => {
            debug!("locale codeset is {}", name);
            name
        }
        _ => {
            debug!("no locale codeset, assuming {}", FALLBACK_CHARSET);
            FALLBACK_CHARSET.to_string()
        }
    }
}

/// Ask `nl_langinfo(CODESET)` under the environment's `LC_CTYPE`, then put
/// the previous `LC_CTYPE` back.
#[cfg(unix)]
fn query_codeset() -> Option<String> {
    use std::ffi::CStr;

    // SAFETY: setlocale/nl_langinfo return pointers to static or
    // locale-owned strings; each is copied before the next locale call.
    unsafe {
        let current = libc::setlocale(libc::LC_CTYPE, std::ptr::null());
        let saved = (!current.is_null()).then(|| CStr::from_ptr(current).to_owned());

        if libc::setlocale(libc::LC_CTYPE, c"".as_ptr()).is_null() {
            return None;
        }

        let codeset = libc::nl_langinfo(libc::CODESET);
        let name = (!codeset.is_null())
            .then(|| CStr::from_ptr(codeset).to_string_lossy().into_owned())
            .filter(|name| !name.is_empty());

        if let Some(saved) = saved {
            libc::setlocale(libc::LC_CTYPE, saved.as_ptr());
        }

        name
    }
}

#[cfg(not(unix))]
fn query_codeset() -> Option<String> {
    None
}
