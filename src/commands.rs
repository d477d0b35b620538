//! Command handlers: database search and path completion
//!
//! Handlers are thin: translate arguments to wire text, run one query, print
//! the matching paths in the terminal's encoding.

use std::io::{self, Write};

use thiserror::Error;

use crate::CharsetBridge;
use crate::client::{ClientError, Connection, Constraint, Entity, EntityKind};

/// Tag names accepted as search types, besides `any`, `file` and `base`
pub const TAG_NAMES: &[&str] = &[
    "artist",
    "artistsort",
    "album",
    "albumsort",
    "albumartist",
    "albumartistsort",
    "title",
    "track",
    "name",
    "genre",
    "date",
    "originaldate",
    "composer",
    "performer",
    "conductor",
    "work",
    "grouping",
    "comment",
    "disc",
    "label",
    "musicbrainz_artistid",
    "musicbrainz_albumid",
    "musicbrainz_albumartistid",
    "musicbrainz_trackid",
    "musicbrainz_releasetrackid",
    "musicbrainz_workid",
];

/// Errors that end a command
#[derive(Debug, Error)]
pub enum CommandError {
    /// Search arguments did not come in pairs
    #[error("arguments must be pairs of search types and queries")]
    UnpairedArguments,
    /// Unknown search type
    #[error("\"{0}\" is not a valid search type")]
    UnknownSearchType(String),
    /// The daemon or the connection failed
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Writing to the output failed
    #[error("cannot write output: {0}")]
    Output(#[from] io::Error),
}

/// Search the database for songs whose tags contain the queries
pub fn search<C, W>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    args: &[Vec<u8>],
    out: &mut W,
) -> Result<(), CommandError>
where
    C: Connection,
    W: Write,
{
    do_search(conn, bridge, args, out, false)
}

/// Find songs whose tags match the queries exactly
pub fn find<C, W>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    args: &[Vec<u8>],
    out: &mut W,
) -> Result<(), CommandError>
where
    C: Connection,
    W: Write,
{
    do_search(conn, bridge, args, out, true)
}

fn do_search<C: Connection, W: Write>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    args: &[Vec<u8>],
    out: &mut W,
    exact: bool,
) -> Result<(), CommandError> {
    let constraints = parse_constraints(args, bridge)?;
    let entries = conn.search(exact, &constraints)?;

    print_filenames(bridge, &entries, out)
}

/// Turn `type query [type query]...` into constraints, queries sent as UTF-8
pub fn parse_constraints(
    args: &[Vec<u8>],
    bridge: &mut CharsetBridge,
) -> Result<Vec<Constraint>, CommandError> {
    if args.len() % 2 != 0 {
        return Err(CommandError::UnpairedArguments);
    }

    args.chunks_exact(2)
        .map(|pair| -> Result<Constraint, CommandError> {
            let kind = search_type(&pair[0])?;
            let value = bridge.to_utf8(&pair[1]).as_bytes().to_vec();
            Ok(Constraint { kind, value })
        })
        .collect()
}

fn search_type(name: &[u8]) -> Result<String, CommandError> {
    let lower = String::from_utf8_lossy(name).to_lowercase();
    let kind = match lower.as_str() {
        "filename" => "file",
        kind @ ("any" | "file" | "base") => kind,
        tag if TAG_NAMES.contains(&tag) => tag,
        _ => {
            return Err(CommandError::UnknownSearchType(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
    };
    Ok(kind.to_string())
}

/// Print each song URI on its own line in the local encoding
pub fn print_filenames<W: Write>(
    bridge: &mut CharsetBridge,
    entries: &[Entity],
    out: &mut W,
) -> Result<(), CommandError> {
    for entry in entries.iter().filter(|e| e.kind() == EntityKind::Song) {
        print_path(bridge, entry.path(), out)?;
    }
    Ok(())
}

fn print_path<W: Write>(
    bridge: &mut CharsetBridge,
    path: &[u8],
    out: &mut W,
) -> Result<(), CommandError> {
    out.write_all(bridge.from_utf8(path).as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Complete a song path
pub fn tab<C: Connection, W: Write>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    prefix: &[u8],
    out: &mut W,
) -> Result<(), CommandError> {
    complete(conn, bridge, prefix, out, EntityKind::Song)
}

/// Complete a directory path
pub fn lstab<C: Connection, W: Write>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    prefix: &[u8],
    out: &mut W,
) -> Result<(), CommandError> {
    complete(conn, bridge, prefix, out, EntityKind::Directory)
}

/// Complete a stored playlist name
pub fn loadtab<C: Connection, W: Write>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    prefix: &[u8],
    out: &mut W,
) -> Result<(), CommandError> {
    complete(conn, bridge, prefix, out, EntityKind::Playlist)
}

/// Directory part of a completion prefix: everything before the last `/`
fn tab_base(prefix: &[u8]) -> Option<&[u8]> {
    prefix
        .iter()
        .rposition(|&byte| byte == b'/')
        .map(|slash| &prefix[..slash])
}

/// The prefix test runs on the raw wire path, before any translation.
fn complete<C: Connection, W: Write>(
    conn: &mut C,
    bridge: &mut CharsetBridge,
    prefix: &[u8],
    out: &mut W,
    kind: EntityKind,
) -> Result<(), CommandError> {
    let entries = conn.list_meta(tab_base(prefix))?;

    for entry in entries.iter().filter(|e| e.kind() == kind) {
        if entry.path().starts_with(prefix) {
            print_path(bridge, entry.path(), out)?;
        }
    }

    Ok(())
}
