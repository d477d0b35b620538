//! Minimal client for the MPD line protocol
//!
//! Requests are one line: a command name followed by double-quoted
//! arguments. Responses are `key: value` lines terminated by `OK`, or a single
//! `ACK [code@index] {command} message` line on error. Values are kept as raw
//! bytes; turning them into terminal text is the caller's business.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;

/// Port MPD listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 6600;

/// Errors raised while talking to the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The daemon rejected a command
    #[error("MPD error: {message}")]
    Ack {
        /// Numeric error code
        code: u32,
        /// Index of the failing command in a command list
        index: u32,
        /// Name of the failing command
        command: String,
        /// Human readable description
        message: String,
    },
    /// The peer did not greet like an MPD server
    #[error("not an MPD server: {0:?}")]
    Greeting(String),
    /// A response line that is neither `key: value`, `OK` nor `ACK`
    #[error("malformed response line: {0:?}")]
    Malformed(String),
    /// The daemon hung up mid-response
    #[error("connection closed by server")]
    Closed,
    /// The host name resolved to no address
    #[error("could not resolve {0}")]
    Resolve(String),
}

/// Result type for protocol operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// One `type value` pair of a search command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Protocol tag name (`artist`, `any`, `file`, ...)
    pub kind: String,
    /// Query text, already UTF-8
    pub value: Vec<u8>,
}

/// Kind of database entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A song file
    Song,
    /// A directory
    Directory,
    /// A stored playlist
    Playlist,
}

/// Database entry as returned by `lsinfo`, `search` and `find`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A song, identified by its URI
    Song {
        /// Song URI relative to the music directory
        uri: Vec<u8>,
    },
    /// A directory
    Directory {
        /// Directory path relative to the music directory
        path: Vec<u8>,
    },
    /// A stored playlist
    Playlist {
        /// Playlist path
        path: Vec<u8>,
    },
}

impl Entity {
    /// Kind of this entry
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Song { .. } => EntityKind::Song,
            Entity::Directory { .. } => EntityKind::Directory,
            Entity::Playlist { .. } => EntityKind::Playlist,
        }
    }

    /// Raw UTF-8 path of this entry as sent by the daemon
    pub fn path(&self) -> &[u8] {
        match self {
            Entity::Song { uri } => uri,
            Entity::Directory { path } | Entity::Playlist { path } => path,
        }
    }
}

/// Database queries the command handlers need
pub trait Connection {
    /// Run `find` (exact) or `search` (substring) with the given constraints
    fn search(&mut self, exact: bool, constraints: &[Constraint]) -> ClientResult<Vec<Entity>>;

    /// Run `lsinfo` on `base`, or on the root when `None`
    fn list_meta(&mut self, base: Option<&[u8]>) -> ClientResult<Vec<Entity>>;
}

/// Connection to an MPD server over any byte stream
pub struct MpdClient<S> {
    stream: BufReader<S>,
    version: String,
}

impl MpdClient<TcpStream> {
    /// Connect over TCP. `timeout` bounds connecting and each read or write.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>) -> ClientResult<Self> {
        let mut last_error = None;

        for addr in (host, port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    debug!("connected to {}", addr);
                    return Self::new(stream);
                }
                Err(err) => {
                    debug!("connecting to {} failed: {}", addr, err);
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => ClientError::Io(err),
            None => ClientError::Resolve(format!("{}:{}", host, port)),
        })
    }
}

impl<S: Read + Write> MpdClient<S> {
    /// Wrap an established stream and consume the server greeting
    pub fn new(stream: S) -> ClientResult<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            version: String::new(),
        };

        let line = client.read_line()?;
        let version = line
            .strip_prefix(b"OK MPD ")
            .ok_or_else(|| ClientError::Greeting(String::from_utf8_lossy(&line).into_owned()))?;
        client.version = String::from_utf8_lossy(version).into_owned();
        debug!("server speaks protocol {}", client.version);

        Ok(client)
    }

    /// Protocol version announced by the server
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Underlying stream
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Authenticate with a password
    pub fn password(&mut self, password: &[u8]) -> ClientResult<()> {
        self.command("password", &[password])?;
        Ok(())
    }

    /// Send one command and collect its `key: value` response
    pub fn command(&mut self, name: &str, args: &[&[u8]]) -> ClientResult<Vec<(String, Vec<u8>)>> {
        self.send(name, args)?;
        self.read_pairs()
    }

    fn send(&mut self, name: &str, args: &[&[u8]]) -> ClientResult<()> {
        let mut line = name.as_bytes().to_vec();
        for arg in args {
            line.push(b' ');
            quote_into(&mut line, arg);
        }
        line.push(b'\n');

        trace!("> {}", String::from_utf8_lossy(&line).trim_end());
        let stream = self.stream.get_mut();
        stream.write_all(&line)?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> ClientResult<Vec<u8>> {
        let mut line = Vec::new();
        if self.stream.read_until(b'\n', &mut line)? == 0 {
            return Err(ClientError::Closed);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(line)
    }

    fn read_pairs(&mut self) -> ClientResult<Vec<(String, Vec<u8>)>> {
        let mut pairs = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == b"OK" {
                return Ok(pairs);
            }
            if line.starts_with(b"ACK ") {
                return Err(parse_ack(&line));
            }

            let Some(split) = line.windows(2).position(|pair| pair == b": ") else {
                return Err(ClientError::Malformed(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            };
            let key = String::from_utf8_lossy(&line[..split]).into_owned();
            pairs.push((key, line[split + 2..].to_vec()));
        }
    }
}

impl<S: Read + Write> Connection for MpdClient<S> {
    fn search(&mut self, exact: bool, constraints: &[Constraint]) -> ClientResult<Vec<Entity>> {
        let name = if exact { "find" } else { "search" };
        let args: Vec<&[u8]> = constraints
            .iter()
            .flat_map(|constraint| [constraint.kind.as_bytes(), constraint.value.as_slice()])
            .collect();
        Ok(entities(self.command(name, &args)?))
    }

    fn list_meta(&mut self, base: Option<&[u8]>) -> ClientResult<Vec<Entity>> {
        let args: Vec<&[u8]> = base.into_iter().collect();
        Ok(entities(self.command("lsinfo", &args)?))
    }
}

/// Append `arg` to `out` as a double-quoted protocol argument
pub fn quote_into(out: &mut Vec<u8>, arg: &[u8]) {
    out.push(b'"');
    for &byte in arg {
        if byte == b'"' || byte == b'\\' {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b'"');
}

/// Group response pairs into entries; each entry starts at its path key and
/// swallows the metadata lines that follow.
fn entities(pairs: Vec<(String, Vec<u8>)>) -> Vec<Entity> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| match key.as_str() {
            "file" => Some(Entity::Song { uri: value }),
            "directory" => Some(Entity::Directory { path: value }),
            "playlist" => Some(Entity::Playlist { path: value }),
            _ => None,
        })
        .collect()
}

/// Parse `ACK [code@index] {command} message`
fn parse_ack(line: &[u8]) -> ClientError {
    let text = String::from_utf8_lossy(line);
    let rest = text.strip_prefix("ACK ").unwrap_or(&text);

    let (code, index, rest) = match rest.strip_prefix('[').and_then(|r| r.split_once(']')) {
        Some((position, rest)) => {
            let (code, index) = position.split_once('@').unwrap_or((position, "0"));
            (
                code.parse().unwrap_or(0),
                index.parse().unwrap_or(0),
                rest.trim_start(),
            )
        }
        None => (0, 0, rest),
    };

    let (command, message) = match rest.strip_prefix('{').and_then(|r| r.split_once('}')) {
        Some((command, message)) => (command.to_string(), message.trim_start().to_string()),
        None => (String::new(), rest.to_string()),
    };

    ClientError::Ack {
        code,
        index,
        command,
        message,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Canned server replies in, client requests out
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(replies: &[u8]) -> Self {
            Self {
                input: Cursor::new(replies.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client(replies: &[u8]) -> MpdClient<MockStream> {
        MpdClient::new(MockStream::new(replies)).unwrap()
    }

    #[test]
    fn test_greeting() {
        let client = client(b"OK MPD 0.23.5\n");
        assert_eq!(client.version(), "0.23.5");

        let err = MpdClient::new(MockStream::new(b"SSH-2.0-OpenSSH\n")).err().unwrap();
        assert!(matches!(err, ClientError::Greeting(_)));

        let err = MpdClient::new(MockStream::new(b"")).err().unwrap();
        assert!(matches!(err, ClientError::Closed));
    }

    #[test]
    fn test_search_request_and_songs() {
        let mut client = client(
            b"OK MPD 0.23.5\n\
              file: Queen/Bohemian Rhapsody.flac\n\
              Title: Bohemian Rhapsody\n\
              Artist: Queen\n\
              file: Queen/Caf\xC3\xA9.flac\n\
              OK\n",
        );

        let constraints = vec![
            Constraint {
                kind: "artist".to_string(),
                value: b"Queen".to_vec(),
            },
            Constraint {
                kind: "title".to_string(),
                value: b"say \"hi\" \\o/".to_vec(),
            },
        ];
        let songs = client.search(false, &constraints).unwrap();

        assert_eq!(
            client.get_ref().output,
            b"search \"artist\" \"Queen\" \"title\" \"say \\\"hi\\\" \\\\o/\"\n"
        );
        assert_eq!(
            songs,
            vec![
                Entity::Song {
                    uri: b"Queen/Bohemian Rhapsody.flac".to_vec()
                },
                Entity::Song {
                    uri: "Queen/Café.flac".as_bytes().to_vec()
                },
            ]
        );
    }

    #[test]
    fn test_find_is_exact_search() {
        let mut client = client(b"OK MPD 0.23.5\nOK\n");
        let constraints = [Constraint {
            kind: "album".to_string(),
            value: b"A Night at the Opera".to_vec(),
        }];
        assert!(client.search(true, &constraints).unwrap().is_empty());
        assert_eq!(
            client.get_ref().output,
            b"find \"album\" \"A Night at the Opera\"\n"
        );
    }

    #[test]
    fn test_lsinfo_mixed_entries() {
        let mut client = client(
            b"OK MPD 0.23.5\n\
              directory: Queen/Live\n\
              Last-Modified: 2020-01-01T00:00:00Z\n\
              file: Queen/Intro.mp3\n\
              Time: 120\n\
              playlist: Queen/best.m3u\n\
              OK\n",
        );

        let entries = client.list_meta(Some(b"Queen")).unwrap();
        assert_eq!(client.get_ref().output, b"lsinfo \"Queen\"\n");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind(), EntityKind::Directory);
        assert_eq!(entries[0].path(), b"Queen/Live");
        assert_eq!(entries[1].kind(), EntityKind::Song);
        assert_eq!(entries[1].path(), b"Queen/Intro.mp3");
        assert_eq!(entries[2].kind(), EntityKind::Playlist);
        assert_eq!(entries[2].path(), b"Queen/best.m3u");
    }

    #[test]
    fn test_lsinfo_root() {
        let mut client = client(b"OK MPD 0.23.5\nOK\n");
        client.list_meta(None).unwrap();
        assert_eq!(client.get_ref().output, b"lsinfo\n");
    }

    #[test]
    fn test_ack_is_an_error() {
        let mut client = client(b"OK MPD 0.23.5\nACK [50@0] {lsinfo} No such directory\n");
        match client.list_meta(Some(b"nope")) {
            Err(ClientError::Ack {
                code,
                index,
                command,
                message,
            }) => {
                assert_eq!(code, 50);
                assert_eq!(index, 0);
                assert_eq!(command, "lsinfo");
                assert_eq!(message, "No such directory");
            }
            other => panic!("expected ACK, got {:?}", other),
        }
    }

    #[test]
    fn test_ack_message_display() {
        let err = parse_ack(b"ACK [3@0] {password} incorrect password");
        assert_eq!(err.to_string(), "MPD error: incorrect password");

        let err = parse_ack(b"ACK garbled");
        assert_eq!(err.to_string(), "MPD error: garbled");
    }

    #[test]
    fn test_password() {
        let mut client = client(b"OK MPD 0.23.5\nOK\n");
        client.password(b"secret").unwrap();
        assert_eq!(client.get_ref().output, b"password \"secret\"\n");
    }

    #[test]
    fn test_truncated_and_malformed_responses() {
        let mut conn = client(b"OK MPD 0.23.5\nfile: a.mp3\n");
        assert!(matches!(
            conn.list_meta(None),
            Err(ClientError::Closed)
        ));

        let mut conn = client(b"OK MPD 0.23.5\nwhat is this\n");
        assert!(matches!(
            conn.list_meta(None),
            Err(ClientError::Malformed(_))
        ));
    }

    #[test]
    fn test_values_keep_raw_bytes() {
        let mut client = client(b"OK MPD 0.23.5\nfile: odd\xFF: name\nOK\n");
        let entries = client.list_meta(None).unwrap();
        assert_eq!(entries[0].path(), b"odd\xFF: name");
    }

    #[test]
    fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = MpdClient::connect("127.0.0.1", port, Some(Duration::from_secs(1)));
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
