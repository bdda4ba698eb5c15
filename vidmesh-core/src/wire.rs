//! Line-oriented command framing shared by the registry, content peers and downloaders.
//!
//! Every command is a single `\n`-terminated UTF-8 line. The only binary payload is the
//! answer to `DOWNLOAD`, which is an 8-byte big-endian length followed by exactly that
//! many bytes of file content.

use tracing::warn;

use crate::domain::{ContentDescriptor, PeerAddr};
use crate::error::{MeshError, Result};

pub const QUERY: &str = "QUERY";
pub const REGISTER: &str = "REGISTER";
pub const UPDATE: &str = "UPDATE";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const DOWNLOAD: &str = "DOWNLOAD";

/// Size of the length prefix in front of a range payload.
pub const RANGE_HEADER_LEN: usize = 8;

/// Upper bound for a single command line; anything longer is a protocol error.
pub const MAX_LINE: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Query,
    Register {
        peer: PeerAddr,
        holdings: Vec<ContentDescriptor>,
    },
    Update {
        peer: PeerAddr,
        holdings: Vec<ContentDescriptor>,
    },
    Ping,
    Download {
        name: String,
        part: u32,
        total: u32,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut tokens = line.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| MeshError::Protocol("empty command".into()))?;

        match verb {
            QUERY => expect_end(tokens, Command::Query),
            PING => expect_end(tokens, Command::Ping),
            REGISTER | UPDATE => {
                let peer: PeerAddr = tokens
                    .next()
                    .ok_or_else(|| MeshError::Protocol(format!("{verb} without host:port")))?
                    .parse()?;
                let holdings = tokens.filter_map(parse_holding).collect();
                if verb == REGISTER {
                    Ok(Command::Register { peer, holdings })
                } else {
                    Ok(Command::Update { peer, holdings })
                }
            }
            DOWNLOAD => {
                let fields: Vec<&str> = tokens.collect();
                match fields.as_slice() {
                    [name, "PART", part, "OF", total] => {
                        let part = parse_num::<u32>(part, "part index")?;
                        let total = parse_num::<u32>(total, "part count")?;
                        if total == 0 || part >= total {
                            return Err(MeshError::Protocol(format!(
                                "part {part} of {total} is out of range"
                            )));
                        }
                        Ok(Command::Download {
                            name: (*name).to_string(),
                            part,
                            total,
                        })
                    }
                    _ => Err(MeshError::Protocol(format!("malformed DOWNLOAD: {line:?}"))),
                }
            }
            other => Err(MeshError::Protocol(format!("unknown command {other:?}"))),
        }
    }

    /// Render the command as a wire line, including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Command::Query => format!("{QUERY}\n"),
            Command::Ping => format!("{PING}\n"),
            Command::Register { peer, holdings } => encode_holdings(REGISTER, peer, holdings),
            Command::Update { peer, holdings } => encode_holdings(UPDATE, peer, holdings),
            Command::Download { name, part, total } => {
                format!("{DOWNLOAD} {name} PART {part} OF {total}\n")
            }
        }
    }
}

fn expect_end<'a>(mut rest: impl Iterator<Item = &'a str>, cmd: Command) -> Result<Command> {
    match rest.next() {
        None => Ok(cmd),
        Some(extra) => Err(MeshError::Protocol(format!("unexpected argument {extra:?}"))),
    }
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse::<T>()
        .map_err(|_| MeshError::Protocol(format!("bad {what}: {s:?}")))
}

/// `name:size`, split on the last colon so names may contain `:`.
fn parse_holding(token: &str) -> Option<ContentDescriptor> {
    let parsed = token
        .rsplit_once(':')
        .filter(|(name, _)| !name.is_empty())
        .and_then(|(name, size)| size.parse::<u64>().ok().map(|s| (name, s)));
    match parsed {
        Some((name, size)) => Some(ContentDescriptor::new(name, size)),
        None => {
            warn!(token, "skipping malformed holding");
            None
        }
    }
}

fn encode_holdings(verb: &str, peer: &PeerAddr, holdings: &[ContentDescriptor]) -> String {
    let mut line = format!("{verb} {peer}");
    for h in holdings {
        line.push(' ');
        line.push_str(&h.name);
        line.push(':');
        line.push_str(&h.total_size.to_string());
    }
    line.push('\n');
    line
}

pub fn encode_range_header(len: u64) -> [u8; RANGE_HEADER_LEN] {
    len.to_be_bytes()
}

pub fn decode_range_header(buf: [u8; RANGE_HEADER_LEN]) -> u64 {
    u64::from_be_bytes(buf)
}

/// One line of a QUERY answer.
pub fn listing_line(name: &str, size: u64, peer: &PeerAddr) -> String {
    format!("{name} {size} bytes available at {peer}")
}

pub fn parse_listing_line(line: &str) -> Result<(ContentDescriptor, PeerAddr)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
        [name, size, "bytes", "available", "at", peer] => {
            let size = parse_num::<u64>(size, "size")?;
            Ok((ContentDescriptor::new(*name, size), peer.parse()?))
        }
        _ => Err(MeshError::Protocol(format!("malformed listing line {line:?}"))),
    }
}
