//! Game server status query (Valve A2S_INFO over UDP)
//!
//! Handles:
//! - A2S_INFO request packet, with the challenge round-trip modern servers demand
//! - Response parsing (only the fields the status message needs)
//! - Per-attempt timeout and bounded retries

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::config::Config;

const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const S2A_INFO: u8 = 0x49;
const S2C_CHALLENGE: u8 = 0x41;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

/// Max challenge round-trips before giving up on one attempt
const MAX_CHALLENGES: usize = 2;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response header 0x{0:02x}")]
    UnexpectedHeader(u8),
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("server kept answering with challenges")]
    ChallengeLoop,
}

/// Query protocol spoken to the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryProtocol {
    /// Steam A2S (Source / ATS / ETS2 dedicated servers)
    Valve,
}

impl FromStr for QueryProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valve" | "protocol-valve" | "a2s" => Ok(Self::Valve),
            other => Err(format!("unsupported query protocol '{other}'")),
        }
    }
}

impl fmt::Display for QueryProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valve => write!(f, "valve"),
        }
    }
}

/// What the server reported about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub game: String,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
}

/// Anything able to ask the game server for its status
pub trait StatusQuery {
    fn query(&self) -> impl Future<Output = Result<ServerInfo, QueryError>> + Send;
}

/// A2S_INFO client
#[derive(Debug, Clone)]
pub struct A2sQuery {
    host: String,
    port: u16,
    timeout: Duration,
    attempts: u32,
}

impl A2sQuery {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, attempts: u32) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            attempts: attempts.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match config.query_protocol {
            QueryProtocol::Valve => Self::new(
                config.host.clone(),
                config.port,
                config.query_timeout,
                config.query_attempts,
            ),
        }
    }

    /// One attempt, name resolution included, bounded by the query timeout
    async fn attempt(&self) -> Result<ServerInfo, QueryError> {
        timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
    }

    async fn exchange(&self) -> Result<ServerInfo, QueryError> {
        let target = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| QueryError::Resolve(format!("{}:{}", self.host, self.port)))?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await?;

        let mut buf = vec![0u8; 4096];
        let mut challenge = None;

        for _ in 0..=MAX_CHALLENGES {
            socket.send(&info_request(challenge)).await?;
            let len = socket.recv(&mut buf).await?;

            match parse_response(&buf[..len])? {
                Response::Info(info) => return Ok(info),
                Response::Challenge(c) => {
                    debug!("A2S challenge received from {}", target);
                    challenge = Some(c);
                }
            }
        }

        Err(QueryError::ChallengeLoop)
    }
}

impl StatusQuery for A2sQuery {
    async fn query(&self) -> Result<ServerInfo, QueryError> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.attempt().await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    debug!("A2S attempt {}/{} failed: {}", attempt, self.attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(QueryError::Timeout(self.timeout)))
    }
}

/// Builds the A2S_INFO request, with the challenge appended when the server asked for one
pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(SIMPLE_HEADER.len() + 1 + INFO_PAYLOAD.len() + 4);
    pkt.extend_from_slice(&SIMPLE_HEADER);
    pkt.push(A2S_INFO);
    pkt.extend_from_slice(INFO_PAYLOAD);
    if let Some(c) = challenge {
        pkt.extend_from_slice(&c);
    }
    pkt
}

#[derive(Debug, PartialEq, Eq)]
enum Response {
    Info(ServerInfo),
    Challenge([u8; 4]),
}

fn parse_response(packet: &[u8]) -> Result<Response, QueryError> {
    let mut reader = Reader::new(packet);

    if reader.take(4)? != SIMPLE_HEADER {
        return Err(QueryError::Malformed("split or missing packet header"));
    }

    match reader.u8()? {
        S2C_CHALLENGE => {
            let bytes = reader.take(4)?;
            Ok(Response::Challenge([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        S2A_INFO => {
            let _protocol = reader.u8()?;
            let name = reader.cstring()?;
            let map = reader.cstring()?;
            let _folder = reader.cstring()?;
            let game = reader.cstring()?;
            let _app_id = reader.take(2)?;
            let players = reader.u8()?;
            let max_players = reader.u8()?;
            let bots = reader.u8()?;

            Ok(Response::Info(ServerInfo {
                name,
                map,
                game,
                players: players.into(),
                max_players: max_players.into(),
                bots: bots.into(),
            }))
        }
        other => Err(QueryError::UnexpectedHeader(other)),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], QueryError> {
        let end = self.pos + n;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(QueryError::Malformed("truncated packet"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, QueryError> {
        Ok(self.take(1)?[0])
    }

    fn cstring(&mut self) -> Result<String, QueryError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(QueryError::Malformed("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}
