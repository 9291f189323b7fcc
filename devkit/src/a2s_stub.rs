/*!
Mock A2S game server for tests without a real game server

Answers `A2S_INFO` requests on an ephemeral localhost UDP port with a
configurable server info. It can demand a challenge first (like recent
Source servers) or go silent to simulate an offline server.
*/

use anyhow::Result;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const S2A_INFO: u8 = 0x49;
const S2C_CHALLENGE: u8 = 0x41;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const CHALLENGE: [u8; 4] = [0x0A, 0x0B, 0x0C, 0x0D];

/// What the stub reports in its info response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2sServerInfo {
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
}

impl Default for A2sServerInfo {
    fn default() -> Self {
        Self {
            name: "Devkit Server".to_string(),
            map: "dk_test".to_string(),
            folder: "devkit".to_string(),
            game: "Devkit".to_string(),
            players: 0,
            max_players: 16,
            bots: 0,
        }
    }
}

impl A2sServerInfo {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_players(mut self, players: u8, max_players: u8) -> Self {
        self.players = players;
        self.max_players = max_players;
        self
    }

    /// Encodes the `S2A_INFO` response packet
    pub fn to_packet(&self) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(64);
        pkt.extend_from_slice(&HEADER);
        pkt.push(S2A_INFO);
        pkt.push(17); // protocol
        for s in [&self.name, &self.map, &self.folder, &self.game] {
            pkt.extend_from_slice(s.as_bytes());
            pkt.push(0);
        }
        pkt.extend_from_slice(&0u16.to_le_bytes()); // app id
        pkt.push(self.players);
        pkt.push(self.max_players);
        pkt.push(self.bots);
        pkt.extend_from_slice(&[b'd', b'l', 0, 1]); // server type, environment, visibility, vac
        pkt.extend_from_slice(b"1.0.0\0");
        pkt
    }
}

struct A2sState {
    info: A2sServerInfo,
    online: bool,
    require_challenge: bool,
    requests: usize,
}

/// Mock A2S server, stopped when dropped
pub struct MockA2sServer {
    addr: SocketAddr,
    state: Arc<Mutex<A2sState>>,
    task: JoinHandle<()>,
}

impl MockA2sServer {
    pub async fn start(info: A2sServerInfo) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let state = Arc::new(Mutex::new(A2sState {
            info,
            online: true,
            require_challenge: false,
            requests: 0,
        }));

        let task = tokio::spawn(serve(socket, state.clone()));
        log::info!("🎮 [MOCK] A2S server listening on udp://{}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn info(&self) -> A2sServerInfo {
        self.state.lock().info.clone()
    }

    pub fn set_info(&self, info: A2sServerInfo) {
        self.state.lock().info = info;
    }

    pub fn set_players(&self, players: u8) {
        self.state.lock().info.players = players;
    }

    /// An offline server reads requests but never answers
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
        log::info!("🎮 [MOCK] A2S server online: {}", online);
    }

    pub fn require_challenge(&self, required: bool) {
        self.state.lock().require_challenge = required;
    }

    /// Requests received so far, answered or not
    pub fn request_count(&self) -> usize {
        self.state.lock().requests
    }
}

impl Drop for MockA2sServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: UdpSocket, state: Arc<Mutex<A2sState>>) {
    let mut buf = [0u8; 1400];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::error!("[MOCK] A2S recv failed: {}", e);
                return;
            }
        };

        let reply = reply_to(&buf[..len], &mut state.lock());
        if let Some(reply) = reply {
            if let Err(e) = socket.send_to(&reply, peer).await {
                log::warn!("[MOCK] A2S send to {} failed: {}", peer, e);
            }
        }
    }
}

fn reply_to(request: &[u8], state: &mut A2sState) -> Option<Vec<u8>> {
    state.requests += 1;
    if !state.online {
        return None;
    }

    let body = request.strip_prefix(&HEADER[..])?;
    let body = body.strip_prefix(&[A2S_INFO][..])?;
    let challenge = body.strip_prefix(INFO_PAYLOAD)?;

    if state.require_challenge && challenge != CHALLENGE {
        let mut pkt = HEADER.to_vec();
        pkt.push(S2C_CHALLENGE);
        pkt.extend_from_slice(&CHALLENGE);
        return Some(pkt);
    }

    Some(state.info.to_packet())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(challenge: Option<[u8; 4]>) -> Vec<u8> {
        let mut pkt = HEADER.to_vec();
        pkt.push(A2S_INFO);
        pkt.extend_from_slice(INFO_PAYLOAD);
        if let Some(c) = challenge {
            pkt.extend_from_slice(&c);
        }
        pkt
    }

    async fn exchange(server: &MockA2sServer, pkt: &[u8]) -> Vec<u8> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(("127.0.0.1", server.port())).await.unwrap();
        socket.send(pkt).await.unwrap();
        let mut buf = [0u8; 1400];
        let len = tokio::time::timeout(std::time::Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_info_packet_layout() {
        let pkt = A2sServerInfo::default()
            .with_name("Convoy")
            .with_players(3, 8)
            .to_packet();

        assert_eq!(&pkt[..6], &[0xFF, 0xFF, 0xFF, 0xFF, S2A_INFO, 17]);
        assert_eq!(&pkt[6..13], b"Convoy\0");
        let counts = pkt.len() - 4 - 6 - 3;
        assert_eq!(&pkt[counts..counts + 3], &[3, 8, 0]);
    }

    #[tokio::test]
    async fn test_answers_info_request() {
        let server = MockA2sServer::start(A2sServerInfo::default().with_players(5, 10))
            .await
            .unwrap();
        let reply = exchange(&server, &request(None)).await;
        assert_eq!(reply, server.info().to_packet());
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_challenge_then_info() {
        let server = MockA2sServer::start(A2sServerInfo::default()).await.unwrap();
        server.require_challenge(true);

        let first = exchange(&server, &request(None)).await;
        assert_eq!(first, [0xFF, 0xFF, 0xFF, 0xFF, S2C_CHALLENGE, 0x0A, 0x0B, 0x0C, 0x0D]);

        let second = exchange(&server, &request(Some(CHALLENGE))).await;
        assert_eq!(second[4], S2A_INFO);
    }

    #[test]
    fn test_offline_and_garbage_get_no_reply() {
        let mut state = A2sState {
            info: A2sServerInfo::default(),
            online: true,
            require_challenge: false,
            requests: 0,
        };
        assert!(reply_to(b"hello", &mut state).is_none());

        state.online = false;
        assert!(reply_to(&request(None), &mut state).is_none());
        assert_eq!(state.requests, 2);
    }
}
