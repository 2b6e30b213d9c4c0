//! Shared helpers: a minimal protocol client and server fixtures.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use craftwire::config::CraftwireConfig;
use craftwire::core::buffer::WireBuffer;
use craftwire::core::codec::{FrameCodec, InboundFrame};
use craftwire::protocol::packets::{Handshake, ServerboundPacket};
use craftwire::protocol::{ConnectionState, Direction, PacketRegistry};
use craftwire::service::{
    Connection, ConnectionBus, ConnectionEvent, ConnectionHandle, ConnectionSet, MemoryPlayerStore,
    ServerContext,
};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use uuid::Uuid;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// One clientbound packet with its id already resolved
#[derive(Debug)]
pub struct Received {
    pub name: String,
    pub body: WireBuffer,
}

/// Speaks the client side of the protocol over any transport
pub struct TestClient<T> {
    pub framed: Framed<T, FrameCodec>,
    pub registry: PacketRegistry,
    pub version: i32,
    pub state: ConnectionState,
}

impl<T> TestClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: T, version: i32) -> Self {
        Self {
            framed: Framed::new(transport, FrameCodec::client()),
            registry: PacketRegistry::bundled().unwrap(),
            version,
            state: ConnectionState::Handshaking,
        }
    }

    pub fn encode(&self, packet: &ServerboundPacket) -> Bytes {
        serverbound(&self.registry, self.state, self.version, packet)
    }

    pub async fn send(&mut self, packet: ServerboundPacket) {
        let frame = self.encode(&packet);
        self.framed.send(frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, frame: Bytes) {
        self.framed.send(frame).await.unwrap();
    }

    pub async fn handshake(&mut self, next: ConnectionState) {
        let next_state = match next {
            ConnectionState::Status => 1,
            ConnectionState::Login => 2,
            other => panic!("cannot hand off to {other}"),
        };
        self.send(ServerboundPacket::Handshake(Handshake {
            protocol_version: self.version,
            server_address: "localhost".into(),
            server_port: 25565,
            next_state,
        }))
        .await;
        self.state = next;
    }

    /// Next packet, or `None` once the server closed the stream
    pub async fn recv(&mut self) -> Option<Received> {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for the server");
        match frame {
            Some(Ok(InboundFrame::Packet(bytes))) => {
                let mut body = WireBuffer::from(bytes);
                let id = body.read_varint().unwrap();
                let name = self
                    .registry
                    .resolve_name(Direction::Clientbound, self.state, self.version, id)
                    .unwrap_or_else(|e| panic!("unresolvable clientbound id {id:#x}: {e}"))
                    .to_string();
                Some(Received { name, body })
            }
            Some(Ok(InboundFrame::EndOfStream)) | None => None,
            Some(Ok(InboundFrame::LegacyPing(_))) => panic!("client saw a legacy ping"),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Client stream ended with an error");
                None
            }
        }
    }

    pub async fn expect(&mut self, name: &str) -> WireBuffer {
        let received = self
            .recv()
            .await
            .unwrap_or_else(|| panic!("stream closed while waiting for {name}"));
        assert_eq!(received.name, name, "unexpected packet");
        received.body
    }

    /// Skip packets until `name` arrives
    pub async fn expect_eventually(&mut self, name: &str) -> WireBuffer {
        loop {
            let received = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("stream closed while waiting for {name}"));
            if received.name == name {
                return received.body;
            }
        }
    }

    /// Drain until the server closes, returning the names seen
    pub async fn drain(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(received) = self.recv().await {
            names.push(received.name);
        }
        names
    }

    /// Offline login; applies SetCompression and returns the assigned UUID
    pub async fn login_offline(&mut self, username: &str) -> Uuid {
        self.handshake(ConnectionState::Login).await;
        self.send(ServerboundPacket::LoginStart {
            username: username.into(),
        })
        .await;
        self.finish_login().await
    }

    /// Read SetCompression (if any) and LoginSuccess, then switch to play
    pub async fn finish_login(&mut self) -> Uuid {
        let mut received = self.recv().await.expect("login response");
        if received.name == "SetCompression" {
            let threshold = received.body.read_varint().unwrap();
            self.framed
                .codec_mut()
                .enable_compression(threshold as usize);
            received = self.recv().await.expect("login success");
        }
        assert_eq!(received.name, "LoginSuccess");
        let uuid = received.body.read_string().unwrap();
        self.state = ConnectionState::Play;
        Uuid::parse_str(&uuid).unwrap()
    }
}

/// Serverbound frame body: id then fields
pub fn serverbound(
    registry: &PacketRegistry,
    state: ConnectionState,
    version: i32,
    packet: &ServerboundPacket,
) -> Bytes {
    let id = registry
        .resolve_id(Direction::Serverbound, state, version, packet.name())
        .unwrap();
    let mut buf = WireBuffer::new();
    packet.encode(&mut buf, version).unwrap();
    buf.prepend().write_varint(id);
    buf.into_bytes()
}

pub fn config(mutate: impl FnOnce(&mut CraftwireConfig)) -> CraftwireConfig {
    CraftwireConfig::default_with_overrides(|config| {
        config.server.address = "127.0.0.1:0".into();
        mutate(config);
    })
}

pub fn context(mutate: impl FnOnce(&mut CraftwireConfig)) -> Arc<ServerContext> {
    Arc::new(ServerContext::builder(config(mutate)).build().unwrap())
}

pub fn context_with_store(
    mutate: impl FnOnce(&mut CraftwireConfig),
) -> (Arc<ServerContext>, Arc<MemoryPlayerStore>) {
    let store = Arc::new(MemoryPlayerStore::new());
    let ctx = ServerContext::builder(config(mutate))
        .players(store.clone())
        .build()
        .unwrap();
    (Arc::new(ctx), store)
}

/// A connection over an in-memory pipe, not yet running
pub struct Fixture {
    pub connection: Connection<DuplexStream>,
    pub handle: ConnectionHandle,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub client: TestClient<DuplexStream>,
}

pub fn fixture(ctx: Arc<ServerContext>, version: i32) -> Fixture {
    let (server_side, client_side) = tokio::io::duplex(1 << 20);
    let (events_tx, events) = mpsc::unbounded_channel();
    let (connection, handle) = Connection::new(
        1,
        server_side,
        None,
        ctx,
        Arc::new(ConnectionSet::new()),
        events_tx,
    );
    Fixture {
        connection,
        handle,
        events,
        client: TestClient::new(client_side, version),
    }
}

/// Feed a serverbound packet straight into a connection
pub async fn feed(
    connection: &mut Connection<DuplexStream>,
    client: &TestClient<DuplexStream>,
    packet: ServerboundPacket,
) {
    let frame = client.encode(&packet);
    connection
        .receive(InboundFrame::Packet(frame))
        .await
        .unwrap();
}

/// A bus serving on an ephemeral localhost port
pub struct RunningBus {
    pub bus: Arc<ConnectionBus>,
    pub addr: SocketAddr,
    pub shutdown: mpsc::Sender<()>,
    pub task: JoinHandle<craftwire::Result<()>>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl RunningBus {
    pub async fn connect(&self, version: i32) -> TestClient<TcpStream> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        TestClient::new(stream, version)
    }

    /// Next event forwarded by the bus
    pub async fn event(&mut self) -> ConnectionEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a bus event")
            .expect("bus dropped its subscriber")
    }

    pub async fn stop(self) {
        self.shutdown.send(()).await.unwrap();
        self.task.await.unwrap().unwrap();
    }
}

pub async fn spawn_bus(ctx: Arc<ServerContext>) -> RunningBus {
    let (events_tx, events) = mpsc::unbounded_channel();
    let bus = Arc::new(ConnectionBus::new(ctx).with_subscriber(events_tx));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, shutdown_rx) = mpsc::channel(1);

    let serving = Arc::clone(&bus);
    let task = tokio::spawn(async move { serving.serve(listener, shutdown_rx).await });
    RunningBus {
        bus,
        addr,
        shutdown,
        task,
        events,
    }
}
