//! Connection state machine, outbound queue and disconnect semantics

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{config, context, context_with_store, feed, fixture};
use craftwire::chat::ChatComponent;
use craftwire::core::codec::{CompressionState, InboundFrame};
use craftwire::core::varint::encode_varint;
use craftwire::error::ProtocolError;
use craftwire::protocol::packets::{ClientboundPacket, Handshake, ServerboundPacket};
use craftwire::protocol::types::ChatPosition;
use craftwire::protocol::ConnectionState;
use craftwire::service::{ConnectionEvent, Identity, IdentityResolver, ServerContext};
use craftwire::utils::crypto::offline_uuid;
use craftwire::utils::timeout::DEFAULT_TIMEOUT;
use futures::future::{self, BoxFuture};
use tokio::io::AsyncWriteExt;

const VERSION: i32 = 340;

fn handshake(next_state: i32) -> ServerboundPacket {
    ServerboundPacket::Handshake(Handshake {
        protocol_version: VERSION,
        server_address: "localhost".into(),
        server_port: 25565,
        next_state,
    })
}

#[tokio::test]
async fn disconnect_twice_saves_once() {
    let (ctx, store) = context_with_store(|_| {});
    let mut f = fixture(ctx, VERSION);

    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::LoginStart {
            username: "Steve".into(),
        },
    )
    .await;
    assert_eq!(f.connection.state(), ConnectionState::Play);
    assert_eq!(f.connection.player().unwrap().uuid, offline_uuid("Steve"));

    f.connection.disconnect().await;
    f.connection.disconnect().await;

    assert!(f.connection.is_closed());
    assert_eq!(store.save_count(), 1);

    let mut disconnects = 0;
    while let Ok(event) = f.events.try_recv() {
        if let ConnectionEvent::Disconnected { player, .. } = event {
            assert_eq!(player.unwrap().username, "Steve");
            disconnects += 1;
        }
    }
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn priority_packets_jump_the_queue() {
    let mut f = fixture(context(|_| {}), VERSION);
    feed(&mut f.connection, &f.client, handshake(1)).await;
    f.client.state = ConnectionState::Status;

    f.connection
        .queue(ClientboundPacket::StatusPong { payload: 1 }, false);
    f.connection
        .queue(ClientboundPacket::StatusPong { payload: 2 }, false);
    f.connection
        .queue(ClientboundPacket::StatusPong { payload: 3 }, true);
    assert_eq!(f.connection.queued(), 3);
    f.connection.send().await.unwrap();
    assert_eq!(f.connection.queued(), 0);

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(f.client.expect("StatusPong").await.read_i64().unwrap());
    }
    assert_eq!(order, vec![3, 1, 2]);
}

#[tokio::test]
async fn queue_is_dropped_on_disconnect() {
    let mut f = fixture(context(|_| {}), VERSION);
    feed(&mut f.connection, &f.client, handshake(1)).await;
    f.client.state = ConnectionState::Status;

    f.connection
        .queue(ClientboundPacket::StatusPong { payload: 9 }, false);
    f.connection.disconnect().await;
    assert_eq!(f.connection.queued(), 0);

    // Later queue and send calls are no-ops
    f.connection
        .queue(ClientboundPacket::StatusPong { payload: 10 }, false);
    assert_eq!(f.connection.queued(), 0);
    f.connection.send().await.unwrap();
    assert!(f.client.recv().await.is_none());
}

#[tokio::test]
async fn compression_switches_on_after_the_announcement_is_sent() {
    let mut f = fixture(context(|c| c.transport.compression_threshold = 16), VERSION);
    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;

    f.connection
        .queue(ClientboundPacket::SetCompression { threshold: 16 }, false);
    assert_eq!(
        f.connection.codec().compression_state(),
        CompressionState::Disabled
    );
    f.connection.send().await.unwrap();
    assert_eq!(
        f.connection.codec().compression_state(),
        CompressionState::Enabled
    );

    // The announcement itself went out uncompressed
    let mut body = f.client.expect("SetCompression").await;
    assert_eq!(body.read_varint().unwrap(), 16);
}

#[tokio::test]
async fn login_announces_compression_before_login_success() {
    let mut f = fixture(context(|c| c.transport.compression_threshold = 0), VERSION);
    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::LoginStart {
            username: "Alex".into(),
        },
    )
    .await;

    // finish_login enables client compression only after SetCompression;
    // LoginSuccess is then readable only if it was compressed
    let uuid = f.client.finish_login().await;
    assert_eq!(uuid, offline_uuid("Alex"));
    f.client.expect("JoinGame").await;
    assert_eq!(
        f.connection.codec().compression_state(),
        CompressionState::Enabled
    );
}

#[tokio::test]
async fn kick_preempts_backlog() {
    let mut f = fixture(context(|_| {}), VERSION);
    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::LoginStart {
            username: "Steve".into(),
        },
    )
    .await;
    f.client.finish_login().await;

    for i in 0..3 {
        f.connection.queue(
            ClientboundPacket::ChatMessage {
                message: ChatComponent::text(format!("backlog {i}")),
                position: ChatPosition::Chat,
            },
            false,
        );
    }
    f.connection.kick(ChatComponent::text("Bye")).await;
    assert!(f.connection.is_closed());

    let names = f.client.drain().await;
    assert_eq!(names.last().map(String::as_str), Some("Disconnect"));
    assert!(!names.iter().any(|name| name == "ChatMessage"));
}

#[tokio::test]
async fn unknown_packets_are_skipped() {
    let ctx = context(|_| {});
    let mut f = fixture(ctx.clone(), VERSION);
    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::LoginStart {
            username: "Steve".into(),
        },
    )
    .await;
    f.client.state = ConnectionState::Play;

    let unknown = Bytes::from(encode_varint(0x7F));
    let result = f.connection.receive(InboundFrame::Packet(unknown)).await;
    assert!(matches!(
        result,
        Err(craftwire::ProtocolError::UnknownPacket { id: 0x7F, .. })
    ));
    assert!(!result.unwrap_err().is_fatal_for_connection());

    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::ChatMessage {
            message: "hello".into(),
        },
    )
    .await;
    assert!(!f.connection.is_closed());

    let mut saw_chat = false;
    while let Ok(event) = f.events.try_recv() {
        if let ConnectionEvent::Packet {
            packet: ServerboundPacket::ChatMessage { message },
            ..
        } = event
        {
            assert_eq!(message, "hello");
            saw_chat = true;
        }
    }
    assert!(saw_chat);
}

#[tokio::test]
async fn client_settings_update_locale_and_position_updates_player() {
    let mut f = fixture(context(|_| {}), VERSION);
    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::LoginStart {
            username: "Steve".into(),
        },
    )
    .await;
    f.client.state = ConnectionState::Play;

    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::ClientSettings(craftwire::protocol::packets::ClientSettings {
            locale: "de_DE".into(),
            view_distance: 4,
            chat_mode: 0,
            chat_colors: true,
            skin_parts: 0x7F,
            main_hand: Some(1),
        }),
    )
    .await;
    assert_eq!(f.connection.locale(), "de_de");
    assert_eq!(f.connection.info().snapshot().locale, "de_de");

    feed(
        &mut f.connection,
        &f.client,
        ServerboundPacket::PlayerPosition {
            x: 10.5,
            y: 70.0,
            z: -3.25,
            on_ground: true,
        },
    )
    .await;
    let position = f.connection.player().unwrap().position;
    assert_eq!((position.x, position.y, position.z), (10.5, 70.0, -3.25));
    assert!(position.on_ground);
}

#[tokio::test]
async fn status_ping_closes_after_pong() {
    let mut f = fixture(context(|_| {}), VERSION);
    let task = tokio::spawn(f.connection.run());

    f.client.handshake(ConnectionState::Status).await;
    f.client
        .send(ServerboundPacket::StatusPing { payload: 42 })
        .await;
    assert_eq!(
        f.client.expect("StatusPong").await.read_i64().unwrap(),
        42
    );
    assert!(f.client.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn malformed_frame_disconnects() {
    let f = fixture(context(|_| {}), VERSION);
    let mut events = f.events;
    let task = tokio::spawn(f.connection.run());

    let mut raw = f.client.framed.into_inner();
    // Length prefix of -1
    raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ConnectionEvent::Disconnected { player: None, .. }));
    task.await.unwrap();
}

#[tokio::test]
async fn zero_length_frame_ends_the_connection() {
    let f = fixture(context(|_| {}), VERSION);
    let mut events = f.events;
    let task = tokio::spawn(f.connection.run());

    let mut raw = f.client.framed.into_inner();
    raw.write_all(&[0x00]).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ConnectionEvent::Disconnected { .. }));
    task.await.unwrap();
}

#[tokio::test]
async fn unacknowledged_keepalive_times_out() {
    let ctx = context(|_| {});
    let mut f = fixture(ctx.clone(), VERSION);
    let handle = f.handle.clone();
    let task = tokio::spawn(f.connection.run());

    f.client.login_offline("Steve").await;
    f.client.expect_eventually("PlayerListItem").await;

    let timeout = Duration::from_millis(100);
    handle.keep_alive(timeout).unwrap();
    f.client.expect("KeepAlive").await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.keep_alive(timeout).unwrap();

    let mut reason = f.client.expect("Disconnect").await;
    let reason: ChatComponent = reason.read_json().unwrap();
    assert_eq!(reason.translation_key(), Some("disconnect.timeout"));
    assert!(f.client.recv().await.is_none());

    task.await.unwrap();
    assert_eq!(ctx.metrics().snapshot().keepalive_timeouts, 1);
    assert!(handle.keep_alive(timeout).is_err());
}

#[tokio::test]
async fn acknowledged_keepalive_allows_the_next_one() {
    let mut f = fixture(context(|_| {}), VERSION);
    let handle = f.handle.clone();
    let info = f.handle.info().clone();
    tokio::spawn(f.connection.run());

    f.client.login_offline("Steve").await;
    f.client.expect_eventually("PlayerListItem").await;

    let timeout = Duration::from_secs(20);
    handle.keep_alive(timeout).unwrap();
    let id = f.client.expect("KeepAlive").await.read_i64().unwrap();
    f.client.send(ServerboundPacket::KeepAlive { id }).await;

    // Acknowledged, so the next tick sends a fresh keep-alive
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.keep_alive(timeout).unwrap();
    f.client.expect("KeepAlive").await;

    assert!(info.player().unwrap().latency_ms >= 0);
    assert!(info.is_playing());
}

struct StalledIdentity;

impl IdentityResolver for StalledIdentity {
    fn resolve<'a>(&'a self, _username: &'a str, _server_hash: Option<&'a str>) -> BoxFuture<'a, craftwire::Result<Identity>> {
        Box::pin(future::pending())
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_identity_lookup_times_out() {
    let ctx = ServerContext::builder(config(|_| {}))
        .identity(Arc::new(StalledIdentity))
        .build()
        .unwrap();
    let mut f = fixture(Arc::new(ctx), VERSION);

    feed(&mut f.connection, &f.client, handshake(2)).await;
    f.client.state = ConnectionState::Login;
    let frame = f.client.encode(&ServerboundPacket::LoginStart {
        username: "Steve".into(),
    });

    let started = tokio::time::Instant::now();
    let err = f
        .connection
        .receive(InboundFrame::Packet(frame))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
    assert!(err.is_fatal_for_connection());
    assert!(started.elapsed() >= DEFAULT_TIMEOUT);
    assert_eq!(f.connection.state(), ConnectionState::Login);
}
