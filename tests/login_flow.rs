//! Login over TCP: offline and online mode, compression, and refusals

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{context, spawn_bus, RunningBus, TestClient};
use craftwire::chat::ChatComponent;
use craftwire::protocol::packets::ServerboundPacket;
use craftwire::protocol::ConnectionState;
use craftwire::service::ConnectionEvent;
use craftwire::utils::crypto::offline_uuid;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use tokio::net::TcpStream;

async fn joined(bus: &mut RunningBus) -> String {
    loop {
        if let ConnectionEvent::Joined { player, .. } = bus.event().await {
            return player.username;
        }
    }
}

async fn login_kick_reason(client: &mut TestClient<TcpStream>) -> ChatComponent {
    client.expect("LoginDisconnect").await.read_json().unwrap()
}

#[tokio::test]
async fn offline_login_with_compression() {
    let mut bus = spawn_bus(context(|_| {})).await;
    let mut client = bus.connect(340).await;

    client.handshake(ConnectionState::Login).await;
    client
        .send(ServerboundPacket::LoginStart {
            username: "Steve".into(),
        })
        .await;

    let mut set_compression = client.expect("SetCompression").await;
    assert_eq!(set_compression.read_varint().unwrap(), 256);
    client.framed.codec_mut().enable_compression(256);

    let mut success = client.expect("LoginSuccess").await;
    let uuid = success.read_string().unwrap();
    assert_eq!(uuid, offline_uuid("Steve").hyphenated().to_string());
    assert_eq!(success.read_string().unwrap(), "Steve");
    client.state = ConnectionState::Play;

    let mut join = client.expect("JoinGame").await;
    assert!(join.read_i32().unwrap() > 0);
    client.expect("SpawnPosition").await;
    client.expect("PlayerPositionAndLook").await;
    client.expect("PlayerListItem").await;

    assert_eq!(joined(&mut bus).await, "Steve");
    assert_eq!(bus.bus.connections().online_count(), 1);
    assert_eq!(bus.bus.context().metrics().snapshot().logins, 1);

    bus.stop().await;
}

#[tokio::test]
async fn negative_threshold_skips_set_compression() {
    let bus = spawn_bus(context(|c| c.transport.compression_threshold = -1)).await;
    let mut client = bus.connect(47).await;

    client.handshake(ConnectionState::Login).await;
    client
        .send(ServerboundPacket::LoginStart {
            username: "Alex".into(),
        })
        .await;

    let first = client.recv().await.unwrap();
    assert_eq!(first.name, "LoginSuccess");

    bus.stop().await;
}

#[tokio::test]
async fn second_player_sees_the_first_join() {
    let mut bus = spawn_bus(context(|_| {})).await;

    let mut first = bus.connect(340).await;
    first.login_offline("First").await;
    assert_eq!(joined(&mut bus).await, "First");

    let mut second = bus.connect(340).await;
    second.login_offline("Second").await;
    assert_eq!(joined(&mut bus).await, "Second");

    // The first client hears about the second through the player list and chat
    let mut saw_chat = false;
    loop {
        let received = first.recv().await.unwrap();
        if received.name == "ChatMessage" {
            let mut body = received.body;
            let message: ChatComponent = body.read_json().unwrap();
            assert_eq!(
                message.translation_key(),
                Some("multiplayer.player.joined")
            );
            saw_chat = true;
            break;
        }
    }
    assert!(saw_chat);

    bus.stop().await;
}

#[tokio::test]
async fn outdated_client_is_refused_in_its_locale() {
    let bus = spawn_bus(context(|_| {})).await;
    let mut client = bus.connect(5).await;

    client.handshake(ConnectionState::Login).await;
    client
        .send(ServerboundPacket::LoginStart {
            username: "Old".into(),
        })
        .await;

    // Too old to know the key, so it arrives pre-rendered
    let reason = login_kick_reason(&mut client).await;
    assert_eq!(reason.translation_key(), None);
    assert_eq!(reason.to_plain_text(), "Outdated client! Please use 1.8-1.12.2");
    assert!(client.recv().await.is_none());

    bus.stop().await;
}

#[tokio::test]
async fn newer_client_is_told_the_server_is_outdated() {
    let bus = spawn_bus(context(|_| {})).await;
    let mut client = bus.connect(404).await;

    client.handshake(ConnectionState::Login).await;
    client
        .send(ServerboundPacket::LoginStart {
            username: "New".into(),
        })
        .await;

    let reason = login_kick_reason(&mut client).await;
    assert_eq!(
        reason.translation_key(),
        Some("multiplayer.disconnect.outdated_server")
    );

    bus.stop().await;
}

#[tokio::test]
async fn full_server_refuses_login() {
    let mut bus = spawn_bus(context(|c| c.server.max_players = 1)).await;

    let mut first = bus.connect(340).await;
    first.login_offline("First").await;
    joined(&mut bus).await;

    // 1.8 predates the server_full key
    let mut second = bus.connect(47).await;
    second.handshake(ConnectionState::Login).await;
    second
        .send(ServerboundPacket::LoginStart {
            username: "Second".into(),
        })
        .await;
    assert_eq!(
        login_kick_reason(&mut second).await.to_plain_text(),
        "The server is full!"
    );

    let mut third = bus.connect(340).await;
    third.handshake(ConnectionState::Login).await;
    third
        .send(ServerboundPacket::LoginStart {
            username: "Third".into(),
        })
        .await;
    assert_eq!(
        login_kick_reason(&mut third).await.translation_key(),
        Some("multiplayer.disconnect.server_full")
    );

    bus.stop().await;
}

#[tokio::test]
async fn pending_logins_hold_player_slots() {
    let mut bus = spawn_bus(context(|c| {
        c.server.online_mode = true;
        c.server.max_players = 1;
    }))
    .await;

    // Nobody is playing yet, but the first login already holds the only slot
    let mut first = bus.connect(340).await;
    begin_online_login(&mut first, "First").await;
    assert_eq!(bus.bus.connections().online_count(), 0);

    let mut second = bus.connect(340).await;
    second.handshake(ConnectionState::Login).await;
    second
        .send(ServerboundPacket::LoginStart {
            username: "Second".into(),
        })
        .await;
    assert_eq!(
        login_kick_reason(&mut second).await.translation_key(),
        Some("multiplayer.disconnect.server_full")
    );

    // Abandoning the login frees the slot
    drop(first);
    let mut freed = 0;
    while freed < 2 {
        if let ConnectionEvent::Disconnected { .. } = bus.event().await {
            freed += 1;
        }
    }
    let mut third = bus.connect(340).await;
    begin_online_login(&mut third, "Third").await;

    bus.stop().await;
}

struct EncryptionRequest {
    public_key: RsaPublicKey,
    verify_token: Vec<u8>,
}

async fn begin_online_login(client: &mut TestClient<TcpStream>, username: &str) -> EncryptionRequest {
    client.handshake(ConnectionState::Login).await;
    client
        .send(ServerboundPacket::LoginStart {
            username: username.into(),
        })
        .await;

    let mut body = client.expect("EncryptionRequest").await;
    assert_eq!(body.read_string().unwrap(), "");
    let der = body.read_byte_array().unwrap();
    let verify_token = body.read_byte_array().unwrap().to_vec();
    assert_eq!(verify_token.len(), 4);
    EncryptionRequest {
        public_key: RsaPublicKey::from_public_key_der(&der).unwrap(),
        verify_token,
    }
}

fn encrypt(key: &RsaPublicKey, data: &[u8]) -> bytes::Bytes {
    key.encrypt(&mut rand_core::OsRng, Pkcs1v15Encrypt, data)
        .unwrap()
        .into()
}

#[tokio::test]
async fn online_login_switches_to_encryption() {
    let mut bus = spawn_bus(context(|c| c.server.online_mode = true)).await;
    let mut client = bus.connect(340).await;

    let request = begin_online_login(&mut client, "Secure").await;
    let secret = [7u8; 16];
    client
        .send(ServerboundPacket::EncryptionResponse {
            shared_secret: encrypt(&request.public_key, &secret),
            verify_token: encrypt(&request.public_key, &request.verify_token),
        })
        .await;
    client.framed.codec_mut().enable_encryption(&secret).unwrap();

    let uuid = client.finish_login().await;
    assert_eq!(uuid, offline_uuid("Secure"));
    client.expect("JoinGame").await;
    assert_eq!(joined(&mut bus).await, "Secure");

    bus.stop().await;
}

#[tokio::test]
async fn wrong_verify_token_is_refused() {
    let bus = spawn_bus(context(|c| c.server.online_mode = true)).await;
    let mut client = bus.connect(340).await;

    let request = begin_online_login(&mut client, "Mallory").await;
    let wrong: Vec<u8> = request.verify_token.iter().map(|b| b ^ 0xFF).collect();
    client
        .send(ServerboundPacket::EncryptionResponse {
            shared_secret: encrypt(&request.public_key, &[1u8; 16]),
            verify_token: encrypt(&request.public_key, &wrong),
        })
        .await;

    assert_eq!(
        login_kick_reason(&mut client).await.translation_key(),
        Some("multiplayer.disconnect.unverified_username")
    );
    assert!(client.recv().await.is_none());
    assert_eq!(bus.bus.context().metrics().snapshot().logins, 0);

    bus.stop().await;
}
