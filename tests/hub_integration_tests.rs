//! Hub-level end-to-end scenarios driven directly through
//! `handle_client_message`, bypassing the WebSocket transport the way
//! the unit-level room/sync tests bypass the Hub.

use std::time::Duration;

use match3_battle_hub::config::HubConfig;
use match3_battle_hub::hub::{handle_client_message, HubState};
use match3_battle_hub::protocol::{
    ClientMessage, ErrorCode, MatchMode, MoveToken, PlayerRole, Position, ServerMessage,
    StateSnapshot,
};
use tokio::time::timeout;
use uuid::Uuid;

fn fast_config() -> HubConfig {
    let mut cfg = HubConfig::default();
    cfg.matchmake_interval_ms = 10;
    cfg.room_sweep_interval_ms = 50;
    cfg
}

async fn next_message(hub: &std::sync::Arc<HubState>, peer_id: Uuid) -> ServerMessage {
    let peer = hub.peers.get(peer_id).expect("peer registered");
    let frame = timeout(Duration::from_secs(1), async {
        loop {
            let mut drained = peer.queue.drain().await;
            if let Some(frame) = drained.pop() {
                return frame;
            }
        }
    })
    .await
    .expect("expected a queued frame within 1s");
    frame.message
}

fn move_token(peer_id: Uuid, move_number: u64) -> MoveToken {
    MoveToken {
        pos_a: Position { row: 0, col: 0 },
        pos_b: Position { row: 0, col: 1 },
        move_number,
        origin_peer_id: peer_id,
        server_timestamp: 0,
    }
}

#[tokio::test]
async fn create_and_join_room_starts_the_game_for_both_players() {
    let hub = HubState::new(fast_config());
    let host = Uuid::new_v4();
    let guest = Uuid::new_v4();
    hub.register_peer(host).await;
    hub.register_peer(guest).await;

    let reply = handle_client_message(
        &hub,
        host,
        ClientMessage::CreateRoom { peer_id: host },
        0,
    )
    .await;
    let room_id = match reply {
        Some(ServerMessage::RoomCreated { room_id }) => room_id,
        other => panic!("expected RoomCreated, got {other:?}"),
    };

    let reply = handle_client_message(
        &hub,
        guest,
        ClientMessage::JoinRoom {
            room_id,
            peer_id: guest,
        },
        0,
    )
    .await;
    match reply {
        Some(ServerMessage::RoomJoined {
            room_id: joined_room,
            opponent_id,
            peer_count,
        }) => {
            assert_eq!(joined_room, room_id);
            assert_eq!(opponent_id, Some(host), "§8 scenario 1: B's opponentId must be A");
            assert_eq!(peer_count, 2);
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }

    for peer_id in [host, guest] {
        match next_message(&hub, peer_id).await {
            ServerMessage::GameStart {
                room_id: started_room,
                players,
                starting_player,
            } => {
                assert_eq!(started_room, room_id);
                assert_eq!(players, vec![host, guest]);
                assert_eq!(starting_player, host);
            }
            other => panic!("expected GameStart, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn move_out_of_turn_is_rejected_with_not_your_turn() {
    let hub = HubState::new(fast_config());
    let host = Uuid::new_v4();
    let guest = Uuid::new_v4();
    hub.register_peer(host).await;
    hub.register_peer(guest).await;

    let room_id = hub.create_room(host).await.unwrap();
    hub.join_room(room_id, guest).await.unwrap();
    // Drain the GameStart frames both players received on join.
    let _ = next_message(&hub, host).await;
    let _ = next_message(&hub, guest).await;

    // Guest moves first, but Host is seated as the starting player.
    let reply = handle_client_message(
        &hub,
        guest,
        ClientMessage::Move {
            room_id,
            mv: move_token(guest, 1),
        },
        0,
    )
    .await;

    match reply {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, ErrorCode::NotYourTurn),
        other => panic!("expected an ERROR reply, got {other:?}"),
    }
}

#[tokio::test]
async fn move_in_turn_is_broadcast_to_the_opponent() {
    let hub = HubState::new(fast_config());
    let host = Uuid::new_v4();
    let guest = Uuid::new_v4();
    hub.register_peer(host).await;
    hub.register_peer(guest).await;

    let room_id = hub.create_room(host).await.unwrap();
    hub.join_room(room_id, guest).await.unwrap();
    let _ = next_message(&hub, host).await;
    let _ = next_message(&hub, guest).await;

    let reply = handle_client_message(
        &hub,
        host,
        ClientMessage::Move {
            room_id,
            mv: move_token(host, 1),
        },
        0,
    )
    .await;
    assert!(reply.is_none(), "the mover gets no direct reply, only fanout");

    match next_message(&hub, guest).await {
        ServerMessage::Move { room_id: r, mv } => {
            assert_eq!(r, room_id);
            assert_eq!(mv.move_number, 1);
            assert_eq!(mv.origin_peer_id, host);
        }
        other => panic!("expected Move fanout, got {other:?}"),
    }

    assert_eq!(hub.rooms.get(room_id).unwrap().role_of(host).await, PlayerRole::Host);
}

#[tokio::test]
async fn matchmaker_pairs_two_random_seekers_into_a_fresh_room() {
    let hub = HubState::new(fast_config());
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    hub.register_peer(first).await;
    hub.register_peer(second).await;
    hub.spawn_background_tasks();

    handle_client_message(
        &hub,
        first,
        ClientMessage::FindMatch {
            peer_id: first,
            mode: MatchMode::Random,
        },
        0,
    )
    .await;
    handle_client_message(
        &hub,
        second,
        ClientMessage::FindMatch {
            peer_id: second,
            mode: MatchMode::Random,
        },
        0,
    )
    .await;

    let first_room = match next_message(&hub, first).await {
        ServerMessage::GameStart { room_id, players, .. } => {
            assert!(players.contains(&first) && players.contains(&second));
            room_id
        }
        other => panic!("expected GameStart, got {other:?}"),
    };
    match next_message(&hub, second).await {
        ServerMessage::GameStart { room_id, .. } => assert_eq!(room_id, first_room),
        other => panic!("expected GameStart, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_state_sync_is_rejected_without_disturbing_the_accepted_snapshot() {
    let hub = HubState::new(fast_config());
    let host = Uuid::new_v4();
    let guest = Uuid::new_v4();
    hub.register_peer(host).await;
    hub.register_peer(guest).await;

    let room_id = hub.create_room(host).await.unwrap();
    hub.join_room(room_id, guest).await.unwrap();
    let _ = next_message(&hub, host).await;
    let _ = next_message(&hub, guest).await;

    let fresh = StateSnapshot {
        version: 1,
        ..StateSnapshot::empty(3, 3)
    };
    let reply = handle_client_message(
        &hub,
        host,
        ClientMessage::StateSync {
            room_id,
            state: Some(fresh),
            delta: None,
        },
        0,
    )
    .await;
    assert!(reply.is_none());
    match next_message(&hub, guest).await {
        ServerMessage::StateSync { state: Some(s), .. } => assert_eq!(s.version, 1),
        other => panic!("expected StateSync fanout, got {other:?}"),
    }

    let stale = StateSnapshot {
        version: 1,
        ..StateSnapshot::empty(3, 3)
    };
    let reply = handle_client_message(
        &hub,
        guest,
        ClientMessage::StateSync {
            room_id,
            state: Some(stale),
            delta: None,
        },
        0,
    )
    .await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, ErrorCode::StaleSnapshot),
        other => panic!("expected an ERROR reply, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_after_disconnect_restores_the_room_seat() {
    let hub = HubState::new(fast_config());
    let host = Uuid::new_v4();
    let guest = Uuid::new_v4();
    hub.register_peer(host).await;
    hub.register_peer(guest).await;

    let room_id = hub.create_room(host).await.unwrap();
    hub.join_room(room_id, guest).await.unwrap();
    let _ = next_message(&hub, host).await;
    let _ = next_message(&hub, guest).await;

    // Host drops; the room keeps their seat open for the recovery window.
    hub.disconnect_peer(host).await;
    match next_message(&hub, guest).await {
        ServerMessage::PlayerDisconnected { peer_id, .. } => assert_eq!(peer_id, host),
        other => panic!("expected PlayerDisconnected, got {other:?}"),
    }

    // Host reconnects as a brand new peer registration (new socket, same identity).
    hub.register_peer(host).await;
    let reply = handle_client_message(
        &hub,
        host,
        ClientMessage::Reconnect {
            peer_id: host,
            room_id,
            reconnection_token: String::new(),
        },
        0,
    )
    .await;
    assert!(reply.is_none());

    match next_message(&hub, host).await {
        ServerMessage::Reconnected { room_id: r, peer_id, .. } => {
            assert_eq!(r, room_id);
            assert_eq!(peer_id, host);
        }
        other => panic!("expected Reconnected, got {other:?}"),
    }
    assert_eq!(hub.rooms.get(room_id).unwrap().role_of(host).await, PlayerRole::Host);
}
