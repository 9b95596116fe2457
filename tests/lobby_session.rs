//! End-to-end lobby scenarios: a real `SessionTransport` talking to a
//! scripted server over the in-memory loop network.

mod common;

use common::{Addr, LoopNetwork, LoopSocket, CLIENT_ADDR, GAME_ADDR, SERVER_ADDR};

use citadel_lobby::network::messages::{
    self, ClientInfo, GameInfo, Header, LobbyMessageKind,
};
use citadel_lobby::{
    ConnectionState, LobbyCondition, NonBlockingSocket, SessionTransport, SharingState,
    DEFAULT_NETWORK_TIMEOUT,
};

/// A hand-driven lobby server: tests decide per datagram how to answer.
struct ScriptedServer {
    socket: LoopSocket,
}

impl ScriptedServer {
    fn new(network: &LoopNetwork) -> Self {
        Self {
            socket: network.open(SERVER_ADDR),
        }
    }

    fn poll(&mut self) -> Vec<(Addr, Header, Vec<u8>)> {
        self.socket
            .receive_all()
            .into_iter()
            .map(|(from, datagram)| {
                let (header, payload) = Header::parse(&datagram).expect("client sent malformed");
                (from, header, payload.to_vec())
            })
            .collect()
    }

    fn reply(&mut self, to: Addr, header: Header) {
        self.socket.send_to(&header.encode(), &to);
    }

    fn reply_with_payload(&mut self, to: Addr, header: Header, payload: &[u8]) {
        let mut buf = header.encode().to_vec();
        buf.extend_from_slice(payload);
        self.socket.send_to(&buf, &to);
    }
}

fn client(network: &LoopNetwork) -> SessionTransport<Addr, LoopSocket> {
    SessionTransport::new(network.open(CLIENT_ADDR), SERVER_ADDR)
}

/// Steps the client while the server answers every request the obvious way.
fn run_cooperative(
    client: &mut SessionTransport<Addr, LoopSocket>,
    server: &mut ScriptedServer,
    ticks: u32,
) {
    for _ in 0..ticks {
        client.step();
        for (from, header, _payload) in server.poll() {
            match header.kind {
                LobbyMessageKind::Connecting
                | LobbyMessageKind::Deconnecting
                | LobbyMessageKind::SharingGame
                | LobbyMessageKind::StopSharingGame
                | LobbyMessageKind::ConnectionPresence
                | LobbyMessageKind::GameSocket => {
                    server.reply(from, Header::new(header.kind));
                }
                LobbyMessageKind::SendMessage => {
                    server.reply(from, Header::with_id(LobbyMessageKind::SendMessage, header.id));
                }
                // List acks and chat acks from the client need no answer.
                _ => {}
            }
        }
    }
}

#[test]
fn connect_share_and_disconnect_round_trip() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.share_game("river crossing");
    run_cooperative(&mut client, &mut server, 5);
    assert_eq!(client.sharing_state(), SharingState::Shared);

    client.deconnect();
    run_cooperative(&mut client, &mut server, 10);
    assert_eq!(client.connection_state(), ConnectionState::NotConnecting);
    assert_eq!(client.sharing_state(), SharingState::NotSharing);
    assert_eq!(client.conditions().count(), 0);
}

#[test]
fn connect_recovers_within_the_retry_budget() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    let mut ignored = 0;
    for _ in 0..(3 * DEFAULT_NETWORK_TIMEOUT) {
        client.step();
        for (from, header, _) in server.poll() {
            assert_eq!(header.kind, LobbyMessageKind::Connecting);
            // Lose the first two requests, answer the third.
            if ignored < 2 {
                ignored += 1;
            } else {
                server.reply(from, Header::new(LobbyMessageKind::Connecting));
            }
        }
        if client.connection_state() == ConnectionState::Connected {
            break;
        }
    }
    assert_eq!(ignored, 2);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.conditions().count(), 0);
}

#[test]
fn server_lists_are_mirrored_and_acknowledged() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);

    let games = vec![
        GameInfo {
            host_ip: std::net::Ipv4Addr::new(192, 168, 0, 7),
            host_port: 4040,
            uid: 11,
            username: "bob".to_owned(),
            name: "hills".to_owned(),
        },
        GameInfo {
            host_ip: std::net::Ipv4Addr::new(192, 168, 0, 9),
            host_port: 4041,
            uid: 12,
            username: "carol".to_owned(),
            name: "delta".to_owned(),
        },
    ];
    server.reply_with_payload(
        CLIENT_ADDR,
        Header::new(LobbyMessageKind::GamesList),
        &messages::encode_games_list(&games),
    );
    server.reply_with_payload(
        CLIENT_ADDR,
        Header::new(LobbyMessageKind::ClientsList),
        &messages::encode_clients_list(&[ClientInfo {
            uid: 5,
            username: "bob".to_owned(),
        }]),
    );
    client.step();

    assert_eq!(client.games(), &games[..]);
    assert_eq!(client.clients().len(), 1);
    assert!(client.new_game_list(true));
    assert!(client.new_client_list(true));

    // The client acknowledged both batches with their counts.
    let acks = server.poll();
    let ack_kinds: Vec<(LobbyMessageKind, u8)> =
        acks.iter().map(|(_, h, _)| (h.kind, h.id)).collect();
    assert!(ack_kinds.contains(&(LobbyMessageKind::GamesList, 2)));
    assert!(ack_kinds.contains(&(LobbyMessageKind::ClientsList, 1)));

    // A retried batch changes nothing and raises no new flag after reset.
    server.reply_with_payload(
        CLIENT_ADDR,
        Header::new(LobbyMessageKind::GamesList),
        &messages::encode_games_list(&games),
    );
    client.step();
    assert_eq!(client.games().len(), 2);

    // Removal by uid; absent uids are no-ops.
    server.reply_with_payload(
        CLIENT_ADDR,
        Header::new(LobbyMessageKind::UnsharedList),
        &messages::encode_uid_list(&[11, 999]),
    );
    client.step();
    let uids: Vec<u32> = client.games().iter().map(|g| g.uid).collect();
    assert_eq!(uids, vec![12]);
}

#[test]
fn three_chat_messages_arrive_in_order_despite_loss() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);

    client.send_message("one");
    client.send_message("two");
    client.send_message("three");

    let mut delivered: Vec<(u8, String)> = Vec::new();
    let mut lost_first_send_of: Option<u8> = None;
    for _ in 0..(10 * DEFAULT_NETWORK_TIMEOUT) {
        client.step();
        for (from, header, payload) in server.poll() {
            if header.kind != LobbyMessageKind::SendMessage {
                continue;
            }
            // Lose the first copy of message 2, ack everything else.
            if header.id == 2 && lost_first_send_of.is_none() {
                lost_first_send_of = Some(header.id);
                continue;
            }
            let text = payload
                .split(|&b| b == 0)
                .next()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .unwrap_or_default();
            if delivered.last().map(|(id, _)| *id) != Some(header.id) {
                delivered.push((header.id, text));
            }
            server.reply(from, Header::with_id(LobbyMessageKind::SendMessage, header.id));
        }
        if delivered.len() == 3 {
            break;
        }
    }

    assert_eq!(lost_first_send_of, Some(2));
    let texts: Vec<&str> = delivered.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
    assert_eq!(client.conditions().count(), 0);
}

#[test]
fn game_socket_handoff_arrives_from_the_game_address() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);
    client.share_game("hosted");
    run_cooperative(&mut client, &mut server, 5);
    assert_eq!(client.sharing_state(), SharingState::Shared);

    client.set_game_socket(network.open(GAME_ADDR));
    client.step();

    let inbound = server.poll();
    let handoff: Vec<&(Addr, Header, Vec<u8>)> = inbound
        .iter()
        .filter(|(_, h, _)| h.kind == LobbyMessageKind::GameSocket)
        .collect();
    assert_eq!(handoff.len(), 1);
    // The announcement's source address is the game socket, which is the
    // whole point of the handoff.
    assert_eq!(handoff[0].0, GAME_ADDR);
    assert!(!client.game_socket_delivered());

    server.reply(CLIENT_ADDR, Header::new(LobbyMessageKind::GameSocket));
    client.step();
    assert!(client.game_socket_delivered());
}

#[test]
fn close_lobby_is_surfaced_and_resets_the_session() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);

    server.reply(CLIENT_ADDR, Header::new(LobbyMessageKind::CloseLobby));
    client.step();

    assert_eq!(client.connection_state(), ConnectionState::NotConnecting);
    assert_eq!(
        client.conditions().collect::<Vec<_>>(),
        vec![LobbyCondition::LobbyClosed]
    );
}

#[test]
fn broadcast_chat_is_surfaced_once_and_acked_every_time() {
    let network = LoopNetwork::new();
    let mut server = ScriptedServer::new(&network);
    let mut client = client(&network);

    client.enable_connection("alice");
    run_cooperative(&mut client, &mut server, 10);

    let payload = messages::encode_chat("hello", "bob");
    for _ in 0..3 {
        server.reply_with_payload(
            CLIENT_ADDR,
            Header::with_id(LobbyMessageKind::Broadcast, 40),
            &payload,
        );
        client.step();
    }

    assert!(client.has_messages());
    let taken = client.take_messages();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].username, "bob");
    assert_eq!(taken[0].text, "hello");

    let acks = server
        .poll()
        .into_iter()
        .filter(|(_, h, _)| h.kind == LobbyMessageKind::Broadcast && h.id == 40)
        .count();
    assert_eq!(acks, 3);
}
