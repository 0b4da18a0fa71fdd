//! Matchmaker and lobby tests - play now, access rules, host migration

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use blockfall::engine::{CommandError, GameConfig, Lobby, Services};
use blockfall::types::{RoomId, SeatNumber, Visibility};

fn lobby() -> Lobby {
    Lobby::new(Arc::new(Services::in_memory(GameConfig::default())))
}

fn seat(n: u8) -> SeatNumber {
    SeatNumber::new(n).unwrap()
}

#[tokio::test]
async fn test_play_now_fills_one_table_across_teams() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let mut seats = Vec::new();
    let mut tables = Vec::new();
    for name in ["a", "b", "c"] {
        let player = lobby.register_player(name).id;
        let (table, seat) = assert_ok!(lobby.play_now(player, room));
        tables.push(table);
        seats.push(seat.get());
    }

    assert!(tables.iter().all(|t| *t == tables[0]));
    assert_eq!(seats, vec![1, 3, 5]);
    assert_eq!(lobby.registry().tables_in_room(room).unwrap().len(), 1);

    let handle = lobby.registry().get(tables[0]).unwrap();
    assert!(handle.orchestrator().lock().table().rated);
}

#[tokio::test]
async fn test_play_now_skips_private_tables() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let host = lobby.register_player("host").id;
    let private = assert_ok!(lobby.create_table(host, room, Visibility::Private, false));

    let player = lobby.register_player("p").id;
    let (table, seat) = assert_ok!(lobby.play_now(player, room));
    assert_ne!(table, private);
    assert_eq!(seat.get(), 1);
    assert_eq!(lobby.registry().tables_in_room(room).unwrap().len(), 2);
}

#[tokio::test]
async fn test_play_now_in_unknown_room() {
    let lobby = lobby();
    let player = lobby.register_player("p").id;
    assert_eq!(
        lobby.play_now(player, RoomId(99)),
        Err(CommandError::RoomNotFound(RoomId(99)))
    );
}

#[tokio::test]
async fn test_private_table_needs_invitation() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let host = lobby.register_player("host").id;
    let guest = lobby.register_player("guest").id;
    let table = assert_ok!(lobby.create_table(host, room, Visibility::Private, false));

    assert_eq!(
        lobby.join_table(guest, table),
        Err(CommandError::AccessDenied(table))
    );
    assert_ok!(lobby.invite(host, guest));
    assert_ok!(lobby.join_table(guest, table));
    assert_ok!(lobby.sit(guest, seat(3)));
}

#[tokio::test]
async fn test_protected_table_lets_anyone_watch() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let host = lobby.register_player("host").id;
    let guest = lobby.register_player("guest").id;
    let table = assert_ok!(lobby.create_table(host, room, Visibility::Protected, false));

    assert_ok!(lobby.join_table(guest, table));
    assert_eq!(
        lobby.sit(guest, seat(2)),
        Err(CommandError::InvitationMissing(guest))
    );
    assert_ok!(lobby.sit(host, seat(2)));
    assert_eq!(lobby.sit(host, seat(2)), Ok(()));
}

#[tokio::test]
async fn test_seat_conflicts_and_moves() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let a = lobby.register_player("a").id;
    let b = lobby.register_player("b").id;
    let table = assert_ok!(lobby.create_table(a, room, Visibility::Public, false));
    assert_ok!(lobby.join_table(b, table));

    assert_ok!(lobby.sit(a, seat(4)));
    assert_eq!(lobby.sit(b, seat(4)), Err(CommandError::SeatTaken(seat(4))));
    assert_ok!(lobby.sit(a, seat(6)));
    assert_ok!(lobby.sit(b, seat(4)));

    let handle = lobby.registry().get(table).unwrap();
    let orchestrator = handle.orchestrator().lock();
    assert_eq!(orchestrator.table().seat_of(a), Some(seat(6)));
    assert_eq!(orchestrator.table().seat_of(b), Some(seat(4)));
}

#[tokio::test]
async fn test_host_migrates_to_lowest_seat() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let host = lobby.register_player("host").id;
    let high = lobby.register_player("high").id;
    let low = lobby.register_player("low").id;
    let table = assert_ok!(lobby.create_table(host, room, Visibility::Public, false));
    for (player, n) in [(high, 7), (low, 2)] {
        assert_ok!(lobby.join_table(player, table));
        assert_ok!(lobby.sit(player, seat(n)));
    }

    assert_ok!(lobby.leave_table(host));
    let handle = lobby.registry().get(table).unwrap();
    assert_eq!(handle.orchestrator().lock().table().host(), Some(low));
    assert_err!(lobby.boot(high, low));
    assert_ok!(lobby.boot(low, high));
}

#[tokio::test]
async fn test_settings_only_for_host() {
    let lobby = lobby();
    let room = lobby.create_room("main");
    let host = lobby.register_player("host").id;
    let guest = lobby.register_player("guest").id;
    let table = assert_ok!(lobby.create_table(host, room, Visibility::Public, false));
    assert_ok!(lobby.join_table(guest, table));

    assert_eq!(
        lobby.update_settings(guest, Some(Visibility::Private), None),
        Err(CommandError::NotHost(guest))
    );
    assert_ok!(lobby.update_settings(host, Some(Visibility::Private), Some(true)));
    let record = lobby.services().tables.find_table(table).unwrap();
    assert_eq!(record.visibility, Visibility::Private);
    assert!(record.rated);
}
