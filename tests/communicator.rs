use std::thread;

use coupling_net::{Communicator, Config, Error, RankSelector};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("binding an ephemeral port")
        .local_addr()
        .expect("reading back the bound address")
        .port()
}

fn acceptor_config(port: u16) -> Config {
    Config::new(port, "Fluid", "Solid", 0, 1)
}

fn requester_config(port: u16, rank: usize, size: usize) -> Config {
    Config::new(port, "Fluid", "Solid", rank, size).with_connect_attempt_limit(200)
}

#[test]
fn scalars_and_strings_round_trip_between_singleton_communicators() {
    let port = free_port();

    let acceptor = thread::spawn(move || {
        let communicator = Communicator::new(acceptor_config(port));
        communicator.accept_connection().expect("accept_connection");

        let (value, rank) = communicator.receive_int(RankSelector::Rank(0)).unwrap();
        assert_eq!((value, rank), (42, 0));

        let (value, rank) = communicator.receive_double(RankSelector::Rank(0)).unwrap();
        assert_eq!(rank, 0);
        assert!((value - 2.5).abs() < f64::EPSILON);

        let (value, _) = communicator.receive_string(RankSelector::Rank(0)).unwrap();
        assert_eq!(value, "hydrogen");

        let (value, _) = communicator.receive_string(RankSelector::Rank(0)).unwrap();
        assert_eq!(value, "");

        communicator.send_bool(true, 0).unwrap();
        communicator.close_connection().unwrap();
    });

    let requester = thread::spawn(move || {
        let communicator = Communicator::new(requester_config(port, 0, 1));
        communicator.request_connection().expect("request_connection");

        communicator.send_int(42, 0).unwrap();
        communicator.send_double(2.5, 0).unwrap();
        communicator.send_string("hydrogen", 0).unwrap();
        communicator.send_string("", 0).unwrap();

        let (flag, rank) = communicator.receive_bool(RankSelector::Rank(0)).unwrap();
        assert!(flag);
        assert_eq!(rank, 0);

        communicator.close_connection().unwrap();
    });

    acceptor.join().unwrap();
    requester.join().unwrap();
}

#[test]
fn slices_round_trip_with_out_of_band_length() {
    let port = free_port();

    let acceptor = thread::spawn(move || {
        let communicator = Communicator::new(acceptor_config(port));
        communicator.accept_connection().unwrap();

        let mut ints = [0i32; 4];
        communicator.receive_int_slice(&mut ints, RankSelector::Rank(0)).unwrap();
        assert_eq!(ints, [10, 20, 30, 40]);

        let mut doubles = [0.0f64; 3];
        communicator.receive_double_slice(&mut doubles, RankSelector::Rank(0)).unwrap();
        assert_eq!(doubles, [1.5, 2.5, 3.5]);

        communicator.close_connection().unwrap();
    });

    let requester = thread::spawn(move || {
        let communicator = Communicator::new(requester_config(port, 0, 1));
        communicator.request_connection().unwrap();
        communicator.send_int_slice(&[10, 20, 30, 40], 0).unwrap();
        communicator.send_double_slice(&[1.5, 2.5, 3.5], 0).unwrap();
        communicator.close_connection().unwrap();
    });

    acceptor.join().unwrap();
    requester.join().unwrap();
}

#[test]
fn acceptor_dispatches_any_sender_to_whichever_rank_announced_first() {
    let port = free_port();

    let acceptor = thread::spawn(move || {
        let communicator = Communicator::new(acceptor_config(port));
        communicator.accept_connection().unwrap();
        assert_eq!(communicator.remote_communicator_size().unwrap(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (value, rank) = communicator.receive_int(RankSelector::AnySender).unwrap();
            seen.push((value, rank));
        }
        seen.sort_by_key(|(_, rank)| *rank);
        assert_eq!(seen, vec![(100, 0), (101, 1), (102, 2)]);

        communicator.close_connection().unwrap();
    });

    let requesters: Vec<_> = (0..3)
        .map(|rank| {
            thread::spawn(move || {
                let communicator = Communicator::new(requester_config(port, rank, 3));
                communicator.request_connection().unwrap();
                communicator.send_int(100 + rank as i32, 0).unwrap();
                communicator.close_connection().unwrap();
            })
        })
        .collect();

    acceptor.join().unwrap();
    for requester in requesters {
        requester.join().unwrap();
    }
}

#[test]
fn requester_can_only_address_acceptor_rank_zero() {
    let port = free_port();

    let acceptor = thread::spawn(move || {
        let communicator = Communicator::new(acceptor_config(port));
        communicator.accept_connection().unwrap();
        let _ = communicator.receive_int(RankSelector::Rank(0));
        communicator.close_connection().unwrap();
    });

    let communicator = Communicator::new(requester_config(port, 0, 1));
    communicator.request_connection().unwrap();
    let err = communicator.send_int(1, 7).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
    communicator.send_int(1, 0).unwrap();
    communicator.close_connection().unwrap();

    acceptor.join().unwrap();
}

#[test]
fn operations_before_connecting_or_after_closing_are_preconditions() {
    let communicator = Communicator::new(requester_config(55000, 0, 1));
    let err = communicator.send_int(1, 0).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));

    let port = free_port();
    let acceptor = thread::spawn(move || {
        let communicator = Communicator::new(acceptor_config(port));
        communicator.accept_connection().unwrap();
        communicator.close_connection().unwrap();
    });

    let requester = Communicator::new(requester_config(port, 0, 1));
    requester.request_connection().unwrap();
    requester.close_connection().unwrap();
    let err = requester.close_connection().unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
    let err = requester.send_int(1, 0).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));

    acceptor.join().unwrap();
}

#[test]
fn request_connection_gives_up_after_the_attempt_budget() {
    let port = free_port();
    let communicator = Communicator::new(requester_config(port, 0, 1).with_connect_attempt_limit(3));
    let err = communicator.request_connection().unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
}

#[test]
fn accept_connection_rejects_a_non_singleton_local_communicator() {
    let communicator = Communicator::new(Config::new(free_port(), "Fluid", "Solid", 0, 2));
    let err = communicator.accept_connection().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}
