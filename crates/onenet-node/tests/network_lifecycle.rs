//! End-to-end exercises of the MASTER and CLIENT roles with frames
//! carried directly between the two state machines.

use rand::SeedableRng;

use onenet_core::features::Features;
use onenet_core::types::{Did, NetworkId, Priority};
use onenet_node::{
    Client, ClientEvent, ClientOutput, InviteCode, Master, MasterEvent, MasterOutput, NodeError,
    Nvram, Storage,
};

fn rng() -> rand::rngs::StdRng {
    rand::rngs::StdRng::seed_from_u64(1)
}

fn nid() -> NetworkId {
    NetworkId::new(0x2A13F7890).unwrap()
}

fn collect_master(
    out: Vec<MasterOutput>,
    frames: &mut Vec<Vec<u8>>,
    events: &mut Vec<MasterEvent>,
) {
    for item in out {
        match item {
            MasterOutput::Transmit(frame) => frames.push(frame),
            MasterOutput::Event(event) => events.push(event),
        }
    }
}

fn collect_client(
    out: Vec<ClientOutput>,
    frames: &mut Vec<Vec<u8>>,
    events: &mut Vec<ClientEvent>,
) {
    for item in out {
        match item {
            ClientOutput::Transmit(frame) => frames.push(frame),
            ClientOutput::Event(event) => events.push(event),
            // The harness has one shared medium; retunes are moot.
            ClientOutput::SetChannel(_) => {}
        }
    }
}

/// Exchange frames between the two nodes at a fixed tick until the
/// medium goes quiet, returning everything each side reported.
fn pump(master: &mut Master, client: &mut Client, now: u64) -> (Vec<MasterEvent>, Vec<ClientEvent>) {
    let mut m_events = Vec::new();
    let mut c_events = Vec::new();

    for _ in 0..32 {
        let mut m_frames = Vec::new();
        let mut c_frames = Vec::new();

        collect_master(master.poll(now).unwrap(), &mut m_frames, &mut m_events);
        if !m_frames.is_empty() {
            master.on_write_complete(now);
        }
        collect_client(client.poll(now).unwrap(), &mut c_frames, &mut c_events);
        if !c_frames.is_empty() {
            client.on_write_complete(now);
        }
        if m_frames.is_empty() && c_frames.is_empty() {
            break;
        }

        for frame in m_frames {
            let mut replies = Vec::new();
            collect_client(
                client.handle_frame(&frame, now).unwrap(),
                &mut replies,
                &mut c_events,
            );
            for reply in replies {
                let mut chained = Vec::new();
                collect_master(
                    master.handle_frame(&reply, now).unwrap(),
                    &mut chained,
                    &mut m_events,
                );
                assert!(chained.is_empty(), "response to a response");
            }
        }
        for frame in c_frames {
            let mut replies = Vec::new();
            collect_master(
                master.handle_frame(&frame, now).unwrap(),
                &mut replies,
                &mut m_events,
            );
            for reply in replies {
                let mut chained = Vec::new();
                collect_client(
                    client.handle_frame(&reply, now).unwrap(),
                    &mut chained,
                    &mut c_events,
                );
                assert!(chained.is_empty(), "response to a response");
            }
        }
    }

    (m_events, c_events)
}

/// A freshly joined master/client pair.
fn joined_pair() -> (Master, Client, Did) {
    onenet_node::logging::init_for_tests();
    let mut master = Master::create_network(
        nid(),
        3,
        Features::simple_client().with_block(true),
        4,
        60_000,
        &mut rng(),
    );
    let mut client = Client::new(Features::simple_client().with_peer(true), 60_000);

    let code = InviteCode::new("k7m2p9qr").unwrap();
    let did = master.start_invite(&code, 0, 60_000).unwrap();
    client.look_for_invite(&code, 1, 0).unwrap();

    let (m_events, c_events) = pump(&mut master, &mut client, 0);
    assert!(m_events
        .iter()
        .any(|e| matches!(e, MasterEvent::ClientJoined { did: d, .. } if *d == did)));
    assert!(c_events
        .iter()
        .any(|e| matches!(e, ClientEvent::Joined { did: d, .. } if *d == did)));

    (master, client, did)
}

#[test]
fn invite_joins_a_client() {
    let (master, client, did) = joined_pair();

    assert!(!master.invite_in_progress());
    assert!(client.is_joined());
    assert!(!client.is_scanning());
    assert_eq!(client.did(), did);
    let record = master.client(did).unwrap();
    assert!(record.joined);
    // The join announcement carried the client's real features.
    assert!(record.features.peer_capable());
}

#[test]
fn app_traffic_flows_both_ways() {
    let (mut master, mut client, did) = joined_pair();

    master
        .send_app(did, b"lamp on".to_vec(), Priority::High)
        .unwrap();
    let (_, c_events) = pump(&mut master, &mut client, 100);
    assert!(c_events.iter().any(
        |e| matches!(e, ClientEvent::AppMessage { src, data } if *src == Did::MASTER && data == b"lamp on")
    ));

    client
        .send_app(Did::MASTER, b"switch".to_vec(), Priority::Low)
        .unwrap();
    let (m_events, _) = pump(&mut master, &mut client, 200);
    assert!(m_events.iter().any(
        |e| matches!(e, MasterEvent::AppMessage { src, data } if *src == did && data == b"switch")
    ));
}

#[test]
fn key_rotation_reaches_every_client() {
    let (mut master, mut client, did) = joined_pair();
    let before = client.snapshot().unwrap();

    let fragment = master.rotate_key(&mut rng()).unwrap();
    assert!(master.rotation_in_progress());
    assert!(!master.client(did).unwrap().key_confirmed);

    let (m_events, c_events) = pump(&mut master, &mut client, 1000);
    assert!(m_events
        .iter()
        .any(|e| matches!(e, MasterEvent::KeyRotationComplete)));
    assert!(c_events
        .iter()
        .any(|e| matches!(e, ClientEvent::KeyRotated { fragment: f } if *f == fragment)));
    assert!(!master.rotation_in_progress());
    assert!(master.client(did).unwrap().key_confirmed);

    // Only the low fragment changed, and the prior key was retained.
    let after = client.snapshot().unwrap();
    assert_eq!(after.current_key[..12], before.current_key[..12]);
    assert_eq!(&after.current_key[12..], fragment.as_bytes());
    assert_eq!(after.old_key, before.current_key);

    // Traffic still flows under the rotated key.
    master.send_app(did, vec![0x42], Priority::Low).unwrap();
    let (_, c_events) = pump(&mut master, &mut client, 2000);
    assert!(c_events
        .iter()
        .any(|e| matches!(e, ClientEvent::AppMessage { .. })));
}

#[test]
fn removed_client_leaves_the_network() {
    let (mut master, mut client, did) = joined_pair();

    master.remove_client(did).unwrap();
    let (m_events, c_events) = pump(&mut master, &mut client, 500);

    assert!(m_events
        .iter()
        .any(|e| matches!(e, MasterEvent::ClientRemoved { did: d } if *d == did)));
    assert!(c_events.iter().any(|e| matches!(e, ClientEvent::Removed)));
    assert!(!client.is_joined());
    assert_eq!(master.clients().count(), 0);
    assert!(matches!(
        master.send_app(did, vec![1], Priority::Low),
        Err(NodeError::UnknownClient(_))
    ));
}

#[test]
fn state_survives_a_restart() {
    let (master, client, did) = joined_pair();

    let m_dir = tempfile::tempdir().unwrap();
    let c_dir = tempfile::tempdir().unwrap();
    let mut m_storage = Storage::new(m_dir.path().to_path_buf()).unwrap();
    let mut c_storage = Storage::new(c_dir.path().to_path_buf()).unwrap();
    m_storage.save_network(&master.snapshot()).unwrap();
    c_storage.save_network(&client.snapshot().unwrap()).unwrap();
    drop(master);
    drop(client);

    let stored = m_storage.load_network().unwrap().unwrap();
    let mut master = Master::from_stored(
        &stored,
        Features::simple_client().with_block(true),
        4,
        60_000,
    )
    .unwrap();
    let stored = c_storage.load_network().unwrap().unwrap();
    let mut client =
        Client::from_stored(&stored, Features::simple_client(), 60_000, 0).unwrap();

    assert_eq!(client.did(), did);
    assert!(master.client(did).unwrap().joined);

    // The restored pair still shares a working key.
    client
        .send_app(Did::MASTER, b"back".to_vec(), Priority::Low)
        .unwrap();
    let (m_events, _) = pump(&mut master, &mut client, 0);
    assert!(m_events.iter().any(
        |e| matches!(e, MasterEvent::AppMessage { src, data } if *src == did && data == b"back")
    ));
}
