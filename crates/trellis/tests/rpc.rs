//! Wire-level tests: two real nodes talking ndjson over loopback TCP.

mod fixtures;

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use fixtures::{MemStorage, wait_until};
use trellis::rpc::{self, RemoteContact};
use trellis::{Node, Settings, Worker};
use trellis_core::{ContactInfo, ID_LEN, Item, ROOT, encode_id, random_id};

fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn tcp_node(bootstraps: Vec<ContactInfo>) -> (Arc<Node>, u16) {
    let (listener, port) = listen();
    let settings = Settings::new(
        &encode_id(&random_id()),
        "127.0.0.1",
        port,
        Duration::from_secs(3600),
        Duration::from_secs(300),
        1000,
        20,
    )
    .unwrap();
    let node = Node::new(
        settings,
        RemoteContact::factory(),
        bootstraps,
        Arc::new(MemStorage::default()),
    )
    .unwrap();
    {
        let node = Arc::clone(&node);
        std::thread::spawn(move || {
            let _ = rpc::p2p::serve(listener, node);
        });
    }
    (node, port)
}

fn zero_name_bootstrap(port: u16) -> ContactInfo {
    ContactInfo {
        name: encode_id(&[0u8; ID_LEN]),
        ips: ["127.0.0.1".to_string()].into(),
        ip: "127.0.0.1".to_string(),
        port,
    }
}

#[test]
fn nodes_discover_each_other_over_tcp() {
    let (n1, n1_port) = tcp_node(Vec::new());
    let (n2, _) = tcp_node(vec![zero_name_bootstrap(n1_port)]);

    // The bootstrap placeholder name never matches the responder, so the
    // placeholder is dropped and the real contact registered instead.
    n2.observe().unwrap();
    assert!(n2.acknowledged_hosts().is_empty());
    assert!(
        n2.registered_hosts()
            .iter()
            .any(|host| host.starts_with(n1.name()))
    );

    // The ping carried n2's identity (plus its observed source address),
    // so n1 now holds it as a provisional peer.
    assert!(
        n1.acknowledged_hosts()
            .iter()
            .any(|host| host.starts_with(n2.name()))
    );

    // And the next n1 round verifies n2 for real.
    n1.observe().unwrap();
    assert!(
        n1.registered_hosts()
            .iter()
            .any(|host| host.starts_with(n2.name()))
    );
}

#[test]
fn publish_and_get_round_trip_over_tcp() {
    let (node, port) = tcp_node(Vec::new());
    let mut worker = Worker::spawn(Arc::clone(&node));

    let collection = encode_id(&random_id());
    let contact = RemoteContact::from_info(&ContactInfo {
        name: node.name().to_string(),
        ips: ["127.0.0.1".to_string()].into(),
        ip: "127.0.0.1".to_string(),
        port,
    })
    .unwrap();

    use trellis_core::Contact as _;
    contact
        .publish(
            Item {
                collection: collection.clone(),
                location: "abcd".to_string(),
                id: "1".to_string(),
            },
            ROOT,
            "abcd",
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        node.queue_len() == 0 && !node.ownership().is_empty()
    }));

    let (nearest, set) = contact.get(&collection, ROOT).unwrap();
    assert_eq!(nearest.name, node.name());
    assert_eq!(set.unwrap().count(), 1);

    // Malformed input is refused without touching state.
    let err = contact.publish(
        Item {
            collection: "not a name".to_string(),
            location: "x".to_string(),
            id: "1".to_string(),
        },
        ROOT,
        "x",
    );
    assert!(err.is_err());
    assert_eq!(node.queue_len(), 0);

    worker.close();
    worker.join().unwrap();
}

#[test]
fn monitoring_surface_answers_line_requests() {
    let (node, _) = tcp_node(Vec::new());
    let (listener, port) = listen();
    {
        let node = Arc::clone(&node);
        std::thread::spawn(move || {
            let _ = rpc::monitoring::serve(listener, node);
        });
    }

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    let mut ask = |request: &str| -> String {
        writer.write_all(request.as_bytes()).unwrap();
        writer.flush().unwrap();
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    };

    let queue = ask("{\"op\":\"queue\"}\n");
    assert!(queue.contains("\"pending\":0"), "got: {queue}");

    let registered = ask("{\"op\":\"registered\"}\n");
    assert!(registered.contains(node.name()), "got: {registered}");

    let bogus = ask("{\"op\":\"nonsense\"}\n");
    assert!(bogus.contains("\"err\""), "got: {bogus}");
}
