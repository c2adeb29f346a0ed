//! End-to-end tests: two real engines talking over an in-process link.
//!
//! Both sides run as spawned tokio tasks so they make progress
//! concurrently; the link is the deterministic simulator from `rssi::sim`.

use std::num::NonZeroU64;
use std::time::Duration;

use rssi::sim::{self, FaultConfig};
use rssi::{ConnState, RssiConfig, Session};

fn small_cfg() -> RssiConfig {
    RssiConfig {
        ld_max_unacked: 2,
        rex_timeout: Duration::from_millis(60),
        cak_timeout: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn open_pair(cfg: RssiConfig) -> (Session, Session) {
    let (a, b) = sim::loopback();
    let server = Session::server(a, cfg.clone()).expect("server config");
    let mut client = Session::client(b, cfg).expect("client config");
    tokio::time::timeout(Duration::from_secs(5), client.wait_open())
        .await
        .expect("handshake timed out")
        .expect("client open");
    (server, client)
}

#[tokio::test]
async fn handshake_and_ping_pong() {
    let (mut server, mut client) = open_pair(RssiConfig::default()).await;

    client.send(b"Ping!".to_vec()).await.expect("client send");
    let got = tokio::time::timeout(Duration::from_secs(5), server.recv())
        .await
        .expect("server recv timed out")
        .expect("server recv");
    assert_eq!(got, b"Ping!");

    server.send(b"Pong!".to_vec()).await.expect("server send");
    let reply = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("client recv timed out")
        .expect("client recv");
    assert_eq!(reply, b"Pong!");

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn burst_larger_than_window_delivered_in_order() {
    const MSG_COUNT: usize = 40;

    // A 4-segment window forces the sender to cycle the window many times.
    let (mut server, client) = open_pair(small_cfg()).await;

    let sender = tokio::spawn(async move {
        for i in 0..MSG_COUNT {
            let msg = format!("msg-{i:02}");
            client.send(msg.into_bytes()).await.expect("send");
        }
        client
    });

    let mut received = Vec::new();
    while received.len() < MSG_COUNT {
        let data = tokio::time::timeout(Duration::from_secs(10), server.recv())
            .await
            .expect("recv timed out")
            .expect("recv");
        received.push(data);
    }

    for (i, chunk) in received.iter().enumerate() {
        let expected = format!("msg-{i:02}");
        assert_eq!(chunk, expected.as_bytes(), "message {i} corrupted");
    }

    let client = sender.await.unwrap();
    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn lossy_link_recovers_by_retransmission() {
    const MSG_COUNT: usize = 12;

    // Every third segment the client sends disappears; the protocol has to
    // win by retransmitting.
    let faults = FaultConfig {
        drop_every: NonZeroU64::new(3),
    };
    let (srv_end, cli_end) = sim::pair(64, FaultConfig::default(), faults);
    let mut server = Session::server(srv_end, small_cfg()).expect("server config");
    let mut client = Session::client(cli_end, small_cfg()).expect("client config");
    tokio::time::timeout(Duration::from_secs(10), client.wait_open())
        .await
        .expect("handshake timed out")
        .expect("client open");

    for i in 0..MSG_COUNT {
        client
            .send(format!("lossy-{i}").into_bytes())
            .await
            .expect("send");
    }

    for i in 0..MSG_COUNT {
        let data = tokio::time::timeout(Duration::from_secs(10), server.recv())
            .await
            .expect("recv timed out")
            .expect("recv");
        assert_eq!(data, format!("lossy-{i}").as_bytes(), "order broken at {i}");
    }

    let stats = client.stats();
    assert!(
        stats.rex_segments > 0,
        "recovery must have gone through retransmission: {stats:?}"
    );

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn bidirectional_echo_under_load() {
    const MSG_COUNT: usize = 20;

    let (mut server, mut client) = open_pair(small_cfg()).await;

    let echo = tokio::spawn(async move {
        for _ in 0..MSG_COUNT {
            let data = server.recv().await.expect("echo recv");
            server.send(data).await.expect("echo send");
        }
        server
    });

    for i in 0..MSG_COUNT {
        let msg = format!("item-{i}").into_bytes();
        client.send(msg.clone()).await.expect("send");
        let back = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .expect("echo timed out")
            .expect("recv");
        assert_eq!(back, msg);
    }

    let server = echo.await.unwrap();
    assert!(client.stats().segs_given_to_user >= MSG_COUNT as u64);
    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn close_tears_down_both_ends() {
    let (mut server, client) = open_pair(RssiConfig::default()).await;
    assert_eq!(client.state(), ConnState::Open);

    // Closing the client drops its end of the link; the server engine sees
    // the transport die and stops for good.
    client.close().await;

    let res = tokio::time::timeout(Duration::from_secs(5), server.recv())
        .await
        .expect("server never noticed the teardown");
    assert!(res.is_err(), "server recv must fail after peer teardown");
    assert_eq!(server.state(), ConnState::Closed);
    server.close().await;
}
