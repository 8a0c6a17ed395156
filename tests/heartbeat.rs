//! Heartbeat negotiation, the beat pump and missed-deadline detection.

mod common;

use cobalt_stomp::{ConnectOptions, Frame, Heartbeat, HeartbeatPump, State, Version};
use common::{connected, connection, handshake};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn options() -> ConnectOptions {
    ConnectOptions::new().heartbeat(Heartbeat::new(100, 100))
}

#[tokio::test(start_paused = true)]
async fn negotiated_intervals_take_the_larger_proposal() {
    let (conn, mut streams) = connection(options());
    let answer = connected("1.1").set_header("heart-beat", "250,50");
    let (result, (_broker, connect)) = tokio::join!(conn.connect(), handshake(&mut streams, answer));
    result.unwrap();
    assert_eq!(connect.get_header("heart-beat"), Some("100,100"));
    let monitor = conn.heartbeat();
    assert_eq!(monitor.client_interval(), Some(Duration::from_millis(100)));
    assert_eq!(monitor.broker_interval(), Some(Duration::from_millis(250)));
}

#[tokio::test(start_paused = true)]
async fn one_zero_sessions_never_beat() {
    let (conn, mut streams) = connection(options());
    let (result, _broker) = tokio::join!(conn.connect(), handshake(&mut streams, connected("1.0")));
    result.unwrap();
    assert_eq!(conn.version(), Version::V1_0);
    assert_eq!(conn.heartbeat().client_interval(), None);
    let pump = HeartbeatPump::spawn(conn.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(pump.is_finished());
}

#[tokio::test(start_paused = true)]
async fn pump_sends_a_beat_every_interval() {
    let (conn, mut streams) = connection(options());
    let answer = connected("1.2").set_header("heart-beat", "0,100");
    let (result, (mut broker, _)) =
        tokio::join!(conn.connect(), handshake(&mut streams, answer));
    result.unwrap();

    let pump = HeartbeatPump::spawn(conn.clone());
    for _ in 0..3 {
        let frame = broker.next().await.expect("stream open").expect("valid frame");
        assert!(frame.is_heartbeat());
    }
    assert!(conn.client_alive());
    pump.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_broker_marks_connection_dead() {
    let (conn, mut streams) = connection(options());
    let answer = connected("1.1").set_header("heart-beat", "100,0");
    let (result, (mut broker, _)) = tokio::join!(conn.connect(), handshake(&mut streams, answer));
    result.unwrap();

    let died = Arc::new(AtomicUsize::new(0));
    let counter = died.clone();
    conn.on_died(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::advance(Duration::from_millis(105)).await;
    assert!(conn.broker_alive(), "inside the 10% grace period");
    assert_eq!(conn.receive_nonblock().unwrap(), None);
    assert_eq!(conn.state(), State::Connected);

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(!conn.broker_alive());
    assert_eq!(conn.receive_nonblock().unwrap(), None);
    assert_eq!(conn.state(), State::Dead);
    assert!(conn.is_connected(), "a dead connection keeps its stream");
    assert!(!conn.is_alive());

    conn.receive_nonblock().unwrap();
    assert_eq!(died.load(Ordering::SeqCst), 1, "died fires once");

    // a late beat brings the broker back inside its deadline
    broker.send(Frame::heartbeat()).await.unwrap();
    assert!(conn.receive().await.unwrap().is_heartbeat());
    assert!(conn.broker_alive());
    assert_eq!(conn.receive_nonblock().unwrap(), None);
    assert_eq!(conn.state(), State::Connected);
    assert!(conn.is_alive());

    tokio::time::advance(Duration::from_millis(205)).await;
    assert_eq!(conn.receive_nonblock().unwrap(), None);
    assert_eq!(conn.state(), State::Dead);
    assert_eq!(died.load(Ordering::SeqCst), 2, "each lapse fires died");
}

#[tokio::test(start_paused = true)]
async fn is_alive_follows_the_deadlines_not_the_last_transition() {
    let (conn, mut streams) = connection(ConnectOptions::new().heartbeat(Heartbeat::new(1000, 0)));
    let answer = connected("1.2").set_header("heart-beat", "0,1000");
    let (result, (mut broker, _)) = tokio::join!(conn.connect(), handshake(&mut streams, answer));
    result.unwrap();

    tokio::time::advance(Duration::from_millis(1200)).await;
    assert!(!conn.client_alive());
    assert!(!conn.is_alive());

    conn.beat().await.unwrap();
    assert!(broker.next().await.expect("stream open").expect("valid frame").is_heartbeat());
    assert!(conn.client_alive());
    assert!(conn.broker_alive());
    assert!(conn.is_alive());
    assert!(conn.is_connected());
}
