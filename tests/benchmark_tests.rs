//! Performance benchmarks for the lobby's hot paths

use server::client_manager::ClientManager;
use server::ConnectionId;
use shared::{FrameDecoder, Packet};
use std::time::Instant;

/// Benchmarks packet encoding
#[test]
fn benchmark_packet_encoding() {
    let packet = Packet::NotifyConnect {
        player_id: 7,
        username: "BenchmarkPlayer".to_string(),
    };

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = packet.encode().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Packet encoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks framing and decoding of a long byte stream
#[test]
fn benchmark_stream_decoding() {
    let mut stream = Vec::new();
    for i in 0..10_000u32 {
        let packet = match i % 3 {
            0 => Packet::ConnectReq {
                username: format!("player{}", i),
            },
            1 => Packet::ReadyStatus { is_ready: i % 2 == 0 },
            _ => Packet::DisconnectReq,
        };
        stream.extend(packet.encode().unwrap());
    }

    let start = Instant::now();
    let mut decoder = FrameDecoder::default();
    let mut decoded = 0;

    // Feed in awkward chunk sizes to exercise reassembly
    for chunk in stream.chunks(37) {
        decoder.extend(chunk);
        for frame in decoder.frames() {
            frame.unwrap().decode().unwrap();
            decoded += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Stream decoding: {} packets ({} bytes) in {:?}",
        decoded,
        stream.len(),
        duration
    );

    assert_eq!(decoded, 10_000);
    assert_eq!(decoder.buffered(), 0);
    assert!(duration.as_millis() < 1000);
}

/// Stress tests admission and removal churn on a full registry
#[test]
fn stress_test_registry_churn() {
    let addr = "127.0.0.1:50000".parse().unwrap();
    let mut clients = ClientManager::new(64);

    let start = Instant::now();
    let mut next_id = 0u32;

    for round in 0..20 {
        let mut connections = Vec::new();
        for i in 0..64 {
            next_id += 1;
            let id = ConnectionId(next_id);
            clients.add_connection(id, addr);
            clients
                .try_admit(id, &format!("r{}p{}", round, i))
                .expect("capacity available");
            connections.push(id);
        }
        assert_eq!(clients.registered_count(), 64);

        for id in connections {
            clients.remove(id);
        }
        assert!(clients.is_empty());
    }

    let duration = start.elapsed();
    println!("Registry churn: 20 rounds of 64 players in {:?}", duration);

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
