//! Simple client that sends messages to a Bitflux server and prints replies.
//!
//! Run the server first:
//! - cargo run -p bitflux --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p bitflux --example client -- 127.0.0.1:7777
//! - cargo run -p bitflux --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    time::{Duration, Instant},
};

use bitflux::{Config, ConnectionStatus, DeliveryMethod, IncomingKind, Peer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args
        .next()
        .unwrap_or_else(|| "300".into())
        .parse()
        .unwrap_or(300);

    let mut config = Config::default();
    config.local_address = "127.0.0.1".parse().unwrap();
    config.app_identifier = "bitflux-echo".into();
    let mut client = Peer::start(config)?;
    let local = client.local_addr();
    println!(
        "Bitflux client bound to {} -> sending {} messages to {} (every {}ms)",
        local, count, server_addr, interval_ms
    );

    let remote = client.connect(server_addr, vec![])?;

    // Wait until the handshake completes before sending.
    loop {
        let Some(message) = client.recv_timeout(Duration::from_secs(5)) else {
            eprintln!("no response from server; giving up");
            return Ok(());
        };
        if message.kind == IncomingKind::StatusChanged {
            let (status, reason) = message.read_status_changed()?;
            println!("[status] {:?} ({})", status, reason);
            if status == ConnectionStatus::Connected {
                break;
            }
            if status == ConnectionStatus::Disconnected {
                return Ok(());
            }
        }
    }

    for i in 0..count {
        let msg = format!("hello {} from {}", i, local);
        client.send_to(remote, msg.into_bytes(), DeliveryMethod::ReliableOrdered, 0)?;

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);
        while start.elapsed() < wait {
            let Some(message) = client.recv_timeout(wait - start.elapsed().min(wait)) else {
                break;
            };
            match message.kind {
                IncomingKind::Data => {
                    let text = String::from_utf8_lossy(message.payload_bytes());
                    println!("[reply] from={} payload=\"{}\"", message.sender.unwrap(), text);
                }
                IncomingKind::StatusChanged => {
                    let (status, reason) = message.read_status_changed()?;
                    println!("[status] {:?} ({})", status, reason);
                }
                other => println!("[{:?}]", other),
            }
        }
    }

    client.shutdown("client done");
    println!("done");
    Ok(())
}
