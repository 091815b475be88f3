//! Simple echo server using Bitflux.
//!
//! Run:
//! - cargo run -p bitflux --example server
//! - cargo run -p bitflux --example server -- 127.0.0.1:7777

use std::{env, net::SocketAddr};

use bitflux::{Config, IncomingKind, Peer};

fn parse_bind_addr() -> Option<SocketAddr> {
    let mut args = env::args().skip(1);
    args.next().and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = parse_bind_addr().unwrap_or_else(|| "127.0.0.1:9000".parse().unwrap());

    let mut config = Config::default();
    config.local_address = bind_addr.ip();
    config.port = bind_addr.port();
    config.app_identifier = "bitflux-echo".into();
    config.accept_incoming_connections = true;

    let server = Peer::start(config)?;
    println!("Bitflux echo server listening on {}", server.local_addr());
    println!("Send from the client example to this address to see echoes.");

    loop {
        let Some(message) = server.recv_timeout(std::time::Duration::from_millis(100)) else {
            continue;
        };
        match message.kind {
            IncomingKind::StatusChanged => {
                let (status, reason) = message.read_status_changed()?;
                println!(
                    "[status] {} -> {:?} ({})",
                    message.sender.unwrap(),
                    status,
                    reason
                );
            }
            IncomingKind::Data => {
                let sender = message.sender.unwrap();
                let text = String::from_utf8_lossy(message.payload_bytes());
                let (method, channel) = message.delivery.unwrap();
                println!(
                    "[data] from={} channel={} method={:?} payload=\"{}\"",
                    sender, channel, method, text
                );

                // Echo back with the same delivery method and channel
                if let Err(e) =
                    server.send_to(sender, message.payload_bytes().to_vec(), method, channel)
                {
                    eprintln!("failed to queue echo: {}", e);
                }
            }
            other => {
                println!("[{:?}]", other);
            }
        }
    }
}
