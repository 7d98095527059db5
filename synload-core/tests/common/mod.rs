//! Common test utilities for integration tests
//!
//! Runs a minimal synthetic-protocol server on a std thread so the tests do not
//! depend on the server binary being built.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};
use synload_core::{AsyncSocket, Readiness, RequestGenerator, RequestPacket, ResponsePacket};

/// Cap on the time the test server spends per request
const MAX_DELAY: Duration = Duration::from_millis(10);

/// How the test server treats incoming requests
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Sleep for the requested time, then echo the tag
    Respond,
    /// Read this many requests without answering, then close
    CloseAfter(usize),
    /// Hold the first response back for the given time
    DelayFirst(Duration),
    /// Answer with a tag the client never issued
    BogusTag,
}

/// Start a single-connection server and return its address
pub fn spawn_server(behavior: Behavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let _ = stream.set_nodelay(true);
        let mut buf = [0u8; RequestPacket::SIZE];
        let mut served = 0usize;

        while stream.read_exact(&mut buf).is_ok() {
            let request = RequestPacket::decode(&buf).expect("Malformed request");
            served += 1;

            let tag = match behavior {
                Behavior::CloseAfter(n) => {
                    if served >= n {
                        return;
                    }
                    continue;
                }
                Behavior::DelayFirst(delay) if served == 1 => {
                    thread::sleep(delay);
                    request.tag
                }
                Behavior::BogusTag => request.tag ^ (0xFF << 40),
                _ => request.tag,
            };

            thread::sleep(Duration::from_micros(request.total_delay_us()).min(MAX_DELAY));
            if stream.write_all(&ResponsePacket { tag }.encode()).is_err() {
                return;
            }
        }
    });

    addr
}

/// Drive the socket by polling until `done` holds, expiring timed-out requests
pub fn drive<F>(
    socket: &mut AsyncSocket,
    generator: &mut RequestGenerator,
    mut done: F,
) -> synload_core::Result<()>
where
    F: FnMut(&AsyncSocket, &RequestGenerator) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(socket, generator) {
        assert!(Instant::now() < deadline, "Timed out driving socket");
        socket.run_io(Readiness::BOTH, generator)?;
        generator.expire(synload_core::timing::time_ns());
        thread::sleep(Duration::from_micros(200));
    }
    Ok(())
}
