//! Fixed pool of worker threads, each polling a bounded set of connections.
//!
//! A worker never waits on an idle client: every sweep peeks each socket
//! without blocking and only reads a frame once its first byte is there.
//! The frame itself is then read against a single deadline of
//! `io_timeout`, however slowly its bytes trickle in, so a client that
//! stalls mid-frame holds its worker for at most that long.

use crate::config::ServerConfig;
use crate::decoy;
use crate::session::Session;
use crate::state::{self, SharedState};
use crate::utils::get_timestamp;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::packet::{receive_packet, send_packet, PacketError};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A freshly accepted connection waiting for a worker.
pub type Pending = (TcpStream, SocketAddr);

/// What a worker does with a connection after one tick.
#[derive(Debug, PartialEq, Eq)]
enum Tick {
    Keep,
    /// Close the connection; with `release` the session gives up the
    /// user's playing flag if it is the one holding it.
    Close { release: bool },
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    session: Session,
}

/// One thread of the pool and the connections it owns
///
/// A worker holds at most `capacity` connections. Each sweep it:
/// - adopts queued connections while it has room
/// - gives every connection one tick: a replayed guess, or one packet if
///   one has started to arrive
/// - sleeps for the sweep interval
///
/// A connection that errors is closed on its own; the worker carries on.
pub struct Worker {
    id: usize,
    capacity: usize,
    sweep_interval: Duration,
    io_timeout: Duration,
    pending: Receiver<Pending>,
    state: SharedState,
    stop: Arc<AtomicBool>,
    connections: Vec<Connection>,
    rng: StdRng,
}

/// Starts `config.workers` threads pulling from `pending`
///
/// Every worker gets its own seeded RNG and a clone of the shared state.
/// The threads run until `stop` is raised.
pub fn spawn_workers(
    config: &ServerConfig,
    state: &SharedState,
    pending: &Receiver<Pending>,
    stop: &Arc<AtomicBool>,
) -> io::Result<Vec<JoinHandle<()>>> {
    (0..config.workers)
        .map(|id| {
            let worker = Worker {
                id,
                capacity: config.connections_per_worker,
                sweep_interval: config.sweep_interval,
                io_timeout: config.io_timeout,
                pending: pending.clone(),
                state: Arc::clone(state),
                stop: Arc::clone(stop),
                connections: Vec::new(),
                rng: StdRng::from_entropy(),
            };
            thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker.run())
        })
        .collect()
}

impl Worker {
    /// Sweeps the worker's connections until the stop flag is raised
    ///
    /// On stop, every connection still owned is shut down and released as
    /// if the client had left, so a game in progress stays resumable.
    pub fn run(mut self) {
        debug!("Worker {} started", self.id);

        while !self.stop.load(Ordering::Relaxed) {
            self.adopt_pending();

            let mut index = 0;
            while index < self.connections.len() {
                match self.tick(index) {
                    Tick::Keep => index += 1,
                    Tick::Close { release } => {
                        let connection = self.connections.swap_remove(index);
                        self.close(connection, release);
                    }
                }
            }

            thread::sleep(self.sweep_interval);
        }

        for connection in std::mem::take(&mut self.connections) {
            self.close(connection, true);
        }
        debug!("Worker {} stopped", self.id);
    }

    fn adopt_pending(&mut self) {
        while self.connections.len() < self.capacity {
            let Ok((stream, peer)) = self.pending.try_recv() else {
                return;
            };
            if let Err(e) = self.prepare(&stream) {
                warn!("Dropping {}: could not configure socket: {}", peer, e);
                continue;
            }

            info!("Client {} connected on worker {}", peer, self.id);
            self.connections.push(Connection {
                session: Session::new(peer.ip()),
                stream,
                peer,
            });
        }
    }

    fn prepare(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        stream.set_nonblocking(false)
    }

    /// One protocol step for one connection: a replayed guess if any is
    /// queued, otherwise the next packet if one has started to arrive.
    fn tick(&mut self, index: usize) -> Tick {
        let connection = &mut self.connections[index];

        let packet = match connection.session.next_replay() {
            Some(packet) => packet,
            None => match read_packet(connection, self.io_timeout) {
                Ok(Some(packet)) => packet,
                Ok(None) => return Tick::Keep,
                Err(tick) => return tick,
            },
        };

        let result = {
            let mut shared = state::lock(&self.state);
            connection
                .session
                .step(&packet, &mut shared, &mut self.rng, get_timestamp())
        };
        let step = match result {
            Ok(step) => step,
            Err(e) => {
                warn!("Closing {}: {}", connection.peer, e);
                return Tick::Close { release: true };
            }
        };

        for reply in &step.replies {
            if let Err(e) = send_packet(&mut connection.stream, reply) {
                warn!("Failed to send to {}: {}", connection.peer, e);
                return Tick::Close { release: true };
            }
        }

        if step.close {
            Tick::Close { release: false }
        } else {
            Tick::Keep
        }
    }

    fn close(&self, connection: Connection, release: bool) {
        let _ = connection.stream.shutdown(Shutdown::Both);
        if release {
            connection.session.disconnect(&mut state::lock(&self.state));
        }
        info!("Client {} disconnected from worker {}", connection.peer, self.id);
    }
}

/// `Ok(None)` when nothing has arrived yet. Once a frame has started, the
/// whole of it must arrive within `budget`.
fn read_packet(connection: &mut Connection, budget: Duration) -> Result<Option<Vec<u8>>, Tick> {
    match has_data(&connection.stream) {
        Ok(true) => {}
        Ok(false) => return Ok(None),
        Err(e) => {
            debug!("{} went away: {}", connection.peer, e);
            return Err(Tick::Close { release: true });
        }
    }

    let received = receive_packet(&mut DeadlineReader::new(&connection.stream, budget));
    if let Err(e) = connection.stream.set_read_timeout(Some(budget)) {
        warn!("Closing {}: {}", connection.peer, e);
        return Err(Tick::Close { release: true });
    }

    match received {
        Ok(packet) => {
            debug!("{} bytes from {}", packet.len(), connection.peer);
            Ok(Some(packet))
        }
        Err(PacketError::Framing { skipped, .. }) if decoy::looks_like_http(&skipped) => {
            serve_decoy(connection, skipped);
            Err(Tick::Close { release: true })
        }
        Err(e) => {
            warn!("Closing {}: {}", connection.peer, e);
            Err(Tick::Close { release: true })
        }
    }
}

/// Blocking reads that share one deadline. Each read waits only for the
/// time left, so a peer sending a byte just before every timeout still
/// runs out of time.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl<'a> DeadlineReader<'a> {
    fn new(stream: &'a TcpStream, budget: Duration) -> Self {
        Self {
            stream,
            deadline: Instant::now() + budget,
        }
    }
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(ErrorKind::TimedOut, "frame not completed in time"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Peeks without blocking. A closed peer is reported as an error.
fn has_data(stream: &TcpStream) -> io::Result<bool> {
    stream.set_nonblocking(true)?;
    let mut byte = [0u8; 1];
    let peeked = stream.peek(&mut byte);
    stream.set_nonblocking(false)?;

    match peeked {
        Ok(0) => Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed the connection")),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn serve_decoy(connection: &mut Connection, mut request: Vec<u8>) {
    let mut chunk = vec![0u8; decoy::MAX_REQUEST_SIZE.saturating_sub(request.len())];
    if let Ok(n) = connection.stream.read(&mut chunk) {
        request.extend_from_slice(&chunk[..n]);
    }

    if decoy::is_http_request(&request) {
        info!("Serving decoy to HTTP client {}", connection.peer);
        if let Err(e) = connection.stream.write_all(&decoy::response()) {
            debug!("Decoy to {} failed: {}", connection.peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_has_data() {
        let (mut client, server) = pair();
        assert!(!has_data(&server).unwrap());

        client.write_all(b"x").unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(has_data(&server).unwrap());
        // Peeking leaves the byte in place.
        assert!(has_data(&server).unwrap());

        drop(client);
        let mut buf = [0u8; 1];
        let mut reader = &server;
        reader.read_exact(&mut buf).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(has_data(&server).is_err());
    }

    #[test]
    fn test_read_packet_and_decoy() {
        let (mut client, server) = pair();
        let peer = server.peer_addr().unwrap();
        let mut connection = Connection {
            stream: server,
            peer,
            session: Session::new(peer.ip()),
        };
        let budget = Duration::from_millis(500);

        assert_eq!(read_packet(&mut connection, budget), Ok(None));

        send_packet(&mut client, b"OK").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(read_packet(&mut connection, budget), Ok(Some(b"OK".to_vec())));

        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            read_packet(&mut connection, budget),
            Err(Tick::Close { release: true })
        );

        drop(connection);
        let mut response = Vec::new();
        client.read_to_end(&mut response).ok();
        assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_trickled_frame_hits_deadline() {
        let (mut client, server) = pair();
        let peer = server.peer_addr().unwrap();
        let mut connection = Connection {
            stream: server,
            peer,
            session: Session::new(peer.ip()),
        };

        // Announces a large frame, then sends one byte well inside every
        // per-read timeout.
        let dripper = thread::spawn(move || {
            client.write_all(&[0xE7, 0x1E, 0x40, 0x00]).unwrap();
            for _ in 0..20 {
                thread::sleep(Duration::from_millis(100));
                if client.write_all(b"x").is_err() {
                    break;
                }
            }
        });
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        let result = read_packet(&mut connection, Duration::from_millis(300));
        let elapsed = start.elapsed();

        assert_eq!(result, Err(Tick::Close { release: true }));
        assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
        drop(connection);
        dripper.join().unwrap();
    }

    #[test]
    fn test_deadline_reader_fails_once_expired() {
        let (_client, server) = pair();
        let mut reader = DeadlineReader::new(&server, Duration::ZERO);
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
