//! Server side of the transport: an accept loop feeding a worker pool.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddrV4, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::common::messages;
use crate::rpc::{sanitize, REQUEST_TIMEOUT};
use crate::Result;

/// Turns a parsed request into a response payload. Errors become
/// `SUCCESS: false` envelopes.
pub(crate) type Handler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A listening peer endpoint. Accepted connections are queued onto a small
/// worker pool; each worker reads one request, dispatches it, writes the
/// enveloped response, and closes.
#[derive(Debug)]
pub(crate) struct Server {
    local_addr: SocketAddrV4,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn spawn(port: u16, num_workers: usize, handler: Handler) -> Result<Server> {
        let listener = bind_reusable(port)?;
        listener.set_nonblocking(true)?;

        let local_addr = match listener.local_addr()? {
            std::net::SocketAddr::V4(addr) => addr,
            std::net::SocketAddr::V6(_) => unreachable!("bound to an IPv4 address"),
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = flume::unbounded::<TcpStream>();

        let mut threads = Vec::with_capacity(num_workers + 1);

        let accept_shutdown = shutdown.clone();
        threads.push(thread::spawn(move || {
            // The sender lives in this thread; dropping it on exit drains
            // and stops the workers.
            loop {
                if accept_shutdown.load(Ordering::Relaxed) {
                    break;
                }

                match listener.accept() {
                    Ok((stream, from)) => {
                        trace!(context = "rpc_server", ?from, "Accepted connection");
                        if sender.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        debug!(?e, "accept failed unexpectedly");
                    }
                }
            }
        }));

        for _ in 0..num_workers {
            let receiver = receiver.clone();
            let handler = handler.clone();
            threads.push(thread::spawn(move || {
                while let Ok(stream) = receiver.recv() {
                    handle_session(stream, &handler);
                }
            }));
        }

        Ok(Server {
            local_addr,
            shutdown,
            threads: Mutex::new(threads),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Stop accepting, drain the queue, and join every thread. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let mut threads = self.threads.lock().expect("server thread list poisoned");
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind a listener with `SO_REUSEADDR`, so a peer can come back on the same
/// port while TIME_WAIT sockets from its previous life still linger.
#[cfg(unix)]
fn bind_reusable(port: u16) -> std::io::Result<TcpListener> {
    use std::io::Error;
    use std::os::unix::io::FromRawFd;

    use libc::{
        bind, listen, setsockopt, sockaddr, sockaddr_in, socket, AF_INET, INADDR_ANY,
        SOCK_STREAM, SOL_SOCKET, SO_REUSEADDR,
    };

    unsafe {
        let fd = socket(AF_INET, SOCK_STREAM, 0);
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        let enable: i32 = 1;
        if setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &enable as *const _ as *const _,
            std::mem::size_of_val(&enable) as u32,
        ) != 0
        {
            let err = Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let mut address: sockaddr_in = std::mem::zeroed();
        address.sin_family = AF_INET as _;
        address.sin_port = port.to_be();
        address.sin_addr.s_addr = INADDR_ANY.to_be();

        if bind(
            fd,
            &address as *const sockaddr_in as *const sockaddr,
            std::mem::size_of::<sockaddr_in>() as u32,
        ) != 0
        {
            let err = Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        if listen(fd, 128) != 0 {
            let err = Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(TcpListener::from_raw_fd(fd))
    }
}

#[cfg(not(unix))]
fn bind_reusable(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
}

fn handle_session(mut stream: TcpStream, handler: &Handler) {
    let _ = stream.set_read_timeout(Some(REQUEST_TIMEOUT));

    let mut buffer = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buffer) {
        debug!(?e, "Error reading request");
        return;
    }

    let text = String::from_utf8_lossy(&buffer);
    let outcome = match serde_json::from_str::<Value>(sanitize(&text)) {
        Ok(request) => {
            trace!(context = "rpc_server", ?request, "Received request");
            handler(request)
        }
        Err(e) => {
            debug!(?e, "Received unparseable request");
            Err(e.into())
        }
    };

    let response = messages::seal(outcome);
    match serde_json::to_vec(&response) {
        Ok(bytes) => {
            let _ = stream.write_all(&bytes).map_err(|e| {
                debug!(?e, "Error writing response");
            });
        }
        Err(e) => debug!(?e, "Error serializing response"),
    }

    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::rpc::client;
    use crate::Error;

    fn echo_server(port: u16) -> Server {
        Server::spawn(
            port,
            3,
            Arc::new(|request: Value| {
                if request["COMMAND"] == "ECHO" {
                    Ok(serde_json::json!({ "VALUE": request["VALUE"] }))
                } else {
                    Err(Error::InvalidCommand)
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn request_response_round_trip() {
        let server = echo_server(39410);
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.local_addr().port());

        let response = client::call_raw(
            address,
            &serde_json::json!({ "COMMAND": "ECHO", "VALUE": "marco" }),
        )
        .unwrap();

        assert_eq!(response["SUCCESS"], true);
        assert_eq!(response["VALUE"], "marco");
    }

    #[test]
    fn handler_errors_surface_in_the_envelope() {
        let server = echo_server(39412);
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.local_addr().port());

        let result = client::call_raw(address, &serde_json::json!({ "COMMAND": "NOPE" }));
        match result {
            Err(Error::Rpc(message)) => assert_eq!(message, "Invalid command."),
            other => panic!("expected an rpc error, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_refuses_new_connections() {
        let server = echo_server(39414);
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.local_addr().port());

        assert!(client::is_alive(address));
        server.shutdown();
        assert!(!client::is_alive(address));
    }

    #[test]
    fn concurrent_requests_all_answered() {
        let server = echo_server(39416);
        let address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, server.local_addr().port());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let response = client::call_raw(
                        address,
                        &serde_json::json!({ "COMMAND": "ECHO", "VALUE": i }),
                    )
                    .unwrap();
                    assert_eq!(response["VALUE"], i);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        drop(server);
    }
}
