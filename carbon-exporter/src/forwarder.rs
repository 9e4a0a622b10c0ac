use std::{
    io::{self, Write as _},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs as _},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

/// Forwarder configuration.
#[derive(Clone)]
pub(crate) struct ForwarderConfiguration {
    pub remote_addrs: Vec<SocketAddr>,
    pub timeout: Duration,
}

/// Resolves a `host:port` endpoint to its candidate socket addresses.
///
/// Resolution happens once, up front, so that a bad endpoint is reported at build time
/// rather than on the first batch.
pub(crate) fn resolve_endpoint(endpoint: &str) -> Result<Vec<SocketAddr>, String> {
    match endpoint.to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.collect();
            if addrs.is_empty() {
                Err(format!("endpoint '{endpoint}' resolved to no addresses"))
            } else {
                Ok(addrs)
            }
        }
        Err(e) => Err(e.to_string()),
    }
}

/// A failure while moving a payload towards the remote server.
///
/// Connect and write failures are kept distinct: a connect failure means nothing reached
/// the remote at all, while a write failure means an unknown prefix of the payload may
/// have been buffered before the connection broke.
#[derive(Debug)]
pub(crate) enum ForwardError {
    Connect(io::Error),
    Write(io::Error),
}

impl ForwardError {
    /// Returns `true` if the underlying I/O error was a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        let (ForwardError::Connect(e) | ForwardError::Write(e)) = self;
        matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(config: &ForwarderConfiguration) -> io::Result<Self> {
        let mut last_err = None;
        for addr in &config.remote_addrs {
            match TcpStream::connect_timeout(addr, config.timeout) {
                Ok(stream) => {
                    debug!(remote = %addr, "Connected to Carbon server.");
                    return Ok(Client { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no remote addresses to try")
        }))
    }

    /// Writes the whole payload under one absolute deadline.
    ///
    /// `set_write_timeout` only bounds a single write syscall; against a slowly-draining
    /// remote every syscall makes partial progress, so a plain `write_all` would run for
    /// time proportional to the payload size. The remaining time is recomputed before
    /// each syscall and the write fails with `TimedOut` once the deadline passes.
    fn send(&mut self, payload: &[u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut remaining = payload;
        while !remaining.is_empty() {
            let time_left = deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        "write deadline expired before the payload was fully sent",
                    )
                })?;
            self.stream.set_write_timeout(Some(time_left))?;

            match self.stream.write(remaining) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed mid-payload",
                    ))
                }
                Ok(written) => remaining = &remaining[written..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub(crate) enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // No live connection; the next send dials first.
    Disconnected(ForwarderConfiguration),

    // Connected and ready to send payloads.
    Ready(ForwarderConfiguration, Client),
}

impl ClientState {
    pub fn new(config: ForwarderConfiguration) -> Self {
        ClientState::Disconnected(config)
    }

    /// Sends one payload, dialing first if there is no live connection.
    ///
    /// On a connect failure the state stays disconnected, so the next call dials fresh.
    /// On a write failure the connection is shut down and discarded before the error is
    /// returned, forcing a reconnect on the next call: once a stream write fails, the
    /// remote's read position within the line protocol is unknowable, and reusing the
    /// stream could split a line in two.
    pub fn try_send(&mut self, payload: &[u8]) -> Result<(), ForwardError> {
        loop {
            let old_state = std::mem::replace(self, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected(config) => match Client::connect(&config) {
                    Ok(client) => *self = ClientState::Ready(config, client),
                    Err(e) => {
                        *self = ClientState::Disconnected(config);
                        return Err(ForwardError::Connect(e));
                    }
                },
                ClientState::Ready(config, mut client) => {
                    let result = client.send(payload, config.timeout);
                    return match result {
                        Ok(()) => {
                            trace!(payload_len = payload.len(), "Sent payload.");
                            *self = ClientState::Ready(config, client);
                            Ok(())
                        }
                        Err(e) => {
                            client.close();
                            *self = ClientState::Disconnected(config);
                            Err(ForwardError::Write(e))
                        }
                    };
                }
            }
        }
    }

    /// Closes the connection if one is live. Idempotent.
    pub fn close(&mut self) {
        let old_state = std::mem::replace(self, ClientState::Inconsistent);
        *self = match old_state {
            ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
            ClientState::Disconnected(config) => ClientState::Disconnected(config),
            ClientState::Ready(config, mut client) => {
                client.close();
                debug!("Closed connection to Carbon server.");
                ClientState::Disconnected(config)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead as _, BufReader},
        net::TcpListener,
        time::Duration,
    };

    use super::{resolve_endpoint, ClientState, ForwardError, ForwarderConfiguration};

    fn config_for(addrs: Vec<std::net::SocketAddr>) -> ForwarderConfiguration {
        ForwarderConfiguration { remote_addrs: addrs, timeout: Duration::from_secs(1) }
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(resolve_endpoint("not an endpoint").is_err());
    }

    #[test]
    fn resolve_accepts_socket_addr() {
        let addrs = resolve_endpoint("127.0.0.1:2003").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:2003".parse().unwrap()]);
    }

    #[test]
    fn connect_failure_leaves_state_disconnected() {
        // Bind and immediately drop a listener to get an address with nothing behind it.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut state = ClientState::new(config_for(vec![addr]));
        let err = state.try_send(b"m 1 1\n").unwrap_err();
        assert!(matches!(err, ForwardError::Connect(_)));

        // The state machine must still be usable: a second attempt dials again rather
        // than hitting the inconsistent state.
        assert!(state.try_send(b"m 1 1\n").is_err());
    }

    #[test]
    fn send_dials_lazily_and_delivers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut state = ClientState::new(config_for(vec![addr]));
        state.try_send(b"m;k=v 1 1700000000\n").unwrap();

        let (conn, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(conn).read_line(&mut line).unwrap();
        assert_eq!(line, "m;k=v 1 1700000000\n");
    }

    #[test]
    fn close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut state = ClientState::new(config_for(vec![addr]));
        state.close();
        state.close();

        state.try_send(b"m 1 1\n").unwrap();
        state.close();
        state.close();
    }
}
