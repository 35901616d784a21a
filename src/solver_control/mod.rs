// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Solver-side message handling.
//!
//! [`SolverProcessControl`] exposes a [`Solver`] over a connection with a
//! one-message-per-call request/response protocol. [`GlobalSolveController`]
//! instead speaks the kernel protocol (coefficient indices, coefficients,
//! equations and solutions) with one or more kernels, using any
//! [`SolverBackend`] to do the solving.

mod error;
mod global;

pub use error::SolverControlError;
pub use global::{GlobalSolveController, GlobalSolveSummary, SolverBackend, SolverClient};

use std::{
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex},
};
#[cfg(unix)]
use std::{
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, error, info, warn};
use strum_macros::Display;

use crate::{
    connection::{BlobStream, Connection, ConnectionError},
    messages::{DomainRegistrationRequest, Message},
    solver::Solver,
};

/// The environment variable consulted for the solver's socket address.
pub const SOLVER_SOCKET_ENV: &str = "DISTCAL_SOLVER_SOCKET";

pub const DEFAULT_SOLVER_SOCKET: &str = "127.0.0.1:31337";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    #[strum(serialize = "undefined")]
    Undefined,

    #[strum(serialize = "defined")]
    Defined,

    #[strum(serialize = "initialised")]
    Initialized,

    #[strum(serialize = "running")]
    Running,
}

/// Where a solver process listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverAddress {
    Tcp(SocketAddr),

    #[cfg(unix)]
    Unix(PathBuf),
}

impl SolverAddress {
    /// Parse "host:port", or "unix:<path>" for a Unix socket.
    pub fn parse(s: &str) -> Result<SolverAddress, SolverControlError> {
        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(SolverControlError::BadAddress {
                    address: s.to_string(),
                });
            }
            return Ok(SolverAddress::Unix(PathBuf::from(path)));
        }

        s.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(SolverAddress::Tcp)
            .ok_or_else(|| SolverControlError::BadAddress {
                address: s.to_string(),
            })
    }

    /// Use `explicit` if given, else the [`SOLVER_SOCKET_ENV`] environment
    /// variable, else [`DEFAULT_SOLVER_SOCKET`].
    pub fn resolve(explicit: Option<&str>) -> Result<SolverAddress, SolverControlError> {
        match explicit {
            Some(s) => SolverAddress::parse(s),
            None => match std::env::var(SOLVER_SOCKET_ENV) {
                Ok(s) if !s.trim().is_empty() => SolverAddress::parse(s.trim()),
                _ => SolverAddress::parse(DEFAULT_SOLVER_SOCKET),
            },
        }
    }
}

impl std::fmt::Display for SolverAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverAddress::Tcp(a) => write!(f, "{a}"),
            #[cfg(unix)]
            SolverAddress::Unix(p) => write!(f, "unix:{}", p.display()),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

enum StreamCloser {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl StreamCloser {
    fn shutdown(&self) {
        let result = match self {
            StreamCloser::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            StreamCloser::Unix(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            debug!("Couldn't shut down the solver connection: {e}");
        }
    }
}

/// Stops a [`SolverProcessControl::serve`] loop from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicCell<bool>>,
    stream: Arc<Mutex<Option<StreamCloser>>>,
}

impl ShutdownHandle {
    /// Ask the serve loop to stop. A pending receive on a socket connection is
    /// interrupted.
    pub fn shutdown(&self) {
        self.requested.store(true);
        if let Some(stream) = self.stream.lock().unwrap().as_ref() {
            stream.shutdown();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load()
    }
}

/// Serves a [`Solver`] over one connection.
pub struct SolverProcessControl {
    state: ControlState,
    address: Option<SolverAddress>,
    listener: Option<Listener>,
    connection: Option<Box<dyn Connection>>,
    solver: Solver,
    shutdown: ShutdownHandle,
    num_handled: usize,
}

impl Default for SolverProcessControl {
    fn default() -> Self {
        SolverProcessControl::new()
    }
}

impl SolverProcessControl {
    pub fn new() -> SolverProcessControl {
        SolverProcessControl {
            state: ControlState::Undefined,
            address: None,
            listener: None,
            connection: None,
            solver: Solver::new(),
            shutdown: ShutdownHandle {
                requested: Arc::new(AtomicCell::new(false)),
                stream: Arc::new(Mutex::new(None)),
            },
            num_handled: 0,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn address(&self) -> Option<&SolverAddress> {
        self.address.as_ref()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Work out which socket to use (see [`SolverAddress::resolve`]). Nothing
    /// is opened yet.
    pub fn define(&mut self, socket: Option<&str>) -> Result<(), SolverControlError> {
        self.expect_state("define", &[ControlState::Undefined])?;
        let address = SolverAddress::resolve(socket)?;
        debug!("Solver socket: {address}");
        self.address = Some(address);
        self.state = ControlState::Defined;
        Ok(())
    }

    /// Start listening on the defined socket, if not already listening, and
    /// return the address actually bound (useful when asking for port 0).
    pub fn listen(&mut self) -> Result<SolverAddress, SolverControlError> {
        self.expect_state(
            "listen",
            &[
                ControlState::Defined,
                ControlState::Initialized,
                ControlState::Running,
            ],
        )?;
        if self.listener.is_none() {
            let listener = match &self.address {
                Some(SolverAddress::Tcp(a)) => Listener::Tcp(TcpListener::bind(a)?),
                #[cfg(unix)]
                Some(SolverAddress::Unix(p)) => Listener::Unix(UnixListener::bind(p)?),
                None => {
                    return Err(SolverControlError::WrongState {
                        operation: "listen",
                        state: self.state,
                    })
                }
            };
            self.listener = Some(listener);
        }
        match (&self.listener, &self.address) {
            (Some(Listener::Tcp(l)), _) => Ok(SolverAddress::Tcp(l.local_addr()?)),
            (_, Some(address)) => Ok(address.clone()),
            (_, None) => Err(SolverControlError::WrongState {
                operation: "listen",
                state: self.state,
            }),
        }
    }

    /// Wait for a peer to connect. Calling this again after the connection
    /// was lost accepts a new peer.
    pub fn init(&mut self) -> Result<(), SolverControlError> {
        let address = self.listen()?;
        info!("Waiting for a connection on {address}");
        let (connection, closer): (Box<dyn Connection>, StreamCloser) = match &self.listener {
            Some(Listener::Tcp(l)) => {
                let (stream, peer) = l.accept()?;
                info!("Accepted a connection from {peer}");
                let closer = StreamCloser::Tcp(stream.try_clone()?);
                (Box::new(BlobStream::from_tcp(stream)?), closer)
            }
            #[cfg(unix)]
            Some(Listener::Unix(l)) => {
                let (stream, _) = l.accept()?;
                info!("Accepted a connection on {address}");
                let closer = StreamCloser::Unix(stream.try_clone()?);
                (Box::new(BlobStream::from_unix(stream)?), closer)
            }
            None => {
                return Err(SolverControlError::WrongState {
                    operation: "init",
                    state: self.state,
                })
            }
        };
        *self.shutdown.stream.lock().unwrap() = Some(closer);
        self.connection = Some(connection);
        self.state = ControlState::Initialized;
        Ok(())
    }

    /// Use an already-established connection instead of a socket.
    pub fn init_with_connection(
        &mut self,
        connection: Box<dyn Connection>,
    ) -> Result<(), SolverControlError> {
        if self.state == ControlState::Undefined {
            self.state = ControlState::Defined;
        }
        *self.shutdown.stream.lock().unwrap() = None;
        self.connection = Some(connection);
        self.state = ControlState::Initialized;
        Ok(())
    }

    /// Receive and handle exactly one message. `false` means the connection
    /// was lost or something unexpected arrived; the caller decides whether to
    /// call [`SolverProcessControl::init`] again.
    pub fn run(&mut self) -> bool {
        if let Err(e) = self.expect_state("run", &[ControlState::Initialized, ControlState::Running])
        {
            error!("{e}");
            return false;
        }
        self.state = ControlState::Running;

        let connection = match self.connection.as_mut() {
            Some(c) => c,
            None => {
                error!("Solver control has no connection");
                return false;
            }
        };
        let msg = match connection.recv() {
            Ok(m) => m,
            Err(ConnectionError::Closed) => {
                info!("The peer closed the connection");
                return false;
            }
            Err(e) => {
                if !self.shutdown.is_requested() {
                    error!("Couldn't receive a message: {e}");
                }
                return false;
            }
        };
        self.num_handled += 1;

        let reply = match msg {
            Message::DomainRegistration(request) => {
                register(&mut self.solver, std::slice::from_ref(&request));
                None
            }
            Message::DomainRegistrationBatch(requests) => {
                register(&mut self.solver, &requests);
                None
            }
            Message::Iteration(request) => Some(Message::IterationResult(
                self.solver.perform_iteration(&request),
            )),
            Message::IterationBatch(requests) => Some(Message::IterationResultBatch(
                self.solver.perform_iterations(&requests),
            )),
            other => {
                error!("Solver control can't handle a {} message", other.kind());
                return false;
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = connection.send(&reply) {
                error!("Couldn't send the reply: {e}");
                return false;
            }
        }
        true
    }

    /// Handle messages until the connection is lost or a shutdown is
    /// requested. Returns the number of messages handled.
    pub fn serve(&mut self) -> Result<usize, SolverControlError> {
        self.expect_state(
            "serve",
            &[ControlState::Initialized, ControlState::Running],
        )?;
        let start = self.num_handled;
        while !self.shutdown.is_requested() && self.run() {}
        let num_handled = self.num_handled - start;
        debug!(
            "Solver served {num_handled} messages; {} domains still active",
            self.solver.num_active()
        );
        Ok(num_handled)
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ControlState],
    ) -> Result<(), SolverControlError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SolverControlError::WrongState {
                operation,
                state: self.state,
            })
        }
    }
}

/// Best-effort registration: failures are logged and don't stop the rest.
fn register(solver: &mut Solver, requests: &[DomainRegistrationRequest]) {
    for e in solver.register_domains(requests) {
        warn!("{e}");
    }
}
