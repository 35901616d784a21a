// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transports for [`Message`]s.
//!
//! Processes talk over byte streams ([`BlobStream`], usually TCP or a Unix
//! socket). Workers running as threads of one process can use
//! [`ChannelConnection`] instead.

mod error;
#[cfg(test)]
mod tests;

pub use error::ConnectionError;

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::{os::unix::net::UnixStream, path::Path};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;

use crate::messages::{read_message, write_message, Message};

/// A bidirectional, blocking message connection.
pub trait Connection: Send {
    fn send(&mut self, msg: &Message) -> Result<(), ConnectionError>;

    /// Block until a message arrives. [`ConnectionError::Closed`] is returned
    /// once the peer has gone away.
    fn recv(&mut self) -> Result<Message, ConnectionError>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn send(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        (**self).send(msg)
    }

    fn recv(&mut self) -> Result<Message, ConnectionError> {
        (**self).recv()
    }
}

/// Framed messages over a byte stream.
pub struct BlobStream<S: Read + Write> {
    reader: BufReader<S>,
    writer: BufWriter<S>,
}

impl<S: Read + Write> BlobStream<S> {
    /// Make a connection from separate read and write handles of the same
    /// stream.
    pub fn from_halves(reader: S, writer: S) -> BlobStream<S> {
        BlobStream {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }
}

impl BlobStream<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<BlobStream<TcpStream>, ConnectionError> {
        let stream = TcpStream::connect(addr)?;
        BlobStream::from_tcp(stream)
    }

    pub fn from_tcp(stream: TcpStream) -> Result<BlobStream<TcpStream>, ConnectionError> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(BlobStream::from_halves(stream, writer))
    }

    /// A handle that can shut the connection down from another thread,
    /// unblocking a pending [`Connection::recv`].
    pub fn shutdown_handle(&self) -> Result<TcpStream, ConnectionError> {
        Ok(self.reader.get_ref().try_clone()?)
    }
}

#[cfg(unix)]
impl BlobStream<UnixStream> {
    pub fn connect_unix<P: AsRef<Path>>(
        path: P,
    ) -> Result<BlobStream<UnixStream>, ConnectionError> {
        let stream = UnixStream::connect(path)?;
        BlobStream::from_unix(stream)
    }

    pub fn from_unix(stream: UnixStream) -> Result<BlobStream<UnixStream>, ConnectionError> {
        let writer = stream.try_clone()?;
        Ok(BlobStream::from_halves(stream, writer))
    }
}

impl<S: Read + Write + Send> Connection for BlobStream<S> {
    fn send(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        trace!("Sending {}", msg.kind());
        write_message(&mut self.writer, msg)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Message, ConnectionError> {
        match read_message(&mut self.reader)? {
            Some(msg) => {
                trace!("Received {}", msg.kind());
                Ok(msg)
            }
            None => Err(ConnectionError::Closed),
        }
    }
}

/// One end of an in-process connection.
pub struct ChannelConnection {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl ChannelConnection {
    /// Two connected ends.
    pub fn pair() -> (ChannelConnection, ChannelConnection) {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        (
            ChannelConnection { tx: tx_a, rx: rx_b },
            ChannelConnection { tx: tx_b, rx: rx_a },
        )
    }
}

impl Connection for ChannelConnection {
    fn send(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        self.tx
            .send(msg.clone())
            .map_err(|_| ConnectionError::Closed)
    }

    fn recv(&mut self) -> Result<Message, ConnectionError> {
        self.rx.recv().map_err(|_| ConnectionError::Closed)
    }
}
