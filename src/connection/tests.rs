// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::net::{Shutdown, TcpListener};

use super::*;
use crate::messages::{ChunkDoneMsg, IterationResult};

#[test]
fn test_channel_pair() {
    let (mut a, mut b) = ChannelConnection::pair();
    a.send(&Message::ChunkDone(ChunkDoneMsg { kernel_id: 1 }))
        .unwrap();
    b.send(&Message::IterationResult(IterationResult::not_tracked(3)))
        .unwrap();
    assert_eq!(
        b.recv().unwrap(),
        Message::ChunkDone(ChunkDoneMsg { kernel_id: 1 })
    );
    assert_eq!(
        a.recv().unwrap(),
        Message::IterationResult(IterationResult::not_tracked(3))
    );

    drop(b);
    assert!(matches!(a.recv(), Err(ConnectionError::Closed)));
    assert!(matches!(
        a.send(&Message::ChunkDone(ChunkDoneMsg { kernel_id: 1 })),
        Err(ConnectionError::Closed)
    ));
}

#[test]
fn test_tcp_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let echo = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut conn = BlobStream::from_tcp(stream).unwrap();
        let mut num_echoed = 0;
        loop {
            match conn.recv() {
                Ok(msg) => {
                    conn.send(&msg).unwrap();
                    num_echoed += 1;
                }
                Err(ConnectionError::Closed) => break num_echoed,
                Err(e) => panic!("{e}"),
            }
        }
    });

    let mut conn = BlobStream::connect(addr).unwrap();
    for kernel_id in 0..3 {
        let msg = Message::ChunkDone(ChunkDoneMsg { kernel_id });
        conn.send(&msg).unwrap();
        assert_eq!(conn.recv().unwrap(), msg);
    }
    conn.shutdown_handle()
        .unwrap()
        .shutdown(Shutdown::Write)
        .unwrap();
    assert_eq!(echo.join().unwrap(), 3);
}
