// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::messages::{CodecError, MessageKind};

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("The peer closed the connection")]
    Closed,

    #[error("Expected a {expected} message, but received {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: MessageKind,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
