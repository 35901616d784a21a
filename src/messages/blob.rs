// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Length-prefixed blob framing of [`Message`]s.
//!
//! Each frame is:
//!
//! | bytes | contents                                  |
//! |-------|-------------------------------------------|
//! | 4     | ASCII "DCAL"                              |
//! | 2     | format version (little-endian `u16`)      |
//! | 8     | payload length (little-endian `u64`)      |
//! | n     | self-describing (JSON) encoded `Message`  |

use std::io::{ErrorKind, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use super::Message;

const MAGIC: [u8; 4] = *b"DCAL";
const FORMAT_VERSION: u16 = 1;

/// Refuse to allocate more than this for a single payload (1 GiB). Anything
/// larger indicates a corrupt stream.
const MAX_PAYLOAD_BYTES: u64 = 1 << 30;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Blob stream is corrupt: expected the frame to start with {MAGIC:?}, got {got:?}")]
    BadMagic { got: [u8; 4] },

    #[error("Unsupported blob format version {got} (this build understands version {FORMAT_VERSION})")]
    BadVersion { got: u16 },

    #[error("Blob payload of {size} bytes exceeds the limit of {MAX_PAYLOAD_BYTES} bytes")]
    TooLarge { size: u64 },

    #[error("Blob stream ended in the middle of a frame")]
    Truncated,

    #[error("Couldn't decode message payload: {0}")]
    Decode(serde_json::Error),

    #[error("Couldn't encode message payload: {0}")]
    Encode(serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Write one framed message. The writer is flushed.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), CodecError> {
    let payload = serde_json::to_vec(msg).map_err(CodecError::Encode)?;
    writer.write_all(&MAGIC)?;
    writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u64::<LittleEndian>(payload.len() as u64)?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed message. `Ok(None)` means the stream ended cleanly before
/// a new frame started, i.e. the peer closed the connection.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>, CodecError> {
    let mut magic = [0; 4];
    let mut num_read = 0;
    while num_read < magic.len() {
        match reader.read(&mut magic[num_read..]) {
            Ok(0) if num_read == 0 => return Ok(None),
            Ok(0) => return Err(CodecError::Truncated),
            Ok(n) => num_read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if magic != MAGIC {
        return Err(CodecError::BadMagic { got: magic });
    }

    let version = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(CodecError::BadVersion { got: version });
    }
    let size = reader.read_u64::<LittleEndian>().map_err(truncated)?;
    if size > MAX_PAYLOAD_BYTES {
        return Err(CodecError::TooLarge { size });
    }

    let mut payload = vec![0; size as usize];
    reader.read_exact(&mut payload).map_err(truncated)?;
    let msg = serde_json::from_slice(&payload).map_err(CodecError::Decode)?;
    Ok(Some(msg))
}

fn truncated(e: std::io::Error) -> CodecError {
    if e.kind() == ErrorKind::UnexpectedEof {
        CodecError::Truncated
    } else {
        CodecError::IO(e)
    }
}
