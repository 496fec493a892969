//! Streamed writes to a characteristic.

use std::io;

use btuuid::BluetoothUuid;
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;

/// Bytes of every ATT write that are not payload: the opcode and the attribute handle.
const ATT_WRITE_HEADER: u16 = 3;

/// Sends everything written to it to one characteristic as writes without response, each no
/// larger than the link's MTU allows.
///
/// Implements [`io::Write`], so it composes with `write_all`, `io::copy` and buffered writers.
/// Every write blocks until the request has been handed to the platform.
#[derive(Debug)]
pub struct CharacteristicWriter {
    connection: Connection,
    uuid: BluetoothUuid,
    mtu: u16,
}

impl CharacteristicWriter {
    /// The ATT MTU of the link, as reported when the stream was opened.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// The largest payload a single write carries.
    pub fn chunk_size(&self) -> usize {
        usize::from(self.mtu.saturating_sub(ATT_WRITE_HEADER).max(1))
    }

    /// Sends all of `data`, split into as many writes as it takes.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.chunk_size()) {
            self.connection
                .write_without_response_by_uuid(&self.uuid, chunk)?;
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl io::Write for CharacteristicWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(self.chunk_size());
        self.connection
            .write_without_response_by_uuid(&self.uuid, &buf[..len])
            .map_err(io::Error::other)?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection {
    /// Opens a stream of writes without response to the characteristic identified by `uuid`.
    ///
    /// Fails with [`ErrorKind::NotSupported`][crate::ErrorKind::NotSupported] unless the
    /// characteristic accepts writes without response.
    pub fn write_stream(&self, uuid: &BluetoothUuid) -> Result<CharacteristicWriter> {
        let target = *uuid;
        let mtu = self.wait(
            self.with_session(move |session, reply| session.acquire_write(&target, reply))?,
        )?;
        trace!("{}: write stream to {uuid} with MTU {mtu}", self.address());

        Ok(CharacteristicWriter {
            connection: self.clone(),
            uuid: *uuid,
            mtu,
        })
    }
}

