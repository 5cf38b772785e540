//! I²C subsystem config records.

use crate::config::{encode_client_array, LeWriter, RegionResource, CLASS_I2C};
use crate::error::Error;

/// A request/response queue pair plus the channel id toward the peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connection {
    /// Request queue region.
    pub req_queue: RegionResource,
    /// Response queue region.
    pub resp_queue: RegionResource,
    /// Channel slot id toward the peer.
    pub id: u8,
}

impl Connection {
    fn encode(&self, w: &mut LeWriter) {
        self.req_queue.encode(w);
        self.resp_queue.encode(w);
        w.u8(self.id);
        w.pad(7);
    }
}

/// Driver record: the virtualiser connection plus every client's data
/// region, which the driver reads and writes transfer buffers in.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    /// Connection to the virtualiser.
    pub virt: Connection,
    /// Per-client data regions, in client order.
    pub client_data: Vec<RegionResource>,
}

impl Driver {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_I2C);
        self.virt.encode(&mut w);
        encode_client_array(&mut w, &self.client_data, "i2c clients", |r, w| {
            r.encode(w);
        })?;
        Ok(w.finish())
    }
}

/// Per-client entry in the virtualiser record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtClient {
    /// Connection to the client.
    pub conn: Connection,
    /// The client's data region, as mapped into the virtualiser.
    pub data: RegionResource,
}

/// Virtualiser record.
#[derive(Debug, Clone, Default)]
pub struct Virt {
    /// Connection to the driver.
    pub driver: Connection,
    /// Per-client entries, in client order.
    pub clients: Vec<VirtClient>,
}

impl Virt {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_I2C);
        self.driver.encode(&mut w);
        encode_client_array(&mut w, &self.clients, "i2c clients", |c, w| {
            c.conn.encode(w);
            c.data.encode(w);
        })?;
        Ok(w.finish())
    }
}

/// Client record.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// Connection to the virtualiser.
    pub virt: Connection,
    /// The client's transfer-buffer region.
    pub data: RegionResource,
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_I2C);
        self.virt.encode(&mut w);
        self.data.encode(&mut w);
        Ok(w.finish())
    }
}
