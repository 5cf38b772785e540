//! GPU subsystem config records.

use crate::config::{encode_client_array, DeviceRegionResource, LeWriter, CLASS_GPU};
use crate::error::Error;

/// The full region set shared between two GPU components: event ring,
/// request queue, response queue, and the frame data region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connection {
    /// Event ring region.
    pub events: DeviceRegionResource,
    /// Request queue region.
    pub req_queue: DeviceRegionResource,
    /// Response queue region.
    pub resp_queue: DeviceRegionResource,
    /// Frame data region.
    pub data: DeviceRegionResource,
    /// Channel slot id toward the peer.
    pub id: u8,
}

impl Connection {
    fn encode(&self, w: &mut LeWriter) {
        self.events.encode(w);
        self.req_queue.encode(w);
        self.resp_queue.encode(w);
        self.data.encode(w);
        w.u8(self.id);
        w.pad(7);
    }
}

/// Driver record.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    /// Regions shared with the virtualiser.
    pub virt: Connection,
}

impl Driver {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_GPU);
        self.virt.encode(&mut w);
        Ok(w.finish())
    }
}

/// Virtualiser record.
#[derive(Debug, Clone, Default)]
pub struct Virt {
    /// Regions shared with the driver.
    pub driver: Connection,
    /// Per-client region sets, in client order.
    pub clients: Vec<Connection>,
}

impl Virt {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_GPU);
        self.driver.encode(&mut w);
        encode_client_array(&mut w, &self.clients, "gpu clients", Connection::encode)?;
        Ok(w.finish())
    }
}

/// Client record.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// Regions shared with the virtualiser.
    pub virt: Connection,
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_GPU);
        self.virt.encode(&mut w);
        Ok(w.finish())
    }
}
