//! Block subsystem config records.

use crate::config::{
    encode_client_array, DeviceRegionResource, LeWriter, RegionResource, CLASS_BLK,
};
use crate::error::Error;

/// The region set shared between two block components: storage
/// information page, request queue, response queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSet {
    /// Storage information page.
    pub storage_info: RegionResource,
    /// Request queue region.
    pub req_queue: RegionResource,
    /// Response queue region.
    pub resp_queue: RegionResource,
    /// Number of request slots in each queue.
    pub num_buffers: u16,
    /// Channel slot id toward the peer.
    pub id: u8,
}

impl QueueSet {
    fn encode(&self, w: &mut LeWriter) {
        self.storage_info.encode(w);
        self.req_queue.encode(w);
        self.resp_queue.encode(w);
        w.u16(self.num_buffers);
        w.u8(self.id);
        w.pad(5);
    }
}

/// Driver record.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    /// Queues shared with the virtualiser.
    pub virt: QueueSet,
    /// Scratch region the driver reads partition tables into.
    pub data: DeviceRegionResource,
}

impl Driver {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_BLK);
        self.virt.encode(&mut w);
        self.data.encode(&mut w);
        Ok(w.finish())
    }
}

/// Per-client entry in the virtualiser record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtClient {
    /// Queues shared with the client.
    pub conn: QueueSet,
    /// The client's data region, as mapped into the virtualiser.
    pub data: DeviceRegionResource,
    /// Partition the client's requests are confined to.
    pub partition: u32,
}

/// Virtualiser record: the driver side plus one entry per client.
#[derive(Debug, Clone, Default)]
pub struct Virt {
    /// Queues shared with the driver.
    pub driver: QueueSet,
    /// The driver's scratch region, as mapped into the virtualiser.
    pub driver_data: DeviceRegionResource,
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
        let mut w = LeWriter::record(CLASS_BLK);
        self.driver.encode(&mut w);
        self.driver_data.encode(&mut w);
        encode_client_array(&mut w, &self.clients, "blk clients", |c, w| {
            c.conn.encode(w);
            c.data.encode(w);
            w.u32(c.partition);
            w.pad(4);
        })?;
        Ok(w.finish())
    }
}

/// Client record.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// Queues shared with the virtualiser.
    pub virt: QueueSet,
    /// The client's data region.
    pub data: RegionResource,
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_BLK);
        self.virt.encode(&mut w);
        self.data.encode(&mut w);
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virt_record_is_fixed_size() {
        let empty = Virt::default().serialise().unwrap();
        let mut one = Virt::default();
        one.clients.push(VirtClient {
            partition: 3,
            ..VirtClient::default()
        });
        assert_eq!(empty.len(), one.serialise().unwrap().len());
    }
}
