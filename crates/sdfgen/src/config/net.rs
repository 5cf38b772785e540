//! Network subsystem config records.

use crate::config::{
    encode_client_array, DeviceRegionResource, LeWriter, RegionResource, CLASS_LIB_LWIP,
    CLASS_NET,
};
use crate::error::Error;

/// A free/active queue pair shared with a peer, plus the channel id used
/// to signal it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connection {
    /// Free (empty-buffer) queue region.
    pub free_queue: RegionResource,
    /// Active (filled-buffer) queue region.
    pub active_queue: RegionResource,
    /// Number of buffer slots in each queue.
    pub num_buffers: u16,
    /// Channel slot id toward the peer.
    pub id: u8,
}

impl Connection {
    fn encode(&self, w: &mut LeWriter) {
        self.free_queue.encode(w);
        self.active_queue.encode(w);
        w.u16(self.num_buffers);
        w.u8(self.id);
        w.pad(5);
    }
}

/// Driver-side record: one connection toward each virtualiser.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    /// Connection to the RX virtualiser.
    pub virt_rx: Connection,
    /// Connection to the TX virtualiser.
    pub virt_tx: Connection,
}

impl Driver {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_NET);
        self.virt_rx.encode(&mut w);
        self.virt_tx.encode(&mut w);
        Ok(w.finish())
    }
}

/// Per-client entry in the RX virtualiser record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtRxClient {
    /// Connection toward the client (or its copier).
    pub conn: Connection,
    /// Destination MAC the virtualiser demultiplexes on.
    pub mac_addr: [u8; 6],
}

/// RX virtualiser record.
#[derive(Debug, Clone, Default)]
pub struct VirtRx {
    /// Connection to the driver.
    pub driver: Connection,
    /// The shared DMA region packets arrive in.
    pub data_region: DeviceRegionResource,
    /// Per-client connections, in client order.
    pub clients: Vec<VirtRxClient>,
}

impl VirtRx {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_NET);
        self.driver.encode(&mut w);
        self.data_region.encode(&mut w);
        encode_client_array(&mut w, &self.clients, "rx clients", |c, w| {
            c.conn.encode(w);
            w.bytes(&c.mac_addr);
            w.pad(2);
        })?;
        Ok(w.finish())
    }
}

/// Per-client entry in the TX virtualiser record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtTxClient {
    /// Connection toward the client.
    pub conn: Connection,
    /// The client's TX data region as mapped into the virtualiser.
    pub data: DeviceRegionResource,
}

/// TX virtualiser record.
#[derive(Debug, Clone, Default)]
pub struct VirtTx {
    /// Connection to the driver.
    pub driver: Connection,
    /// Per-client connections, in client order.
    pub clients: Vec<VirtTxClient>,
}

impl VirtTx {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_NET);
        self.driver.encode(&mut w);
        encode_client_array(&mut w, &self.clients, "tx clients", |c, w| {
            c.conn.encode(w);
            c.data.encode(w);
        })?;
        Ok(w.finish())
    }
}

/// Copier record: it owns the virtualiser-facing and client-facing sides
/// of one RX chain.
#[derive(Debug, Clone, Default)]
pub struct Copy {
    /// Connection to the RX virtualiser.
    pub device: Connection,
    /// The shared DMA region, as mapped into the copier.
    pub device_data: RegionResource,
    /// Connection to the client.
    pub client: Connection,
    /// The client's private RX region, as mapped into the copier.
    pub client_data: RegionResource,
}

impl Copy {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_NET);
        self.device.encode(&mut w);
        self.device_data.encode(&mut w);
        self.client.encode(&mut w);
        self.client_data.encode(&mut w);
        Ok(w.finish())
    }
}

/// Client record: RX and TX sides, either of which may be absent.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// RX connection and data region, when the client receives.
    pub rx: Option<(Connection, RegionResource)>,
    /// TX connection and data region, when the client transmits.
    pub tx: Option<(Connection, RegionResource)>,
    /// The client's MAC address.
    pub mac_addr: [u8; 6],
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_NET);
        encode_optional_side(&mut w, self.rx.as_ref());
        encode_optional_side(&mut w, self.tx.as_ref());
        w.bytes(&self.mac_addr);
        w.pad(2);
        Ok(w.finish())
    }
}

fn encode_optional_side(w: &mut LeWriter, side: Option<&(Connection, RegionResource)>) {
    w.u8(u8::from(side.is_some()));
    w.pad(7);
    let (conn, data) = side.copied().unwrap_or_default();
    conn.encode(w);
    data.encode(w);
}

/// lwIP helper record: the pbuf pool backing the client's stack.
#[derive(Debug, Clone, Default)]
pub struct LibSddfLwip {
    /// The pbuf pool region, as mapped into the client.
    pub pbuf_pool: RegionResource,
    /// Number of pbuf structures the pool holds.
    pub num_pbufs: u64,
}

impl LibSddfLwip {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_LIB_LWIP);
        self.pbuf_pool.encode(&mut w);
        w.u64(self.num_pbufs);
        Ok(w.finish())
    }
}
