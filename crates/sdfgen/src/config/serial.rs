//! Serial subsystem config records.

use crate::config::{encode_client_array, LeWriter, RegionResource, CLASS_SERIAL};
use crate::error::Error;

/// Capacity of the `begin_str` buffer, excluding its null terminator.
pub const MAX_BEGIN_STR_LEN: usize = 128;

/// A byte-queue connection: queue bookkeeping region, character data
/// region, and the channel id toward the peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connection {
    /// Queue bookkeeping region.
    pub queue: RegionResource,
    /// Character data region.
    pub data: RegionResource,
    /// Channel slot id toward the peer.
    pub id: u8,
}

impl Connection {
    fn encode(&self, w: &mut LeWriter) {
        self.queue.encode(w);
        self.data.encode(w);
        w.u8(self.id);
        w.pad(7);
    }
}

fn encode_optional(w: &mut LeWriter, conn: Option<&Connection>) {
    w.u8(u8::from(conn.is_some()));
    w.pad(7);
    conn.copied().unwrap_or_default().encode(w);
}

/// Driver record.
#[derive(Debug, Clone, Default)]
pub struct Driver {
    /// RX connection to the RX virtualiser; absent on TX-only systems.
    pub rx: Option<Connection>,
    /// TX connection to the TX virtualiser.
    pub tx: Connection,
    /// Baud rate the driver programs at start-up.
    pub default_baud: u64,
}

impl Driver {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_SERIAL);
        w.u64(self.default_baud);
        encode_optional(&mut w, self.rx.as_ref());
        self.tx.encode(&mut w);
        Ok(w.finish())
    }
}

/// TX virtualiser record.
#[derive(Debug, Clone)]
pub struct VirtTx {
    /// Connection to the driver.
    pub driver: Connection,
    /// Per-client connections, in client order.
    pub clients: Vec<Connection>,
    /// Whether per-client colour prefixes are written.
    pub enable_colour: bool,
    /// String printed once at start-up, stored null-terminated.
    pub begin_str: [u8; MAX_BEGIN_STR_LEN + 1],
}

impl Default for VirtTx {
    fn default() -> Self {
        Self {
            driver: Connection::default(),
            clients: Vec::new(),
            enable_colour: true,
            begin_str: [0; MAX_BEGIN_STR_LEN + 1],
        }
    }
}

impl VirtTx {
    /// Stores `s` as the begin string.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidBeginString`] when `s` exceeds
    /// [`MAX_BEGIN_STR_LEN`] bytes.
    pub fn set_begin_str(&mut self, s: &str) -> Result<(), Error> {
        let bytes = s.as_bytes();
        if bytes.len() > MAX_BEGIN_STR_LEN {
            return Err(Error::InvalidBeginString(format!(
                "{} bytes exceeds the {MAX_BEGIN_STR_LEN}-byte capacity",
                bytes.len()
            )));
        }
        self.begin_str = [0; MAX_BEGIN_STR_LEN + 1];
        self.begin_str[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_SERIAL);
        self.driver.encode(&mut w);
        w.u8(u8::from(self.enable_colour));
        w.pad(7);
        w.bytes(&self.begin_str);
        w.pad(7);
        encode_client_array(&mut w, &self.clients, "serial clients", Connection::encode)?;
        Ok(w.finish())
    }
}

/// RX virtualiser record.
#[derive(Debug, Clone, Default)]
pub struct VirtRx {
    /// Connection to the driver.
    pub driver: Connection,
    /// Per-client connections, in client order.
    pub clients: Vec<Connection>,
    /// Character that switches input focus to the next client.
    pub switch_char: u8,
    /// Character terminating a numeric client-selection escape.
    pub terminate_num_char: u8,
}

impl VirtRx {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfMemory`] past the client capacity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_SERIAL);
        self.driver.encode(&mut w);
        w.u8(self.switch_char);
        w.u8(self.terminate_num_char);
        w.pad(6);
        encode_client_array(&mut w, &self.clients, "serial clients", Connection::encode)?;
        Ok(w.finish())
    }
}

/// Client record.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// RX connection, absent on TX-only systems.
    pub rx: Option<Connection>,
    /// TX connection.
    pub tx: Option<Connection>,
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_SERIAL);
        encode_optional(&mut w, self.rx.as_ref());
        encode_optional(&mut w, self.tx.as_ref());
        Ok(w.finish())
    }
}
