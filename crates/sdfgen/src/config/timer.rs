//! Timer subsystem config records.

use crate::config::{LeWriter, CLASS_TIMER};
use crate::error::Error;

/// Client record: the channel id used to call the timer driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct Client {
    /// Channel slot id toward the driver.
    pub driver_id: u8,
}

impl Client {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for uniformity with the other
    /// records.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut w = LeWriter::record(CLASS_TIMER);
        w.u8(self.driver_id);
        w.pad(7);
        Ok(w.finish())
    }
}
