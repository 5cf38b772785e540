//! Channels between protection domains.

use crate::system::pd::PdHandle;

/// Which endpoint of a channel performs protected-procedure calls into
/// the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEnd {
    /// The first endpoint.
    A,
    /// The second endpoint.
    B,
}

/// Options applied when creating a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Endpoint allowed to PPC into the other, if any.
    pub pp: Option<ChannelEnd>,
    /// Whether endpoint A may notify endpoint B.
    pub a_notify: bool,
    /// Whether endpoint B may notify endpoint A.
    pub b_notify: bool,
    /// Explicit slot id request for endpoint A.
    pub a_id: Option<u8>,
    /// Explicit slot id request for endpoint B.
    pub b_id: Option<u8>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            pp: None,
            a_notify: true,
            b_notify: true,
            a_id: None,
            b_id: None,
        }
    }
}

/// A notification/PPC endpoint pair between two protection domains.
///
/// Endpoints reference domains by handle; the per-domain slot ids are
/// allocated from each domain's shared channel/IRQ namespace when the
/// channel is added.
#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) pd_a: PdHandle,
    pub(crate) pd_b: PdHandle,
    pub(crate) id_a: u8,
    pub(crate) id_b: u8,
    pub(crate) pp: Option<ChannelEnd>,
    pub(crate) a_notify: bool,
    pub(crate) b_notify: bool,
}

impl Channel {
    /// Endpoint A's domain.
    #[must_use]
    pub fn pd_a(&self) -> PdHandle {
        self.pd_a
    }

    /// Endpoint B's domain.
    #[must_use]
    pub fn pd_b(&self) -> PdHandle {
        self.pd_b
    }

    /// Endpoint A's slot id.
    #[must_use]
    pub fn id_a(&self) -> u8 {
        self.id_a
    }

    /// Endpoint B's slot id.
    #[must_use]
    pub fn id_b(&self) -> u8 {
        self.id_b
    }

    /// The endpoint performing PPCs, if any.
    #[must_use]
    pub fn pp(&self) -> Option<ChannelEnd> {
        self.pp
    }

    /// Whether endpoint A may notify endpoint B.
    #[must_use]
    pub fn a_notify(&self) -> bool {
        self.a_notify
    }

    /// Whether endpoint B may notify endpoint A.
    #[must_use]
    pub fn b_notify(&self) -> bool {
        self.b_notify
    }
}
