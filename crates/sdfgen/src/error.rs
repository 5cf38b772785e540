//! Error types surfaced by every fallible generator operation.

use std::path::PathBuf;

use sdfgen_fdt::FdtError;

/// Errors produced while building, validating, or serialising a system.
///
/// Validation errors are surfaced synchronously; inserts already committed
/// to the system description before the failure are left in place, and the
/// caller is expected to discard the description on hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A device tree blob did not carry the DTB magic number.
    InvalidMagic,
    /// A driver manifest was not valid JSON.
    JsonParse {
        /// Path of the offending `config.json`.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// A driver manifest or system-description constraint was violated.
    InvalidConfig(String),
    /// No driver in the registry matches the device's compatible strings.
    UnknownDevice(String),
    /// A device-tree node was missing or malformed.
    InvalidDeviceTreeNode(String),
    /// A manifest `dt_index` pointed beyond the node's `reg` or
    /// `interrupts` entries.
    InvalidDeviceTreeIndex {
        /// Node the index was applied to.
        node: String,
        /// The out-of-range index.
        index: u32,
    },
    /// The device's `status` property is present but not `"okay"`.
    DeviceStatusInvalid {
        /// Node carrying the property.
        node: String,
        /// The observed status value.
        status: String,
    },
    /// A client with this name was already added to the subsystem.
    DuplicateClient(String),
    /// A copier with this name was already added to the subsystem.
    DuplicateCopier(String),
    /// A MAC address was assigned to more than one network client.
    DuplicateMacAddr(String),
    /// A MAC address string could not be parsed.
    InvalidMacAddr(String),
    /// A client violated a subsystem admission rule.
    InvalidClient(String),
    /// The virtualiser set handed to a subsystem is inconsistent.
    InvalidVirt(String),
    /// Subsystem or client options are inconsistent.
    InvalidOptions(String),
    /// A serial `begin_str` exceeded the config record's capacity.
    InvalidBeginString(String),
    /// `serialise_config` was called before a successful `connect`.
    NotConnected,
    /// Driver creation was attempted before the registry was probed.
    CalledBeforeProbe,
    /// An explicit channel or IRQ id is already in use in the domain.
    IdCollision {
        /// Protection domain owning the id namespace.
        pd: String,
        /// The colliding id.
        id: u8,
    },
    /// The protection domain's 0..=62 id namespace is full.
    IdExhausted {
        /// Protection domain owning the id namespace.
        pd: String,
    },
    /// A fixed-capacity config record or allocation limit was exceeded.
    OutOfMemory(String),
    /// A filesystem operation failed during probe or serialisation.
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Operating-system diagnostic.
        message: String,
    },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => f.write_str("invalid device tree magic"),
            Self::JsonParse { path, message } => {
                write!(f, "failed to parse '{}': {message}", path.display())
            }
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::UnknownDevice(msg) => write!(f, "no driver for device: {msg}"),
            Self::InvalidDeviceTreeNode(msg) => write!(f, "invalid device tree node: {msg}"),
            Self::InvalidDeviceTreeIndex { node, index } => {
                write!(f, "device tree index {index} out of range on '{node}'")
            }
            Self::DeviceStatusInvalid { node, status } => {
                write!(f, "device '{node}' has status '{status}', expected 'okay'")
            }
            Self::DuplicateClient(name) => write!(f, "duplicate client '{name}'"),
            Self::DuplicateCopier(name) => write!(f, "duplicate copier '{name}'"),
            Self::DuplicateMacAddr(mac) => write!(f, "duplicate MAC address {mac}"),
            Self::InvalidMacAddr(mac) => write!(f, "invalid MAC address '{mac}'"),
            Self::InvalidClient(msg) => write!(f, "invalid client: {msg}"),
            Self::InvalidVirt(msg) => write!(f, "invalid virtualiser: {msg}"),
            Self::InvalidOptions(msg) => write!(f, "invalid options: {msg}"),
            Self::InvalidBeginString(msg) => write!(f, "invalid begin string: {msg}"),
            Self::NotConnected => f.write_str("subsystem has not been connected"),
            Self::CalledBeforeProbe => {
                f.write_str("driver registry has not been probed")
            }
            Self::IdCollision { pd, id } => {
                write!(f, "id {id} already in use in protection domain '{pd}'")
            }
            Self::IdExhausted { pd } => {
                write!(f, "no free ids left in protection domain '{pd}'")
            }
            Self::OutOfMemory(msg) => write!(f, "capacity exceeded: {msg}"),
            Self::Io { path, message } => {
                write!(f, "I/O error on '{}': {message}", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<FdtError> for Error {
    fn from(err: FdtError) -> Self {
        match err {
            FdtError::InvalidMagic => Self::InvalidMagic,
            other => Self::InvalidDeviceTreeNode(other.to_string()),
        }
    }
}
