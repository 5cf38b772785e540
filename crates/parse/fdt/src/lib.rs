//! `sdfgen-fdt` --- a Flattened Device Tree (DTB) parser for system generation.
//!
//! This crate parses DTB blobs as defined by the Devicetree Specification
//! and provides zero-copy access to nodes and properties from a `&[u8]`
//! slice containing the raw DTB data. On top of the raw tree it offers a
//! device-query surface ([`DeviceNode`]) that decodes the properties a
//! system generator cares about: `reg` entries sized by the parent bus's
//! `#address-cells`/`#size-cells`, bus address translation through
//! `ranges`, `interrupts` decoding, and `compatible`/`status` lookup.
//!
//! # Usage
//!
//! ```ignore
//! let fdt = Fdt::parse(dtb_bytes)?;
//! if let Some(uart) = fdt.device("/soc/serial@10000000") {
//!     let (paddr, size) = uart.translated_reg(0).unwrap();
//! }
//! ```

pub mod device;
pub mod node;

pub use device::{DeviceNode, InterruptStyle, IrqTrigger};
pub use node::{FdtNode, FdtProperty, PropertyIter, StrListIter};

use node::{Token, TokenCursor};

/// The DTB header magic number.
const FDT_MAGIC: u32 = 0xd00d_feed;
/// Lowest `last_comp_version` this parser understands.
const FDT_MIN_COMPAT_VERSION: u32 = 16;
/// The fixed header is ten big-endian words.
const FDT_HEADER_WORDS: usize = 10;

/// Errors surfaced while loading a DTB blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    /// The blob does not begin with the DTB magic number.
    InvalidMagic,
    /// The header's compatibility version is older than this parser
    /// understands; carries the version found.
    UnsupportedVersion(u32),
    /// The header asks for more bytes than the blob holds.
    Truncated {
        /// Bytes the header requires.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },
}

impl core::fmt::Display for FdtError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => f.write_str("not a DTB blob (bad magic)"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported DTB compatibility version {version}")
            }
            Self::Truncated { needed, have } => {
                write!(f, "DTB truncated: header needs {needed} bytes, blob has {have}")
            }
        }
    }
}

impl std::error::Error for FdtError {}

/// Slices a header-declared block out of the blob, reporting how much
/// the header wanted against what the blob provides.
fn block(blob: &[u8], offset: usize, len: usize) -> Result<&[u8], FdtError> {
    offset
        .checked_add(len)
        .and_then(|end| blob.get(offset..end))
        .ok_or(FdtError::Truncated {
            needed: offset.saturating_add(len),
            have: blob.len(),
        })
}

/// Parsed Flattened Device Tree.
///
/// Borrows the raw DTB `&[u8]` and provides access to the node tree.
#[derive(Debug)]
pub struct Fdt<'a> {
    data: &'a [u8],
    struct_block: &'a [u8],
    strings_block: &'a [u8],
}

impl<'a> Fdt<'a> {
    /// Parses a DTB blob from raw bytes.
    ///
    /// Trailing bytes past the header's `totalsize` are ignored, since
    /// blobs loaded from disk are often padded to a sector or flash
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtError`] if the blob is malformed.
    pub fn parse(data: &'a [u8]) -> Result<Self, FdtError> {
        // Header layout: magic, totalsize, off_dt_struct, off_dt_strings,
        // off_mem_rsvmap, version, last_comp_version, boot_cpuid_phys,
        // size_dt_strings, size_dt_struct.
        let header = block(data, 0, FDT_HEADER_WORDS * 4)?;
        let word = |i: usize| node::cell_at(header, i).unwrap_or(0);

        if word(0) != FDT_MAGIC {
            return Err(FdtError::InvalidMagic);
        }
        let compat = word(6);
        if compat < FDT_MIN_COMPAT_VERSION {
            return Err(FdtError::UnsupportedVersion(compat));
        }

        let blob = block(data, 0, word(1) as usize)?;
        let struct_block = block(blob, word(2) as usize, word(9) as usize)?;
        let strings_block = block(blob, word(3) as usize, word(8) as usize)?;

        Ok(Self {
            data: blob,
            struct_block,
            strings_block,
        })
    }

    /// Returns the root node of the device tree.
    ///
    /// Returns `None` if the structure block does not begin with a valid
    /// root node, which cannot happen for a blob produced by a DTB
    /// compiler but is reachable with hand-corrupted input.
    #[must_use]
    pub fn root(&self) -> Option<FdtNode<'a>> {
        let mut cursor = TokenCursor::at(self.struct_block, 0);
        match cursor.next_token()? {
            Token::BeginNode(name) => Some(FdtNode::new(
                self.struct_block,
                self.strings_block,
                name,
                cursor.pos(),
            )),
            _ => None,
        }
    }

    /// Finds a node by its full path (e.g. `"/soc/serial@10000000"`).
    ///
    /// Returns `None` if any component along the path is not found.
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<FdtNode<'a>> {
        path.split('/')
            .filter(|component| !component.is_empty())
            .try_fold(self.root()?, |node, component| node.find_child(component))
    }

    /// Resolves a node path into a [`DeviceNode`], capturing the bus
    /// hierarchy (`#address-cells`, `#size-cells`, `ranges`) from the
    /// root down so that `reg` entries can be decoded and translated.
    ///
    /// Returns `None` if the path does not resolve.
    #[must_use]
    pub fn device(&self, path: &str) -> Option<DeviceNode<'a>> {
        DeviceNode::resolve(self, path)
    }

    /// Returns the size of the blob in bytes, per its header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
pub(crate) mod testblob;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_dtb() {
        let dtb = testblob::simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        assert_eq!(fdt.total_size(), dtb.len());
    }

    #[test]
    fn parse_ignores_trailing_padding() {
        let mut dtb = testblob::simple_board();
        let declared = dtb.len();
        dtb.resize(declared + 512, 0);
        let fdt = Fdt::parse(&dtb).unwrap();
        assert_eq!(fdt.total_size(), declared);
    }

    #[test]
    fn parse_bad_magic() {
        let mut dtb = testblob::simple_board();
        dtb[0] = 0;
        assert!(matches!(Fdt::parse(&dtb), Err(FdtError::InvalidMagic)));
    }

    #[test]
    fn parse_bad_version() {
        let mut dtb = testblob::simple_board();
        // last_comp_version is word 6 of the header.
        dtb[24..28].copy_from_slice(&15u32.to_be_bytes());
        assert!(matches!(
            Fdt::parse(&dtb),
            Err(FdtError::UnsupportedVersion(15))
        ));
    }

    #[test]
    fn parse_truncated() {
        let dtb = testblob::simple_board();
        match Fdt::parse(&dtb[..20]) {
            Err(FdtError::Truncated { needed, have }) => {
                assert_eq!(needed, 40);
                assert_eq!(have, 20);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn parse_block_past_end() {
        let mut dtb = testblob::simple_board();
        // Point off_dt_struct (word 2) past the end of the blob.
        let bogus = (dtb.len() as u32 + 0x1000).to_be_bytes();
        dtb[8..12].copy_from_slice(&bogus);
        assert!(matches!(
            Fdt::parse(&dtb),
            Err(FdtError::Truncated { .. })
        ));
    }

    #[test]
    fn root_name_is_empty() {
        let dtb = testblob::simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        assert_eq!(fdt.root().unwrap().name(), "");
    }

    #[test]
    fn find_node_nested() {
        let dtb = testblob::simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        let uart = fdt.find_node("/soc/serial@9000000").unwrap();
        assert_eq!(uart.name(), "serial@9000000");
    }

    #[test]
    fn find_node_missing() {
        let dtb = testblob::simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        assert!(fdt.find_node("/soc/nope").is_none());
    }

    #[test]
    fn property_lookup() {
        let dtb = testblob::simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        let uart = fdt.find_node("/soc/serial@9000000").unwrap();
        let compat = uart.property("compatible").unwrap();
        let list: Vec<&str> = compat.as_str_list().collect();
        assert_eq!(list, &["arm,pl011", "arm,primecell"]);
    }
}
