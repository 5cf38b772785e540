//! Device-query surface over the raw node tree.
//!
//! A [`DeviceNode`] is a node resolved by path together with the bus
//! hierarchy above it, so that `reg` entries can be decoded with the
//! correct `#address-cells`/`#size-cells` and bus addresses translated
//! into CPU physical addresses through each ancestor's `ranges`.

use crate::node::{cell_at, FdtNode};
use crate::Fdt;

/// Default `#address-cells` when a bus does not declare one.
const DEFAULT_ADDRESS_CELLS: u32 = 2;
/// Default `#size-cells` when a bus does not declare one.
const DEFAULT_SIZE_CELLS: u32 = 1;

/// Trigger mode decoded from an `interrupts` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqTrigger {
    /// Edge-triggered interrupt.
    Edge,
    /// Level-triggered interrupt.
    Level,
}

/// How `interrupts` entries are encoded for this machine.
///
/// The caller picks the style from the target architecture; the flattened
/// tree itself is not consulted for the interrupt parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStyle {
    /// ARM GIC three-cell form: `<type number flags>` where type 0 is an
    /// SPI (hardware number = number + 32) and type 1 a PPI (+ 16), and
    /// the low flag bits 1/2 mean edge triggered.
    Gic,
    /// Plain form of `cells` cells per entry: cell 0 is the hardware
    /// number; when a second cell is present its low bit selects edge.
    Plain(u32),
}

/// One bus level between a device and the root, as needed for address
/// translation: the cells in force for the bus's children and the bus's
/// raw `ranges` data.
struct BusLevel<'a> {
    child_address_cells: u32,
    child_size_cells: u32,
    parent_address_cells: u32,
    /// `None` when the bus carries no `ranges` property; an empty slice
    /// is the identity mapping.
    ranges: Option<&'a [u8]>,
}

/// A device node resolved by path, ready for `reg`/`interrupts` queries.
pub struct DeviceNode<'a> {
    node: FdtNode<'a>,
    path: String,
    /// Cells used to decode this node's own `reg` (from its parent).
    reg_address_cells: u32,
    reg_size_cells: u32,
    /// Ancestors strictly between the node and the root, innermost first.
    translations: Vec<BusLevel<'a>>,
}

fn cells_of(node: &FdtNode, name: &str, default: u32) -> u32 {
    node.property(name)
        .and_then(|p| p.as_u32())
        .unwrap_or(default)
}

/// Folds `count` big-endian cells starting at cell `index` into a `u64`.
fn fold_cells(data: &[u8], index: usize, count: u32) -> Option<u64> {
    let mut value: u64 = 0;
    for i in 0..count as usize {
        value = (value << 32) | u64::from(cell_at(data, index + i)?);
    }
    Some(value)
}

impl<'a> DeviceNode<'a> {
    pub(crate) fn resolve(fdt: &Fdt<'a>, path: &str) -> Option<DeviceNode<'a>> {
        // Walk the path, keeping the full ancestor chain.
        let mut chain: Vec<FdtNode<'a>> = vec![fdt.root()?];
        for component in path.split('/') {
            if component.is_empty() {
                continue;
            }
            let next = chain.last()?.find_child(component)?;
            chain.push(next);
        }

        // A device must have a parent bus; the root itself is not a device.
        if chain.len() < 2 {
            return None;
        }

        let node = *chain.last()?;
        let parent = &chain[chain.len() - 2];
        let reg_address_cells = cells_of(parent, "#address-cells", DEFAULT_ADDRESS_CELLS);
        let reg_size_cells = cells_of(parent, "#size-cells", DEFAULT_SIZE_CELLS);

        // Every ancestor between the node and the root contributes one
        // translation level; the root has no parent to translate into.
        let mut translations = Vec::new();
        for i in (1..chain.len() - 1).rev() {
            let bus = &chain[i];
            let above = &chain[i - 1];
            translations.push(BusLevel {
                child_address_cells: cells_of(bus, "#address-cells", DEFAULT_ADDRESS_CELLS),
                child_size_cells: cells_of(bus, "#size-cells", DEFAULT_SIZE_CELLS),
                parent_address_cells: cells_of(above, "#address-cells", DEFAULT_ADDRESS_CELLS),
                ranges: bus.property("ranges").map(|p| p.data()),
            });
        }

        Some(DeviceNode {
            node,
            path: path.to_string(),
            reg_address_cells,
            reg_size_cells,
            translations,
        })
    }

    /// Returns the node's name (last path component).
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.node.name()
    }

    /// Returns the full path the node was resolved from.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the underlying tree node.
    #[must_use]
    pub fn node(&self) -> FdtNode<'a> {
        self.node
    }

    /// Returns the node's `compatible` strings, most specific first.
    #[must_use]
    pub fn compatibles(&self) -> Vec<&'a str> {
        self.node
            .property("compatible")
            .map(|p| p.as_str_list().collect())
            .unwrap_or_default()
    }

    /// Returns the node's `status` property, if present.
    #[must_use]
    pub fn status(&self) -> Option<&'a str> {
        self.node.property("status").and_then(|p| p.as_str())
    }

    /// Returns the number of `reg` entries.
    #[must_use]
    pub fn reg_count(&self) -> usize {
        let stride = (self.reg_address_cells + self.reg_size_cells) as usize;
        match self.node.property("reg") {
            Some(reg) if stride > 0 => reg.cell_count() / stride,
            _ => 0,
        }
    }

    /// Decodes the `index`-th `reg` entry as `(bus address, size)`.
    #[must_use]
    pub fn reg(&self, index: usize) -> Option<(u64, u64)> {
        let reg = self.node.property("reg")?;
        let stride = (self.reg_address_cells + self.reg_size_cells) as usize;
        let base = index.checked_mul(stride)?;
        if base + stride > reg.cell_count() {
            return None;
        }
        let data = reg.data();
        let addr = fold_cells(data, base, self.reg_address_cells)?;
        let size = fold_cells(data, base + self.reg_address_cells as usize, self.reg_size_cells)?;
        Some((addr, size))
    }

    /// Decodes the `index`-th `reg` entry and translates its address
    /// through every ancestor's `ranges` into a CPU physical address.
    ///
    /// A bus without a `ranges` property is treated as the identity
    /// mapping, as is an empty `ranges`. Returns `None` when an entry is
    /// out of range or a populated `ranges` has no window covering the
    /// address.
    #[must_use]
    pub fn translated_reg(&self, index: usize) -> Option<(u64, u64)> {
        let (mut addr, size) = self.reg(index)?;

        for level in &self.translations {
            let Some(data) = level.ranges else {
                continue;
            };
            if data.is_empty() {
                continue;
            }

            let stride = (level.child_address_cells
                + level.parent_address_cells
                + level.child_size_cells) as usize;
            if stride == 0 {
                return None;
            }

            let entries = data.len() / 4 / stride;
            let mut translated = None;
            for i in 0..entries {
                let base = i * stride;
                let child = fold_cells(data, base, level.child_address_cells)?;
                let parent = fold_cells(
                    data,
                    base + level.child_address_cells as usize,
                    level.parent_address_cells,
                )?;
                let window = fold_cells(
                    data,
                    base + (level.child_address_cells + level.parent_address_cells) as usize,
                    level.child_size_cells,
                )?;
                if addr >= child && addr - child < window {
                    translated = Some(parent + (addr - child));
                    break;
                }
            }
            addr = translated?;
        }

        Some((addr, size))
    }

    /// Decodes the `index`-th `interrupts` entry as a hardware interrupt
    /// number and trigger mode, per the given encoding style.
    #[must_use]
    pub fn interrupt(&self, index: usize, style: InterruptStyle) -> Option<(u64, IrqTrigger)> {
        let prop = self.node.property("interrupts")?;

        match style {
            InterruptStyle::Gic => {
                let base = index.checked_mul(3)?;
                let kind = prop.cell(base)?;
                let number = u64::from(prop.cell(base + 1)?);
                let flags = prop.cell(base + 2)?;

                // GIC bindings: type 0 = SPI (offset 32), 1 = PPI (offset 16).
                let number = match kind {
                    0 => number + 32,
                    1 => number + 16,
                    _ => return None,
                };
                let trigger = if flags & 0x3 != 0 {
                    IrqTrigger::Edge
                } else {
                    IrqTrigger::Level
                };
                Some((number, trigger))
            }
            InterruptStyle::Plain(cells) => {
                if cells == 0 {
                    return None;
                }
                let base = index.checked_mul(cells as usize)?;
                let number = u64::from(prop.cell(base)?);
                let trigger = if cells >= 2 && prop.cell(base + 1)? & 1 != 0 {
                    IrqTrigger::Edge
                } else {
                    IrqTrigger::Level
                };
                Some((number, trigger))
            }
        }
    }
}
