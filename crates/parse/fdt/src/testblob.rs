//! Synthetic DTB construction for the test suite.
//!
//! Builds well-formed blobs token by token so the parser can be exercised
//! without checking binary fixtures into the tree.

use crate::node::{TOK_BEGIN_NODE, TOK_END, TOK_END_NODE, TOK_PROP};

/// Incremental DTB builder: nodes are opened and closed explicitly,
/// property names are interned into the strings block on first use.
pub(crate) struct DtbBuilder {
    struct_block: Vec<u8>,
    strings: Vec<u8>,
    interned: Vec<(String, u32)>,
}

impl DtbBuilder {
    pub(crate) fn new() -> Self {
        Self {
            struct_block: Vec::new(),
            strings: Vec::new(),
            interned: Vec::new(),
        }
    }

    fn pad4(&mut self) {
        while self.struct_block.len() % 4 != 0 {
            self.struct_block.push(0);
        }
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some((_, off)) = self.interned.iter().find(|(n, _)| n == name) {
            return *off;
        }
        let off = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        self.interned.push((name.to_string(), off));
        off
    }

    pub(crate) fn begin_node(&mut self, name: &str) -> &mut Self {
        self.struct_block.extend_from_slice(&TOK_BEGIN_NODE.to_be_bytes());
        self.struct_block.extend_from_slice(name.as_bytes());
        self.struct_block.push(0);
        self.pad4();
        self
    }

    pub(crate) fn end_node(&mut self) -> &mut Self {
        self.struct_block.extend_from_slice(&TOK_END_NODE.to_be_bytes());
        self
    }

    pub(crate) fn prop(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let nameoff = self.intern(name);
        self.struct_block.extend_from_slice(&TOK_PROP.to_be_bytes());
        self.struct_block
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.struct_block.extend_from_slice(&nameoff.to_be_bytes());
        self.struct_block.extend_from_slice(data);
        self.pad4();
        self
    }

    pub(crate) fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let mut data = Vec::with_capacity(cells.len() * 4);
        for c in cells {
            data.extend_from_slice(&c.to_be_bytes());
        }
        self.prop(name, &data)
    }

    pub(crate) fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.prop(name, &data)
    }

    pub(crate) fn prop_str_list(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut data = Vec::new();
        for v in values {
            data.extend_from_slice(v.as_bytes());
            data.push(0);
        }
        self.prop(name, &data)
    }

    /// Assembles the header, empty reservation map, structure block, and
    /// strings block into a complete blob.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.struct_block.extend_from_slice(&TOK_END.to_be_bytes());

        let header_size = 40usize;
        let mem_rsv_off = header_size;
        let rsv_size = 16; // empty map: one zero terminator entry
        let struct_off = mem_rsv_off + rsv_size;
        let strings_off = struct_off + self.struct_block.len();
        let total_size = strings_off + self.strings.len();

        let mut dtb = Vec::with_capacity(total_size);
        let be32 = |v: usize| (v as u32).to_be_bytes();

        dtb.extend_from_slice(&0xd00d_feedu32.to_be_bytes()); // magic
        dtb.extend_from_slice(&be32(total_size)); // totalsize
        dtb.extend_from_slice(&be32(struct_off)); // off_dt_struct
        dtb.extend_from_slice(&be32(strings_off)); // off_dt_strings
        dtb.extend_from_slice(&be32(mem_rsv_off)); // off_mem_rsvmap
        dtb.extend_from_slice(&17u32.to_be_bytes()); // version
        dtb.extend_from_slice(&16u32.to_be_bytes()); // last_comp_version
        dtb.extend_from_slice(&0u32.to_be_bytes()); // boot_cpuid_phys
        dtb.extend_from_slice(&be32(self.strings.len())); // size_dt_strings
        dtb.extend_from_slice(&be32(self.struct_block.len())); // size_dt_struct

        dtb.extend_from_slice(&[0u8; 16]); // reservation map terminator
        dtb.extend_from_slice(&self.struct_block);
        dtb.extend_from_slice(&self.strings);

        assert_eq!(dtb.len(), total_size);
        dtb
    }
}

/// A small aarch64-flavoured board:
///
/// ```text
/// / {
///     model = "test-board";
///     #address-cells = <2>; #size-cells = <2>;
///     soc {
///         #address-cells = <2>; #size-cells = <2>;
///         ranges;
///         serial@9000000 {
///             compatible = "arm,pl011", "arm,primecell";
///             reg = <0 0x9000000 0 0x1000>;
///             interrupts = <0 1 4>;
///             status = "okay";
///         };
///         ethernet@a003000 {
///             compatible = "virtio,mmio";
///             reg = <0 0xa003000 0 0x200>;
///             interrupts = <0 46 1>;
///         };
///     };
/// };
/// ```
pub(crate) fn simple_board() -> Vec<u8> {
    let mut b = DtbBuilder::new();
    b.begin_node("")
        .prop_str("model", "test-board")
        .prop_cells("#address-cells", &[2])
        .prop_cells("#size-cells", &[2]);

    b.begin_node("soc")
        .prop_cells("#address-cells", &[2])
        .prop_cells("#size-cells", &[2])
        .prop("ranges", &[]);

    b.begin_node("serial@9000000")
        .prop_str_list("compatible", &["arm,pl011", "arm,primecell"])
        .prop_cells("reg", &[0, 0x900_0000, 0, 0x1000])
        .prop_cells("interrupts", &[0, 1, 4])
        .prop_str("status", "okay")
        .end_node();

    b.begin_node("ethernet@a003000")
        .prop_str_list("compatible", &["virtio,mmio"])
        .prop_cells("reg", &[0, 0xa00_3000, 0, 0x200])
        .prop_cells("interrupts", &[0, 46, 1])
        .end_node();

    b.end_node(); // soc
    b.end_node(); // root
    b.finish()
}

/// A board with a non-identity `ranges` on the bus and 1-cell addressing:
/// the `axi` bus maps child addresses `0x0..0x10000` to `0xf000_0000`,
/// so `mmc@1000` lands at CPU address `0xf000_1000` while `oob@20000`
/// falls outside every window.
pub(crate) fn translated_board() -> Vec<u8> {
    let mut b = DtbBuilder::new();
    b.begin_node("")
        .prop_cells("#address-cells", &[1])
        .prop_cells("#size-cells", &[1]);

    b.begin_node("axi")
        .prop_cells("#address-cells", &[1])
        .prop_cells("#size-cells", &[1])
        .prop_cells("ranges", &[0x0, 0xf000_0000, 0x10000]);

    b.begin_node("mmc@1000")
        .prop_str_list("compatible", &["test,mmc"])
        .prop_cells("reg", &[0x1000, 0x100])
        .prop_cells("interrupts", &[9])
        .end_node();

    b.begin_node("oob@20000")
        .prop_str_list("compatible", &["test,oob"])
        .prop_cells("reg", &[0x20000, 0x100])
        .end_node();

    b.end_node(); // axi
    b.end_node(); // root
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fdt;

    #[test]
    fn builder_produces_parseable_blob() {
        let dtb = simple_board();
        let fdt = Fdt::parse(&dtb).unwrap();
        let names: Vec<&str> = fdt
            .find_node("/soc")
            .unwrap()
            .children()
            .map(|n| n.name())
            .collect();
        assert_eq!(names, &["serial@9000000", "ethernet@a003000"]);
    }
}
