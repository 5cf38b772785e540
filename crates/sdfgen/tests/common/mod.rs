//! Shared fixtures: a synthetic board DTB and a driver repository laid
//! out on disk the way `probe` expects.
#![allow(dead_code)] // each test binary uses a different subset

use std::fs;
use std::path::Path;

// ---- DTB construction -------------------------------------------------------

const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_END: u32 = 9;

/// Minimal token-level DTB builder, enough to express the fixtures.
pub struct DtbBuilder {
    struct_block: Vec<u8>,
    strings: Vec<u8>,
    interned: Vec<(String, u32)>,
}

impl DtbBuilder {
    pub fn new() -> Self {
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

    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.struct_block.extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes());
        self.struct_block.extend_from_slice(name.as_bytes());
        self.struct_block.push(0);
        self.pad4();
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        self.struct_block.extend_from_slice(&FDT_END_NODE.to_be_bytes());
        self
    }

    pub fn prop(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let nameoff = self.intern(name);
        self.struct_block.extend_from_slice(&FDT_PROP.to_be_bytes());
        self.struct_block
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.struct_block.extend_from_slice(&nameoff.to_be_bytes());
        self.struct_block.extend_from_slice(data);
        self.pad4();
        self
    }

    pub fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let mut data = Vec::with_capacity(cells.len() * 4);
        for c in cells {
            data.extend_from_slice(&c.to_be_bytes());
        }
        self.prop(name, &data)
    }

    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.prop(name, &data)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.struct_block.extend_from_slice(&FDT_END.to_be_bytes());

        let struct_off = 40 + 16; // header + empty reservation map
        let strings_off = struct_off + self.struct_block.len();
        let total_size = strings_off + self.strings.len();

        let mut dtb = Vec::with_capacity(total_size);
        let be32 = |v: usize| (v as u32).to_be_bytes();
        dtb.extend_from_slice(&0xd00d_feedu32.to_be_bytes());
        dtb.extend_from_slice(&be32(total_size));
        dtb.extend_from_slice(&be32(struct_off));
        dtb.extend_from_slice(&be32(strings_off));
        dtb.extend_from_slice(&be32(40));
        dtb.extend_from_slice(&17u32.to_be_bytes());
        dtb.extend_from_slice(&16u32.to_be_bytes());
        dtb.extend_from_slice(&0u32.to_be_bytes());
        dtb.extend_from_slice(&be32(self.strings.len()));
        dtb.extend_from_slice(&be32(self.struct_block.len()));
        dtb.extend_from_slice(&[0u8; 16]);
        dtb.extend_from_slice(&self.struct_block);
        dtb.extend_from_slice(&self.strings);
        dtb
    }
}

/// An aarch64-flavoured board with the devices the tests drive:
///
/// - `/soc/serial@9000000` -- a PL011 UART, status okay, SPI 1 level.
/// - `/soc/serial@9001000` -- the same UART but status disabled.
/// - `/soc/ethernet@a003000` -- a virtio NIC, SPI 46 edge.
/// - `/soc/big@b000000` -- 0x2000 bytes of registers.
/// - `/dev@1000` and `/dev@1100` -- two devices inside one 4 KiB page.
pub fn board_dtb() -> Vec<u8> {
    let mut b = DtbBuilder::new();
    b.begin_node("")
        .prop_cells("#address-cells", &[2])
        .prop_cells("#size-cells", &[2]);

    b.begin_node("soc")
        .prop_cells("#address-cells", &[2])
        .prop_cells("#size-cells", &[2])
        .prop("ranges", &[]);

    b.begin_node("serial@9000000")
        .prop_str("compatible", "arm,pl011")
        .prop_cells("reg", &[0, 0x900_0000, 0, 0x1000])
        .prop_cells("interrupts", &[0, 1, 4])
        .prop_str("status", "okay")
        .end_node();

    b.begin_node("serial@9001000")
        .prop_str("compatible", "arm,pl011")
        .prop_cells("reg", &[0, 0x900_1000, 0, 0x1000])
        .prop_cells("interrupts", &[0, 2, 4])
        .prop_str("status", "disabled")
        .end_node();

    b.begin_node("ethernet@a003000")
        .prop_str("compatible", "virtio,mmio")
        .prop_cells("reg", &[0, 0xa00_3000, 0, 0x200])
        .prop_cells("interrupts", &[0, 46, 1])
        .end_node();

    b.begin_node("big@b000000")
        .prop_str("compatible", "test,big")
        .prop_cells("reg", &[0, 0xb00_0000, 0, 0x2000])
        .end_node();

    b.end_node(); // soc

    b.begin_node("dev@1000")
        .prop_str("compatible", "test,duo-a")
        .prop_cells("reg", &[0, 0x1000, 0, 0x100])
        .end_node();

    b.begin_node("dev@1100")
        .prop_str("compatible", "test,duo-b")
        .prop_cells("reg", &[0, 0x1100, 0, 0x100])
        .end_node();

    b.end_node(); // root
    b.finish()
}

// ---- Driver repository ------------------------------------------------------

pub fn write_manifest(repo: &Path, class_dir: &str, driver: &str, json: &str) {
    let dir = repo.join("drivers").join(class_dir).join(driver);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.json"), json).unwrap();
}

/// A repository with one driver per device the board fixture exposes.
pub fn driver_repo() -> tempfile::TempDir {
    let repo = tempfile::tempdir().unwrap();

    write_manifest(
        repo.path(),
        "serial",
        "pl011",
        r#"{
            "compatible": ["arm,pl011"],
            "resources": {
                "regions": [
                    {"name": "regs", "perms": "rw", "dt_index": 0}
                ],
                "irqs": [{"dt_index": 0}]
            }
        }"#,
    );

    write_manifest(
        repo.path(),
        "network",
        "virtio_net",
        r#"{
            "compatible": ["virtio,mmio"],
            "resources": {
                "regions": [
                    {"name": "regs", "perms": "rw", "dt_index": 0}
                ],
                "irqs": [{"dt_index": 0, "channel_id": 5}]
            }
        }"#,
    );

    write_manifest(
        repo.path(),
        "serial",
        "duo_a",
        r#"{
            "compatible": ["test,duo-a"],
            "resources": {
                "regions": [{"name": "regs", "dt_index": 0}],
                "irqs": []
            }
        }"#,
    );

    write_manifest(
        repo.path(),
        "serial",
        "duo_b",
        r#"{
            "compatible": ["test,duo-b"],
            "resources": {
                "regions": [{"name": "regs", "dt_index": 0}],
                "irqs": []
            }
        }"#,
    );

    write_manifest(
        repo.path(),
        "serial",
        "big",
        r#"{
            "compatible": ["test,big"],
            "resources": {
                "regions": [{"name": "regs", "dt_index": 0, "size": 4096}],
                "irqs": []
            }
        }"#,
    );

    repo
}
