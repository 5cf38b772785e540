//! sDDF subsystem builders.
//!
//! Each device class follows the same lifecycle: construct the builder
//! with the system description, device node, and component domains; add
//! clients; `connect` to expand the subsystem into regions, maps,
//! channels, and config records; `serialise_config` to write the records
//! out. `connect` may run once; `serialise_config` refuses to run before
//! it.

pub mod blk;
pub mod gpu;
pub mod i2c;
pub mod net;
pub mod serial;
pub mod timer;

pub use blk::{Blk, BlkClientOptions};
pub use gpu::{Gpu, GpuOptions};
pub use i2c::{I2c, I2cOptions};
pub use net::{Net, NetClientOptions, NetOptions};
pub use serial::{Serial, SerialOptions};
pub use timer::Timer;

use crate::config::{DeviceRegionResource, RegionResource};
use crate::error::Error;
use crate::system::{Map, MemoryRegion, MrHandle, PdHandle, Perms, SystemDescription};

/// Bookkeeping header at the start of every queue region.
pub(crate) const QUEUE_HEADER_SIZE: u64 = 16;

/// A region created by a builder and mapped into two components.
pub(crate) struct SharedRegion {
    pub(crate) mr: MrHandle,
    pub(crate) size: u64,
    pub(crate) vaddr_a: u64,
    pub(crate) vaddr_b: u64,
}

impl SharedRegion {
    pub(crate) fn resource_a(&self) -> RegionResource {
        RegionResource {
            vaddr: self.vaddr_a,
            size: self.size,
        }
    }

    pub(crate) fn resource_b(&self) -> RegionResource {
        RegionResource {
            vaddr: self.vaddr_b,
            size: self.size,
        }
    }

    pub(crate) fn device_resource_a(&self, sd: &SystemDescription) -> DeviceRegionResource {
        DeviceRegionResource {
            vaddr: self.vaddr_a,
            size: self.size,
            io_addr: sd.mr(self.mr).paddr().unwrap_or_default(),
        }
    }

    pub(crate) fn device_resource_b(&self, sd: &SystemDescription) -> DeviceRegionResource {
        DeviceRegionResource {
            vaddr: self.vaddr_b,
            size: self.size,
            io_addr: sd.mr(self.mr).paddr().unwrap_or_default(),
        }
    }
}

/// Maps `mr` into `pd` at the next free vaddr.
pub(crate) fn map_into(
    sd: &mut SystemDescription,
    pd: PdHandle,
    mr: MrHandle,
    perms: Perms,
) -> Result<u64, Error> {
    let vaddr = sd.get_map_vaddr(pd, mr);
    sd.add_map(pd, Map::new(mr, vaddr, perms))?;
    Ok(vaddr)
}

/// Creates a region of `size` bytes and maps it into both components.
/// DMA-capable regions are physical so their bus address is fixed at
/// generation time.
pub(crate) fn shared_region(
    sd: &mut SystemDescription,
    name: impl Into<String>,
    size: u64,
    physical: bool,
    a: (PdHandle, Perms),
    b: (PdHandle, Perms),
) -> Result<SharedRegion, Error> {
    let size = sd.arch().round_up_to_page(size);
    let region = if physical {
        MemoryRegion::physical(name, size, None)
    } else {
        MemoryRegion::new(name, size)
    };
    let mr = sd.add_memory_region(region)?;
    let vaddr_a = map_into(sd, a.0, mr, a.1)?;
    let vaddr_b = map_into(sd, b.0, mr, b.1)?;
    Ok(SharedRegion {
        mr,
        size,
        vaddr_a,
        vaddr_b,
    })
}

/// Size of a queue region holding `capacity` slots of `slot_size` bytes.
pub(crate) fn queue_region_size(
    sd: &SystemDescription,
    slot_size: u64,
    capacity: u64,
) -> u64 {
    sd.arch().round_up_to_page(QUEUE_HEADER_SIZE + slot_size * capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::system::ProtectionDomain;

    #[test]
    fn shared_region_maps_both_sides() {
        let mut sd = SystemDescription::new(Arch::Aarch64);
        let a = sd.add_pd(ProtectionDomain::new("a", "a.elf")).unwrap();
        let b = sd.add_pd(ProtectionDomain::new("b", "b.elf")).unwrap();
        let region = shared_region(
            &mut sd,
            "queue",
            0x1100,
            false,
            (a, Perms::rw()),
            (b, Perms::r()),
        )
        .unwrap();
        assert_eq!(region.size, 0x2000);
        assert_eq!(sd.pd(a).maps().len(), 1);
        assert_eq!(sd.pd(b).maps().len(), 1);
        assert_eq!(region.resource_a().size, 0x2000);
    }

    #[test]
    fn queue_sizing_includes_header() {
        let sd = SystemDescription::new(Arch::Aarch64);
        // 16-byte slots: 256 slots fill a page including the header only
        // after rounding up.
        assert_eq!(queue_region_size(&sd, 16, 255), 0x1000);
        assert_eq!(queue_region_size(&sd, 16, 256), 0x2000);
    }
}
