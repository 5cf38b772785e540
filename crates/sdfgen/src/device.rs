//! Driver instantiation: matching a probed manifest against a device
//! tree node and materialising its regions, maps, and interrupts in a
//! protection domain.

use sdfgen_fdt::{DeviceNode, InterruptStyle, IrqTrigger as DtIrqTrigger};
use tracing::debug;

use crate::arch::Arch;
use crate::config::{DeviceRegionResource, DeviceResources, IrqResource};
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::system::{IrqTrigger, Map, MemoryRegion, Perms, PdHandle, SystemDescription};

/// How `interrupts` entries are decoded for the target architecture.
fn interrupt_style(arch: Arch) -> InterruptStyle {
    match arch {
        Arch::Aarch32 | Arch::Aarch64 => InterruptStyle::Gic,
        Arch::Riscv32 | Arch::Riscv64 | Arch::X86 | Arch::X86_64 => InterruptStyle::Plain(1),
    }
}

/// Device-tree node names carry unit addresses (`serial@9000000`);
/// flatten them into memory-region-name material.
fn sanitise_node_name(name: &str) -> String {
    name.replace(['@', ',', '/'], "_")
}

/// Matches a driver for `device` and attaches its resources to `pd`:
/// memory regions (created or reused), maps, and interrupts, returning
/// the populated device record.
///
/// On failure, regions and maps already committed to the description
/// remain; the caller is expected to discard the description.
///
/// # Errors
///
/// - [`Error::CalledBeforeProbe`] when the registry has not been probed.
/// - [`Error::UnknownDevice`] when no driver of `class` matches.
/// - [`Error::DeviceStatusInvalid`] when the node's status is not
///   `"okay"`.
/// - [`Error::InvalidDeviceTreeIndex`] when a manifest index points past
///   the node's `reg` or `interrupts` entries.
/// - [`Error::InvalidConfig`] when a manifest size is smaller than the
///   device-tree size.
pub fn create_driver(
    sd: &mut SystemDescription,
    registry: &DriverRegistry,
    pd: PdHandle,
    device: &DeviceNode,
    class: DeviceClass,
) -> Result<DeviceResources, Error> {
    if !registry.probed() {
        return Err(Error::CalledBeforeProbe);
    }

    let compatibles = device.compatibles();
    if compatibles.is_empty() {
        return Err(Error::InvalidDeviceTreeNode(format!(
            "node '{}' has no compatible property",
            device.path()
        )));
    }

    let driver = registry.find_driver(&compatibles, class).ok_or_else(|| {
        Error::UnknownDevice(format!(
            "{} (compatible: {})",
            device.path(),
            compatibles.join(", ")
        ))
    })?;

    if let Some(status) = device.status() {
        if status != "okay" {
            return Err(Error::DeviceStatusInvalid {
                node: device.path().to_string(),
                status: status.to_string(),
            });
        }
    }

    debug!(
        device = %device.path(),
        driver = %driver.dir.display(),
        "matched driver"
    );

    let arch = sd.arch();
    let node_suffix = sanitise_node_name(device.name());
    let mut resources = DeviceResources::default();

    for region in &driver.regions {
        let perms = region
            .perms
            .as_deref()
            .map_or(Some(Perms::rw()), Perms::parse)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("invalid perms on region '{}'", region.name))
            })?;

        let resource = match region.dt_index {
            Some(dt_index) => {
                let (bus_addr, dt_size) =
                    device
                        .reg(dt_index as usize)
                        .ok_or(Error::InvalidDeviceTreeIndex {
                            node: device.path().to_string(),
                            index: dt_index,
                        })?;
                let (paddr, _) = device.translated_reg(dt_index as usize).ok_or_else(|| {
                    Error::InvalidDeviceTreeNode(format!(
                        "cannot translate address 0x{bus_addr:x} of '{}'",
                        device.path()
                    ))
                })?;

                let size = match region.size {
                    Some(explicit) => {
                        if explicit < dt_size {
                            return Err(Error::InvalidConfig(format!(
                                "region '{}' size 0x{explicit:x} is smaller than the \
                                 device's 0x{dt_size:x}",
                                region.name
                            )));
                        }
                        explicit
                    }
                    None => arch.round_up_to_page(dt_size),
                };

                let mr_paddr = arch.round_down_to_page(paddr);
                let offset = paddr - mr_paddr;

                // Device registers sharing a page share one region.
                let mr = match sd.find_mr_by_paddr(mr_paddr) {
                    Some(existing) => {
                        debug!(
                            region = %region.name,
                            paddr = format_args!("0x{mr_paddr:x}"),
                            "reusing device region"
                        );
                        existing
                    }
                    None => sd.add_memory_region(
                        MemoryRegion::physical(
                            format!("{}_{node_suffix}", region.name),
                            size,
                            Some(mr_paddr),
                        )
                        .with_cached(false),
                    )?,
                };

                let vaddr = map_device_region(sd, pd, mr, perms, region)?;
                DeviceRegionResource {
                    vaddr: vaddr + offset,
                    size: sd.mr(mr).size(),
                    io_addr: mr_paddr,
                }
            }
            None => {
                // Validated at probe time.
                let size = region.size.ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "region '{}' has neither dt_index nor size",
                        region.name
                    ))
                })?;
                let mr = sd.add_memory_region(
                    MemoryRegion::physical(format!("{}_{node_suffix}", region.name), size, None)
                        .with_cached(false),
                )?;
                let vaddr = map_device_region(sd, pd, mr, perms, region)?;
                DeviceRegionResource {
                    vaddr,
                    size,
                    // Assigned by the physical allocator just above.
                    io_addr: sd.mr(mr).paddr().unwrap_or_default(),
                }
            }
        };
        resources.regions.push(resource);
    }

    let style = interrupt_style(arch);
    for irq in &driver.irqs {
        let (number, trigger) =
            device
                .interrupt(irq.dt_index as usize, style)
                .ok_or(Error::InvalidDeviceTreeIndex {
                    node: device.path().to_string(),
                    index: irq.dt_index,
                })?;
        let trigger = match trigger {
            DtIrqTrigger::Edge => IrqTrigger::Edge,
            DtIrqTrigger::Level => IrqTrigger::Level,
        };
        let id = sd.add_irq(pd, number, trigger, irq.channel_id)?;
        resources.irqs.push(IrqResource { id });
    }

    Ok(resources)
}

fn map_device_region(
    sd: &mut SystemDescription,
    pd: PdHandle,
    mr: crate::system::MrHandle,
    perms: Perms,
    region: &crate::driver::RegionDescriptor,
) -> Result<u64, Error> {
    let vaddr = sd.get_map_vaddr(pd, mr);
    let mut map = Map::new(mr, vaddr, perms).with_cached(region.cached.unwrap_or(false));
    if let Some(symbol) = &region.setvar_vaddr {
        map = map.with_setvar_vaddr(symbol.clone());
    }
    sd.add_map(pd, map)?;
    Ok(vaddr)
}
