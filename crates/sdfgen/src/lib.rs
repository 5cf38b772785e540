//! `sdfgen` --- programmatic system-description generation for
//! capability-based microkernel systems.
//!
//! Instead of hand-writing the declarative System Description Format
//! (SDF) XML, callers build an in-memory graph of protection domains,
//! memory regions, channels, and interrupts, let the device-class
//! subsystem builders expand driver/virtualiser/client pipelines into
//! it, and finally emit SDF plus the per-component binary config blobs
//! the runtime components consume.
//!
//! The crate is organised the way the data flows:
//!
//! - [`arch`] -- page-size policy per target architecture.
//! - [`system`] -- the description model and the SDF emitter.
//! - [`config`] -- fixed-layout little-endian runtime config records.
//! - [`driver`] -- the probed registry of driver manifests.
//! - [`device`] -- matching a manifest against a device-tree node.
//! - [`subsystem`] -- the per-class expanders (network, serial, block,
//!   I²C, timer, GPU).
//!
//! Device trees are parsed by the re-exported [`fdt`] crate.
//!
//! ```ignore
//! let mut sd = SystemDescription::new(Arch::Aarch64);
//! let mut registry = DriverRegistry::new();
//! registry.probe(Path::new("sddf"))?;
//!
//! let fdt = fdt::Fdt::parse(&dtb_bytes)?;
//! let uart = fdt.device("/soc/serial@9000000");
//!
//! let driver = sd.add_pd(ProtectionDomain::new("uart_driver", "uart.elf"))?;
//! let virt_tx = sd.add_pd(ProtectionDomain::new("serial_virt_tx", "virt_tx.elf"))?;
//! let mut serial = Serial::new(&sd, uart, driver, virt_tx, None, Default::default())?;
//! serial.connect(&mut sd, &registry)?;
//! serial.serialise_config(Path::new("build"))?;
//! let xml = sd.to_xml()?;
//! ```

pub mod arch;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod subsystem;
pub mod system;

/// The device-tree collaborator crate.
pub use sdfgen_fdt as fdt;

pub use arch::Arch;
pub use device::create_driver;
pub use driver::{DeviceClass, DriverManifest, DriverRegistry};
pub use error::Error;
pub use subsystem::{
    Blk, BlkClientOptions, Gpu, GpuOptions, I2c, I2cOptions, Net, NetClientOptions, NetOptions,
    Serial, SerialOptions, Timer,
};
pub use system::{
    Channel, ChannelEnd, ChannelOptions, Irq, IrqTrigger, Map, MemoryRegion, MrHandle, PdHandle,
    Perms, ProtectionDomain, SystemDescription,
};
