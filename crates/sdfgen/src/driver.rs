//! Driver manifest loading and the probe-time registry.
//!
//! A driver repository keeps one `config.json` per driver under
//! `drivers/<class>/<driver>/`; [`DriverRegistry::probe`] walks every
//! known class directory, parses and validates the manifests, and keeps
//! them in an append-only, insertion-ordered list per class. Driver
//! creation is refused until a probe has run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::system::Perms;

/// Device class a driver belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Network interface drivers.
    Network,
    /// UART drivers.
    Serial,
    /// Timer drivers.
    Timer,
    /// Block storage drivers.
    Blk,
    /// I²C host controller drivers.
    I2c,
    /// GPU drivers.
    Gpu,
}

impl DeviceClass {
    /// Repository subdirectories scanned for each class, in probe order.
    /// MMC controllers live one level deeper but are block drivers.
    const DIRS: &'static [(&'static str, DeviceClass)] = &[
        ("network", DeviceClass::Network),
        ("serial", DeviceClass::Serial),
        ("timer", DeviceClass::Timer),
        ("blk", DeviceClass::Blk),
        ("blk/mmc", DeviceClass::Blk),
        ("i2c", DeviceClass::I2c),
        ("gpu", DeviceClass::Gpu),
    ];
}

impl core::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Serial => "serial",
            Self::Timer => "timer",
            Self::Blk => "blk",
            Self::I2c => "i2c",
            Self::Gpu => "gpu",
        };
        f.write_str(s)
    }
}

/// One memory-region descriptor from a driver manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionDescriptor {
    /// Region name, unique within the manifest.
    pub name: String,
    /// Map permissions, `"rw"` when absent.
    #[serde(default)]
    pub perms: Option<String>,
    /// Symbol patched to the map's vaddr, when present.
    #[serde(default)]
    pub setvar_vaddr: Option<String>,
    /// Explicit region size; mandatory without `dt_index`.
    #[serde(default)]
    pub size: Option<u64>,
    /// Cacheability of the map; device registers must stay uncached.
    #[serde(default)]
    pub cached: Option<bool>,
    /// Index into the device node's `reg` property.
    #[serde(default)]
    pub dt_index: Option<u32>,
}

/// One interrupt descriptor from a driver manifest.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IrqDescriptor {
    /// Index into the device node's `interrupts` property.
    pub dt_index: u32,
    /// Explicit channel slot id request.
    #[serde(default)]
    pub channel_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ManifestResources {
    #[serde(default)]
    regions: Vec<RegionDescriptor>,
    #[serde(default)]
    irqs: Vec<IrqDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    compatible: Vec<String>,
    resources: ManifestResources,
}

/// A validated driver manifest held by the registry.
#[derive(Debug)]
pub struct DriverManifest {
    /// The driver's device class, inferred from its directory.
    pub class: DeviceClass,
    /// Driver directory relative to the repository root.
    pub dir: PathBuf,
    /// Device-tree compatible strings the driver matches.
    pub compatibles: Vec<String>,
    /// Memory regions the driver needs.
    pub regions: Vec<RegionDescriptor>,
    /// Interrupts the driver needs.
    pub irqs: Vec<IrqDescriptor>,
}

/// The probe-time driver registry.
///
/// An explicit context value: callers create one, probe a repository
/// into it, and pass it to driver creation. Probing twice is a no-op.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: Vec<DriverManifest>,
    probed: bool,
}

impl DriverRegistry {
    /// Creates an empty, unprobed registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a probe has completed.
    #[must_use]
    pub fn probed(&self) -> bool {
        self.probed
    }

    /// All manifests, in probe order.
    #[must_use]
    pub fn drivers(&self) -> &[DriverManifest] {
        &self.drivers
    }

    /// Scans `<repo>/drivers/<class>/<driver>/config.json` for every
    /// known class and loads each manifest into the registry.
    ///
    /// Driver directories are visited in sorted order within each class
    /// so the registry contents are deterministic.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::JsonParse`] on malformed JSON and
    /// [`Error::InvalidConfig`] on a manifest violating the per-manifest
    /// invariants or duplicating a compatible string within its class.
    pub fn probe(&mut self, repo: &Path) -> Result<(), Error> {
        if self.probed {
            debug!(repo = %repo.display(), "registry already probed, skipping");
            return Ok(());
        }

        for &(dir, class) in DeviceClass::DIRS {
            let class_dir = repo.join("drivers").join(dir);
            if !class_dir.is_dir() {
                continue;
            }

            let mut driver_dirs: Vec<PathBuf> = fs::read_dir(&class_dir)
                .map_err(|e| Error::Io {
                    path: class_dir.clone(),
                    message: e.to_string(),
                })?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            driver_dirs.sort();

            for driver_dir in driver_dirs {
                let manifest_path = driver_dir.join("config.json");
                if !manifest_path.is_file() {
                    continue;
                }
                let manifest = self.load_manifest(&manifest_path, class, repo)?;
                debug!(
                    driver = %manifest.dir.display(),
                    class = %class,
                    "registered driver"
                );
                self.drivers.push(manifest);
            }
        }

        self.probed = true;
        Ok(())
    }

    /// Returns the first probed driver of `class` sharing any compatible
    /// string with `compatibles`. Ties are broken by probe order.
    #[must_use]
    pub fn find_driver(
        &self,
        compatibles: &[&str],
        class: DeviceClass,
    ) -> Option<&DriverManifest> {
        self.drivers.iter().find(|driver| {
            driver.class == class
                && driver
                    .compatibles
                    .iter()
                    .any(|c| compatibles.contains(&c.as_str()))
        })
    }

    fn load_manifest(
        &self,
        path: &Path,
        class: DeviceClass,
        repo: &Path,
    ) -> Result<DriverManifest, Error> {
        let text = fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let parsed: ManifestFile = serde_json::from_str(&text).map_err(|e| Error::JsonParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let dir = path
            .parent()
            .and_then(|p| p.strip_prefix(repo).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let manifest = DriverManifest {
            class,
            dir,
            compatibles: parsed.compatible,
            regions: parsed.resources.regions,
            irqs: parsed.resources.irqs,
        };
        self.validate_manifest(&manifest, path)?;
        Ok(manifest)
    }

    fn validate_manifest(&self, manifest: &DriverManifest, path: &Path) -> Result<(), Error> {
        let where_ = path.display();

        for (i, region) in manifest.regions.iter().enumerate() {
            if manifest.regions[..i].iter().any(|r| r.name == region.name) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate region name '{}' in {where_}",
                    region.name
                )));
            }
            if let Some(dt_index) = region.dt_index {
                if manifest.regions[..i]
                    .iter()
                    .any(|r| r.dt_index == Some(dt_index))
                {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate region dt_index {dt_index} in {where_}"
                    )));
                }
                if region.cached == Some(true) {
                    return Err(Error::InvalidConfig(format!(
                        "region '{}' in {where_} is device memory and cannot be cached",
                        region.name
                    )));
                }
            } else if region.size.is_none() {
                return Err(Error::InvalidConfig(format!(
                    "region '{}' in {where_} has neither dt_index nor size",
                    region.name
                )));
            }
            if let Some(size) = region.size {
                if size == 0 || size % 0x1000 != 0 {
                    return Err(Error::InvalidConfig(format!(
                        "region '{}' in {where_} has unaligned size 0x{size:x}",
                        region.name
                    )));
                }
            }
            if let Some(perms) = &region.perms {
                if Perms::parse(perms).is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "region '{}' in {where_} has invalid perms '{perms}'",
                        region.name
                    )));
                }
            }
        }

        for (i, irq) in manifest.irqs.iter().enumerate() {
            if manifest.irqs[..i].iter().any(|o| o.dt_index == irq.dt_index) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate irq dt_index {} in {where_}",
                    irq.dt_index
                )));
            }
        }

        // Compatible strings must be unique across drivers of one class,
        // or matching would depend on probe order alone.
        for compatible in &manifest.compatibles {
            let clash = self
                .drivers
                .iter()
                .filter(|d| d.class == manifest.class)
                .any(|d| d.compatibles.contains(compatible));
            if clash {
                return Err(Error::InvalidConfig(format!(
                    "compatible '{compatible}' in {where_} is already registered for class {}",
                    manifest.class
                )));
            }
        }

        Ok(())
    }
}
