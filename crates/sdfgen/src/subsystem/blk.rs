//! Block subsystem builder: driver, virtualiser, and partitioned
//! clients.

use std::path::Path;

use sdfgen_fdt::DeviceNode;

use crate::config::{self, blk, DeviceResources};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::subsystem::shared_region;
use crate::system::{ChannelOptions, PdHandle, Perms, SystemDescription};

/// Bytes per request/response queue slot.
const QUEUE_SLOT_SIZE: u64 = 128;
/// Size of a storage information page.
const STORAGE_INFO_SIZE: u64 = 0x1000;
/// Scratch the driver reads partition tables into: a fixed ten pages.
const DRIVER_DATA_SIZE: u64 = 10 * 0x1000;

/// Per-client block options.
#[derive(Debug, Clone)]
pub struct BlkClientOptions {
    /// Partition the client's requests are confined to.
    pub partition: u32,
    /// Request slots in the client's queues.
    pub queue_capacity: u16,
    /// Size of the client's data region in bytes.
    pub data_size: u32,
}

impl Default for BlkClientOptions {
    fn default() -> Self {
        Self {
            partition: 0,
            queue_capacity: 128,
            data_size: 0x20_0000,
        }
    }
}

struct Client {
    pd: PdHandle,
    name: String,
    options: BlkClientOptions,
}

/// The block subsystem builder.
pub struct Blk<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    virt: PdHandle,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    driver_config: Option<blk::Driver>,
    virt_config: Option<blk::Virt>,
    client_configs: Vec<(String, blk::Client)>,
}

impl<'a> Blk<'a> {
    /// Creates a block subsystem over the given components.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidVirt`] when driver and virtualiser are
    /// the same domain.
    pub fn new(
        sd: &SystemDescription,
        device: Option<DeviceNode<'a>>,
        driver: PdHandle,
        virt: PdHandle,
    ) -> Result<Self, Error> {
        if driver == virt {
            return Err(Error::InvalidVirt(format!(
                "'{}' is both driver and virtualiser",
                sd.pd(driver).name()
            )));
        }
        Ok(Self {
            device,
            driver,
            driver_name: sd.pd(driver).name().to_string(),
            virt,
            clients: Vec::new(),
            connected: false,
            device_resources: None,
            driver_config: None,
            virt_config: None,
            client_configs: Vec::new(),
        })
    }

    /// Adds a client domain with its partition and sizing options.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateClient`] on a repeated client and
    /// [`Error::InvalidOptions`] on a zero queue capacity or a data size
    /// that is zero or not page-aligned.
    pub fn add_client(
        &mut self,
        sd: &SystemDescription,
        client: PdHandle,
        options: BlkClientOptions,
    ) -> Result<(), Error> {
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        if options.queue_capacity == 0 {
            return Err(Error::InvalidOptions(format!(
                "client '{name}' has a zero queue capacity"
            )));
        }
        if options.data_size == 0 || !sd.arch().is_page_aligned(u64::from(options.data_size)) {
            return Err(Error::InvalidOptions(format!(
                "client '{name}' data size 0x{:x} is not page-aligned",
                options.data_size
            )));
        }
        self.clients.push(Client {
            pd: client,
            name,
            options,
        });
        Ok(())
    }

    /// Expands the subsystem: driver resources, the driver/virtualiser
    /// region set, and per-client storage info, queues, and data.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidOptions`] on a second call, plus any
    /// error from driver creation or region/channel installation.
    pub fn connect(
        &mut self,
        sd: &mut SystemDescription,
        registry: &DriverRegistry,
    ) -> Result<(), Error> {
        if self.connected {
            return Err(Error::InvalidOptions(
                "blk subsystem already connected".into(),
            ));
        }

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::Blk,
            )?);
        }

        // The driver-side queues must absorb every client's requests at
        // once.
        let driver_capacity: u64 = self
            .clients
            .iter()
            .map(|c| u64::from(c.options.queue_capacity))
            .sum();
        let driver_queue_size = sd
            .arch()
            .round_up_to_page(QUEUE_SLOT_SIZE * driver_capacity.max(1));

        let storage_info = shared_region(
            sd,
            "blk_driver_storage_info",
            STORAGE_INFO_SIZE,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::r()),
        )?;
        let req = shared_region(
            sd,
            "blk_driver_request",
            driver_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let resp = shared_region(
            sd,
            "blk_driver_response",
            driver_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let driver_data = shared_region(
            sd,
            "blk_driver_data",
            DRIVER_DATA_SIZE,
            true,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let (driver_id, virt_id) =
            sd.add_channel(self.driver, self.virt, ChannelOptions::default())?;

        let driver_capacity = u16::try_from(driver_capacity.min(u64::from(u16::MAX)))
            .unwrap_or(u16::MAX);
        self.driver_config = Some(blk::Driver {
            virt: blk::QueueSet {
                storage_info: storage_info.resource_a(),
                req_queue: req.resource_a(),
                resp_queue: resp.resource_a(),
                num_buffers: driver_capacity,
                id: driver_id,
            },
            data: driver_data.device_resource_a(sd),
        });
        let mut virt_config = blk::Virt {
            driver: blk::QueueSet {
                storage_info: storage_info.resource_b(),
                req_queue: req.resource_b(),
                resp_queue: resp.resource_b(),
                num_buffers: driver_capacity,
                id: virt_id,
            },
            driver_data: driver_data.device_resource_b(sd),
            clients: Vec::new(),
        };

        for client in &self.clients {
            let queue_size = sd
                .arch()
                .round_up_to_page(QUEUE_SLOT_SIZE * u64::from(client.options.queue_capacity));

            let storage_info = shared_region(
                sd,
                format!("blk_client_storage_info_{}", client.name),
                STORAGE_INFO_SIZE,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::r()),
            )?;
            let req = shared_region(
                sd,
                format!("blk_client_request_{}", client.name),
                queue_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let resp = shared_region(
                sd,
                format!("blk_client_response_{}", client.name),
                queue_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            // DMA-capable so the virtualiser can hand bus addresses to
            // the driver.
            let data = shared_region(
                sd,
                format!("blk_client_data_{}", client.name),
                u64::from(client.options.data_size),
                true,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let (virt_id, client_id) =
                sd.add_channel(self.virt, client.pd, ChannelOptions::default())?;

            virt_config.clients.push(blk::VirtClient {
                conn: blk::QueueSet {
                    storage_info: storage_info.resource_a(),
                    req_queue: req.resource_a(),
                    resp_queue: resp.resource_a(),
                    num_buffers: client.options.queue_capacity,
                    id: virt_id,
                },
                data: data.device_resource_a(sd),
                partition: client.options.partition,
            });
            self.client_configs.push((
                client.name.clone(),
                blk::Client {
                    virt: blk::QueueSet {
                        storage_info: storage_info.resource_b(),
                        req_queue: req.resource_b(),
                        resp_queue: resp.resource_b(),
                        num_buffers: client.options.queue_capacity,
                        id: client_id,
                    },
                    data: data.resource_b(),
                },
            ));
        }

        self.virt_config = Some(virt_config);
        self.connected = true;
        Ok(())
    }

    /// Writes every config record as `<prefix>/<name>.data`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotConnected`] before a successful
    /// [`Self::connect`].
    pub fn serialise_config(&self, prefix: &Path) -> Result<(), Error> {
        let (Some(driver), Some(virt)) = (&self.driver_config, &self.virt_config) else {
            return Err(Error::NotConnected);
        };
        config::write_record(prefix, "blk_driver", &driver.serialise()?)?;
        config::write_record(prefix, "blk_virt", &virt.serialise()?)?;
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("blk_client_{name}"), &client.serialise()?)?;
        }
        if let Some(device_resources) = &self.device_resources {
            config::write_record(
                prefix,
                &format!("{}_device_resources", self.driver_name),
                &device_resources.serialise()?,
            )?;
        }
        Ok(())
    }
}
