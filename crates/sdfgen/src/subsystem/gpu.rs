//! GPU subsystem builder: driver, virtualiser, and clients with frame
//! data regions.

use std::path::Path;

use sdfgen_fdt::DeviceNode;

use crate::config::{self, gpu, DeviceResources};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::subsystem::shared_region;
use crate::system::{ChannelOptions, PdHandle, Perms, SystemDescription};

/// Options applied to the whole GPU subsystem.
#[derive(Debug, Clone)]
pub struct GpuOptions {
    /// Size of the event/request/response queue regions.
    pub queue_size: u64,
    /// Size of the frame data regions.
    pub data_size: u64,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            queue_size: 0x1000,
            data_size: 0x20_0000,
        }
    }
}

struct Client {
    pd: PdHandle,
    name: String,
}

/// The GPU subsystem builder.
pub struct Gpu<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    virt: PdHandle,
    options: GpuOptions,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    driver_config: Option<gpu::Driver>,
    virt_config: Option<gpu::Virt>,
    client_configs: Vec<(String, gpu::Client)>,
}

impl<'a> Gpu<'a> {
    /// Creates a GPU subsystem over the given components.
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
        options: GpuOptions,
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
            options,
            clients: Vec::new(),
            connected: false,
            device_resources: None,
            driver_config: None,
            virt_config: None,
            client_configs: Vec::new(),
        })
    }

    /// Adds a client domain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateClient`] on a repeated client.
    pub fn add_client(&mut self, sd: &SystemDescription, client: PdHandle) -> Result<(), Error> {
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        self.clients.push(Client { pd: client, name });
        Ok(())
    }

    fn connection(
        region_set: (
            &crate::subsystem::SharedRegion,
            &crate::subsystem::SharedRegion,
            &crate::subsystem::SharedRegion,
            &crate::subsystem::SharedRegion,
        ),
        sd: &SystemDescription,
        id: u8,
        first_side: bool,
    ) -> gpu::Connection {
        let (events, req, resp, data) = region_set;
        let pick = |r: &crate::subsystem::SharedRegion| {
            if first_side {
                r.device_resource_a(sd)
            } else {
                r.device_resource_b(sd)
            }
        };
        gpu::Connection {
            events: pick(events),
            req_queue: pick(req),
            resp_queue: pick(resp),
            data: pick(data),
            id,
        }
    }

    /// Expands the subsystem: driver resources, the driver/virtualiser
    /// region set, and per-client event/queue/data regions, each pair
    /// joined by a single channel.
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
                "gpu subsystem already connected".into(),
            ));
        }

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::Gpu,
            )?);
        }

        let events = shared_region(
            sd,
            "gpu_driver_events",
            self.options.queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let req = shared_region(
            sd,
            "gpu_driver_request",
            self.options.queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let resp = shared_region(
            sd,
            "gpu_driver_response",
            self.options.queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let data = shared_region(
            sd,
            "gpu_driver_data",
            self.options.data_size,
            true,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let (driver_id, virt_id) =
            sd.add_channel(self.driver, self.virt, ChannelOptions::default())?;

        let set = (&events, &req, &resp, &data);
        self.driver_config = Some(gpu::Driver {
            virt: Self::connection(set, sd, driver_id, true),
        });
        let mut virt_config = gpu::Virt {
            driver: Self::connection(set, sd, virt_id, false),
            clients: Vec::new(),
        };

        for client in &self.clients {
            let events = shared_region(
                sd,
                format!("gpu_client_events_{}", client.name),
                self.options.queue_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::r()),
            )?;
            let req = shared_region(
                sd,
                format!("gpu_client_request_{}", client.name),
                self.options.queue_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let resp = shared_region(
                sd,
                format!("gpu_client_response_{}", client.name),
                self.options.queue_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let data = shared_region(
                sd,
                format!("gpu_client_data_{}", client.name),
                self.options.data_size,
                true,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            // One channel carries events, requests, and responses.
            let (virt_id, client_id) =
                sd.add_channel(self.virt, client.pd, ChannelOptions::default())?;

            let set = (&events, &req, &resp, &data);
            virt_config
                .clients
                .push(Self::connection(set, sd, virt_id, true));
            self.client_configs.push((
                client.name.clone(),
                gpu::Client {
                    virt: Self::connection(set, sd, client_id, false),
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
        config::write_record(prefix, "gpu_driver", &driver.serialise()?)?;
        config::write_record(prefix, "gpu_virt", &virt.serialise()?)?;
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("gpu_client_{name}"), &client.serialise()?)?;
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
