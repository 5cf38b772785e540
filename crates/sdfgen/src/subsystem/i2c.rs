//! I²C subsystem builder: driver, virtualiser, and clients that call
//! into the virtualiser.

use std::path::Path;

use sdfgen_fdt::DeviceNode;

use crate::config::{self, i2c, DeviceResources};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::subsystem::shared_region;
use crate::system::{ChannelEnd, ChannelOptions, PdHandle, Perms, SystemDescription};

/// Options applied to the whole I²C subsystem.
#[derive(Debug, Clone)]
pub struct I2cOptions {
    /// Size of each request queue region.
    pub region_req_size: u64,
    /// Size of each response queue region.
    pub region_resp_size: u64,
    /// Size of each client's transfer-buffer region.
    pub region_data_size: u64,
}

impl Default for I2cOptions {
    fn default() -> Self {
        Self {
            region_req_size: 0x1000,
            region_resp_size: 0x1000,
            region_data_size: 0x1000,
        }
    }
}

struct Client {
    pd: PdHandle,
    name: String,
}

/// The I²C subsystem builder.
pub struct I2c<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    virt: PdHandle,
    options: I2cOptions,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    driver_config: Option<i2c::Driver>,
    virt_config: Option<i2c::Virt>,
    client_configs: Vec<(String, i2c::Client)>,
}

impl<'a> I2c<'a> {
    /// Creates an I²C subsystem over the given components.
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
        options: I2cOptions,
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
    /// Fails with [`Error::DuplicateClient`] on a repeated client and
    /// [`Error::InvalidClient`] when the client shares a name with the
    /// driver or virtualiser.
    pub fn add_client(&mut self, sd: &SystemDescription, client: PdHandle) -> Result<(), Error> {
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        if name == self.driver_name || name == sd.pd(self.virt).name() {
            return Err(Error::InvalidClient(format!(
                "'{name}' is already an i2c component"
            )));
        }
        self.clients.push(Client { pd: client, name });
        Ok(())
    }

    /// Expands the subsystem: driver resources, request/response queues,
    /// per-client transfer buffers, and channels. Clients call into the
    /// virtualiser over their channel.
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
                "i2c subsystem already connected".into(),
            ));
        }

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::I2c,
            )?);
        }

        // Driver <-> virtualiser queues.
        let req = shared_region(
            sd,
            "i2c_driver_request",
            self.options.region_req_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let resp = shared_region(
            sd,
            "i2c_driver_response",
            self.options.region_resp_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt, Perms::rw()),
        )?;
        let (driver_id, virt_id) =
            sd.add_channel(self.driver, self.virt, ChannelOptions::default())?;

        let mut driver_config = i2c::Driver {
            virt: i2c::Connection {
                req_queue: req.resource_a(),
                resp_queue: resp.resource_a(),
                id: driver_id,
            },
            client_data: Vec::new(),
        };
        let mut virt_config = i2c::Virt {
            driver: i2c::Connection {
                req_queue: req.resource_b(),
                resp_queue: resp.resource_b(),
                id: virt_id,
            },
            clients: Vec::new(),
        };

        for client in &self.clients {
            let req = shared_region(
                sd,
                format!("i2c_client_request_{}", client.name),
                self.options.region_req_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let resp = shared_region(
                sd,
                format!("i2c_client_response_{}", client.name),
                self.options.region_resp_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;

            // The transfer buffer is visible to all three components:
            // the client fills it, the virtualiser vets it, the driver
            // moves bytes for it.
            let data = shared_region(
                sd,
                format!("i2c_client_data_{}", client.name),
                self.options.region_data_size,
                false,
                (self.virt, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let driver_data_vaddr =
                crate::subsystem::map_into(sd, self.driver, data.mr, Perms::rw())?;

            // The client calls into the virtualiser.
            let (virt_id, client_id) = sd.add_channel(
                self.virt,
                client.pd,
                ChannelOptions {
                    pp: Some(ChannelEnd::B),
                    ..ChannelOptions::default()
                },
            )?;

            driver_config.client_data.push(config::RegionResource {
                vaddr: driver_data_vaddr,
                size: data.size,
            });
            virt_config.clients.push(i2c::VirtClient {
                conn: i2c::Connection {
                    req_queue: req.resource_a(),
                    resp_queue: resp.resource_a(),
                    id: virt_id,
                },
                data: data.resource_a(),
            });
            self.client_configs.push((
                client.name.clone(),
                i2c::Client {
                    virt: i2c::Connection {
                        req_queue: req.resource_b(),
                        resp_queue: resp.resource_b(),
                        id: client_id,
                    },
                    data: data.resource_b(),
                },
            ));
        }

        self.driver_config = Some(driver_config);
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
        config::write_record(prefix, "i2c_driver", &driver.serialise()?)?;
        config::write_record(prefix, "i2c_virt", &virt.serialise()?)?;
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("i2c_client_{name}"), &client.serialise()?)?;
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
