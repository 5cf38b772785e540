//! Serial subsystem builder: driver, TX virtualiser, optional RX
//! virtualiser, and any number of clients.

use std::path::Path;

use sdfgen_fdt::DeviceNode;

use crate::config::{self, serial, DeviceResources};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::subsystem::shared_region;
use crate::system::{ChannelOptions, PdHandle, Perms, SystemDescription};

/// Size of every serial queue bookkeeping region.
const QUEUE_SIZE: u64 = 0x1000;
/// Size of every serial character data region.
const DATA_SIZE: u64 = 0x1000;

/// Options applied to the whole serial subsystem.
#[derive(Debug, Clone)]
pub struct SerialOptions {
    /// Baud rate the driver programs at start-up.
    pub baud: u64,
    /// Whether the TX virtualiser colours each client's output.
    pub enable_color: bool,
    /// String the TX virtualiser prints once at start-up.
    pub begin_str: String,
    /// Character that switches RX input focus to the next client.
    pub switch_char: u8,
    /// Character terminating a numeric client-selection escape.
    pub terminate_num_char: u8,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud: 115_200,
            enable_color: true,
            begin_str: String::new(),
            switch_char: 28, // ctrl-\
            terminate_num_char: b'\r',
        }
    }
}

struct Client {
    pd: PdHandle,
    name: String,
}

/// The serial subsystem builder.
pub struct Serial<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    virt_tx: PdHandle,
    virt_rx: Option<PdHandle>,
    options: SerialOptions,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    driver_config: Option<serial::Driver>,
    virt_tx_config: Option<serial::VirtTx>,
    virt_rx_config: Option<serial::VirtRx>,
    client_configs: Vec<(String, serial::Client)>,
}

impl<'a> Serial<'a> {
    /// Creates a serial subsystem over the given components.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidVirt`] when any two of driver, TX
    /// virtualiser, and RX virtualiser are the same domain, and
    /// [`Error::InvalidBeginString`] when the begin string exceeds the
    /// config record capacity.
    pub fn new(
        sd: &SystemDescription,
        device: Option<DeviceNode<'a>>,
        driver: PdHandle,
        virt_tx: PdHandle,
        virt_rx: Option<PdHandle>,
        options: SerialOptions,
    ) -> Result<Self, Error> {
        let mut names = vec![sd.pd(driver).name(), sd.pd(virt_tx).name()];
        if let Some(virt_rx) = virt_rx {
            names.push(sd.pd(virt_rx).name());
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::InvalidVirt(format!(
                    "'{name}' appears twice in the serial component set"
                )));
            }
        }
        if options.begin_str.len() > serial::MAX_BEGIN_STR_LEN {
            return Err(Error::InvalidBeginString(format!(
                "{} bytes exceeds the {}-byte capacity",
                options.begin_str.len(),
                serial::MAX_BEGIN_STR_LEN
            )));
        }

        Ok(Self {
            device,
            driver,
            driver_name: sd.pd(driver).name().to_string(),
            virt_tx,
            virt_rx,
            options,
            clients: Vec::new(),
            connected: false,
            device_resources: None,
            driver_config: None,
            virt_tx_config: None,
            virt_rx_config: None,
            client_configs: Vec::new(),
        })
    }

    /// Adds a client domain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateClient`] when the client was already
    /// added and [`Error::InvalidClient`] when the client is one of the
    /// subsystem's own components.
    pub fn add_client(&mut self, sd: &SystemDescription, client: PdHandle) -> Result<(), Error> {
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        if client == self.driver || client == self.virt_tx || self.virt_rx == Some(client) {
            return Err(Error::InvalidClient(format!(
                "'{name}' is already a serial component"
            )));
        }
        self.clients.push(Client { pd: client, name });
        Ok(())
    }

    /// Expands the subsystem into the description: driver resources,
    /// queue and data regions, channels, and config records.
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
                "serial subsystem already connected".into(),
            ));
        }

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::Serial,
            )?);
        }

        // Driver <-> TX virtualiser. The driver data region doubles when
        // colour codes inflate the stream.
        let tx_data_size = if self.options.enable_color {
            2 * DATA_SIZE
        } else {
            DATA_SIZE
        };
        let tx_queue = shared_region(
            sd,
            "serial_driver_tx_queue",
            QUEUE_SIZE,
            false,
            (self.driver, Perms::rw()),
            (self.virt_tx, Perms::rw()),
        )?;
        let tx_data = shared_region(
            sd,
            "serial_driver_tx_data",
            tx_data_size,
            false,
            (self.driver, Perms::r()),
            (self.virt_tx, Perms::rw()),
        )?;
        let (driver_tx_id, virt_tx_id) =
            sd.add_channel(self.driver, self.virt_tx, ChannelOptions::default())?;

        let mut driver_config = serial::Driver {
            rx: None,
            tx: serial::Connection {
                queue: tx_queue.resource_a(),
                data: tx_data.resource_a(),
                id: driver_tx_id,
            },
            default_baud: self.options.baud,
        };
        let mut virt_tx_config = serial::VirtTx {
            driver: serial::Connection {
                queue: tx_queue.resource_b(),
                data: tx_data.resource_b(),
                id: virt_tx_id,
            },
            enable_colour: self.options.enable_color,
            ..serial::VirtTx::default()
        };
        virt_tx_config.set_begin_str(&self.options.begin_str)?;

        // Driver <-> RX virtualiser, when input is wired up at all.
        let mut virt_rx_config = None;
        if let Some(virt_rx) = self.virt_rx {
            let rx_queue = shared_region(
                sd,
                "serial_driver_rx_queue",
                QUEUE_SIZE,
                false,
                (self.driver, Perms::rw()),
                (virt_rx, Perms::rw()),
            )?;
            let rx_data = shared_region(
                sd,
                "serial_driver_rx_data",
                DATA_SIZE,
                false,
                (self.driver, Perms::rw()),
                (virt_rx, Perms::r()),
            )?;
            let (driver_rx_id, virt_rx_id) =
                sd.add_channel(self.driver, virt_rx, ChannelOptions::default())?;

            driver_config.rx = Some(serial::Connection {
                queue: rx_queue.resource_a(),
                data: rx_data.resource_a(),
                id: driver_rx_id,
            });
            virt_rx_config = Some(serial::VirtRx {
                driver: serial::Connection {
                    queue: rx_queue.resource_b(),
                    data: rx_data.resource_b(),
                    id: virt_rx_id,
                },
                clients: Vec::new(),
                switch_char: self.options.switch_char,
                terminate_num_char: self.options.terminate_num_char,
            });
        }

        for client in &self.clients {
            let mut client_config = serial::Client::default();

            let queue = shared_region(
                sd,
                format!("serial_client_tx_queue_{}", client.name),
                QUEUE_SIZE,
                false,
                (self.virt_tx, Perms::rw()),
                (client.pd, Perms::rw()),
            )?;
            let data = shared_region(
                sd,
                format!("serial_client_tx_data_{}", client.name),
                DATA_SIZE,
                false,
                (self.virt_tx, Perms::r()),
                (client.pd, Perms::rw()),
            )?;
            let (virt_id, client_id) =
                sd.add_channel(self.virt_tx, client.pd, ChannelOptions::default())?;
            virt_tx_config.clients.push(serial::Connection {
                queue: queue.resource_a(),
                data: data.resource_a(),
                id: virt_id,
            });
            client_config.tx = Some(serial::Connection {
                queue: queue.resource_b(),
                data: data.resource_b(),
                id: client_id,
            });

            if let (Some(virt_rx), Some(virt_rx_config)) = (self.virt_rx, virt_rx_config.as_mut())
            {
                let queue = shared_region(
                    sd,
                    format!("serial_client_rx_queue_{}", client.name),
                    QUEUE_SIZE,
                    false,
                    (virt_rx, Perms::rw()),
                    (client.pd, Perms::rw()),
                )?;
                let data = shared_region(
                    sd,
                    format!("serial_client_rx_data_{}", client.name),
                    DATA_SIZE,
                    false,
                    (virt_rx, Perms::rw()),
                    (client.pd, Perms::r()),
                )?;
                let (virt_id, client_id) =
                    sd.add_channel(virt_rx, client.pd, ChannelOptions::default())?;
                virt_rx_config.clients.push(serial::Connection {
                    queue: queue.resource_a(),
                    data: data.resource_a(),
                    id: virt_id,
                });
                client_config.rx = Some(serial::Connection {
                    queue: queue.resource_b(),
                    data: data.resource_b(),
                    id: client_id,
                });
            }

            self.client_configs.push((client.name.clone(), client_config));
        }

        self.driver_config = Some(driver_config);
        self.virt_tx_config = Some(virt_tx_config);
        self.virt_rx_config = virt_rx_config;
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
        let (Some(driver), Some(virt_tx)) = (&self.driver_config, &self.virt_tx_config) else {
            return Err(Error::NotConnected);
        };

        config::write_record(prefix, "serial_driver", &driver.serialise()?)?;
        config::write_record(prefix, "serial_virt_tx", &virt_tx.serialise()?)?;
        if let Some(virt_rx) = &self.virt_rx_config {
            config::write_record(prefix, "serial_virt_rx", &virt_rx.serialise()?)?;
        }
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("serial_client_{name}"), &client.serialise()?)?;
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
