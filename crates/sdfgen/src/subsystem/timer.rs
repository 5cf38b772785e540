//! Timer subsystem builder: a passive driver called into by clients.

use std::path::Path;

use sdfgen_fdt::DeviceNode;

use crate::config::{self, timer, DeviceResources};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::system::{ChannelEnd, ChannelOptions, PdHandle, SystemDescription};

struct Client {
    pd: PdHandle,
    name: String,
}

/// The timer subsystem builder.
///
/// The driver is made passive on construction: it only ever runs on
/// scheduling contexts donated by callers, so a client's priority must
/// stay strictly below the driver's.
pub struct Timer<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    client_configs: Vec<(String, timer::Client)>,
}

impl<'a> Timer<'a> {
    /// Creates a timer subsystem over the given driver, marking it
    /// passive.
    #[must_use]
    pub fn new(
        sd: &mut SystemDescription,
        device: Option<DeviceNode<'a>>,
        driver: PdHandle,
    ) -> Self {
        sd.pd_mut(driver).passive = true;
        Self {
            device,
            driver,
            driver_name: sd.pd(driver).name().to_string(),
            clients: Vec::new(),
            connected: false,
            device_resources: None,
            client_configs: Vec::new(),
        }
    }

    /// Adds a client domain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateClient`] when the client was already
    /// added and [`Error::InvalidClient`] when its priority is not
    /// strictly below the driver's.
    pub fn add_client(&mut self, sd: &SystemDescription, client: PdHandle) -> Result<(), Error> {
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        let driver_priority = sd.pd(self.driver).effective_priority();
        let client_priority = sd.pd(client).effective_priority();
        if client_priority >= driver_priority {
            return Err(Error::InvalidClient(format!(
                "'{name}' priority {client_priority} must be below the timer driver's \
                 {driver_priority}"
            )));
        }
        self.clients.push(Client { pd: client, name });
        Ok(())
    }

    /// Expands the subsystem: driver resources plus one call channel per
    /// client.
    ///
    /// The driver never notifies clients on these channels; clients call
    /// into it and block for the reply.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidOptions`] on a second call, plus any
    /// error from driver creation or channel installation.
    pub fn connect(
        &mut self,
        sd: &mut SystemDescription,
        registry: &DriverRegistry,
    ) -> Result<(), Error> {
        if self.connected {
            return Err(Error::InvalidOptions(
                "timer subsystem already connected".into(),
            ));
        }

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::Timer,
            )?);
        }

        for client in &self.clients {
            let (_, client_id) = sd.add_channel(
                self.driver,
                client.pd,
                ChannelOptions {
                    pp: Some(ChannelEnd::B),
                    a_notify: false,
                    ..ChannelOptions::default()
                },
            )?;
            self.client_configs.push((
                client.name.clone(),
                timer::Client {
                    driver_id: client_id,
                },
            ));
        }

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
        if !self.connected {
            return Err(Error::NotConnected);
        }
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("timer_client_{name}"), &client.serialise()?)?;
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
