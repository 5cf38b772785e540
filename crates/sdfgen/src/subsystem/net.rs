//! Network subsystem builder: driver, RX/TX virtualisers, optional
//! per-client copiers, and clients, plus the lwIP pbuf-pool helper.

use std::path::Path;

use sdfgen_fdt::DeviceNode;
use tracing::warn;

use crate::config::{self, net, DeviceResources, RegionResource};
use crate::device::create_driver;
use crate::driver::{DeviceClass, DriverRegistry};
use crate::error::Error;
use crate::subsystem::{map_into, queue_region_size, shared_region};
use crate::system::{ChannelOptions, MemoryRegion, PdHandle, Perms, SystemDescription};

/// Bytes of packet data per buffer.
const BUFFER_SIZE: u64 = 2048;
/// Bytes per queue slot (buffer descriptor).
const QUEUE_SLOT_SIZE: u64 = 16;
/// Buffers per direction when a client does not say otherwise.
const DEFAULT_BUFFERS: u64 = 512;
/// Bytes reserved per pbuf structure in the lwIP pool.
const PBUF_STRUCT_SIZE: u64 = 56;

/// Options applied to the whole network subsystem.
#[derive(Debug, Clone)]
pub struct NetOptions {
    /// Buffers in the driver's RX ring and the shared DMA region.
    pub rx_buffers: u64,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            rx_buffers: DEFAULT_BUFFERS,
        }
    }
}

/// Per-client network options.
#[derive(Debug, Clone)]
pub struct NetClientOptions {
    /// Whether the client receives.
    pub rx: bool,
    /// Whether the client transmits.
    pub tx: bool,
    /// Buffers in the client's RX queues.
    pub rx_buffers: u64,
    /// Buffers in the client's TX queues.
    pub tx_buffers: u64,
    /// Explicit MAC address (`"02:00:00:00:00:01"`); generated when
    /// absent.
    pub mac_addr: Option<String>,
}

impl Default for NetClientOptions {
    fn default() -> Self {
        Self {
            rx: true,
            tx: true,
            rx_buffers: DEFAULT_BUFFERS,
            tx_buffers: DEFAULT_BUFFERS,
            mac_addr: None,
        }
    }
}

fn parse_mac(s: &str) -> Result<[u8; 6], Error> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        let part = parts
            .next()
            .ok_or_else(|| Error::InvalidMacAddr(s.to_string()))?;
        *byte =
            u8::from_str_radix(part, 16).map_err(|_| Error::InvalidMacAddr(s.to_string()))?;
    }
    if parts.next().is_some() {
        return Err(Error::InvalidMacAddr(s.to_string()));
    }
    Ok(mac)
}

fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

struct Client {
    pd: PdHandle,
    name: String,
    copier: Option<(PdHandle, String)>,
    options: NetClientOptions,
    mac: Option<[u8; 6]>,
    lwip: bool,
}

/// The network subsystem builder.
pub struct Net<'a> {
    device: Option<DeviceNode<'a>>,
    driver: PdHandle,
    driver_name: String,
    virt_rx: PdHandle,
    virt_tx: PdHandle,
    options: NetOptions,
    clients: Vec<Client>,
    connected: bool,
    device_resources: Option<DeviceResources>,
    driver_config: Option<net::Driver>,
    virt_rx_config: Option<net::VirtRx>,
    virt_tx_config: Option<net::VirtTx>,
    copy_configs: Vec<(String, net::Copy)>,
    client_configs: Vec<(String, net::Client)>,
    lwip_configs: Vec<(String, net::LibSddfLwip)>,
}

impl<'a> Net<'a> {
    /// Creates a network subsystem over the given components.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidVirt`] when any two of driver and
    /// virtualisers are the same domain.
    pub fn new(
        sd: &SystemDescription,
        device: Option<DeviceNode<'a>>,
        driver: PdHandle,
        virt_rx: PdHandle,
        virt_tx: PdHandle,
        options: NetOptions,
    ) -> Result<Self, Error> {
        let names = [
            sd.pd(driver).name(),
            sd.pd(virt_rx).name(),
            sd.pd(virt_tx).name(),
        ];
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::InvalidVirt(format!(
                    "'{name}' appears twice in the network component set"
                )));
            }
        }
        Ok(Self {
            device,
            driver,
            driver_name: sd.pd(driver).name().to_string(),
            virt_rx,
            virt_tx,
            options,
            clients: Vec::new(),
            connected: false,
            device_resources: None,
            driver_config: None,
            virt_rx_config: None,
            virt_tx_config: None,
            copy_configs: Vec::new(),
            client_configs: Vec::new(),
            lwip_configs: Vec::new(),
        })
    }

    /// Adds a client that maps the shared RX DMA region directly.
    ///
    /// # Errors
    ///
    /// See [`Self::add_client_with_copier`].
    pub fn add_client(
        &mut self,
        sd: &SystemDescription,
        client: PdHandle,
        options: NetClientOptions,
    ) -> Result<(), Error> {
        self.admit(sd, client, None, options)
    }

    /// Adds a client with a copier between it and the RX virtualiser, so
    /// the client never sees the shared DMA region.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidOptions`] when neither direction is
    /// enabled, [`Error::DuplicateClient`]/[`Error::DuplicateCopier`] on
    /// name collisions, and [`Error::InvalidMacAddr`]/
    /// [`Error::DuplicateMacAddr`] on bad explicit addresses.
    pub fn add_client_with_copier(
        &mut self,
        sd: &SystemDescription,
        client: PdHandle,
        copier: PdHandle,
        options: NetClientOptions,
    ) -> Result<(), Error> {
        let copier_name = sd.pd(copier).name().to_string();
        self.admit(sd, client, Some((copier, copier_name)), options)
    }

    fn admit(
        &mut self,
        sd: &SystemDescription,
        client: PdHandle,
        copier: Option<(PdHandle, String)>,
        options: NetClientOptions,
    ) -> Result<(), Error> {
        if !options.rx && !options.tx {
            return Err(Error::InvalidOptions(
                "network client enables neither rx nor tx".into(),
            ));
        }
        let name = sd.pd(client).name().to_string();
        if self.clients.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateClient(name));
        }
        if let Some((_, copier_name)) = &copier {
            let clash = self
                .clients
                .iter()
                .any(|c| c.copier.as_ref().is_some_and(|(_, n)| n == copier_name));
            if clash {
                return Err(Error::DuplicateCopier(copier_name.clone()));
            }
        }

        let mac = match &options.mac_addr {
            Some(s) => {
                let mac = parse_mac(s)?;
                if self.clients.iter().any(|c| c.mac == Some(mac)) {
                    return Err(Error::DuplicateMacAddr(format_mac(mac)));
                }
                Some(mac)
            }
            None => None,
        };

        self.clients.push(Client {
            pd: client,
            name,
            copier,
            options,
            mac,
            lwip: false,
        });
        Ok(())
    }

    /// Attaches the lwIP pbuf-pool helper to an already-added client.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidClient`] when the domain is not a
    /// client of this subsystem.
    pub fn enable_lwip(&mut self, sd: &SystemDescription, client: PdHandle) -> Result<(), Error> {
        let name = sd.pd(client).name();
        let client = self
            .clients
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::InvalidClient(format!("'{name}' is not a network client"))
            })?;
        client.lwip = true;
        Ok(())
    }

    /// Generates locally-administered addresses for clients without one:
    /// bit 1 of byte 0 set (LAA), bit 0 clear (unicast), never colliding
    /// with an address already assigned.
    fn assign_macs(&mut self) -> Result<(), Error> {
        let mut taken: Vec<[u8; 6]> = self.clients.iter().filter_map(|c| c.mac).collect();
        for client in self.clients.iter_mut().filter(|c| c.mac.is_none()) {
            let mut chosen = None;
            for n in 1..=u8::MAX {
                let candidate = [0x02, 0, 0, 0, 0, n];
                if !taken.contains(&candidate) {
                    chosen = Some(candidate);
                    break;
                }
            }
            let mac = chosen.ok_or_else(|| {
                Error::OutOfMemory("locally-administered MAC space exhausted".into())
            })?;
            warn!(client = %client.name, mac = %format_mac(mac), "generated MAC address");
            taken.push(mac);
            client.mac = Some(mac);
        }
        Ok(())
    }

    /// Expands the subsystem: driver resources, the shared RX DMA
    /// region, per-pair queue regions, channels, copiers, and config
    /// records.
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
                "network subsystem already connected".into(),
            ));
        }

        self.assign_macs()?;

        if let Some(device) = &self.device {
            self.device_resources = Some(create_driver(
                sd,
                registry,
                self.driver,
                device,
                DeviceClass::Network,
            )?);
        }

        let rx_buffers = self.options.rx_buffers;

        // One DMA region backs every inbound packet; only the driver
        // writes it.
        let rx_dma = shared_region(
            sd,
            "net_rx_dma",
            rx_buffers * BUFFER_SIZE,
            true,
            (self.driver, Perms::rw()),
            (self.virt_rx, Perms::r()),
        )?;

        let rx_queue_size = queue_region_size(sd, QUEUE_SLOT_SIZE, rx_buffers);
        let drv_rx_free = shared_region(
            sd,
            "net_driver_rx_free",
            rx_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt_rx, Perms::rw()),
        )?;
        let drv_rx_active = shared_region(
            sd,
            "net_driver_rx_active",
            rx_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt_rx, Perms::rw()),
        )?;
        let (driver_rx_id, virt_rx_id) =
            sd.add_channel(self.driver, self.virt_rx, ChannelOptions::default())?;

        let tx_buffers: u64 = self
            .clients
            .iter()
            .filter(|c| c.options.tx)
            .map(|c| c.options.tx_buffers)
            .sum::<u64>()
            .max(1);
        let tx_queue_size = queue_region_size(sd, QUEUE_SLOT_SIZE, tx_buffers);
        let drv_tx_free = shared_region(
            sd,
            "net_driver_tx_free",
            tx_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt_tx, Perms::rw()),
        )?;
        let drv_tx_active = shared_region(
            sd,
            "net_driver_tx_active",
            tx_queue_size,
            false,
            (self.driver, Perms::rw()),
            (self.virt_tx, Perms::rw()),
        )?;
        let (driver_tx_id, virt_tx_id) =
            sd.add_channel(self.driver, self.virt_tx, ChannelOptions::default())?;

        self.driver_config = Some(net::Driver {
            virt_rx: net::Connection {
                free_queue: drv_rx_free.resource_a(),
                active_queue: drv_rx_active.resource_a(),
                num_buffers: rx_buffers as u16,
                id: driver_rx_id,
            },
            virt_tx: net::Connection {
                free_queue: drv_tx_free.resource_a(),
                active_queue: drv_tx_active.resource_a(),
                num_buffers: tx_buffers as u16,
                id: driver_tx_id,
            },
        });
        let mut virt_rx_config = net::VirtRx {
            driver: net::Connection {
                free_queue: drv_rx_free.resource_b(),
                active_queue: drv_rx_active.resource_b(),
                num_buffers: rx_buffers as u16,
                id: virt_rx_id,
            },
            data_region: rx_dma.device_resource_b(sd),
            clients: Vec::new(),
        };
        let mut virt_tx_config = net::VirtTx {
            driver: net::Connection {
                free_queue: drv_tx_free.resource_b(),
                active_queue: drv_tx_active.resource_b(),
                num_buffers: tx_buffers as u16,
                id: virt_tx_id,
            },
            clients: Vec::new(),
        };

        for client in &self.clients {
            // Every client has one by now.
            let mac = client.mac.unwrap_or_default();
            let mut client_config = net::Client {
                mac_addr: mac,
                ..net::Client::default()
            };
            let client_rx_buffers = client.options.rx_buffers;
            let client_queue_size = queue_region_size(sd, QUEUE_SLOT_SIZE, client_rx_buffers);

            if client.options.rx {
                match &client.copier {
                    Some((copier, copier_name)) => {
                        let upstream_free = shared_region(
                            sd,
                            format!("net_copier_rx_free_{}", client.name),
                            client_queue_size,
                            false,
                            (self.virt_rx, Perms::rw()),
                            (*copier, Perms::rw()),
                        )?;
                        let upstream_active = shared_region(
                            sd,
                            format!("net_copier_rx_active_{}", client.name),
                            client_queue_size,
                            false,
                            (self.virt_rx, Perms::rw()),
                            (*copier, Perms::rw()),
                        )?;
                        let (virt_id, copier_upstream_id) =
                            sd.add_channel(self.virt_rx, *copier, ChannelOptions::default())?;

                        let downstream_free = shared_region(
                            sd,
                            format!("net_client_rx_free_{}", client.name),
                            client_queue_size,
                            false,
                            (*copier, Perms::rw()),
                            (client.pd, Perms::rw()),
                        )?;
                        let downstream_active = shared_region(
                            sd,
                            format!("net_client_rx_active_{}", client.name),
                            client_queue_size,
                            false,
                            (*copier, Perms::rw()),
                            (client.pd, Perms::rw()),
                        )?;
                        let (copier_downstream_id, client_id) =
                            sd.add_channel(*copier, client.pd, ChannelOptions::default())?;

                        // The copier reads the shared DMA region and
                        // writes into the client's private one.
                        let dma_vaddr = map_into(sd, *copier, rx_dma.mr, Perms::r())?;
                        let client_data = shared_region(
                            sd,
                            format!("net_client_rx_data_{}", client.name),
                            client_rx_buffers * BUFFER_SIZE,
                            false,
                            (*copier, Perms::rw()),
                            (client.pd, Perms::rw()),
                        )?;

                        virt_rx_config.clients.push(net::VirtRxClient {
                            conn: net::Connection {
                                free_queue: upstream_free.resource_a(),
                                active_queue: upstream_active.resource_a(),
                                num_buffers: client_rx_buffers as u16,
                                id: virt_id,
                            },
                            mac_addr: mac,
                        });
                        self.copy_configs.push((
                            copier_name.clone(),
                            net::Copy {
                                device: net::Connection {
                                    free_queue: upstream_free.resource_b(),
                                    active_queue: upstream_active.resource_b(),
                                    num_buffers: client_rx_buffers as u16,
                                    id: copier_upstream_id,
                                },
                                device_data: RegionResource {
                                    vaddr: dma_vaddr,
                                    size: rx_dma.size,
                                },
                                client: net::Connection {
                                    free_queue: downstream_free.resource_a(),
                                    active_queue: downstream_active.resource_a(),
                                    num_buffers: client_rx_buffers as u16,
                                    id: copier_downstream_id,
                                },
                                client_data: client_data.resource_a(),
                            },
                        ));
                        client_config.rx = Some((
                            net::Connection {
                                free_queue: downstream_free.resource_b(),
                                active_queue: downstream_active.resource_b(),
                                num_buffers: client_rx_buffers as u16,
                                id: client_id,
                            },
                            client_data.resource_b(),
                        ));
                    }
                    None => {
                        let free = shared_region(
                            sd,
                            format!("net_client_rx_free_{}", client.name),
                            client_queue_size,
                            false,
                            (self.virt_rx, Perms::rw()),
                            (client.pd, Perms::rw()),
                        )?;
                        let active = shared_region(
                            sd,
                            format!("net_client_rx_active_{}", client.name),
                            client_queue_size,
                            false,
                            (self.virt_rx, Perms::rw()),
                            (client.pd, Perms::rw()),
                        )?;
                        let (virt_id, client_id) =
                            sd.add_channel(self.virt_rx, client.pd, ChannelOptions::default())?;
                        // Without a copier the client reads packets
                        // straight out of the DMA region.
                        let dma_vaddr = map_into(sd, client.pd, rx_dma.mr, Perms::r())?;

                        virt_rx_config.clients.push(net::VirtRxClient {
                            conn: net::Connection {
                                free_queue: free.resource_a(),
                                active_queue: active.resource_a(),
                                num_buffers: client_rx_buffers as u16,
                                id: virt_id,
                            },
                            mac_addr: mac,
                        });
                        client_config.rx = Some((
                            net::Connection {
                                free_queue: free.resource_b(),
                                active_queue: active.resource_b(),
                                num_buffers: client_rx_buffers as u16,
                                id: client_id,
                            },
                            RegionResource {
                                vaddr: dma_vaddr,
                                size: rx_dma.size,
                            },
                        ));
                    }
                }
            }

            if client.options.tx {
                let client_tx_buffers = client.options.tx_buffers;
                let tx_queue_size = queue_region_size(sd, QUEUE_SLOT_SIZE, client_tx_buffers);
                let free = shared_region(
                    sd,
                    format!("net_client_tx_free_{}", client.name),
                    tx_queue_size,
                    false,
                    (self.virt_tx, Perms::rw()),
                    (client.pd, Perms::rw()),
                )?;
                let active = shared_region(
                    sd,
                    format!("net_client_tx_active_{}", client.name),
                    tx_queue_size,
                    false,
                    (self.virt_tx, Perms::rw()),
                    (client.pd, Perms::rw()),
                )?;
                // DMA-capable: the driver transmits straight out of the
                // client's region.
                let data = shared_region(
                    sd,
                    format!("net_client_tx_data_{}", client.name),
                    client_tx_buffers * BUFFER_SIZE,
                    true,
                    (self.virt_tx, Perms::r()),
                    (client.pd, Perms::rw()),
                )?;
                let (virt_id, client_id) =
                    sd.add_channel(self.virt_tx, client.pd, ChannelOptions::default())?;

                virt_tx_config.clients.push(net::VirtTxClient {
                    conn: net::Connection {
                        free_queue: free.resource_a(),
                        active_queue: active.resource_a(),
                        num_buffers: client_tx_buffers as u16,
                        id: virt_id,
                    },
                    data: data.device_resource_a(sd),
                });
                client_config.tx = Some((
                    net::Connection {
                        free_queue: free.resource_b(),
                        active_queue: active.resource_b(),
                        num_buffers: client_tx_buffers as u16,
                        id: client_id,
                    },
                    data.resource_b(),
                ));
            }

            if client.lwip {
                let num_pbufs = 2 * client_rx_buffers;
                let size = sd
                    .arch()
                    .round_up_to_page(num_pbufs * PBUF_STRUCT_SIZE);
                let mr = sd.add_memory_region(MemoryRegion::new(
                    format!("net_client_pbuf_pool_{}", client.name),
                    size,
                ))?;
                let vaddr = map_into(sd, client.pd, mr, Perms::rw())?;
                self.lwip_configs.push((
                    client.name.clone(),
                    net::LibSddfLwip {
                        pbuf_pool: RegionResource { vaddr, size },
                        num_pbufs,
                    },
                ));
            }

            self.client_configs.push((client.name.clone(), client_config));
        }

        self.virt_rx_config = Some(virt_rx_config);
        self.virt_tx_config = Some(virt_tx_config);
        self.connected = true;
        Ok(())
    }

    /// The MAC addresses in force after [`Self::connect`], in client
    /// order.
    #[must_use]
    pub fn mac_addrs(&self) -> Vec<[u8; 6]> {
        self.clients.iter().filter_map(|c| c.mac).collect()
    }

    /// Writes every config record as `<prefix>/<name>.data`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotConnected`] before a successful
    /// [`Self::connect`].
    pub fn serialise_config(&self, prefix: &Path) -> Result<(), Error> {
        let (Some(driver), Some(virt_rx), Some(virt_tx)) = (
            &self.driver_config,
            &self.virt_rx_config,
            &self.virt_tx_config,
        ) else {
            return Err(Error::NotConnected);
        };
        config::write_record(prefix, "net_driver", &driver.serialise()?)?;
        config::write_record(prefix, "net_virt_rx", &virt_rx.serialise()?)?;
        config::write_record(prefix, "net_virt_tx", &virt_tx.serialise()?)?;
        for (name, copy) in &self.copy_configs {
            config::write_record(prefix, &format!("net_copy_{name}"), &copy.serialise()?)?;
        }
        for (name, client) in &self.client_configs {
            config::write_record(prefix, &format!("net_client_{name}"), &client.serialise()?)?;
        }
        for (name, lwip) in &self.lwip_configs {
            config::write_record(prefix, &format!("lib_sddf_lwip_{name}"), &lwip.serialise()?)?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parsing() {
        assert_eq!(
            parse_mac("02:00:00:00:00:01").unwrap(),
            [2, 0, 0, 0, 0, 1]
        );
        assert_eq!(parse_mac("ff:ee:dd:cc:bb:aa").unwrap()[0], 0xff);
        assert!(parse_mac("02:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:01:02").is_err());
        assert!(parse_mac("zz:00:00:00:00:01").is_err());
    }

    #[test]
    fn mac_formatting() {
        assert_eq!(format_mac([2, 0, 0, 0, 0, 0x1a]), "02:00:00:00:00:1a");
    }
}
