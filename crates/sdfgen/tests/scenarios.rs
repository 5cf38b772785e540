//! End-to-end builder scenarios: each one constructs a full system,
//! connects a subsystem, and checks the resulting description, XML, and
//! config blobs.

mod common;

use std::fs;

use sdfgen::{
    Arch, Blk, BlkClientOptions, ChannelEnd, DriverRegistry, Error, I2c, I2cOptions, Net,
    NetClientOptions, NetOptions, ProtectionDomain, Serial, SerialOptions, SystemDescription,
    Timer,
};

fn pd(name: &str, priority: u8) -> ProtectionDomain {
    ProtectionDomain::new(name, format!("{name}.elf")).with_priority(priority)
}

// ---- Scenario: I²C reactor with no device -----------------------------------

fn build_i2c_reactor() -> (SystemDescription, Vec<String>) {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("i2c_reactor_driver", 200)).unwrap();
    let virt = sd.add_pd(pd("i2c_virt", 199)).unwrap();
    let client = sd.add_pd(pd("i2c_reactor_client", 198)).unwrap();

    let registry = DriverRegistry::new();
    let mut i2c = I2c::new(&sd, None, driver, virt, I2cOptions::default()).unwrap();
    i2c.add_client(&sd, client).unwrap();
    i2c.connect(&mut sd, &registry).unwrap();

    let xml = sd.to_xml().unwrap();
    (sd, vec![xml])
}

#[test]
fn i2c_reactor() {
    let (sd, xml) = build_i2c_reactor();

    for name in [
        "i2c_driver_request",
        "i2c_driver_response",
        "i2c_client_request_i2c_reactor_client",
        "i2c_client_response_i2c_reactor_client",
        "i2c_client_data_i2c_reactor_client",
    ] {
        assert!(sd.find_mr_by_name(name).is_some(), "missing region {name}");
    }

    assert_eq!(sd.channels().len(), 2);
    let client = sd.find_pd_by_name("i2c_reactor_client").unwrap();
    let virt = sd.find_pd_by_name("i2c_virt").unwrap();
    let client_channel = &sd.channels()[1];
    assert_eq!(client_channel.pd_a(), virt);
    assert_eq!(client_channel.pd_b(), client);
    assert_eq!(client_channel.pp(), Some(ChannelEnd::B));

    assert_eq!(sd.pd(client).maps().len(), 3);

    let xml = &xml[0];
    assert!(!xml.is_empty());
    for name in ["i2c_reactor_driver", "i2c_virt", "i2c_reactor_client"] {
        assert!(xml.contains(name), "XML is missing {name}");
    }
}

#[test]
fn i2c_reactor_is_deterministic() {
    assert_eq!(build_i2c_reactor().1, build_i2c_reactor().1);
}

#[test]
fn i2c_second_connect_rejected() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("drv", 200)).unwrap();
    let virt = sd.add_pd(pd("virt", 199)).unwrap();
    let registry = DriverRegistry::new();
    let mut i2c = I2c::new(&sd, None, driver, virt, I2cOptions::default()).unwrap();
    i2c.connect(&mut sd, &registry).unwrap();
    assert!(matches!(
        i2c.connect(&mut sd, &registry),
        Err(Error::InvalidOptions(_))
    ));
}

#[test]
fn serialise_before_connect_rejected() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("drv", 200)).unwrap();
    let virt = sd.add_pd(pd("virt", 199)).unwrap();
    let i2c = I2c::new(&sd, None, driver, virt, I2cOptions::default()).unwrap();
    let out = tempfile::tempdir().unwrap();
    assert_eq!(
        i2c.serialise_config(out.path()),
        Err(Error::NotConnected)
    );
    let mut sd2 = SystemDescription::new(Arch::Aarch64);
    let d2 = sd2.add_pd(pd("drv", 200)).unwrap();
    let registry = DriverRegistry::new();
    let mut timer = Timer::new(&mut sd2, None, d2);
    assert_eq!(
        timer.serialise_config(out.path()),
        Err(Error::NotConnected)
    );
    timer.connect(&mut sd2, &registry).unwrap();
    timer.serialise_config(out.path()).unwrap();
}

// ---- Scenario: TX-only serial console ---------------------------------------

#[test]
fn serial_tx_only() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("uart_driver", 200)).unwrap();
    let virt_tx = sd.add_pd(pd("serial_virt_tx", 199)).unwrap();
    let client = sd.add_pd(pd("console", 100)).unwrap();

    let registry = DriverRegistry::new();
    let options = SerialOptions {
        begin_str: "hello".into(),
        ..SerialOptions::default()
    };
    let mut serial = Serial::new(&sd, None, driver, virt_tx, None, options).unwrap();
    serial.add_client(&sd, client).unwrap();
    serial.connect(&mut sd, &registry).unwrap();

    let out = tempfile::tempdir().unwrap();
    serial.serialise_config(out.path()).unwrap();

    let driver_blob = fs::read(out.path().join("serial_driver.data")).unwrap();
    assert_eq!(&driver_blob[0..4], b"sDDF");
    // default_baud sits right after the header, then the rx flag.
    assert_eq!(&driver_blob[8..16], &115_200u64.to_le_bytes());
    assert_eq!(driver_blob[16], 0, "rx must be disabled");

    let virt_blob = fs::read(out.path().join("serial_virt_tx.data")).unwrap();
    // Header (8) + driver connection (40), then the colour flag and the
    // null-terminated begin string.
    assert_eq!(virt_blob[48], 1, "colour defaults to enabled");
    assert_eq!(&virt_blob[56..61], b"hello");
    assert_eq!(virt_blob[61], 0);

    assert!(out.path().join("serial_client_console.data").is_file());
    assert!(!out.path().join("serial_virt_rx.data").exists());
}

#[test]
fn serial_rejects_shared_virt_names() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("uart", 200)).unwrap();
    assert!(matches!(
        Serial::new(&sd, None, driver, driver, None, SerialOptions::default()),
        Err(Error::InvalidVirt(_))
    ));
}

#[test]
fn serial_rejects_oversized_begin_str() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("uart", 200)).unwrap();
    let virt_tx = sd.add_pd(pd("virt_tx", 199)).unwrap();
    let options = SerialOptions {
        begin_str: "x".repeat(129),
        ..SerialOptions::default()
    };
    assert!(matches!(
        Serial::new(&sd, None, driver, virt_tx, None, options),
        Err(Error::InvalidBeginString(_))
    ));
}

// ---- Scenario: network with copiers -----------------------------------------

#[test]
fn network_with_copier() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("eth_driver", 200)).unwrap();
    let virt_rx = sd.add_pd(pd("net_virt_rx", 199)).unwrap();
    let virt_tx = sd.add_pd(pd("net_virt_tx", 199)).unwrap();
    let copier0 = sd.add_pd(pd("copier0", 150)).unwrap();
    let copier1 = sd.add_pd(pd("copier1", 150)).unwrap();
    let client0 = sd.add_pd(pd("client0", 100)).unwrap();
    let client1 = sd.add_pd(pd("client1", 100)).unwrap();

    let registry = DriverRegistry::new();
    let mut net = Net::new(&sd, None, driver, virt_rx, virt_tx, NetOptions::default()).unwrap();
    net.add_client_with_copier(
        &sd,
        client0,
        copier0,
        NetClientOptions {
            mac_addr: Some("02:00:00:00:00:01".into()),
            ..NetClientOptions::default()
        },
    )
    .unwrap();
    net.add_client_with_copier(&sd, client1, copier1, NetClientOptions::default())
        .unwrap();
    net.connect(&mut sd, &registry).unwrap();

    let macs = net.mac_addrs();
    assert_eq!(macs.len(), 2);
    assert_eq!(macs[0], [0x02, 0, 0, 0, 0, 0x01]);
    // The generated address is locally administered, unicast, and
    // distinct from the explicit one.
    assert_ne!(macs[1], macs[0]);
    assert_ne!(macs[1][0] & 0x02, 0);
    assert_eq!(macs[1][0] & 0x01, 0);

    // Four queue regions per copier/client RX chain.
    for client in ["client0", "client1"] {
        for queue in [
            "net_copier_rx_free",
            "net_copier_rx_active",
            "net_client_rx_free",
            "net_client_rx_active",
        ] {
            let name = format!("{queue}_{client}");
            assert!(sd.find_mr_by_name(&name).is_some(), "missing region {name}");
        }
    }

    // The shared DMA region exists once and is physical.
    let rx_dma = sd.find_mr_by_name("net_rx_dma").unwrap();
    assert!(sd.mr(rx_dma).paddr().is_some());
}

#[test]
fn network_rejects_rx_tx_both_disabled() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("eth_driver", 200)).unwrap();
    let virt_rx = sd.add_pd(pd("net_virt_rx", 199)).unwrap();
    let virt_tx = sd.add_pd(pd("net_virt_tx", 199)).unwrap();
    let client = sd.add_pd(pd("client", 100)).unwrap();

    let mut net = Net::new(&sd, None, driver, virt_rx, virt_tx, NetOptions::default()).unwrap();
    assert!(matches!(
        net.add_client(
            &sd,
            client,
            NetClientOptions {
                rx: false,
                tx: false,
                ..NetClientOptions::default()
            },
        ),
        Err(Error::InvalidOptions(_))
    ));
}

#[test]
fn network_rejects_duplicate_mac() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("eth_driver", 200)).unwrap();
    let virt_rx = sd.add_pd(pd("net_virt_rx", 199)).unwrap();
    let virt_tx = sd.add_pd(pd("net_virt_tx", 199)).unwrap();
    let a = sd.add_pd(pd("a", 100)).unwrap();
    let b = sd.add_pd(pd("b", 100)).unwrap();

    let mut net = Net::new(&sd, None, driver, virt_rx, virt_tx, NetOptions::default()).unwrap();
    let mac = NetClientOptions {
        mac_addr: Some("02:00:00:00:00:07".into()),
        ..NetClientOptions::default()
    };
    net.add_client(&sd, a, mac.clone()).unwrap();
    assert!(matches!(
        net.add_client(&sd, b, mac),
        Err(Error::DuplicateMacAddr(_))
    ));
}

// ---- Scenario: block with a partitioned client ------------------------------

#[test]
fn block_single_client() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("blk_driver", 200)).unwrap();
    let virt = sd.add_pd(pd("blk_virt", 199)).unwrap();
    let client = sd.add_pd(pd("c1", 100)).unwrap();

    let registry = DriverRegistry::new();
    let mut blk = Blk::new(&sd, None, driver, virt).unwrap();
    blk.add_client(
        &sd,
        client,
        BlkClientOptions {
            partition: 0,
            queue_capacity: 64,
            data_size: 0x10_0000,
        },
    )
    .unwrap();
    blk.connect(&mut sd, &registry).unwrap();

    // 64 slots of 128 bytes round up to two pages.
    let req = sd.find_mr_by_name("blk_driver_request").unwrap();
    assert_eq!(sd.mr(req).size(), 0x2000);

    let data = sd.find_mr_by_name("blk_client_data_c1").unwrap();
    assert_eq!(sd.mr(data).size(), 0x10_0000);
    assert!(sd.mr(data).paddr().is_some(), "client data must be physical");

    // The virtualiser maps every client region read-write except the
    // storage info it publishes.
    let virt_maps = sd.pd(virt).maps();
    for name in [
        "blk_client_storage_info_c1",
        "blk_client_request_c1",
        "blk_client_response_c1",
        "blk_client_data_c1",
    ] {
        let mr = sd.find_mr_by_name(name).unwrap();
        let map = virt_maps.iter().find(|m| m.mr() == mr).unwrap();
        assert_eq!(map.perms().as_str(), "rw", "{name} must be rw in the virt");
    }
}

// ---- Scenario: probe rejects clashing compatibles ---------------------------

#[test]
fn probe_rejects_duplicate_compatible() {
    let repo = tempfile::tempdir().unwrap();
    for driver in ["uart_a", "uart_b"] {
        common::write_manifest(
            repo.path(),
            "serial",
            driver,
            r#"{
                "compatible": ["foo,uart"],
                "resources": {
                    "regions": [{"name": "regs", "dt_index": 0}],
                    "irqs": []
                }
            }"#,
        );
    }

    let mut registry = DriverRegistry::new();
    assert!(matches!(
        registry.probe(repo.path()),
        Err(Error::InvalidConfig(_))
    ));
}

// ---- Scenario: timer --------------------------------------------------------

#[test]
fn timer_client_priorities() {
    let mut sd = SystemDescription::new(Arch::Aarch64);
    let driver = sd.add_pd(pd("timer_driver", 150)).unwrap();
    let low = sd.add_pd(pd("low", 100)).unwrap();
    let high = sd.add_pd(pd("high", 150)).unwrap();

    let registry = DriverRegistry::new();
    let mut timer = Timer::new(&mut sd, None, driver);
    assert!(sd.pd(driver).passive());

    assert!(matches!(
        timer.add_client(&sd, high),
        Err(Error::InvalidClient(_))
    ));
    timer.add_client(&sd, low).unwrap();
    timer.connect(&mut sd, &registry).unwrap();

    let channel = &sd.channels()[0];
    assert_eq!(channel.pd_a(), driver);
    assert_eq!(channel.pd_b(), low);
    assert_eq!(channel.pp(), Some(ChannelEnd::B));
    assert!(!channel.a_notify(), "driver must not notify the client");
    assert!(channel.b_notify());
}
