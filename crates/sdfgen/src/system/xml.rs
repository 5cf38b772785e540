//! Microkit SDF (XML) emission.
//!
//! The output is deliberately minimal XML: memory regions first, then
//! channels, then protection domains with children expanded depth-first,
//! everything in insertion order so identical builds emit identical
//! documents. Numeric attributes are hex-encoded with a `0x` prefix.

use std::fmt::Write;

use crate::arch::PageSize;
use crate::system::channel::ChannelEnd;
use crate::system::pd::{IrqTrigger, PdHandle, SetVarKind};
use crate::system::SystemDescription;

/// Escapes the five XML-significant characters in an attribute value.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

pub(crate) fn emit(sd: &SystemDescription) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<system>\n");

    for mr in sd.memory_regions() {
        let _ = write!(
            out,
            "    <memory_region name=\"{}\" size=\"0x{:x}\"",
            escape(&mr.name),
            mr.size
        );
        if let Some(paddr) = mr.paddr {
            let _ = write!(out, " phys_addr=\"0x{paddr:x}\"");
        }
        if mr.page_size == PageSize::Large {
            let _ = write!(out, " page_size=\"0x{:x}\"", mr.page_size.bytes(sd.arch()));
        }
        out.push_str("/>\n");
    }

    for ch in sd.channels() {
        out.push_str("    <channel>\n");
        emit_end(&mut out, sd, ch.pd_a, ch.id_a, ch.pp == Some(ChannelEnd::A), ch.a_notify);
        emit_end(&mut out, sd, ch.pd_b, ch.id_b, ch.pp == Some(ChannelEnd::B), ch.b_notify);
        out.push_str("    </channel>\n");
    }

    for &pd in sd.root_pd_handles() {
        emit_pd(&mut out, sd, pd, 1);
    }

    out.push_str("</system>\n");
    out
}

fn emit_end(out: &mut String, sd: &SystemDescription, pd: PdHandle, id: u8, pp: bool, notify: bool) {
    let _ = write!(
        out,
        "        <end pd=\"{}\" id=\"0x{id:x}\"",
        escape(sd.pd(pd).name())
    );
    if pp {
        out.push_str(" pp=\"true\"");
    }
    if !notify {
        out.push_str(" notify=\"false\"");
    }
    out.push_str("/>\n");
}

fn emit_pd(out: &mut String, sd: &SystemDescription, handle: PdHandle, depth: usize) {
    let indent = "    ".repeat(depth);
    let pd = sd.pd(handle);

    let _ = write!(
        out,
        "{indent}<protection_domain name=\"{}\" priority=\"0x{:x}\"",
        escape(&pd.name),
        pd.effective_priority()
    );
    if let Some(id) = pd.child_id {
        let _ = write!(out, " id=\"0x{id:x}\"");
    }
    if let Some(budget) = pd.budget {
        let _ = write!(out, " budget=\"0x{budget:x}\"");
    }
    if let Some(period) = pd.period {
        let _ = write!(out, " period=\"0x{period:x}\"");
    }
    if pd.passive {
        out.push_str(" passive=\"true\"");
    }
    if let Some(stack_size) = pd.stack_size {
        let _ = write!(out, " stack_size=\"0x{stack_size:x}\"");
    }
    out.push_str(">\n");

    let _ = write!(
        out,
        "{indent}    <program_image path=\"{}\"/>\n",
        escape(&pd.program_image.display().to_string())
    );

    for map in &pd.maps {
        let mr = sd.mr(map.mr);
        let _ = write!(
            out,
            "{indent}    <map mr=\"{}\" vaddr=\"0x{:x}\" perms=\"{}\"",
            escape(&mr.name),
            map.vaddr,
            map.perms.as_str()
        );
        // The SDF schema defaults cached to true; emit only deviations.
        if !map.cached.unwrap_or(mr.cached) {
            out.push_str(" cached=\"false\"");
        }
        if let Some(symbol) = &map.setvar_vaddr {
            let _ = write!(out, " setvar_vaddr=\"{}\"", escape(symbol));
        }
        out.push_str("/>\n");
    }

    for irq in &pd.irqs {
        let trigger = match irq.trigger {
            IrqTrigger::Edge => "edge",
            IrqTrigger::Level => "level",
        };
        let _ = write!(
            out,
            "{indent}    <irq irq=\"0x{:x}\" id=\"0x{:x}\" trigger=\"{trigger}\"/>\n",
            irq.irq, irq.id
        );
    }

    for setvar in &pd.setvars {
        // Vaddr bindings are already carried by their map's
        // `setvar_vaddr` attribute.
        if let SetVarKind::RegionPaddr(mr_name) = &setvar.kind {
            let _ = write!(
                out,
                "{indent}    <setvar symbol=\"{}\" region_paddr=\"{}\"/>\n",
                escape(&setvar.symbol),
                escape(mr_name)
            );
        }
    }

    for &child in &pd.children {
        emit_pd(out, sd, child, depth + 1);
    }

    let _ = write!(out, "{indent}</protection_domain>\n");
}

#[cfg(test)]
mod tests {
    use crate::arch::Arch;
    use crate::system::{
        ChannelEnd, ChannelOptions, Map, MemoryRegion, Perms, ProtectionDomain,
        SystemDescription,
    };

    fn build() -> SystemDescription {
        let mut sd = SystemDescription::new(Arch::Aarch64);
        let a = sd
            .add_pd(ProtectionDomain::new("driver", "driver.elf").with_priority(200))
            .unwrap();
        let b = sd
            .add_pd(ProtectionDomain::new("client", "client.elf").with_priority(100))
            .unwrap();
        let mr = sd
            .add_memory_region(MemoryRegion::physical("regs", 0x1000, Some(0x900_0000)))
            .unwrap();
        let vaddr = sd.get_map_vaddr(a, mr);
        sd.add_map(
            a,
            Map::new(mr, vaddr, Perms::rw())
                .with_cached(false)
                .with_setvar_vaddr("uart_regs"),
        )
        .unwrap();
        sd.add_irq(a, 33, crate::system::IrqTrigger::Level, None).unwrap();
        sd.add_channel(
            a,
            b,
            ChannelOptions {
                pp: Some(ChannelEnd::B),
                a_notify: false,
                ..ChannelOptions::default()
            },
        )
        .unwrap();
        sd
    }

    #[test]
    fn deterministic_output() {
        let first = build().to_xml().unwrap();
        let second = build().to_xml().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn roundtrips_through_xml_parser() {
        let xml = build().to_xml().unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let system = doc.root_element();
        assert_eq!(system.tag_name().name(), "system");

        let mr = system
            .children()
            .find(|n| n.tag_name().name() == "memory_region")
            .unwrap();
        assert_eq!(mr.attribute("name"), Some("regs"));
        assert_eq!(mr.attribute("size"), Some("0x1000"));
        assert_eq!(mr.attribute("phys_addr"), Some("0x9000000"));

        let channel = system
            .children()
            .find(|n| n.tag_name().name() == "channel")
            .unwrap();
        let ends: Vec<_> = channel
            .children()
            .filter(|n| n.tag_name().name() == "end")
            .collect();
        assert_eq!(ends.len(), 2);
        assert_eq!(ends[0].attribute("pd"), Some("driver"));
        assert_eq!(ends[0].attribute("notify"), Some("false"));
        assert_eq!(ends[1].attribute("pd"), Some("client"));
        assert_eq!(ends[1].attribute("pp"), Some("true"));

        let pds: Vec<_> = system
            .children()
            .filter(|n| n.tag_name().name() == "protection_domain")
            .collect();
        assert_eq!(pds.len(), 2);
        assert_eq!(pds[0].attribute("priority"), Some("0xc8"));

        let map = pds[0]
            .children()
            .find(|n| n.tag_name().name() == "map")
            .unwrap();
        assert_eq!(map.attribute("mr"), Some("regs"));
        assert_eq!(map.attribute("perms"), Some("rw"));
        assert_eq!(map.attribute("cached"), Some("false"));
        assert_eq!(map.attribute("setvar_vaddr"), Some("uart_regs"));

        let irq = pds[0]
            .children()
            .find(|n| n.tag_name().name() == "irq")
            .unwrap();
        assert_eq!(irq.attribute("irq"), Some("0x21"));
        assert_eq!(irq.attribute("trigger"), Some("level"));
    }

    #[test]
    fn children_emitted_depth_first() {
        let mut sd = SystemDescription::new(Arch::Aarch64);
        let parent = sd.add_pd(ProtectionDomain::new("p", "p.elf")).unwrap();
        sd.add_child_pd(parent, 1, ProtectionDomain::new("c", "c.elf"))
            .unwrap();
        let xml = sd.to_xml().unwrap();

        let doc = roxmltree::Document::parse(&xml).unwrap();
        let parent_node = doc
            .root_element()
            .children()
            .find(|n| n.tag_name().name() == "protection_domain")
            .unwrap();
        let child_node = parent_node
            .children()
            .find(|n| n.tag_name().name() == "protection_domain")
            .unwrap();
        assert_eq!(child_node.attribute("name"), Some("c"));
        assert_eq!(child_node.attribute("id"), Some("0x1"));
    }

    #[test]
    fn names_are_escaped() {
        let mut sd = SystemDescription::new(Arch::Aarch64);
        sd.add_pd(ProtectionDomain::new("a<b", "a.elf")).unwrap();
        let xml = sd.to_xml().unwrap();
        assert!(xml.contains("name=\"a&lt;b\""));
        roxmltree::Document::parse(&xml).unwrap();
    }
}
