//! The in-memory system description: memory regions, protection domains,
//! channels, and the SDF emitter.
//!
//! Regions, domains, and channels are arena-allocated inside the
//! description and referenced by stable handles; channels hold endpoint
//! handles, never owning pointers, so the domain tree and the channel
//! list cannot form ownership cycles.

pub mod channel;
pub mod mr;
pub mod pd;
mod xml;

pub use channel::{Channel, ChannelEnd, ChannelOptions};
pub use mr::{Map, MemoryRegion, MrHandle, Perms};
pub use pd::{
    Irq, IrqTrigger, PdHandle, ProtectionDomain, SetVar, SetVarKind, PD_DEFAULT_PRIORITY,
    PD_MAX_ID, PD_MAX_STACK_SIZE, PD_MIN_STACK_SIZE,
};

use tracing::debug;

use crate::arch::Arch;
use crate::error::Error;

/// First virtual address handed out for maps in a protection domain.
///
/// Chosen clear of typical image load addresses; each domain's cursor
/// grows monotonically from here by the page-rounded size of every
/// region it maps.
pub(crate) const MAP_VADDR_BASE: u64 = 0x4000_0000;

/// Top of the window the description allocates physical region bases
/// from, growing downward. Callers with a real memory map can override
/// the window with [`SystemDescription::set_physical_top`].
const PHYS_ALLOC_TOP: u64 = 0x1_0000_0000;

/// The root container of a generated system.
#[derive(Debug)]
pub struct SystemDescription {
    arch: Arch,
    mrs: Vec<MemoryRegion>,
    pds: Vec<ProtectionDomain>,
    channels: Vec<Channel>,
    /// Domains without a parent, in insertion order.
    root_pds: Vec<PdHandle>,
    next_paddr: u64,
}

impl SystemDescription {
    /// Creates an empty description for the given architecture.
    #[must_use]
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            mrs: Vec::new(),
            pds: Vec::new(),
            channels: Vec::new(),
            root_pds: Vec::new(),
            next_paddr: PHYS_ALLOC_TOP,
        }
    }

    /// The description's architecture.
    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Moves the physical-allocation window so subsequently added
    /// physical regions are placed below `top`.
    pub fn set_physical_top(&mut self, top: u64) {
        self.next_paddr = self.arch.round_down_to_page(top);
    }

    /// Adds a root protection domain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidConfig`] on a duplicate name, an
    /// unaligned or out-of-bounds stack size, or a budget exceeding the
    /// period.
    pub fn add_pd(&mut self, pd: ProtectionDomain) -> Result<PdHandle, Error> {
        self.check_pd(&pd)?;
        if pd.priority.is_none() {
            debug!(pd = %pd.name, priority = PD_DEFAULT_PRIORITY, "defaulting priority");
        }
        let handle = PdHandle(self.pds.len());
        self.root_pds.push(handle);
        self.pds.push(pd);
        Ok(handle)
    }

    /// Adds a child protection domain under `parent` with the given
    /// child id.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::add_pd`], or with [`Error::InvalidConfig`] when
    /// the child id is already taken among the parent's children.
    pub fn add_child_pd(
        &mut self,
        parent: PdHandle,
        child_id: u64,
        mut pd: ProtectionDomain,
    ) -> Result<PdHandle, Error> {
        self.check_pd(&pd)?;
        let duplicate = self.pds[parent.0]
            .children
            .iter()
            .any(|&c| self.pds[c.0].child_id == Some(child_id));
        if duplicate {
            return Err(Error::InvalidConfig(format!(
                "duplicate child id {child_id} in protection domain '{}'",
                self.pds[parent.0].name
            )));
        }
        pd.child_id = Some(child_id);
        pd.parent = Some(parent);
        let handle = PdHandle(self.pds.len());
        self.pds.push(pd);
        self.pds[parent.0].children.push(handle);
        Ok(handle)
    }

    fn check_pd(&self, pd: &ProtectionDomain) -> Result<(), Error> {
        if self.pds.iter().any(|p| p.name == pd.name) {
            return Err(Error::InvalidConfig(format!(
                "duplicate protection domain name '{}'",
                pd.name
            )));
        }
        if let Some(stack_size) = pd.stack_size {
            if !(pd::PD_MIN_STACK_SIZE..=pd::PD_MAX_STACK_SIZE).contains(&stack_size)
                || !self.arch.is_page_aligned(stack_size)
            {
                return Err(Error::InvalidConfig(format!(
                    "invalid stack size 0x{stack_size:x} on protection domain '{}'",
                    pd.name
                )));
            }
        }
        if let (Some(budget), Some(period)) = (pd.budget, pd.period) {
            if budget > period {
                return Err(Error::InvalidConfig(format!(
                    "budget ({budget}) exceeds period ({period}) on protection domain '{}'",
                    pd.name
                )));
            }
        }
        Ok(())
    }

    /// Adds a memory region.
    ///
    /// A physical region without an explicit base is placed by the
    /// description's downward-growing physical allocator.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidConfig`] on a duplicate name, a size
    /// that is zero or not page-aligned, or an unaligned physical base.
    pub fn add_memory_region(&mut self, mut mr: MemoryRegion) -> Result<MrHandle, Error> {
        if self.mrs.iter().any(|m| m.name == mr.name) {
            return Err(Error::InvalidConfig(format!(
                "duplicate memory region name '{}'",
                mr.name
            )));
        }
        let page = mr.page_size.bytes(self.arch);
        if mr.size == 0 || mr.size % page != 0 {
            return Err(Error::InvalidConfig(format!(
                "memory region '{}' size 0x{:x} is not a multiple of the page size",
                mr.name, mr.size
            )));
        }
        match mr.paddr {
            Some(paddr) if paddr % page != 0 => {
                return Err(Error::InvalidConfig(format!(
                    "memory region '{}' phys_addr 0x{paddr:x} is not page-aligned",
                    mr.name
                )));
            }
            None if mr.physical => {
                self.next_paddr = self
                    .next_paddr
                    .checked_sub(self.arch.round_up_to_page(mr.size))
                    .ok_or_else(|| {
                        Error::OutOfMemory(format!(
                            "physical window exhausted placing region '{}'",
                            mr.name
                        ))
                    })?;
                mr.paddr = Some(self.next_paddr);
            }
            _ => {}
        }
        let handle = MrHandle(self.mrs.len());
        self.mrs.push(mr);
        Ok(handle)
    }

    /// Finds a domain by name.
    #[must_use]
    pub fn find_pd_by_name(&self, name: &str) -> Option<PdHandle> {
        self.pds.iter().position(|p| p.name == name).map(PdHandle)
    }

    /// Finds a region by name.
    #[must_use]
    pub fn find_mr_by_name(&self, name: &str) -> Option<MrHandle> {
        self.mrs.iter().position(|m| m.name == name).map(MrHandle)
    }

    /// Finds an existing region with the given physical base.
    #[must_use]
    pub fn find_mr_by_paddr(&self, paddr: u64) -> Option<MrHandle> {
        self.mrs
            .iter()
            .position(|m| m.paddr == Some(paddr))
            .map(MrHandle)
    }

    /// The region behind a handle.
    #[must_use]
    pub fn mr(&self, handle: MrHandle) -> &MemoryRegion {
        &self.mrs[handle.0]
    }

    /// All regions, in insertion order.
    #[must_use]
    pub fn memory_regions(&self) -> &[MemoryRegion] {
        &self.mrs
    }

    /// The domain behind a handle.
    #[must_use]
    pub fn pd(&self, handle: PdHandle) -> &ProtectionDomain {
        &self.pds[handle.0]
    }

    /// Mutable access to the domain behind a handle.
    pub fn pd_mut(&mut self, handle: PdHandle) -> &mut ProtectionDomain {
        &mut self.pds[handle.0]
    }

    /// All channels, in insertion order.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Returns the next free page-aligned vaddr in `pd` for a map of
    /// `mr`, and advances the domain's cursor by the page-rounded region
    /// size.
    pub fn get_map_vaddr(&mut self, pd: PdHandle, mr: MrHandle) -> u64 {
        let size = self.arch.round_up_to_page(self.mrs[mr.0].size);
        let vaddr = self.pds[pd.0].next_map_vaddr;
        self.pds[pd.0].next_map_vaddr = vaddr + size;
        vaddr
    }

    /// Installs a map in `pd`.
    ///
    /// A map carrying a `setvar_vaddr` symbol also records the
    /// symbol-to-vaddr binding on the domain.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidConfig`] on an unaligned vaddr, an
    /// overlap with an existing map in the domain, or a duplicate
    /// set-variable symbol.
    pub fn add_map(&mut self, pd: PdHandle, map: Map) -> Result<(), Error> {
        let mr = &self.mrs[map.mr.0];
        let page = mr.page_size.bytes(self.arch);
        if map.vaddr % page != 0 {
            return Err(Error::InvalidConfig(format!(
                "map of '{}' at 0x{:x} is not page-aligned",
                mr.name, map.vaddr
            )));
        }

        let size = self.arch.round_up_to_page(mr.size);
        let end = map.vaddr + size;
        for existing in &self.pds[pd.0].maps {
            let existing_size = self.arch.round_up_to_page(self.mrs[existing.mr.0].size);
            let existing_end = existing.vaddr + existing_size;
            if map.vaddr < existing_end && existing.vaddr < end {
                return Err(Error::InvalidConfig(format!(
                    "map of '{}' at 0x{:x} overlaps map of '{}' at 0x{:x} in '{}'",
                    mr.name,
                    map.vaddr,
                    self.mrs[existing.mr.0].name,
                    existing.vaddr,
                    self.pds[pd.0].name
                )));
            }
        }

        if let Some(symbol) = map.setvar_vaddr.clone() {
            self.add_setvar(pd, symbol, SetVarKind::Vaddr(map.vaddr))?;
        }
        self.pds[pd.0].maps.push(map);
        Ok(())
    }

    /// Attaches a hardware interrupt to `pd`, allocating a slot id.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IdCollision`] or [`Error::IdExhausted`] from
    /// the domain's id namespace.
    pub fn add_irq(
        &mut self,
        pd: PdHandle,
        irq: u64,
        trigger: IrqTrigger,
        id: Option<u8>,
    ) -> Result<u8, Error> {
        let id = self.pds[pd.0].allocate_id(id)?;
        self.pds[pd.0].irqs.push(Irq { irq, trigger, id });
        Ok(id)
    }

    /// Creates a channel between two domains, allocating a slot id at
    /// each end. Returns the pair `(id_a, id_b)`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IdCollision`] or [`Error::IdExhausted`] from
    /// either domain's id namespace.
    pub fn add_channel(
        &mut self,
        pd_a: PdHandle,
        pd_b: PdHandle,
        options: ChannelOptions,
    ) -> Result<(u8, u8), Error> {
        let id_a = self.pds[pd_a.0].allocate_id(options.a_id)?;
        let id_b = self.pds[pd_b.0].allocate_id(options.b_id)?;
        self.channels.push(Channel {
            pd_a,
            pd_b,
            id_a,
            id_b,
            pp: options.pp,
            a_notify: options.a_notify,
            b_notify: options.b_notify,
        });
        Ok((id_a, id_b))
    }

    /// Declares a set-variable on `pd`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidConfig`] on an empty or duplicate
    /// symbol.
    pub fn add_setvar(
        &mut self,
        pd: PdHandle,
        symbol: impl Into<String>,
        kind: SetVarKind,
    ) -> Result<(), Error> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "empty set-variable symbol in protection domain '{}'",
                self.pds[pd.0].name
            )));
        }
        if self.pds[pd.0].setvars.iter().any(|s| s.symbol == symbol) {
            return Err(Error::InvalidConfig(format!(
                "setvar on symbol '{symbol}' already exists in '{}'",
                self.pds[pd.0].name
            )));
        }
        self.pds[pd.0].setvars.push(SetVar { symbol, kind });
        Ok(())
    }

    /// Validates the global invariants an emitted description must hold.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidConfig`] describing the first violation
    /// found.
    pub fn validate(&self) -> Result<(), Error> {
        // Each hardware interrupt may be claimed by at most one domain.
        let mut claimed_irqs: Vec<u64> = Vec::new();
        for pd in &self.pds {
            for irq in &pd.irqs {
                if claimed_irqs.contains(&irq.irq) {
                    return Err(Error::InvalidConfig(format!(
                        "hardware irq {} claimed twice (protection domain '{}')",
                        irq.irq, pd.name
                    )));
                }
                claimed_irqs.push(irq.irq);
            }
        }

        // Channel endpoints must be domains of this description.
        for (idx, ch) in self.channels.iter().enumerate() {
            if ch.pd_a.0 >= self.pds.len() || ch.pd_b.0 >= self.pds.len() {
                return Err(Error::InvalidConfig(format!(
                    "channel {idx} references a protection domain outside the description"
                )));
            }
        }

        // Slot ids recorded on IRQs and channel ends must be consistent
        // with each domain's allocator state.
        for (pd_idx, pd) in self.pds.iter().enumerate() {
            let mut seen: u64 = 0;
            for irq in &pd.irqs {
                seen |= 1 << irq.id;
            }
            for ch in &self.channels {
                if ch.pd_a.0 == pd_idx {
                    seen |= 1 << ch.id_a;
                }
                if ch.pd_b.0 == pd_idx {
                    seen |= 1 << ch.id_b;
                }
            }
            if seen & !pd.used_ids != 0 {
                return Err(Error::InvalidConfig(format!(
                    "inconsistent id namespace in protection domain '{}'",
                    pd.name
                )));
            }
        }

        // Maps must reference live regions at aligned vaddrs; set-variable
        // region references must resolve.
        for pd in &self.pds {
            for map in &pd.maps {
                if map.mr.0 >= self.mrs.len() {
                    return Err(Error::InvalidConfig(format!(
                        "map in '{}' references a region outside the description",
                        pd.name
                    )));
                }
                let mr = &self.mrs[map.mr.0];
                if map.vaddr % mr.page_size.bytes(self.arch) != 0 {
                    return Err(Error::InvalidConfig(format!(
                        "map of '{}' in '{}' has unaligned vaddr 0x{:x}",
                        mr.name, pd.name, map.vaddr
                    )));
                }
            }
            for setvar in &pd.setvars {
                if setvar.symbol.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "empty set-variable symbol in protection domain '{}'",
                        pd.name
                    )));
                }
                if let SetVarKind::RegionPaddr(mr_name) = &setvar.kind {
                    if !self.mrs.iter().any(|m| &m.name == mr_name) {
                        return Err(Error::InvalidConfig(format!(
                            "setvar '{}' references unknown region '{mr_name}'",
                            setvar.symbol
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Validates the description and emits it as Microkit SDF XML.
    ///
    /// Output is deterministic: regions, channels, and domains appear in
    /// insertion order, children depth-first under their parents.
    ///
    /// # Errors
    ///
    /// Fails when [`Self::validate`] fails.
    pub fn to_xml(&self) -> Result<String, Error> {
        self.validate()?;
        Ok(xml::emit(self))
    }

    pub(crate) fn root_pd_handles(&self) -> &[PdHandle] {
        &self.root_pds
    }
}
