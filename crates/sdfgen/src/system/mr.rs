//! Memory regions, map permissions, and maps.

use crate::arch::PageSize;

/// Stable handle to a memory region inside a [`super::SystemDescription`].
///
/// Regions are arena-allocated and never removed, so a handle stays valid
/// for the life of the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MrHandle(pub(crate) usize);

/// A named region of physical or anonymous memory.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) page_size: PageSize,
    /// Physical base. `Some` only for physical regions; assigned by the
    /// description's physical allocator when not supplied explicitly.
    pub(crate) paddr: Option<u64>,
    pub(crate) physical: bool,
    /// Default cacheability for maps of this region.
    pub(crate) cached: bool,
}

impl MemoryRegion {
    /// An anonymous region backed by whatever frames the loader picks.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            page_size: PageSize::Small,
            paddr: None,
            physical: false,
            cached: true,
        }
    }

    /// A physical region. With `paddr: None` the description assigns a
    /// physical base when the region is added; with `Some` the given
    /// base is used (device registers).
    #[must_use]
    pub fn physical(name: impl Into<String>, size: u64, paddr: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size,
            page_size: PageSize::Small,
            paddr,
            physical: true,
            cached: true,
        }
    }

    /// Overrides the default cacheability maps of this region inherit.
    #[must_use]
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Overrides the page-size class.
    #[must_use]
    pub fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    /// The region's name, unique within its description.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The region's size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The region's physical base, when fixed.
    #[must_use]
    pub fn paddr(&self) -> Option<u64> {
        self.paddr
    }
}

/// Map permissions: an ordered subset of read/write/execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perms(u8);

impl Perms {
    const READ: u8 = 1;
    const WRITE: u8 = 2;
    const EXEC: u8 = 4;

    /// Read-only.
    #[must_use]
    pub const fn r() -> Self {
        Self(Self::READ)
    }

    /// Read-write.
    #[must_use]
    pub const fn rw() -> Self {
        Self(Self::READ | Self::WRITE)
    }

    /// Read-write-execute.
    #[must_use]
    pub const fn rwx() -> Self {
        Self(Self::READ | Self::WRITE | Self::EXEC)
    }

    /// Parses a permission string such as `"rw"`.
    ///
    /// Returns `None` for characters outside `rwx` or for write-only
    /// permissions, which the kernel does not allow.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut bits = 0;
        for c in s.chars() {
            match c {
                'r' => bits |= Self::READ,
                'w' => bits |= Self::WRITE,
                'x' => bits |= Self::EXEC,
                _ => return None,
            }
        }
        if bits == 0 || bits == Self::WRITE {
            return None;
        }
        Some(Self(bits))
    }

    /// Renders the ordered `rwx` subset used in emitted XML.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            1 => "r",
            2 => "w",
            3 => "rw",
            4 => "x",
            5 => "rx",
            6 => "wx",
            7 => "rwx",
            _ => "",
        }
    }
}

/// A mapping of a memory region into a protection domain's address space.
#[derive(Debug, Clone)]
pub struct Map {
    pub(crate) mr: MrHandle,
    pub(crate) vaddr: u64,
    pub(crate) perms: Perms,
    /// `None` inherits the region's default cacheability.
    pub(crate) cached: Option<bool>,
    /// When set, the build records a symbol-to-vaddr binding so the
    /// image's symbol is patched to this map's vaddr.
    pub(crate) setvar_vaddr: Option<String>,
}

impl Map {
    /// Creates a map of `mr` at `vaddr` with the given permissions.
    #[must_use]
    pub fn new(mr: MrHandle, vaddr: u64, perms: Perms) -> Self {
        Self {
            mr,
            vaddr,
            perms,
            cached: None,
            setvar_vaddr: None,
        }
    }

    /// Overrides the inherited cacheability.
    #[must_use]
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    /// Attaches a set-variable symbol patched to this map's vaddr.
    #[must_use]
    pub fn with_setvar_vaddr(mut self, symbol: impl Into<String>) -> Self {
        self.setvar_vaddr = Some(symbol.into());
        self
    }

    /// The mapped region.
    #[must_use]
    pub fn mr(&self) -> MrHandle {
        self.mr
    }

    /// The map's virtual address.
    #[must_use]
    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    /// The map's permissions.
    #[must_use]
    pub fn perms(&self) -> Perms {
        self.perms
    }

    /// The map's cacheability override, when set.
    #[must_use]
    pub fn cached(&self) -> Option<bool> {
        self.cached
    }

    /// The set-variable symbol attached to this map, if any.
    #[must_use]
    pub fn setvar_vaddr(&self) -> Option<&str> {
        self.setvar_vaddr.as_deref()
    }
}
