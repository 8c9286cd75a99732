// Axel '0vercl0k' Souchet - October 16 2026
//! The services the dump-analysis host provides: reading the memory image,
//! resolving symbols, describing structure layouts and the per-cpu offset
//! table. Loading the dump container and parsing debug info is the host's
//! business; everything in this crate only talks to these traits.
use crate::error::PageReadError;
use crate::Kva;

/// Read access to the memory image.
pub trait MemoryImage {
    /// Does `kva` belong to the kernel virtual address space? This is checked
    /// before every read, the same way `crash` checks `IS_KVADDR`.
    fn is_kvaddr(&self, kva: Kva) -> bool;

    /// Read `buf.len()` bytes at `kva`. [`crate::Reader`] guarantees that
    /// the request never straddles a page boundary, so an implementation only
    /// has to deal with one page at a time.
    fn read_page(&self, kva: Kva, buf: &mut [u8]) -> Result<(), PageReadError>;
}

/// The kernel symbol table.
pub trait SymbolTable {
    /// Get the address of the symbol `name`, `None` if the kernel doesn't have
    /// it (which is common for config-dependent globals).
    fn symbol_value(&self, name: &str) -> Option<Kva>;

    fn symbol_exists(&self, name: &str) -> bool {
        self.symbol_value(name).is_some()
    }
}

/// Structure layouts coming out of the kernel's debug info.
pub trait TypeLayout {
    /// Byte offset of `member` inside `struct_name`.
    fn member_offset(&self, struct_name: &str, member: &str) -> Option<u64>;

    /// Byte size of `member`, if the debug info knows it.
    fn member_size(&self, _struct_name: &str, _member: &str) -> Option<usize> {
        None
    }
}

/// What the host knows about the cpus of the dumped machine.
pub trait PerCpuInfo {
    /// Number of logical cpus.
    fn cpu_count(&self) -> usize;

    /// `__per_cpu_offset[cpu]` if the host already parsed it. When it returns
    /// `None`, the resolver reads the array out of the image itself.
    fn per_cpu_offset(&self, _cpu: usize) -> Option<u64> {
        None
    }
}

/// Everything a walker needs from the host.
pub trait DumpHost: MemoryImage + SymbolTable + TypeLayout + PerCpuInfo {}

impl<T> DumpHost for T where T: MemoryImage + SymbolTable + TypeLayout + PerCpuInfo {}
