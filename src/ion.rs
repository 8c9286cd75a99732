// Axel '0vercl0k' Souchet - October 16 2026
//! Dump the ion heaps of an Android kernel: heaps, the clients of their
//! device and the buffers each client holds handles to.
//!
//! ```text
//! heaps[] -> ion_heap -> ion_device.clients (rb_root of ion_client)
//!                          -> ion_client.handles (rb_root of ion_handle)
//!                               -> ion_handle.buffer -> ion_buffer.size
//! ```
//!
//! Every line of the report is prefixed by the indentation prefix repeated
//! once per nesting level; clients are one level deeper than their heap and
//! handles one level deeper than their client.
use std::fmt;
use std::io::Write;
use std::ops::ControlFlow;

use bitflags::bitflags;

use crate::error::{Result, WalkerError};
use crate::host::DumpHost;
use crate::layout::Resolver;
use crate::rbtree::{NodeVisitor, RbTree, WalkSummary};
use crate::Kva;

/// Symbol holding the number of registered heaps.
pub const NUM_HEAPS_SYMBOL: &str = "num_heaps";
/// Symbol holding a pointer to the array of `struct ion_heap *`.
pub const HEAPS_SYMBOL: &str = "heaps";
/// Longest name we're willing to read out of the dump.
pub const MAX_NAME_LEN: usize = 1_024;
/// More heaps than this means `num_heaps` is garbage.
pub const MAX_HEAPS: u64 = 4_096;
/// Default indentation prefix.
pub const DEFAULT_PREFIX: &str = "\t";

bitflags! {
    /// What to dump on top of the heap summary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DumpFlags: u32 {
        /// Dump every buffer of every client.
        const BUFFER = 1 << 0;
        /// Dump the clients of every heap.
        const CLIENT = 1 << 1;
        const ALL = Self::BUFFER.bits() | Self::CLIENT.bits();
    }
}

impl DumpFlags {
    /// Buffers are only reachable through the clients, so asking for them
    /// means walking the clients too.
    #[must_use]
    pub fn walk_clients(&self) -> bool {
        self.intersects(Self::ALL)
    }

    #[must_use]
    pub fn dump_buffers(&self) -> bool {
        self.contains(Self::BUFFER)
    }
}

/// Format a size with the largest unit that keeps it at or above 1.
///
/// # Examples
///
/// ```
/// # use ramdump_walker::format_size;
/// assert_eq!(format_size(1_023), "1023B");
/// assert_eq!(format_size(5_120), "5KB");
/// assert_eq!(format_size(1_048_575), "1023KB");
/// assert_eq!(format_size(1_048_576), "1MB");
/// assert_eq!(format_size(3 << 40), "3072GB");
/// ```
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1_024 && unit < UNITS.len() - 1 {
        value /= 1_024;
        unit += 1;
    }

    format!("{value}{}", UNITS[unit])
}

/// Indentation state threaded through the recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpLevel<'p> {
    prefix: &'p str,
    level: usize,
}

impl<'p> DumpLevel<'p> {
    #[must_use]
    pub fn new(prefix: &'p str) -> Self {
        Self { prefix, level: 0 }
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.level
    }

    /// One level deeper.
    #[must_use]
    pub fn nested(self) -> Self {
        Self {
            level: self.level + 1,
            ..self
        }
    }

    fn write_prefix<O: Write + ?Sized>(&self, out: &mut O) -> std::io::Result<()> {
        for _ in 0..self.level {
            out.write_all(self.prefix.as_bytes())?;
        }

        Ok(())
    }
}

/// One entry of the `heaps` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSlot {
    pub index: usize,
    /// Where the pointer is stored.
    pub at: Kva,
    /// The heap, or `None` if the slot couldn't be read.
    pub heap: Option<Kva>,
}

/// How a heap report went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapsOutcome {
    /// The kernel doesn't export the heap registry.
    Unsupported,
    /// That many heaps were reported.
    Dumped { heaps: usize },
}

pub struct IonReport<'a, H: ?Sized, W: ?Sized> {
    resolver: Resolver<'a, H>,
    flags: DumpFlags,
    prefix: &'a str,
    out: &'a mut W,
}

impl<'a, H, W> IonReport<'a, H, W>
where
    H: DumpHost + ?Sized,
    W: Write + ?Sized,
{
    pub fn new(resolver: Resolver<'a, H>, flags: DumpFlags, out: &'a mut W) -> Self {
        Self {
            resolver,
            flags,
            prefix: DEFAULT_PREFIX,
            out,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    fn line(&mut self, level: DumpLevel<'_>, args: fmt::Arguments<'_>) -> Result<()> {
        level.write_prefix(&mut *self.out)?;
        self.out.write_fmt(args)?;
        self.out.write_all(b"\n")?;

        Ok(())
    }

    /// Run `f`; if it fails because of a memory error, print a diagnostic
    /// line for the entry at `addr` and swallow the error so that its
    /// siblings still get dumped.
    fn guard<F>(&mut self, level: DumpLevel<'_>, kind: &str, addr: Kva, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        match f(self) {
            Err(e) if e.is_memory_fault() => {
                self.line(level, format_args!("invalid {kind} ptr:{addr:x} ({e})"))
            }
            r => r,
        }
    }

    /// Read the `char *` stored in `struct_name.member` of `base`.
    fn read_name(&self, base: Kva, struct_name: &str, member: &str) -> Result<String> {
        let ptr = self.resolver.read_ptr_member(base, struct_name, member)?;
        if ptr.is_null() {
            return Ok("(null)".to_string());
        }

        match self.resolver.reader().read_cstring(ptr, MAX_NAME_LEN) {
            Ok(name) => Ok(name),
            Err(e) if e.is_memory_fault() => Ok(format!("(invalid string ptr:{ptr:x})")),
            Err(e) => Err(e),
        }
    }

    /// Read an `atomic_t` member's counter.
    fn read_atomic(&self, base: Kva, struct_name: &str, member: &str) -> Result<i64> {
        let counter = self.resolver.member("atomic_t", "counter")?;
        let offset = self
            .resolver
            .nested_offset(&[(struct_name, member), ("atomic_t", "counter")])?;
        let addr = base.field(offset)?;

        self.resolver.reader().read_int(addr, counter.int_size())
    }

    /// Read the heap registry. Returns `None` if the kernel doesn't have it.
    pub fn list_heaps(&self) -> Result<Option<Vec<HeapSlot>>> {
        let registry_exists = self.resolver.symbol_exists(NUM_HEAPS_SYMBOL)
            && self.resolver.symbol_exists(HEAPS_SYMBOL);
        if !registry_exists {
            return Ok(None);
        }

        let reader = self.resolver.reader();
        let num_heaps = reader.read_u32(self.resolver.symbol_address(NUM_HEAPS_SYMBOL)?)?;
        if u64::from(num_heaps) > MAX_HEAPS {
            return Err(WalkerError::InvalidData("num_heaps looks corrupted"));
        }

        let heaps = reader.read_ptr(self.resolver.symbol_address(HEAPS_SYMBOL)?)?;
        let mut slots = Vec::with_capacity(num_heaps as usize);
        for index in 0..num_heaps as usize {
            // A bogus array pointer only makes its slots unreadable.
            let at = Kva::new(heaps.u64().wrapping_add(index as u64 * 8));
            let heap = reader.try_read_ptr(at)?;
            slots.push(HeapSlot { index, at, heap });
        }

        Ok(Some(slots))
    }

    /// Dump every heap; the entry point of the report.
    pub fn dump_heaps(&mut self) -> Result<HeapsOutcome> {
        let Some(slots) = self.list_heaps()? else {
            return Ok(HeapsOutcome::Unsupported);
        };

        let prefix = self.prefix;
        let level = DumpLevel::new(prefix);
        self.line(level, format_args!("num_heaps:{:x}", slots.len()))?;
        for slot in &slots {
            match slot.heap {
                Some(heap) => self.guard(level, "ion_heap", heap, |r| r.dump_heap(level, heap))?,
                None => self.line(
                    level,
                    format_args!("invalid heaps[{}] slot:{:x}", slot.index, slot.at),
                )?,
            }
        }

        Ok(HeapsOutcome::Dumped {
            heaps: slots.len(),
        })
    }

    pub fn dump_heap(&mut self, level: DumpLevel<'_>, heap: Kva) -> Result<()> {
        self.line(level, format_args!("---------- ion heap ---------------"))?;
        self.line(level, format_args!("ion_heap:{heap:x}"))?;
        let name = self.read_name(heap, "ion_heap", "name")?;
        self.line(level, format_args!("name:{name}"))?;
        let total_allocated = self.read_atomic(heap, "ion_heap", "total_allocated")?;
        self.line(level, format_args!("total_allocated:{total_allocated}"))?;
        let total_handles = self.read_atomic(heap, "ion_heap", "total_handles")?;
        self.line(level, format_args!("total_handles:{total_handles}"))?;

        let dev = self.resolver.read_ptr_member(heap, "ion_heap", "dev")?;
        self.line(level, format_args!("ion_device:{dev:x}"))?;
        let clients = self.resolver.member_address(dev, "ion_device", "clients")?;
        self.line(level, format_args!("clients_node:{clients:x}"))?;

        if self.flags.walk_clients() {
            self.dump_clients(level.nested(), clients)?;
        }

        Ok(())
    }

    /// Dump every `ion_client` of the tree rooted at `clients`.
    pub fn dump_clients(&mut self, level: DumpLevel<'_>, clients: Kva) -> Result<WalkSummary> {
        let node_offset = self.resolver.member_offset("ion_client", "node")?;
        let tree = RbTree::new(&self.resolver, clients, node_offset)?;
        let reader = self.resolver.reader();
        let mut visitor = ClientVisitor {
            report: self,
            level,
        };

        tree.walk(reader, &mut visitor)
    }

    /// Dump a client and the buffers it holds; returns how many bytes its
    /// buffers add up to.
    pub fn dump_client(&mut self, level: DumpLevel<'_>, client: Kva) -> Result<u64> {
        // The running total only lives as long as this client's walk.
        let mut total = 0u64;
        self.line(
            level,
            format_args!("----------------- ion_client ---------------"),
        )?;
        self.line(level, format_args!("ion_client:{client:x}"))?;
        let name = self.read_name(client, "ion_client", "name")?;
        self.line(level, format_args!("name:{name}"))?;
        let display_name = self.read_name(client, "ion_client", "display_name")?;
        self.line(level, format_args!("display_name:{display_name}"))?;
        let pid = self.resolver.read_int_member(client, "ion_client", "pid")?;
        self.line(level, format_args!("pid:{pid}"))?;

        let handles = self
            .resolver
            .member_address(client, "ion_client", "handles")?;
        self.dump_handles(level.nested(), handles, &mut total)?;
        self.line(
            level,
            format_args!("total used:{total} byte {}", format_size(total)),
        )?;

        Ok(total)
    }

    /// Walk the `ion_handle` tree rooted at `handles`, adding the size of
    /// every buffer to `total`.
    pub fn dump_handles(
        &mut self,
        level: DumpLevel<'_>,
        handles: Kva,
        total: &mut u64,
    ) -> Result<WalkSummary> {
        let node_offset = self.resolver.member_offset("ion_handle", "node")?;
        let tree = RbTree::new(&self.resolver, handles, node_offset)?;
        let reader = self.resolver.reader();
        let mut visitor = HandleVisitor {
            report: self,
            level,
            total,
        };

        tree.walk(reader, &mut visitor)
    }

    pub fn dump_handle(&mut self, level: DumpLevel<'_>, handle: Kva, total: &mut u64) -> Result<()> {
        let buffer = self.resolver.read_ptr_member(handle, "ion_handle", "buffer")?;

        self.guard(level, "ion_buffer", buffer, |r| {
            r.dump_buffer(level, buffer, total)
        })
    }

    pub fn dump_buffer(&mut self, level: DumpLevel<'_>, buffer: Kva, total: &mut u64) -> Result<()> {
        let detail = self.flags.dump_buffers();
        if detail {
            self.line(level, format_args!("ion_buffer:{buffer:x}"))?;
        }

        if !self.resolver.reader().is_kvaddr(buffer) {
            if detail {
                self.line(level, format_args!("invalid ion_buffer ptr:{buffer:x}"))?;
            }

            return Ok(());
        }

        let size = self.resolver.read_uint_member(buffer, "ion_buffer", "size")?;
        *total = total.saturating_add(size);

        if detail {
            self.line(level, format_args!("size:{}", format_size(size)))?;
        }

        Ok(())
    }
}

/// Dumps every client of a heap's device.
struct ClientVisitor<'r, 'a, 'p, H: ?Sized, W: ?Sized> {
    report: &'r mut IonReport<'a, H, W>,
    level: DumpLevel<'p>,
}

impl<H, W> NodeVisitor for ClientVisitor<'_, '_, '_, H, W>
where
    H: DumpHost + ?Sized,
    W: Write + ?Sized,
{
    fn visit(&mut self, client: Kva) -> Result<ControlFlow<()>> {
        let level = self.level;
        self.report.guard(level, "ion_client", client, |r| {
            r.dump_client(level, client).map(|_| ())
        })?;

        Ok(ControlFlow::Continue(()))
    }

    fn invalid(&mut self, node: Kva, reason: &WalkerError) -> Result<ControlFlow<()>> {
        self.report.line(
            self.level,
            format_args!("invalid ion_client node ptr:{node:x} ({reason})"),
        )?;

        Ok(ControlFlow::Continue(()))
    }
}

/// Accounts (and maybe dumps) every buffer of a client.
struct HandleVisitor<'r, 'a, 'p, 't, H: ?Sized, W: ?Sized> {
    report: &'r mut IonReport<'a, H, W>,
    level: DumpLevel<'p>,
    total: &'t mut u64,
}

impl<H, W> NodeVisitor for HandleVisitor<'_, '_, '_, '_, H, W>
where
    H: DumpHost + ?Sized,
    W: Write + ?Sized,
{
    fn visit(&mut self, handle: Kva) -> Result<ControlFlow<()>> {
        let level = self.level;
        let total = &mut *self.total;
        self.report.guard(level, "ion_handle", handle, |r| {
            r.dump_handle(level, handle, total)
        })?;

        Ok(ControlFlow::Continue(()))
    }

    fn invalid(&mut self, node: Kva, reason: &WalkerError) -> Result<ControlFlow<()>> {
        self.report.line(
            self.level,
            format_args!("invalid ion_handle node ptr:{node:x} ({reason})"),
        )?;

        Ok(ControlFlow::Continue(()))
    }
}
