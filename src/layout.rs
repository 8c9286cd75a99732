// Axel '0vercl0k' Souchet - October 16 2026
//! Symbol and structure layout resolution.
//!
//! Structure layouts change from one kernel build to the next, so no member
//! offset is ever hardcoded: they are asked to the host's debug info the first
//! time they are needed and cached for the rest of the session.
use std::cell::RefCell;
use std::collections::HashMap;

use log::debug;

use crate::error::{Result, WalkerError};
use crate::host::DumpHost;
use crate::virt::Reader;
use crate::Kva;

/// Symbol holding the per-cpu offset table.
pub const PER_CPU_OFFSET_SYMBOL: &str = "__per_cpu_offset";

/// Where a member lives inside its structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub offset: u64,
    /// Size of the member in bytes, if the debug info knows it.
    pub size: Option<usize>,
}

impl Member {
    /// The size to use when reading the member as an integer; unknown sizes
    /// are read as a `long`.
    #[must_use]
    pub fn int_size(&self) -> usize {
        self.size.unwrap_or(8)
    }
}

/// Layout lookups done during a session.
#[derive(Debug, Default)]
pub struct MemberCache {
    members: RefCell<HashMap<(String, String), Member>>,
}

impl MemberCache {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.members.borrow_mut().clear();
    }
}

pub struct Resolver<'a, H: ?Sized> {
    host: &'a H,
    cache: &'a MemberCache,
}

impl<H: ?Sized> Clone for Resolver<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for Resolver<'_, H> {}

impl<'a, H: DumpHost + ?Sized> Resolver<'a, H> {
    pub fn new(host: &'a H, cache: &'a MemberCache) -> Self {
        Self { host, cache }
    }

    pub fn reader(&self) -> Reader<'a, H> {
        Reader::new(self.host)
    }

    pub fn symbol_exists(&self, name: &str) -> bool {
        self.host.symbol_exists(name)
    }

    /// Get the address of `name`; callers that can live without the symbol
    /// should check [`Resolver::symbol_exists`] first.
    pub fn symbol_address(&self, name: &str) -> Result<Kva> {
        self.host
            .symbol_value(name)
            .ok_or_else(|| WalkerError::UnknownSymbol(name.to_string()))
    }

    /// Look up `struct_name.member`. Not knowing a member is fatal: without
    /// the right layout nothing we'd read after would make sense.
    pub fn member(&self, struct_name: &str, member: &str) -> Result<Member> {
        let key = (struct_name.to_string(), member.to_string());
        if let Some(m) = self.cache.members.borrow().get(&key) {
            return Ok(*m);
        }

        let offset = self.host.member_offset(struct_name, member).ok_or_else(|| {
            WalkerError::UnknownMember {
                struct_name: struct_name.to_string(),
                member: member.to_string(),
            }
        })?;
        let m = Member {
            offset,
            size: self.host.member_size(struct_name, member),
        };

        debug!("{struct_name}.{member} is at +{offset:#x}");
        self.cache.members.borrow_mut().insert(key, m);

        Ok(m)
    }

    pub fn member_offset(&self, struct_name: &str, member: &str) -> Result<u64> {
        self.member(struct_name, member).map(|m| m.offset)
    }

    /// Offset of a member nested in other members, e.g.
    /// `[("ion_heap", "total_allocated"), ("atomic_t", "counter")]`.
    pub fn nested_offset(&self, path: &[(&str, &str)]) -> Result<u64> {
        path.iter().try_fold(0u64, |acc, (struct_name, member)| {
            acc.checked_add(self.member_offset(struct_name, member)?)
                .ok_or(WalkerError::Overflow("nested member offset"))
        })
    }

    /// Address of `struct_name.member` inside the instance at `base`.
    pub fn member_address(&self, base: Kva, struct_name: &str, member: &str) -> Result<Kva> {
        Ok(base.field(self.member_offset(struct_name, member)?)?)
    }

    /// Read a pointer stored in `struct_name.member` of the instance at `base`.
    pub fn read_ptr_member(&self, base: Kva, struct_name: &str, member: &str) -> Result<Kva> {
        self.reader()
            .read_ptr(self.member_address(base, struct_name, member)?)
    }

    /// Read an unsigned integer member at its real width.
    pub fn read_uint_member(&self, base: Kva, struct_name: &str, member: &str) -> Result<u64> {
        let m = self.member(struct_name, member)?;
        let addr = base.field(m.offset)?;

        self.reader().read_uint(addr, m.int_size())
    }

    /// Read a signed integer member at its real width.
    pub fn read_int_member(&self, base: Kva, struct_name: &str, member: &str) -> Result<i64> {
        let m = self.member(struct_name, member)?;
        let addr = base.field(m.offset)?;

        self.reader().read_int(addr, m.int_size())
    }

    pub fn cpu_count(&self) -> usize {
        self.host.cpu_count()
    }

    /// Get `__per_cpu_offset[cpu]`. Kernels built without SMP don't have the
    /// table, in which case per-cpu variables are unsupported.
    pub fn per_cpu_base(&self, cpu: usize) -> Result<u64> {
        if !self.symbol_exists(PER_CPU_OFFSET_SYMBOL) {
            return Err(WalkerError::Unsupported("per-cpu offset table"));
        }

        if let Some(offset) = self.host.per_cpu_offset(cpu) {
            return Ok(offset);
        }

        // The host didn't parse the table, so read the entry ourselves.
        let table = self.symbol_address(PER_CPU_OFFSET_SYMBOL)?;
        let entry = u64::try_from(cpu)
            .ok()
            .and_then(|cpu| cpu.checked_mul(8))
            .and_then(|off| table.checked_add(off))
            .ok_or(WalkerError::Overflow("per-cpu offset entry"))?;

        self.reader().read_u64(entry)
    }

    /// Absolute address of the `cpu` instance of the per-cpu variable that
    /// lives at `base`.
    pub fn per_cpu_address(&self, base: Kva, cpu: usize) -> Result<Kva> {
        let offset = self.per_cpu_base(cpu)?;

        Ok(Kva::new(base.u64().wrapping_add(offset)))
    }
}
