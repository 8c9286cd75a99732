// Axel '0vercl0k' Souchet - October 16 2026
//! An in-memory [`crate::DumpHost`]: a sparse set of 4K pages plus the
//! symbols, structure layouts and per-cpu information that would otherwise
//! come out of the kernel's debug info.
//!
//! It is what the demo and the tests run the walkers against, and it can be
//! described in JSON:
//!
//! ```
//! # use ramdump_walker::{Kva, Snapshot, SnapshotDesc};
//! # use ramdump_walker::{MemoryImage, SymbolTable};
//! let desc: SnapshotDesc = serde_json::from_str(r#"{
//!     "cpus": 2,
//!     "symbols": { "num_heaps": "0xffffff8008001000" },
//!     "members": [{ "struct": "ion_heap", "member": "name", "offset": 16 }],
//!     "regions": [{ "addr": "0xffffff8008001000", "words": [1] }]
//! }"#).unwrap();
//! let snapshot = Snapshot::from(desc);
//! let num_heaps = snapshot.symbol_value("num_heaps").unwrap();
//! let mut raw = [0; 8];
//! snapshot.read_page(num_heaps, &mut raw).unwrap();
//! assert_eq!(u64::from_le_bytes(raw), 1);
//! ```
use std::collections::{BTreeMap, HashMap};
use std::num::ParseIntError;

use serde::Deserialize;

use crate::error::PageReadError;
use crate::host::{MemoryImage, PerCpuInfo, SymbolTable, TypeLayout};
use crate::kva::PAGE_SIZE;
use crate::layout::Member;
use crate::Kva;

/// Where the kernel address space starts on arm64 with 48-bit addresses.
pub const DEFAULT_KVA_START: u64 = 0xffff_0000_0000_0000;

#[derive(Debug, Clone)]
pub struct Snapshot {
    kva_start: u64,
    pages: HashMap<Kva, Vec<u8>>,
    symbols: HashMap<String, Kva>,
    members: HashMap<(String, String), Member>,
    cpus: usize,
    per_cpu_offsets: Option<Vec<u64>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            kva_start: DEFAULT_KVA_START,
            pages: HashMap::new(),
            symbols: HashMap::new(),
            members: HashMap::new(),
            cpus: 1,
            per_cpu_offsets: None,
        }
    }
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses below `kva_start` aren't kernel addresses.
    #[must_use]
    pub fn with_kva_start(mut self, kva_start: u64) -> Self {
        self.kva_start = kva_start;
        self
    }

    /// Number of pages in the image.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Make sure the page containing `kva` is in the image.
    pub fn map_page(&mut self, kva: Kva) -> &mut Self {
        self.pages
            .entry(kva.page_align())
            .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
        self
    }

    /// Drop the page containing `kva` from the image, as if the dump didn't
    /// capture it.
    pub fn unmap_page(&mut self, kva: Kva) -> &mut Self {
        self.pages.remove(&kva.page_align());
        self
    }

    /// Write `bytes` at `kva`, mapping the pages it touches.
    pub fn write(&mut self, kva: Kva, bytes: &[u8]) -> &mut Self {
        let mut addr = kva;
        let mut left = bytes;
        while !left.is_empty() {
            let offset = addr.offset() as usize;
            let amount = left.len().min(PAGE_SIZE as usize - offset);
            let page = self
                .pages
                .entry(addr.page_align())
                .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
            page[offset..offset + amount].copy_from_slice(&left[..amount]);

            left = &left[amount..];
            let Some(next) = addr.next_aligned_page() else {
                break;
            };

            addr = next;
        }

        self
    }

    pub fn write_u64(&mut self, kva: Kva, value: u64) -> &mut Self {
        self.write(kva, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, kva: Kva, value: u32) -> &mut Self {
        self.write(kva, &value.to_le_bytes())
    }

    pub fn write_ptr(&mut self, kva: Kva, ptr: Kva) -> &mut Self {
        self.write_u64(kva, ptr.u64())
    }

    /// Write `s` followed by its NUL terminator.
    pub fn write_cstring(&mut self, kva: Kva, s: &str) -> &mut Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);

        self.write(kva, &bytes)
    }

    pub fn add_symbol(&mut self, name: &str, kva: Kva) -> &mut Self {
        self.symbols.insert(name.to_string(), kva);
        self
    }

    pub fn add_member(
        &mut self,
        struct_name: &str,
        member: &str,
        offset: u64,
        size: Option<usize>,
    ) -> &mut Self {
        self.members.insert(
            (struct_name.to_string(), member.to_string()),
            Member { offset, size },
        );
        self
    }

    pub fn set_cpu_count(&mut self, cpus: usize) -> &mut Self {
        self.cpus = cpus;
        self
    }

    /// Hand out `__per_cpu_offset` directly instead of letting the resolver
    /// read it out of the image.
    pub fn set_per_cpu_offsets(&mut self, offsets: Vec<u64>) -> &mut Self {
        self.per_cpu_offsets = Some(offsets);
        self
    }
}

impl MemoryImage for Snapshot {
    fn is_kvaddr(&self, kva: Kva) -> bool {
        kva.u64() >= self.kva_start
    }

    fn read_page(&self, kva: Kva, buf: &mut [u8]) -> Result<(), PageReadError> {
        let offset = kva.offset() as usize;
        let content = self
            .pages
            .get(&kva.page_align())
            .and_then(|page| page.get(offset..offset + buf.len()))
            .ok_or(PageReadError::NotInDump { kva })?;
        buf.copy_from_slice(content);

        Ok(())
    }
}

impl SymbolTable for Snapshot {
    fn symbol_value(&self, name: &str) -> Option<Kva> {
        self.symbols.get(name).copied()
    }
}

impl TypeLayout for Snapshot {
    fn member_offset(&self, struct_name: &str, member: &str) -> Option<u64> {
        self.members
            .get(&(struct_name.to_string(), member.to_string()))
            .map(|m| m.offset)
    }

    fn member_size(&self, struct_name: &str, member: &str) -> Option<usize> {
        self.members
            .get(&(struct_name.to_string(), member.to_string()))
            .and_then(|m| m.size)
    }
}

impl PerCpuInfo for Snapshot {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn per_cpu_offset(&self, cpu: usize) -> Option<u64> {
        self.per_cpu_offsets.as_ref()?.get(cpu).copied()
    }
}

/// An address in a description; either a JSON number or a hex string like
/// `"0xffffff8008001000"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AddrRepr")]
pub struct HexAddr(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum AddrRepr {
    Num(u64),
    Hex(String),
}

impl TryFrom<AddrRepr> for HexAddr {
    type Error = ParseIntError;

    fn try_from(value: AddrRepr) -> Result<Self, Self::Error> {
        match value {
            AddrRepr::Num(n) => Ok(Self(n)),
            AddrRepr::Hex(s) => s.parse::<Kva>().map(|kva| Self(kva.u64())),
        }
    }
}

fn default_kva_start() -> HexAddr {
    HexAddr(DEFAULT_KVA_START)
}

fn default_cpus() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberDesc {
    #[serde(rename = "struct")]
    pub struct_name: String,
    pub member: String,
    pub offset: u64,
    #[serde(default)]
    pub size: Option<usize>,
}

/// Content to place in the image.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegionDesc {
    Bytes { addr: HexAddr, bytes: Vec<u8> },
    /// Little-endian 64-bit words, back to back.
    Words { addr: HexAddr, words: Vec<HexAddr> },
    /// A NUL terminated string.
    String { addr: HexAddr, string: String },
}

/// Serialized form of a [`Snapshot`].
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotDesc {
    #[serde(default = "default_kva_start")]
    pub kva_start: HexAddr,
    #[serde(default = "default_cpus")]
    pub cpus: usize,
    #[serde(default)]
    pub per_cpu_offsets: Option<Vec<HexAddr>>,
    #[serde(default)]
    pub symbols: BTreeMap<String, HexAddr>,
    #[serde(default)]
    pub members: Vec<MemberDesc>,
    #[serde(default)]
    pub regions: Vec<RegionDesc>,
}

impl From<SnapshotDesc> for Snapshot {
    fn from(desc: SnapshotDesc) -> Self {
        let mut snapshot = Snapshot::new().with_kva_start(desc.kva_start.0);
        snapshot.set_cpu_count(desc.cpus);
        if let Some(offsets) = desc.per_cpu_offsets {
            snapshot.set_per_cpu_offsets(offsets.into_iter().map(|o| o.0).collect());
        }

        for (name, addr) in &desc.symbols {
            snapshot.add_symbol(name, Kva::new(addr.0));
        }

        for m in &desc.members {
            snapshot.add_member(&m.struct_name, &m.member, m.offset, m.size);
        }

        for region in &desc.regions {
            match region {
                RegionDesc::Bytes { addr, bytes } => {
                    snapshot.write(Kva::new(addr.0), bytes);
                }
                RegionDesc::Words { addr, words } => {
                    let bytes = words
                        .iter()
                        .flat_map(|w| w.0.to_le_bytes())
                        .collect::<Vec<_>>();
                    snapshot.write(Kva::new(addr.0), &bytes);
                }
                RegionDesc::String { addr, string } => {
                    snapshot.write_cstring(Kva::new(addr.0), string);
                }
            }
        }

        snapshot
    }
}
