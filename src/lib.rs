// Axel '0vercl0k' Souchet - October 16 2026
#![allow(clippy::doc_markdown)]
#![doc = include_str!("../README.md")]
mod commands;
mod dmesg;
mod error;
mod host;
mod ion;
mod kva;
mod layout;
mod rbtree;
mod regs;
mod session;
mod snapshot;
mod structs;
mod virt;

pub use commands::{command_table, dispatch, Command, RunFn};
pub use dmesg::{convert_log, parse_kernel_log, write_register_dump, LoggedRegs};
pub use error::{PageReadError, Result, WalkerError};
pub use host::{DumpHost, MemoryImage, PerCpuInfo, SymbolTable, TypeLayout};
pub use ion::{
    format_size, DumpFlags, DumpLevel, HeapSlot, HeapsOutcome, IonReport, DEFAULT_PREFIX,
    HEAPS_SYMBOL, MAX_HEAPS, MAX_NAME_LEN, NUM_HEAPS_SYMBOL,
};
pub use kva::{Kva, PAGE_SIZE};
pub use layout::{Member, MemberCache, Resolver, PER_CPU_OFFSET_SYMBOL};
pub use rbtree::{NodeVisitor, RbLayout, RbTree, WalkSummary, DEFAULT_MAX_NODES};
pub use regs::{
    apply_register_dump, load_from_file as load_register_dump,
    load_from_image as load_registers_from_image, Arm64Reg, ImageLoadStats, RegisterTable,
    TextLoadStats, REGS_BEFORE_STOP,
};
pub use session::Session;
pub use snapshot::{HexAddr, MemberDesc, RegionDesc, Snapshot, SnapshotDesc, DEFAULT_KVA_START};
pub use structs::{Arm64PtRegs, Pod, ARM64_LR, ARM64_NR_GPRS};
pub use virt::{ignore_non_fatal, FaultPolicy, Reader};
