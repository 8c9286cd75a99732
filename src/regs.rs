// Axel '0vercl0k' Souchet - October 16 2026
//! Per-cpu arm64 register snapshots, used to seed the backtraces of the cpus
//! that were running when the dump was taken.
//!
//! There are two ways to fill the table and they can be combined; the second
//! one overlays whatever the first one set:
//! - out of the image, from the per-cpu `regs_before_stop` save area some
//!   vendor kernels fill right before stopping the other cpus,
//! - out of a text file an operator wrote (or that `dmesg_regs` extracted
//!   from a kernel log):
//!
//! ```text
//! # comment
//! cpu=2
//! pc=ffffff8008085c3c
//! sp=ffffffc0f3e4bd30
//! lr=ffffff8008085c38
//! x5=ab
//! ```
//!
//! Tables are always built on the side and swapped in once complete, so a
//! failed load never leaves a half-filled table behind.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, warn};

use crate::error::{Result, WalkerError};
use crate::host::DumpHost;
use crate::layout::{Resolver, PER_CPU_OFFSET_SYMBOL};
use crate::structs::{Arm64PtRegs, ARM64_LR, ARM64_NR_GPRS};
use crate::virt::FaultPolicy;

/// Per-cpu variable holding the registers saved before a cpu was stopped.
pub const REGS_BEFORE_STOP: &str = "regs_before_stop";

/// The registers the text format knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm64Reg {
    Pc,
    Sp,
    Lr,
    X(u8),
}

impl Arm64Reg {
    /// Parse a register name (`pc`, `sp`, `lr`, `x0` .. `x30`), ignoring case.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Arm64Reg;
    /// assert_eq!(Arm64Reg::from_name("X29"), Some(Arm64Reg::X(29)));
    /// assert_eq!(Arm64Reg::from_name("lr"), Some(Arm64Reg::Lr));
    /// assert_eq!(Arm64Reg::from_name("x31"), None);
    /// assert_eq!(Arm64Reg::from_name("pstate"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "pc" => Some(Self::Pc),
            "sp" => Some(Self::Sp),
            "lr" => Some(Self::Lr),
            _ => {
                let idx = name.strip_prefix('x')?;
                if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }

                let idx = idx.parse::<u8>().ok()?;
                (usize::from(idx) < ARM64_NR_GPRS).then_some(Self::X(idx))
            }
        }
    }
}

impl Arm64PtRegs {
    pub fn set(&mut self, reg: Arm64Reg, value: u64) {
        match reg {
            Arm64Reg::Pc => self.pc = value,
            Arm64Reg::Sp => self.sp = value,
            Arm64Reg::Lr => self.regs[ARM64_LR] = value,
            Arm64Reg::X(idx) => self.regs[usize::from(idx)] = value,
        }
    }

    #[must_use]
    pub fn get(&self, reg: Arm64Reg) -> u64 {
        match reg {
            Arm64Reg::Pc => self.pc,
            Arm64Reg::Sp => self.sp,
            Arm64Reg::Lr => self.regs[ARM64_LR],
            Arm64Reg::X(idx) => self.regs[usize::from(idx)],
        }
    }
}

/// One register record per logical cpu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTable {
    cpus: Vec<Arm64PtRegs>,
}

impl RegisterTable {
    /// Allocate a table of `cpus` zeroed records.
    pub fn zeroed(cpus: usize) -> Result<Self> {
        let mut records = Vec::new();
        records
            .try_reserve_exact(cpus)
            .map_err(|_| WalkerError::Allocation { cpus })?;
        records.resize(cpus, Arm64PtRegs::default());

        Ok(Self { cpus: records })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    #[must_use]
    pub fn get(&self, cpu: usize) -> Option<&Arm64PtRegs> {
        self.cpus.get(cpu)
    }

    pub fn get_mut(&mut self, cpu: usize) -> Option<&mut Arm64PtRegs> {
        self.cpus.get_mut(cpu)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Arm64PtRegs> + '_ {
        self.cpus.iter()
    }
}

/// What a text load did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TextLoadStats {
    /// Register values written into the table.
    pub applied: usize,
    /// Values for a cpu we don't have, or given before any `cpu=` line.
    pub discarded: usize,
    /// Keys we don't know about.
    pub ignored: usize,
    /// Lines that aren't `key=hex`.
    pub malformed: usize,
}

/// A meaningful line of a register dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpLine<'a> {
    Cpu(u64),
    Reg(Arm64Reg, u64),
    Unknown(&'a str),
}

/// Parse the leading hexadecimal number of `s` (with or without `0x`), the
/// way `strtoul(s, NULL, 16)` would; `None` if there are no digits.
fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_hexdigit).count();
    if digits == 0 {
        return None;
    }

    u64::from_str_radix(&s[..digits], 16).ok()
}

/// `Ok(None)` for blank and comment lines, `Err(())` for malformed ones.
fn parse_line(line: &str) -> std::result::Result<Option<DumpLine<'_>>, ()> {
    let line = line.trim_start();
    if line.trim_end().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (name, value) = line.split_once('=').ok_or(())?;
    let name = name.trim();
    let value = parse_hex(value).ok_or(())?;
    if name.eq_ignore_ascii_case("cpu") {
        return Ok(Some(DumpLine::Cpu(value)));
    }

    Ok(Some(match Arm64Reg::from_name(name) {
        Some(reg) => DumpLine::Reg(reg, value),
        None => DumpLine::Unknown(name),
    }))
}

/// Apply a register dump to `table`. Parsing is lenient: anything that
/// doesn't make sense is skipped and only counted in the returned stats.
pub fn apply_register_dump(input: impl BufRead, table: &mut RegisterTable) -> Result<TextLoadStats> {
    let mut input = input;
    let mut stats = TextLoadStats::default();
    let mut current_cpu = None;
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&raw);
        let parsed = match parse_line(&line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(()) => {
                stats.malformed += 1;
                continue;
            }
        };

        match parsed {
            DumpLine::Cpu(cpu) => current_cpu = Some(cpu),
            DumpLine::Unknown(name) => {
                debug!("ignoring unknown register {name}");
                stats.ignored += 1;
            }
            DumpLine::Reg(reg, value) => {
                let slot = current_cpu
                    .and_then(|cpu| usize::try_from(cpu).ok())
                    .and_then(|cpu| table.get_mut(cpu));
                match slot {
                    Some(regs) => {
                        regs.set(reg, value);
                        stats.applied += 1;
                    }
                    None => stats.discarded += 1,
                }
            }
        }
    }

    Ok(stats)
}

/// Load a register dump file into `slot`, allocating a zeroed table of `cpus`
/// records if there is none yet. Nothing is touched if the file can't be
/// opened or read.
pub fn load_from_file(
    path: impl AsRef<Path>,
    slot: &mut Option<RegisterTable>,
    cpus: usize,
) -> Result<TextLoadStats> {
    let file = File::open(path.as_ref())?;
    let mut table = match slot {
        Some(table) => table.clone(),
        None => RegisterTable::zeroed(cpus)?,
    };

    let stats = apply_register_dump(BufReader::new(file), &mut table)?;
    *slot = Some(table);

    Ok(stats)
}

/// What an image load did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageLoadStats {
    /// Number of cpus whose registers were read.
    pub loaded: usize,
    /// Cpus whose save area couldn't be read; their records are unchanged.
    pub failed: Vec<usize>,
}

impl ImageLoadStats {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.loaded > 0
    }
}

/// Read every cpu's `regs_before_stop` out of the image into `slot`.
///
/// A cpu whose save area is unreadable keeps its previous record. If not a
/// single cpu could be read, `slot` is left exactly as it was (a missing
/// table stays missing).
pub fn load_from_image<H: DumpHost + ?Sized>(
    resolver: &Resolver<'_, H>,
    slot: &mut Option<RegisterTable>,
) -> Result<ImageLoadStats> {
    if !resolver.symbol_exists(REGS_BEFORE_STOP) {
        return Err(WalkerError::Unsupported(REGS_BEFORE_STOP));
    }

    let base = resolver.symbol_address(REGS_BEFORE_STOP)?;
    if base.is_null() {
        return Err(WalkerError::Unsupported(REGS_BEFORE_STOP));
    }

    if !resolver.symbol_exists(PER_CPU_OFFSET_SYMBOL) {
        return Err(WalkerError::Unsupported("per-cpu offset table"));
    }

    let mut table = match slot {
        Some(table) => table.clone(),
        None => RegisterTable::zeroed(resolver.cpu_count())?,
    };

    let reader = resolver.reader();
    let mut stats = ImageLoadStats::default();
    for cpu in 0..table.len() {
        let addr = match resolver.per_cpu_address(base, cpu) {
            Ok(addr) => addr,
            Err(e) if e.is_memory_fault() => {
                warn!("cannot read __per_cpu_offset[{cpu}]: {e}");
                stats.failed.push(cpu);
                continue;
            }
            Err(e) => return Err(e),
        };

        match reader.read_struct_with::<Arm64PtRegs>(addr, FaultPolicy::ReturnOnError)? {
            Some(regs) => {
                if let Some(record) = table.get_mut(cpu) {
                    *record = regs;
                }

                stats.loaded += 1;
            }
            None => {
                warn!("failed to read {REGS_BEFORE_STOP} of cpu {cpu} at {addr:#x}");
                stats.failed.push(cpu);
            }
        }
    }

    if stats.succeeded() {
        *slot = Some(table);
    }

    Ok(stats)
}
