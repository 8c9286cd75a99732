// Axel '0vercl0k' Souchet - October 16 2026
//! Pull the arm64 registers the kernel printed during an oops / `show_regs`
//! out of a kernel log, and write them in the format
//! [`crate::load_register_dump`] reads.
//!
//! A record starts at every `CPU: <n> PID:` banner and collects the register
//! lines that follow it:
//!
//! ```text
//! CPU: 3 PID: 1234 Comm: kworker/3:1 Tainted: G        W       4.9.112 #1
//! pc : [<ffffff8008085c3c>] lr : [<ffffff8008085c38>] pstate: 60000145
//! sp : ffffffc0f3e4bd30
//! x29: ffffffc0f3e4bd30 x28: ffffffc0f3e48000
//! ```
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;

static RE_CPU_BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CPU:\s([0-9]+)\s*PID:").expect("valid cpu banner regex"));

/// `pc : [<hex>]` and `lr : [<hex>]`, possibly both on the same line.
static RE_PC_LR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(lr|pc) :\s*[\[<]+([a-fA-F0-9]+)[\]>]+").expect("valid pc/lr regex")
});

/// `sp : <hex>`, `x29: <hex>` and friends.
static RE_NAMED_REG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([xspt]+[0-9xsptae]+)\s*:\s*([a-fA-F0-9]{8,})").expect("valid register regex")
});

/// The registers logged for one cpu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRegs {
    pub cpu: u64,
    pub regs: BTreeMap<String, u64>,
}

impl LoggedRegs {
    #[must_use]
    pub fn new(cpu: u64) -> Self {
        Self {
            cpu,
            regs: BTreeMap::new(),
        }
    }

    /// A record is only worth keeping if it can seed a backtrace.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.regs.contains_key("pc") && self.regs.contains_key("sp")
    }

    fn scan_line(&mut self, line: &str) {
        let captures = RE_PC_LR
            .captures_iter(line)
            .chain(RE_NAMED_REG.captures_iter(line));
        for caps in captures {
            let name = &caps[1];
            // Too many digits to be a register; not what we're looking for.
            let Ok(value) = u64::from_str_radix(&caps[2], 16) else {
                continue;
            };

            self.regs.insert(name.to_string(), value);
        }
    }
}

impl fmt::Display for LoggedRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## ========= begin arm64 core regs =========")?;
        writeln!(f, "cpu={:#x}", self.cpu)?;
        for (name, value) in &self.regs {
            writeln!(f, "{name}=0x{value:016x}")?;
        }

        writeln!(f, "## ========= end arm64 core regs =========")
    }
}

/// Extract every complete register record out of a kernel log, in the order
/// they appear.
pub fn parse_kernel_log(input: impl BufRead) -> Result<Vec<LoggedRegs>> {
    let mut input = input;
    let mut records = Vec::new();
    let mut current: Option<LoggedRegs> = None;
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        let banner = RE_CPU_BANNER
            .captures(line)
            .and_then(|caps| caps[1].parse::<u64>().ok());
        if let Some(cpu) = banner {
            if let Some(done) = current.take().filter(LoggedRegs::is_complete) {
                records.push(done);
            }

            current = Some(LoggedRegs::new(cpu));
        }

        if let Some(record) = current.as_mut() {
            record.scan_line(line);
        }
    }

    if let Some(done) = current.filter(LoggedRegs::is_complete) {
        records.push(done);
    }

    debug!("found {} register records in the log", records.len());

    Ok(records)
}

/// Write `records` in the register dump format.
pub fn write_register_dump<W: Write + ?Sized>(records: &[LoggedRegs], out: &mut W) -> Result<()> {
    for record in records {
        write!(out, "{record}")?;
    }

    Ok(())
}

/// Convert the kernel log at `path` into a register dump written to `out`;
/// returns the number of records written.
pub fn convert_log<W: Write + ?Sized>(path: impl AsRef<Path>, out: &mut W) -> Result<usize> {
    let file = File::open(path.as_ref())?;
    let records = parse_kernel_log(BufReader::new(file))?;
    write_register_dump(&records, out)?;

    Ok(records.len())
}
