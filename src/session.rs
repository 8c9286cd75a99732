// Axel '0vercl0k' Souchet - October 16 2026
//! An analysis session: the host, the layouts resolved so far and the
//! register snapshots loaded for the dump.
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::host::DumpHost;
use crate::ion::{DumpFlags, IonReport};
use crate::layout::{MemberCache, Resolver};
use crate::regs::{self, ImageLoadStats, RegisterTable, TextLoadStats};
use crate::virt::Reader;

pub struct Session<H> {
    host: H,
    members: MemberCache,
    regs: Option<RegisterTable>,
}

impl<H: DumpHost> Session<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            members: MemberCache::default(),
            regs: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn resolver(&self) -> Resolver<'_, H> {
        Resolver::new(&self.host, &self.members)
    }

    pub fn reader(&self) -> Reader<'_, H> {
        Reader::new(&self.host)
    }

    /// Forget every layout looked up so far, e.g. after the host reloaded its
    /// debug info.
    pub fn reset_layouts(&self) {
        self.members.clear();
    }

    /// The register snapshots, if any were loaded.
    pub fn registers(&self) -> Option<&RegisterTable> {
        self.regs.as_ref()
    }

    /// Build an ion report writing to `out`.
    pub fn ion_report<'a, W: Write + ?Sized>(
        &'a self,
        flags: DumpFlags,
        out: &'a mut W,
    ) -> IonReport<'a, H, W> {
        IonReport::new(self.resolver(), flags, out)
    }

    /// Overlay the register dump at `path` on the current snapshots.
    pub fn load_registers_from_file(&mut self, path: impl AsRef<Path>) -> Result<TextLoadStats> {
        let cpus = self.host.cpu_count();

        regs::load_from_file(path, &mut self.regs, cpus)
    }

    /// Overlay the `regs_before_stop` save areas on the current snapshots.
    pub fn load_registers_from_image(&mut self) -> Result<ImageLoadStats> {
        let resolver = Resolver::new(&self.host, &self.members);

        regs::load_from_image(&resolver, &mut self.regs)
    }

    /// Drop the register snapshots.
    pub fn release_registers(&mut self) -> Option<RegisterTable> {
        self.regs.take()
    }
}
