// Axel '0vercl0k' Souchet - October 16 2026
//! Fault-tolerant virtual memory reads out of the memory image.
//!
//! Every pointer we follow comes out of a dump that may be partial or
//! corrupted, so nothing read from it is trusted: each page is checked
//! against the kernel address space before the host is asked for it, and
//! failures come back as recoverable memory errors instead of aborting the
//! analysis.
use core::slice;
use std::cmp::min;
use std::mem::{self, MaybeUninit};

use crate::error::{PageReadError, Result, WalkerError};
use crate::host::MemoryImage;
use crate::structs::Pod;
use crate::Kva;

/// Turn memory errors into `None`; any other error is still an error.
pub fn ignore_non_fatal<T>(r: Result<T>) -> Result<Option<T>> {
    match r {
        Ok(o) => Ok(Some(o)),
        Err(WalkerError::PageRead(_) | WalkerError::PartialRead { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// What to do when a read hits memory that isn't in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Bubble the memory error up; used for reads the rest of the walk
    /// depends on.
    #[default]
    FaultOnError,
    /// Return `None` and let the caller carry on; used for optional data like
    /// per-cpu register save areas.
    ReturnOnError,
}

pub struct Reader<'host, H: ?Sized> {
    host: &'host H,
}

impl<H: ?Sized> Clone for Reader<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: ?Sized> Copy for Reader<'_, H> {}

impl<'host, H: MemoryImage + ?Sized> Reader<'host, H> {
    pub fn new(host: &'host H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &'host H {
        self.host
    }

    pub fn is_kvaddr(&self, kva: Kva) -> bool {
        self.host.is_kvaddr(kva)
    }

    /// Read a single chunk that doesn't straddle a page.
    fn read_page(&self, kva: Kva, buf: &mut [u8]) -> std::result::Result<(), PageReadError> {
        if !self.host.is_kvaddr(kva) {
            return Err(PageReadError::NotKvaddr { kva });
        }

        self.host.read_page(kva, buf)
    }

    /// Read virtual memory starting at `kva` into `buf`, propagating all
    /// errors including memory errors.
    pub fn read_exact(&self, kva: Kva, buf: &mut [u8]) -> Result<()> {
        // Amount of bytes left to read.
        let mut amount_left = buf.len();
        // Total amount of bytes that we have successfully read.
        let mut total_read = 0;
        // The current address we are reading from.
        let mut addr = kva;
        while amount_left > 0 {
            // We need to take care of reads that straddle different pages: the
            // second one might be missing even though the first one is there.
            let left_in_page = usize::try_from(addr.left_in_page()).unwrap_or(usize::MAX);
            let amount_wanted = min(amount_left, left_in_page);
            let slice = &mut buf[total_read..total_read + amount_wanted];

            if let Err(reason) = self.read_page(addr, slice) {
                if total_read == 0 {
                    return Err(reason.into());
                }

                return Err(WalkerError::PartialRead {
                    expected_amount: buf.len(),
                    actual_amount: total_read,
                    reason,
                });
            }

            total_read += amount_wanted;
            amount_left -= amount_wanted;
            if amount_left > 0 {
                // The rest of the read would be past the end of the address
                // space.
                let Some(next) = addr.next_aligned_page() else {
                    return Err(WalkerError::PartialRead {
                        expected_amount: buf.len(),
                        actual_amount: total_read,
                        reason: PageReadError::AddressWrap {
                            kva,
                            offset: total_read as u64,
                        },
                    });
                };

                addr = next;
            }
        }

        Ok(())
    }

    /// Read as much as possible starting at `kva`; returns how many bytes made
    /// it into `buf`. Fails only if not even the first byte is readable.
    pub fn read(&self, kva: Kva, buf: &mut [u8]) -> Result<usize> {
        match self.read_exact(kva, buf) {
            Ok(()) => Ok(buf.len()),
            Err(WalkerError::PartialRead { actual_amount, .. }) => Ok(actual_amount),
            Err(e) => Err(e),
        }
    }

    /// Read a `T` from virtual memory.
    pub fn read_struct<T: Pod>(&self, kva: Kva) -> Result<T> {
        let mut t: MaybeUninit<T> = MaybeUninit::zeroed();
        let size_of_t = mem::size_of::<T>();
        let slice_over_t =
            unsafe { slice::from_raw_parts_mut(t.as_mut_ptr().cast::<u8>(), size_of_t) };

        self.read_exact(kva, slice_over_t)?;

        // SAFETY: `T` is `Pod` so any bit pattern is a valid `T`.
        Ok(unsafe { t.assume_init() })
    }

    /// Read a `T` and apply `policy` if the memory isn't there.
    pub fn read_struct_with<T: Pod>(&self, kva: Kva, policy: FaultPolicy) -> Result<Option<T>> {
        match policy {
            FaultPolicy::FaultOnError => self.read_struct(kva).map(Some),
            FaultPolicy::ReturnOnError => self.try_read_struct(kva),
        }
    }

    pub fn read_u64(&self, kva: Kva) -> Result<u64> {
        self.read_struct::<u64>(kva).map(u64::from_le)
    }

    pub fn read_u32(&self, kva: Kva) -> Result<u32> {
        self.read_struct::<u32>(kva).map(u32::from_le)
    }

    /// Read a pointer.
    pub fn read_ptr(&self, kva: Kva) -> Result<Kva> {
        self.read_u64(kva).map(Kva::new)
    }

    /// Read an unsigned integer that is `size` bytes wide.
    pub fn read_uint(&self, kva: Kva, size: usize) -> Result<u64> {
        let mut raw = [0; 8];
        let Some(raw_slice) = raw.get_mut(..size).filter(|_| size.is_power_of_two()) else {
            return Err(WalkerError::InvalidData("integer width"));
        };

        self.read_exact(kva, raw_slice)?;

        Ok(u64::from_le_bytes(raw))
    }

    /// Read a signed integer that is `size` bytes wide and sign-extend it.
    pub fn read_int(&self, kva: Kva, size: usize) -> Result<i64> {
        let value = self.read_uint(kva, size)?;
        let shift = 64 - (size as u32 * 8);

        Ok(((value << shift) as i64) >> shift)
    }

    /// Read a NUL terminated string of at most `max_len` bytes. The cap keeps
    /// a corrupted pointer from making us read the whole dump; if the string
    /// runs into a missing page we return what we have so far.
    pub fn read_cstring(&self, kva: Kva, max_len: usize) -> Result<String> {
        let mut bytes = Vec::new();
        let mut addr = kva;
        while bytes.len() < max_len {
            let left_in_page = usize::try_from(addr.left_in_page()).unwrap_or(usize::MAX);
            let mut chunk = vec![0; min(max_len - bytes.len(), left_in_page)];
            match self.read_exact(addr, &mut chunk) {
                Ok(()) => {}
                Err(e) if e.is_memory_fault() && !bytes.is_empty() => break,
                Err(e) => return Err(e),
            }

            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..nul]);
                break;
            }

            bytes.extend_from_slice(&chunk);
            let Some(next) = addr.checked_add(chunk.len() as u64) else {
                break;
            };

            addr = next;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn try_read_exact(&self, kva: Kva, buf: &mut [u8]) -> Result<Option<()>> {
        ignore_non_fatal(self.read_exact(kva, buf))
    }

    pub fn try_read_struct<T: Pod>(&self, kva: Kva) -> Result<Option<T>> {
        ignore_non_fatal(self.read_struct(kva))
    }

    pub fn try_read_u64(&self, kva: Kva) -> Result<Option<u64>> {
        ignore_non_fatal(self.read_u64(kva))
    }

    pub fn try_read_ptr(&self, kva: Kva) -> Result<Option<Kva>> {
        ignore_non_fatal(self.read_ptr(kva))
    }
}
