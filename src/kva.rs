// Axel '0vercl0k' Souchet - October 16 2026
//! This contains the [`Kva`] type, a strong type for the 64-bit kernel
//! virtual addresses that every structure walked out of the dump lives at.
//! Addresses read out of the image are raw [`u64`]s and can be garbage, so the
//! arithmetic helpers are all checked.
//!
//! # Examples
//!
//! ```
//! use ramdump_walker::Kva;
//! let kva = Kva::new(0xffffff80_08001337);
//! let page = kva.page_align();
//! let page_offset = kva.offset();
//! ```
use std::fmt::{self, Display, LowerHex};
use std::num::ParseIntError;
use std::str::FromStr;

use crate::error::PageReadError;

/// Size of a page in the address space we walk.
pub const PAGE_SIZE: u64 = 0x1_000;

/// Strong type for kernel virtual addresses.
///
/// # Examples
///
/// ```
/// # use ramdump_walker::Kva;
/// # fn main() {
/// let kva = Kva::new(0x1337_fff);
/// assert_eq!(kva.offset(), 0xfff);
/// assert_eq!(kva.page_aligned(), false);
/// let aligned_kva = kva.page_align();
/// assert_eq!(aligned_kva.u64(), 0x1337_000);
/// assert_eq!(aligned_kva.page_aligned(), true);
/// let next_kva = kva.next_aligned_page();
/// assert_eq!(next_kva.map(|k| k.u64()), Some(0x1338_000));
/// # }
/// ```
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, Default, PartialOrd, Ord)]
pub struct Kva(u64);

impl Kva {
    /// The NULL pointer.
    pub const NULL: Self = Self(0);

    /// Create a new [`Kva`].
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Kva;
    /// # fn main() {
    /// let kva = Kva::new(0xdeadbeef);
    /// # }
    /// ```
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the underlying [`u64`].
    #[must_use]
    pub const fn u64(&self) -> u64 {
        self.0
    }

    /// Is it the NULL pointer?
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Get the page offset.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Is it page aligned?
    #[must_use]
    pub const fn page_aligned(&self) -> bool {
        self.offset() == 0
    }

    /// Page-align it.
    #[must_use]
    pub const fn page_align(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    /// Get the next aligned page, or `None` if it would wrap around the
    /// address space.
    #[must_use]
    pub fn next_aligned_page(self) -> Option<Self> {
        self.page_align().0.checked_add(PAGE_SIZE).map(Self)
    }

    /// How many bytes are left until the end of the page `self` lives in.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Kva;
    /// # fn main() {
    /// assert_eq!(Kva::new(0x1000).left_in_page(), 0x1000);
    /// assert_eq!(Kva::new(0x1ff8).left_in_page(), 8);
    /// # }
    /// ```
    #[must_use]
    pub const fn left_in_page(&self) -> u64 {
        PAGE_SIZE - self.offset()
    }

    /// Add a byte offset, `None` on overflow.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Kva;
    /// # fn main() {
    /// assert_eq!(Kva::new(0x1000).checked_add(0x10), Some(Kva::new(0x1010)));
    /// assert_eq!(Kva::new(u64::MAX).checked_add(1), None);
    /// # }
    /// ```
    #[must_use]
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }

    /// Address of the member `offset` bytes into the structure at `self`.
    /// `self` usually comes out of the dump, so wrapping around is reported
    /// like any other bad pointer: as a memory error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::{Kva, PageReadError};
    /// # fn main() {
    /// assert_eq!(Kva::new(0x1000).field(0x18), Ok(Kva::new(0x1018)));
    /// let garbage = Kva::new(u64::MAX - 4);
    /// assert_eq!(
    ///     garbage.field(0x10),
    ///     Err(PageReadError::AddressWrap { kva: garbage, offset: 0x10 })
    /// );
    /// # }
    /// ```
    pub fn field(self, offset: u64) -> Result<Self, PageReadError> {
        self.checked_add(offset)
            .ok_or(PageReadError::AddressWrap { kva: self, offset })
    }

    /// Subtract a byte offset, `None` on underflow. This is how a container
    /// is recovered from the address of one of its embedded members.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Kva;
    /// # fn main() {
    /// assert_eq!(Kva::new(0x1018).checked_sub(0x18), Some(Kva::new(0x1000)));
    /// assert_eq!(Kva::new(0x10).checked_sub(0x18), None);
    /// # }
    /// ```
    #[must_use]
    pub fn checked_sub(self, rhs: u64) -> Option<Self> {
        self.0.checked_sub(rhs).map(Self)
    }
}

/// Convert a [`u64`] into a [`Kva`].
impl From<u64> for Kva {
    /// Create a [`Kva`] from a [`u64`].
    ///
    /// # Examples
    ///
    /// ```
    /// # use ramdump_walker::Kva;
    /// # fn main() {
    /// let kva = Kva::from(0xbaadc0de_deadbeef);
    /// assert_eq!(u64::from(kva), 0xbaadc0de_deadbeef);
    /// # }
    /// ```
    fn from(value: u64) -> Self {
        Kva(value)
    }
}

/// Convert a [`Kva`] into a [`u64`].
impl From<Kva> for u64 {
    fn from(value: Kva) -> Self {
        value.0
    }
}

/// Format [`Kva`] as a string.
impl Display for Kva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kva:{:#x}", self.0)
    }
}

/// The report output prints addresses the way `crash` does: bare lowercase
/// hex without a prefix.
impl LowerHex for Kva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

/// Parse a [`Kva`] from a string.
///
/// # Examples
///
/// ```
/// # use ramdump_walker::Kva;
/// # fn main() {
/// let kva: Kva = "0xffffff80`08001000".parse().unwrap();
/// assert_eq!(kva.u64(), 0xffffff80_08001000);
/// # }
/// ```
impl FromStr for Kva {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.replace('`', "");

        Ok(Kva::new(u64::from_str_radix(
            s.trim_start_matches("0x"),
            16,
        )?))
    }
}
