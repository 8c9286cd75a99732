// Axel '0vercl0k' Souchet - October 16 2026
//! This has the raw structures we read as a whole out of the dump. Everything
//! else is read member by member through runtime layouts, see
//! [`crate::Resolver`].
use std::fmt::{self, Debug};

/// Types that can be created out of any bit pattern; reading them straight
/// out of the dump is fine.
///
/// # Safety
///
/// Implementors must be `repr(C)` (or a primitive) without padding-dependent
/// invariants; every bit pattern has to be a valid value.
pub unsafe trait Pod: Copy + 'static {}

macro_rules! impl_pod {
    ($($ty:ty),*) => {
        $(unsafe impl Pod for $ty {})*
    };
}

impl_pod!(u8, u16, u32, u64, i8, i16, i32, i64);

unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}

/// Number of general purpose registers saved in an arm64 `pt_regs`.
pub const ARM64_NR_GPRS: usize = 31;

/// Index of the link register in [`Arm64PtRegs::regs`].
pub const ARM64_LR: usize = 30;

/// The user-visible prefix of the arm64 `struct pt_regs`:
///
/// ```text
/// struct pt_regs {
///     u64 regs[31];
///     u64 sp;
///     u64 pc;
///     u64 pstate;
///     ...
/// };
/// ```
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Arm64PtRegs {
    pub regs: [u64; ARM64_NR_GPRS],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

unsafe impl Pod for Arm64PtRegs {}

impl Arm64PtRegs {
    /// The link register, `x30`.
    #[must_use]
    pub fn lr(&self) -> u64 {
        self.regs[ARM64_LR]
    }

    /// The frame pointer, `x29`.
    #[must_use]
    pub fn fp(&self) -> u64 {
        self.regs[29]
    }
}

impl Debug for Arm64PtRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arm64PtRegs")
            .field("pc", &self.pc)
            .field("sp", &self.sp)
            .field("lr", &self.lr())
            .field("pstate", &self.pstate)
            .field("regs", &self.regs)
            .finish()
    }
}
