//! Handling of the CPU registers involved in address translation
//!
//! The register model follows Chapter 4 of the [Risc-V Privileged Specification](https://github.com/riscv/riscv-isa-manual/releases/download/Priv-v1.12/riscv-privileged-20211203.pdf).
//! Only the encoding of register values is available on every target; actually accessing the registers requires
//! running on riscv64.

#[cfg(target_arch = "riscv64")]
use core::arch::asm;

/// Generate code to read from a specific register.
///
/// # Example:
/// ```ignore
/// let val = read_reg!("satp");
/// let val = read_reg!("satp", u64);
/// ```
#[cfg(target_arch = "riscv64")]
macro_rules! read_reg {
    ($csr:literal,$width:ty) => {{
        let res: $width;
        asm!(concat!("csrr {}, ", $csr), out(reg) res);
        res
    }};
    ($csr:literal) => {read_reg!($csr, u64)};
}

/// The data that is held by the [`Satp`] register.
///
/// Generally this register holds the physical page number (PPN) of the root page table, i.e., its supervisor physical address divided by 4 KiB;
/// an address space identifier (ASID), which facilitates address-translation fences on a per-address-space basis; and the MODE field, which selects the current address-translation scheme.
///
/// **Warning**: Read the mode variant descriptions carefully as they impose restrictions on valid values for the other fields.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct SatpData {
    pub mode: SatpMode,
    pub asid: u64,
    pub ppn: u64,
}

impl SatpData {
    /// Describe an Sv39 translation rooted at the page table located at `root`
    pub fn sv39(root: u64, asid: u64) -> Self {
        Self {
            mode: SatpMode::Sv39,
            asid,
            ppn: root >> 12,
        }
    }
}

impl From<u64> for SatpData {
    fn from(value: u64) -> Self {
        SatpData {
            mode: SatpMode::from(value >> 60),   // bits 60-63
            asid: value >> 44 & ((1 << 16) - 1), // bits 44-59
            ppn: value & ((1 << 44) - 1),        // bits 0-43
        }
    }
}

impl From<SatpData> for u64 {
    fn from(value: SatpData) -> Self {
        u64::from(value.mode) << 60
            | (value.asid & ((1 << 16) - 1)) << 44
            | value.ppn & ((1 << 44) - 1)
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SatpMode {
    /// No translation or protection
    ///
    /// When MODE=Bare, supervisor virtual addresses are equal to supervisor physical addresses, and there is no additional memory protection beyond the physical memory protection scheme.
    /// **To select MODE=Bare, software must write zero to the remaining fields of satp.**
    Bare,
    /// Page-based 39-bit virtual addressing
    Sv39,
    /// Page-based 48-bit virtual addressing
    Sv48,
    /// Page-based 57-bit virtual addressing
    Sv57,
}

impl From<u64> for SatpMode {
    fn from(value: u64) -> Self {
        match value {
            0 => SatpMode::Bare,
            8 => SatpMode::Sv39,
            9 => SatpMode::Sv48,
            10 => SatpMode::Sv57,
            other => unimplemented!("unknown satp mode {}", other),
        }
    }
}

impl From<SatpMode> for u64 {
    fn from(value: SatpMode) -> Self {
        match value {
            SatpMode::Bare => 0,
            SatpMode::Sv39 => 8,
            SatpMode::Sv48 => 9,
            SatpMode::Sv57 => 10,
        }
    }
}

/// Supervisor Address Translation and Protection Register
///
/// The satp register is a  read/write register, which controls supervisor-mode address translation and protection.
#[allow(unused)]
pub struct Satp {}

#[cfg(target_arch = "riscv64")]
impl Satp {
    pub fn read_raw() -> u64 {
        unsafe { read_reg!("satp") }
    }

    pub fn read() -> SatpData {
        SatpData::from(Self::read_raw())
    }

    /// Switch to a new translation.
    ///
    /// Outstanding writes to page tables are ordered before the switch and all stale translations are flushed
    /// afterwards.
    ///
    /// # Safety
    /// The new translation must keep the currently executing code and its stack mapped.
    pub unsafe fn write_raw(val: u64) {
        asm!("
            sfence.vma
            csrw satp, {}
            sfence.vma
        ", in(reg) val);
    }

    /// # Safety
    /// See [`write_raw`](Satp::write_raw).
    pub unsafe fn write(val: SatpData) {
        Self::write_raw(val.into())
    }
}

/// Flush all cached address translations of the executing hart
#[cfg(target_arch = "riscv64")]
pub fn sfence_vma() {
    unsafe { asm!("sfence.vma zero, zero") }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_satp_encoding() {
        let satp = SatpData::sv39(0x8020_3000, 0);
        assert_eq!(u64::from(satp), 8 << 60 | 0x80203);
    }

    #[test]
    fn test_satp_decoding() {
        let raw = 8u64 << 60 | 7 << 44 | 0x80203;
        assert_eq!(
            SatpData::from(raw),
            SatpData {
                mode: SatpMode::Sv39,
                asid: 7,
                ppn: 0x80203
            }
        );
    }
}
