/// Type alias for physical addresses.
///
/// This is used by functions that explicitly interpret addresses as physical ones.
pub type PAddr = u64;

pub(crate) const PAGE_OFFSET_BITS: u64 = 12;
pub(crate) const PAGE_OFFSET_MASK: u64 = (1 << PAGE_OFFSET_BITS) - 1;

pub(crate) const PPN0_BITS: u64 = 9;
pub(crate) const PPN0_MASK: u64 = ((1 << PPN0_BITS) - 1) << (PAGE_OFFSET_BITS);
pub(crate) const PPN1_BITS: u64 = 9;
pub(crate) const PPN1_MASK: u64 = ((1 << PPN1_BITS) - 1) << (PAGE_OFFSET_BITS + PPN0_BITS);
pub(crate) const PPN2_BITS: u64 = 26;
pub(crate) const PPN2_MASK: u64 =
    ((1 << PPN2_BITS) - 1) << (PAGE_OFFSET_BITS + PPN0_BITS + PPN1_BITS);
pub(crate) const PPN_MASK: u64 = PPN0_MASK | PPN1_MASK | PPN2_MASK;
