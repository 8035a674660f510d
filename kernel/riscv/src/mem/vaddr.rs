/// Type alias for virtual addresses.
///
/// This is used by functions that explicitly interpret addresses as virtual ones.
pub type VAddr = u64;

/// One beyond the highest usable virtual address.
///
/// Sv39 allows 39 bit addresses but only the lower half is used so that no address needs sign extension.
pub const MAXVA: VAddr = 1 << (9 + 9 + 9 + 12 - 1);

/// The number of levels in an Sv39 page table tree
pub const PAGE_TABLE_LEVELS: usize = 3;

const PAGE_OFFSET_BITS: u64 = 12;
const PAGE_OFFSET_MASK: u64 = (1 << PAGE_OFFSET_BITS) - 1;

const VPN_SEGMENT_BITS: u64 = 9;
const VPN_SEGMENT_MASK: u64 = (1 << VPN_SEGMENT_BITS) - 1;

/// Get the VPN (virtual page number) segment that indexes the page table of the given `level`.
///
/// Level 2 is the root table, level 0 holds the leaf entries.
#[inline]
pub fn vaddr_vpn_segment(vaddr: VAddr, level: usize) -> usize {
    ((vaddr >> (PAGE_OFFSET_BITS + level as u64 * VPN_SEGMENT_BITS)) & VPN_SEGMENT_MASK) as usize
}

/// Get the VPN (virtual page number) segments from a virtual address
#[inline]
pub fn vaddr_vpn_segments(vaddr: VAddr) -> [usize; 3] {
    [
        vaddr_vpn_segment(vaddr, 0),
        vaddr_vpn_segment(vaddr, 1),
        vaddr_vpn_segment(vaddr, 2),
    ]
}

/// Get the page offset from a virtual address
#[inline]
pub fn vaddr_page_offset(vaddr: VAddr) -> u64 {
    vaddr & PAGE_OFFSET_MASK
}
