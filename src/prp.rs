use crate::dma::{Allocator, Dma};
use crate::error::Error;
use alloc::vec::Vec;

// The data pointer of an NVM read or write names physical pages through
// PRP entries: PRP1 addresses the first page, PRP2 either addresses the
// second page or points at a PRP list holding the remaining page addresses.
// A list whose entries do not suffice uses its last entry as a pointer to
// the next list.

/// The PRP entries backing one in-flight command.
/// `Single` and `Pair` fit entirely into the command's data pointer;
/// `Chained` additionally owns the DMA pages holding the PRP lists, which
/// must stay alive until the command completes.
#[derive(Debug)]
pub(crate) enum PrpSet {
    Single(usize),
    Pair(usize, usize),
    Chained(usize, Vec<Dma<u64>>),
}

impl PrpSet {
    /// Value for PRP1 in the command's data pointer.
    pub(crate) fn first(&self) -> u64 {
        match self {
            PrpSet::Single(prp_1) | PrpSet::Pair(prp_1, _) | PrpSet::Chained(prp_1, _) => {
                *prp_1 as u64
            }
        }
    }

    /// Value for PRP2 in the command's data pointer, 0 when unused.
    pub(crate) fn second(&self) -> u64 {
        match self {
            PrpSet::Single(_) => 0,
            PrpSet::Pair(_, prp_2) => *prp_2 as u64,
            PrpSet::Chained(_, prp_lists) => prp_lists[0].physical_address() as u64,
        }
    }
}

/// Builds the PRP set describing `buffer` for a controller using `page_size`.
/// The buffer must be dword aligned, and page aligned as soon as it spans
/// more than one page.
pub(crate) fn allocate<A: Allocator, T>(
    buffer: &Dma<T>,
    page_size: usize,
    allocator: &A,
) -> Result<PrpSet, Error> {
    let virtual_address = buffer.virtual_address() as usize;
    if virtual_address & 0b011 != 0 {
        return Err(Error::VirtualAddressIsNotDwordAligned(virtual_address));
    }
    let prp_1 = buffer.physical_address() as usize;
    let offset_in_page = virtual_address & (page_size - 1);
    let needed_number_of_pages = (offset_in_page + buffer.size()).div_ceil(page_size);
    if needed_number_of_pages == 1 {
        return Ok(PrpSet::Single(prp_1));
    }
    if offset_in_page != 0 {
        return Err(Error::VirtualAddressIsNotPageAligned(virtual_address));
    }

    // Physical address of the second page of the buffer.
    let second_page = allocator
        .translate_virtual_to_physical(unsafe {
            (buffer.virtual_address() as *const u8).add(page_size)
        })
        .map_err(Error::TranslateVirtualToPhysical)? as usize;
    if needed_number_of_pages == 2 {
        return Ok(PrpSet::Pair(prp_1, second_page));
    }

    let entries_per_page = page_size / core::mem::size_of::<u64>();
    // PRP1 covers the first page, so one fewer entry is needed; each list
    // except the last gives up its final entry as a pointer to the next list.
    let remaining_pages = needed_number_of_pages - 1;
    let number_of_lists = remaining_pages.div_ceil(entries_per_page - 1);

    let mut prp_lists: Vec<Dma<u64>> = Vec::with_capacity(number_of_lists);
    for _ in 0..number_of_lists {
        prp_lists.push(Dma::allocate(entries_per_page, page_size, allocator)?);
    }

    for list_index in 0..number_of_lists {
        for entry_index in 0..entries_per_page - 1 {
            let page = list_index * (entries_per_page - 1) + entry_index;
            if page >= remaining_pages {
                break;
            }
            prp_lists[list_index][entry_index] = (second_page + page * page_size) as u64;
        }
        if list_index < number_of_lists - 1 {
            prp_lists[list_index][entries_per_page - 1] =
                prp_lists[list_index + 1].physical_address() as u64;
        }
    }

    Ok(PrpSet::Chained(prp_1, prp_lists))
}

/// Returns list pages to the allocator once the command using them completed.
pub(crate) fn deallocate<A: Allocator>(prp_set: PrpSet, allocator: &A) -> Result<(), Error> {
    if let PrpSet::Chained(_, prp_lists) = prp_set {
        for prp_list in prp_lists {
            prp_list.deallocate(allocator)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::HeapAllocator;

    const PAGE_SIZE: usize = 4096;

    fn buffer_of(bytes: usize) -> Dma<u8> {
        Dma::allocate(bytes, PAGE_SIZE, &HeapAllocator).unwrap()
    }

    #[test]
    fn one_page_needs_a_single_entry() {
        let buffer = buffer_of(512);
        let set = allocate(&buffer, PAGE_SIZE, &HeapAllocator).unwrap();
        assert!(matches!(set, PrpSet::Single(_)));
        assert_eq!(set.first(), buffer.physical_address() as u64);
        assert_eq!(set.second(), 0);
        deallocate(set, &HeapAllocator).unwrap();
        buffer.deallocate(&HeapAllocator).unwrap();
    }

    #[test]
    fn two_pages_need_a_pair() {
        let buffer = buffer_of(2 * PAGE_SIZE);
        let set = allocate(&buffer, PAGE_SIZE, &HeapAllocator).unwrap();
        // The test allocator translates identically, so PRP2 is PRP1 + one page.
        assert_eq!(set.second(), set.first() + PAGE_SIZE as u64);
        assert!(matches!(set, PrpSet::Pair(_, _)));
        deallocate(set, &HeapAllocator).unwrap();
        buffer.deallocate(&HeapAllocator).unwrap();
    }

    #[test]
    fn twenty_pages_chain_through_one_list() {
        let buffer = buffer_of(20 * PAGE_SIZE);
        let set = allocate(&buffer, PAGE_SIZE, &HeapAllocator).unwrap();
        let base = buffer.physical_address() as u64;
        match &set {
            PrpSet::Chained(prp_1, lists) => {
                assert_eq!(*prp_1 as u64, base);
                assert_eq!(lists.len(), 1);
                for entry in 0..19 {
                    assert_eq!(lists[0][entry], base + ((entry as u64 + 1) * PAGE_SIZE as u64));
                }
            }
            other => panic!("expected a chained set, got {other:?}"),
        }
        assert_eq!(set.second(), set_list_address(&set));
        deallocate(set, &HeapAllocator).unwrap();
        buffer.deallocate(&HeapAllocator).unwrap();
    }

    #[test]
    fn lists_link_when_one_page_of_entries_does_not_suffice() {
        // 600 pages: 599 entries beyond PRP1, 511 data entries per list.
        let buffer = buffer_of(600 * PAGE_SIZE);
        let set = allocate(&buffer, PAGE_SIZE, &HeapAllocator).unwrap();
        let base = buffer.physical_address() as u64;
        match &set {
            PrpSet::Chained(_, lists) => {
                assert_eq!(lists.len(), 2);
                // Last entry of the first list points at the second list.
                assert_eq!(lists[0][511], lists[1].physical_address() as u64);
                // First entry of the second list continues where the first left off.
                assert_eq!(lists[1][0], base + 512 * PAGE_SIZE as u64);
                // 599 - 511 = 88 entries used in the second list.
                assert_eq!(lists[1][87], base + 599 * PAGE_SIZE as u64);
            }
            other => panic!("expected a chained set, got {other:?}"),
        }
        deallocate(set, &HeapAllocator).unwrap();
        buffer.deallocate(&HeapAllocator).unwrap();
    }

    fn set_list_address(set: &PrpSet) -> u64 {
        match set {
            PrpSet::Chained(_, lists) => lists[0].physical_address() as u64,
            _ => unreachable!(),
        }
    }
}
