use crate::error::Error;
use alloc::boxed::Box;
use core::ops::{Index, IndexMut, Range, RangeFull, RangeInclusive, RangeTo};
use core::slice;

/// Source of DMA-capable memory.
///
/// The driver never allocates device-visible memory itself; everything it
/// hands to the controller (queues, data buffers, PRP lists) comes from an
/// implementation of this trait. An implementation must return memory that
/// is physically contiguous per allocation and must be able to translate a
/// virtual address inside such an allocation to its physical address.
pub trait Allocator {
    fn allocate<T>(
        &self,
        layout: core::alloc::Layout,
    ) -> Result<*mut [T], Box<dyn core::error::Error>>;
    fn deallocate<T>(&self, slice: *mut [T]) -> Result<(), Box<dyn core::error::Error>>;
    fn translate_virtual_to_physical<T>(
        &self,
        virtual_address: *const T,
    ) -> Result<*const T, Box<dyn core::error::Error>>;
}

/// A typed buffer in DMA memory, known under both its virtual and its
/// physical address.
#[derive(Debug)]
pub struct Dma<T> {
    virtual_address: *mut T,
    physical_address: *mut T,
    number_of_elements: usize,
}

unsafe impl<T> Send for Dma<T> {}
unsafe impl<T> Sync for Dma<T> {}

impl<T> Dma<T> {
    pub(crate) fn allocate<A: Allocator>(
        number_of_elements: usize,
        page_size: usize,
        allocator: &A,
    ) -> Result<Dma<T>, Error> {
        let layout = core::alloc::Layout::from_size_align(
            core::mem::size_of::<T>() * number_of_elements,
            page_size,
        )?;
        let virtual_address = allocator.allocate::<T>(layout).map_err(Error::Allocate)?;
        let physical_address = allocator
            .translate_virtual_to_physical(virtual_address as *mut T)
            .map_err(Error::TranslateVirtualToPhysical)?;
        Ok(Dma {
            virtual_address: virtual_address as *mut T,
            physical_address: physical_address as *mut T,
            number_of_elements,
        })
    }

    pub(crate) fn deallocate<A: Allocator>(self, allocator: &A) -> Result<(), Error> {
        let slice =
            core::ptr::slice_from_raw_parts_mut(self.virtual_address, self.number_of_elements);
        allocator.deallocate(slice).map_err(Error::Deallocate)
    }

    pub fn virtual_address(&self) -> *mut T {
        self.virtual_address
    }

    pub fn physical_address(&self) -> *mut T {
        self.physical_address
    }

    pub fn number_of_elements(&self) -> usize {
        self.number_of_elements
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.number_of_elements * core::mem::size_of::<T>()
    }
}

impl<T> Index<usize> for Dma<T> {
    type Output = T;
    fn index(&self, index: usize) -> &Self::Output {
        assert!(index < self.number_of_elements, "Index out of bounds");
        unsafe { &*self.virtual_address.add(index) }
    }
}

impl<T> IndexMut<usize> for Dma<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        assert!(index < self.number_of_elements, "Index out of bounds");
        unsafe { &mut *self.virtual_address.add(index) }
    }
}

impl Index<Range<usize>> for Dma<u8> {
    type Output = [u8];
    fn index(&self, index: Range<usize>) -> &Self::Output {
        assert!(index.end <= self.number_of_elements, "Index out of bounds");
        unsafe {
            slice::from_raw_parts(
                self.virtual_address.add(index.start),
                index.end - index.start,
            )
        }
    }
}

impl IndexMut<Range<usize>> for Dma<u8> {
    fn index_mut(&mut self, index: Range<usize>) -> &mut Self::Output {
        assert!(index.end <= self.number_of_elements, "Index out of bounds");
        unsafe {
            slice::from_raw_parts_mut(
                self.virtual_address.add(index.start),
                index.end - index.start,
            )
        }
    }
}

impl Index<RangeTo<usize>> for Dma<u8> {
    type Output = [u8];
    fn index(&self, index: RangeTo<usize>) -> &Self::Output {
        &self[0..index.end]
    }
}

impl IndexMut<RangeTo<usize>> for Dma<u8> {
    fn index_mut(&mut self, index: RangeTo<usize>) -> &mut Self::Output {
        &mut self[0..index.end]
    }
}

impl Index<RangeInclusive<usize>> for Dma<u8> {
    type Output = [u8];
    fn index(&self, index: RangeInclusive<usize>) -> &Self::Output {
        &self[*index.start()..(*index.end() + 1)]
    }
}

impl IndexMut<RangeInclusive<usize>> for Dma<u8> {
    fn index_mut(&mut self, index: RangeInclusive<usize>) -> &mut Self::Output {
        &mut self[*index.start()..(*index.end() + 1)]
    }
}

impl Index<RangeFull> for Dma<u8> {
    type Output = [u8];
    fn index(&self, _: RangeFull) -> &Self::Output {
        &self[0..self.number_of_elements]
    }
}

impl IndexMut<RangeFull> for Dma<u8> {
    fn index_mut(&mut self, _: RangeFull) -> &mut Self::Output {
        let len = self.number_of_elements;
        &mut self[0..len]
    }
}

#[cfg(test)]
mod tests {
    use super::Dma;
    use crate::test_util::HeapAllocator;

    #[test]
    fn allocate_reports_sizes_in_elements_and_bytes() {
        let allocator = HeapAllocator;
        let buffer: Dma<u64> = Dma::allocate(16, 4096, &allocator).unwrap();
        assert_eq!(buffer.number_of_elements(), 16);
        assert_eq!(buffer.size(), 128);
        assert_eq!(buffer.virtual_address() as usize % 4096, 0);
        buffer.deallocate(&allocator).unwrap();
    }

    #[test]
    fn byte_buffer_range_indexing() {
        let allocator = HeapAllocator;
        let mut buffer: Dma<u8> = Dma::allocate(512, 4096, &allocator).unwrap();
        for i in 0..512 {
            buffer[i] = (i % 251) as u8;
        }
        assert_eq!(buffer[10], 10);
        assert_eq!(&buffer[0..4], &[0, 1, 2, 3]);
        assert_eq!(buffer[..512].len(), 512);
        assert_eq!(buffer[..].len(), 512);
        assert_eq!(&buffer[1..=3], &[1, 2, 3]);
        buffer.deallocate(&allocator).unwrap();
    }

    #[test]
    #[should_panic(expected = "Index out of bounds")]
    fn indexing_past_the_end_panics() {
        let allocator = HeapAllocator;
        let buffer: Dma<u8> = Dma::allocate(8, 4096, &allocator).unwrap();
        let _ = buffer[8];
    }
}
