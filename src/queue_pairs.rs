use crate::cmd::NvmeCommand;
use crate::dma::{Allocator, Dma};
use crate::error::Error;
use crate::nvme::Namespace;
use crate::prp;
use crate::queues::{CompletionQueue, CompletionQueueEntry, SubmissionQueue};
use ahash::RandomState;
use alloc::sync::Arc;
use hashbrown::HashMap;
use log::debug;

#[derive(Debug)]
pub(crate) struct AdminQueuePair {
    pub(crate) submission: SubmissionQueue,
    pub(crate) completion: CompletionQueue,
}

impl AdminQueuePair {
    /// Submits one admin command and spins until its completion arrives.
    /// Admin traffic is rare and strictly sequential, so polling here is fine.
    pub(crate) fn submit_and_complete<F: FnOnce(u16, usize) -> NvmeCommand>(
        &mut self,
        cmd_init: F,
        buffer: &Dma<u8>,
        address: *mut u8,
        doorbell_stride: u16,
    ) -> Result<CompletionQueueEntry, Error> {
        let command_id = self.submission.tail as u16;
        let tail = self
            .submission
            .submit(cmd_init(command_id, buffer.physical_address() as usize))?;
        set_submission_queue_tail_doorbell(0, tail as u32, address, doorbell_stride);

        let (head, entry) = self.completion.complete_spin();
        set_completion_queue_head_doorbell(0, head as u32, address, doorbell_stride);
        self.submission.head = entry.sq_head as usize;
        let status = entry.status >> 1;
        if status != 0 {
            return Err(Error::CommandFailed(status));
        }
        Ok(entry)
    }
}

#[repr(C)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct IoQueuePairId(pub u16);

/// One I/O submission/completion queue pair, bound to a namespace.
///
/// All I/O goes through a queue pair: either the blocking [`write`](Self::write)
/// and [`read`](Self::read), or the split
/// [`submit_write`](Self::submit_write)/[`submit_read`](Self::submit_read)
/// followed by [`poll_completion`](Self::poll_completion).
#[derive(Debug)]
pub struct IoQueuePair<A: Allocator> {
    pub(crate) id: IoQueuePairId,
    pub(crate) submission: SubmissionQueue,
    pub(crate) completion: CompletionQueue,
    pub(crate) page_size: usize,
    pub(crate) maximum_transfer_size: usize,
    pub(crate) allocator: Arc<A>,
    pub(crate) namespace: Namespace,
    pub(crate) device_address: usize,
    pub(crate) doorbell_stride: u16,
    pub(crate) prp_sets: HashMap<u16, prp::PrpSet, RandomState>,
}

impl<A: Allocator> IoQueuePair<A> {
    pub fn id(&self) -> IoQueuePairId {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Allocates a DMA buffer usable with this queue pair. The size is
    /// rounded up to the next multiple of the namespace block size.
    pub fn allocate_buffer<T>(&self, number_of_elements: usize) -> Result<Dma<T>, Error> {
        if number_of_elements == 0 {
            return Err(Error::NumberOfElementsIsZero);
        }
        let size = number_of_elements * core::mem::size_of::<T>();
        debug!("Request buffer with {number_of_elements} elements and size 0x{size:X}.");
        let block_size = self.namespace.block_size;
        if block_size == 0 {
            return Err(Error::NamespaceBlockSizeIsZero);
        }
        let rounded_size = size.next_multiple_of(block_size as usize);
        let number_of_elements = rounded_size / core::mem::size_of::<T>();
        debug!("Allocate buffer with {number_of_elements} elements and size 0x{rounded_size:X}.");
        Dma::allocate(number_of_elements, self.page_size, self.allocator.as_ref())
    }

    pub fn deallocate_buffer<T>(&self, buffer: Dma<T>) -> Result<(), Error> {
        buffer.deallocate(self.allocator.as_ref())
    }

    /// Write the content of the provided `buffer` to the device at the
    /// `logical_block_address` and wait for the completion.
    /// The `buffer` needs to be page aligned, its size must be a multiple of
    /// the namespace block size and not exceed the maximum transfer size.
    pub fn write<T>(&mut self, buffer: &Dma<T>, logical_block_address: u64) -> Result<(), Error> {
        self.submit_write(buffer, logical_block_address)?;
        self.poll_completion_spin()
    }

    /// Fill the provided `buffer` with data read from the device at the
    /// `logical_block_address` and wait for the completion.
    /// The `buffer` needs to be page aligned, its size must be a multiple of
    /// the namespace block size and not exceed the maximum transfer size.
    pub fn read<T>(
        &mut self,
        buffer: &mut Dma<T>,
        logical_block_address: u64,
    ) -> Result<(), Error> {
        self.submit_read(buffer, logical_block_address)?;
        self.poll_completion_spin()
    }

    /// Rings the doorbell for a read without waiting for the completion.
    pub fn submit_read<T>(
        &mut self,
        buffer: &mut Dma<T>,
        logical_block_address: u64,
    ) -> Result<(), Error> {
        self.submit_io(buffer, logical_block_address, NvmeCommand::io_read)
    }

    /// Rings the doorbell for a write without waiting for the completion.
    pub fn submit_write<T>(
        &mut self,
        buffer: &Dma<T>,
        logical_block_address: u64,
    ) -> Result<(), Error> {
        self.submit_io(buffer, logical_block_address, NvmeCommand::io_write)
    }

    fn submit_io<T>(
        &mut self,
        buffer: &Dma<T>,
        logical_block_address: u64,
        cmd_init: fn(u16, u32, u64, u16, u64, u64) -> NvmeCommand,
    ) -> Result<(), Error> {
        let blocks = validate_buffer(
            buffer.size(),
            self.maximum_transfer_size,
            self.namespace.block_size,
        )?;
        let prp_set = prp::allocate(buffer, self.page_size, self.allocator.as_ref())?;
        let prp_1 = prp_set.first();
        let prp_2 = prp_set.second();

        let command_id = self.submission.tail as u16;
        if let Err(occupied) = self.prp_sets.try_insert(command_id, prp_set) {
            // The rejected set never made it into the map; release its
            // list pages before bailing out.
            prp::deallocate(occupied.value, self.allocator.as_ref())?;
            return Err(Error::CommandAlreadyInFlight(command_id));
        }

        let command = cmd_init(
            command_id,
            self.namespace.id.0,
            logical_block_address,
            (blocks - 1) as u16,
            prp_1,
            prp_2,
        );

        let tail = match self.submission.submit(command) {
            Ok(tail) => tail,
            Err(error) => {
                // Undo the bookkeeping; nothing reached the device.
                if let Some(prp_set) = self.prp_sets.remove(&command_id) {
                    prp::deallocate(prp_set, self.allocator.as_ref())?;
                }
                return Err(error);
            }
        };
        set_submission_queue_tail_doorbell(
            self.id.0,
            tail as u32,
            self.device_address as *mut u8,
            self.doorbell_stride,
        );
        Ok(())
    }

    /// Consumes one pending completion, if any. Returns the command ID of
    /// the completed command, or `None` when nothing has completed yet.
    pub fn poll_completion(&mut self) -> Result<Option<u16>, Error> {
        let Some((head, entry)) = self.completion.try_complete() else {
            return Ok(None);
        };
        unsafe {
            core::ptr::write_volatile(self.completion.doorbell as *mut u32, head as u32);
        }
        self.submission.head = entry.sq_head as usize;
        let command_id = entry.command_id;
        if let Some(prp_set) = self.prp_sets.remove(&command_id) {
            prp::deallocate(prp_set, self.allocator.as_ref())?;
        }
        let status = entry.status >> 1;
        if status != 0 {
            return Err(Error::CommandFailed(status));
        }
        Ok(Some(command_id))
    }

    fn poll_completion_spin(&mut self) -> Result<(), Error> {
        loop {
            if self.poll_completion()?.is_some() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
    }

    pub(crate) fn deallocate_queues(self) -> Result<(), Error> {
        let allocator = self.allocator.clone();
        for (_, prp_set) in self.prp_sets {
            prp::deallocate(prp_set, allocator.as_ref())?;
        }
        self.submission.deallocate(allocator.as_ref())?;
        self.completion.deallocate(allocator.as_ref())
    }
}

/// NLB is a 0's based 16-bit field, so one command addresses at most
/// 65536 blocks.
const MAXIMUM_BLOCKS_PER_COMMAND: u64 = u16::MAX as u64 + 1;

/// Checks an I/O buffer against the transfer limits and returns its length
/// in blocks (at least 1).
fn validate_buffer(
    buffer_size: usize,
    maximum_transfer_size: usize,
    block_size: u64,
) -> Result<u64, Error> {
    if block_size == 0 {
        return Err(Error::NamespaceBlockSizeIsZero);
    }
    if buffer_size == 0 {
        return Err(Error::NumberOfElementsIsZero);
    }
    if buffer_size > maximum_transfer_size {
        return Err(Error::BufferLengthBiggerThanMaximumTransferSize(
            buffer_size,
            maximum_transfer_size,
        ));
    }
    if buffer_size as u64 % block_size != 0 {
        return Err(Error::BufferLengthNotAMultipleOfNamespaceBlockSize(
            buffer_size,
            block_size,
        ));
    }
    let blocks = buffer_size as u64 / block_size;
    if blocks > MAXIMUM_BLOCKS_PER_COMMAND {
        return Err(Error::NumberOfBlocksMoreThanMaximum(
            blocks,
            MAXIMUM_BLOCKS_PER_COMMAND,
        ));
    }
    Ok(blocks)
}

// SQyTDBL
pub(crate) fn set_submission_queue_tail_doorbell(
    queue_id: u16,
    value: u32,
    address: *mut u8,
    doorbell_stride: u16,
) {
    let tail_address = (address as usize + 0x1000 + ((4 << doorbell_stride) * (2 * queue_id)) as usize)
        as *mut u32;
    unsafe { core::ptr::write_volatile(tail_address, value) };
}

// CQyHDBL
pub(crate) fn set_completion_queue_head_doorbell(
    queue_id: u16,
    value: u32,
    address: *mut u8,
    doorbell_stride: u16,
) {
    let head_address =
        (address as usize + 0x1000 + ((4 << doorbell_stride) * (2 * queue_id + 1)) as usize)
            as *mut u32;
    unsafe { core::ptr::write_volatile(head_address, value) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvme::NamespaceId;
    use crate::test_util::HeapAllocator;
    use alloc::boxed::Box;
    use core::cell::Cell;

    #[test]
    fn buffer_length_is_converted_to_blocks() {
        assert_eq!(validate_buffer(81920, 131072, 512).unwrap(), 160);
        assert_eq!(validate_buffer(512, 131072, 512).unwrap(), 1);
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        assert!(matches!(
            validate_buffer(262144, 131072, 512),
            Err(Error::BufferLengthBiggerThanMaximumTransferSize(262144, 131072))
        ));
    }

    #[test]
    fn partial_blocks_are_rejected() {
        assert!(matches!(
            validate_buffer(513, 131072, 512),
            Err(Error::BufferLengthNotAMultipleOfNamespaceBlockSize(513, 512))
        ));
    }

    #[test]
    fn a_zero_block_size_is_an_error_not_a_panic() {
        // Namespaces formatted with an LBA format outside the supported
        // range carry a block size of 0; they must be rejected cleanly.
        assert!(matches!(
            validate_buffer(4096, 131072, 0),
            Err(Error::NamespaceBlockSizeIsZero)
        ));
    }

    #[test]
    fn empty_buffers_are_rejected() {
        assert!(matches!(
            validate_buffer(0, 131072, 512),
            Err(Error::NumberOfElementsIsZero)
        ));
    }

    #[test]
    fn block_counts_stop_at_the_nlb_field_width() {
        // 65536 blocks encode as NLB 65535; one more no longer fits.
        assert_eq!(validate_buffer(65536 * 512, usize::MAX, 512).unwrap(), 65536);
        assert!(matches!(
            validate_buffer(65537 * 512, usize::MAX, 512),
            Err(Error::NumberOfBlocksMoreThanMaximum(65537, 65536))
        ));
    }

    /// Heap allocator that counts deallocations, to check that error paths
    /// return what they took.
    struct CountingAllocator {
        deallocations: Cell<usize>,
    }

    impl Allocator for CountingAllocator {
        fn allocate<T>(
            &self,
            layout: core::alloc::Layout,
        ) -> Result<*mut [T], Box<dyn core::error::Error>> {
            HeapAllocator.allocate(layout)
        }

        fn deallocate<T>(&self, slice: *mut [T]) -> Result<(), Box<dyn core::error::Error>> {
            self.deallocations.set(self.deallocations.get() + 1);
            HeapAllocator.deallocate(slice)
        }

        fn translate_virtual_to_physical<T>(
            &self,
            virtual_address: *const T,
        ) -> Result<*const T, Box<dyn core::error::Error>> {
            Ok(virtual_address)
        }
    }

    const PAGE_SIZE: usize = 4096;

    fn queue_pair_on(allocator: &Arc<CountingAllocator>) -> IoQueuePair<CountingAllocator> {
        // Never rung in these tests; the doorbell region only has to exist.
        let doorbells = Dma::<u8>::allocate(0x2000, PAGE_SIZE, allocator.as_ref()).unwrap();
        IoQueuePair {
            id: IoQueuePairId(1),
            submission: SubmissionQueue::new(4, PAGE_SIZE, allocator.as_ref()).unwrap(),
            completion: CompletionQueue::new(4, PAGE_SIZE, 0, allocator.as_ref()).unwrap(),
            page_size: PAGE_SIZE,
            maximum_transfer_size: usize::MAX,
            allocator: allocator.clone(),
            namespace: Namespace {
                id: NamespaceId(1),
                blocks: 1 << 20,
                block_size: 512,
            },
            device_address: doorbells.virtual_address() as usize,
            doorbell_stride: 0,
            prp_sets: HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)),
        }
    }

    #[test]
    fn a_rejected_duplicate_submission_returns_its_list_pages() {
        let allocator = Arc::new(CountingAllocator {
            deallocations: Cell::new(0),
        });
        let mut queue_pair = queue_pair_on(&allocator);
        // Occupy the command ID the next submission will pick (the tail).
        queue_pair
            .prp_sets
            .insert(queue_pair.submission.tail as u16, prp::PrpSet::Single(0));

        // Three pages force a chained set owning one list page.
        let buffer = Dma::<u8>::allocate(3 * PAGE_SIZE, PAGE_SIZE, allocator.as_ref()).unwrap();
        let before = allocator.deallocations.get();
        assert!(matches!(
            queue_pair.submit_write(&buffer, 0),
            Err(Error::CommandAlreadyInFlight(0))
        ));
        // The rejected set's list page went back to the allocator.
        assert_eq!(allocator.deallocations.get(), before + 1);
        // The set that was already in flight is untouched.
        assert!(queue_pair.prp_sets.contains_key(&0));
    }
}
