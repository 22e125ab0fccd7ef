use crate::cmd::NvmeCommand;
use crate::dma::{Allocator, Dma};
use crate::error::Error;
use core::hint::spin_loop;

/// Entry count of the admin queues, fixed at bring-up.
pub(crate) const ADMIN_QUEUE_ENTRIES: usize = 64;

#[derive(Debug)]
pub(crate) struct SubmissionQueue {
    commands: Dma<NvmeCommand>,
    pub(crate) head: usize,
    pub(crate) tail: usize,
    len: usize,
}

/// NVMe specification 4.6 Completion queue entry
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub(crate) struct CompletionQueueEntry {
    /// Command specific
    pub(crate) command_specific: u32,
    pub(crate) _reserved: u32,
    /// Submission queue head
    pub(crate) sq_head: u16,
    /// Submission queue ID
    pub(crate) sq_id: u16,
    pub(crate) command_id: u16,
    /// Phase tag (bit 0) | status field (bits 15:1)
    pub(crate) status: u16,
}

#[derive(Debug)]
pub(crate) struct CompletionQueue {
    entries: Dma<CompletionQueueEntry>,
    head: usize,
    phase: bool,
    len: usize,
    pub(crate) doorbell: usize,
}

impl SubmissionQueue {
    pub(crate) fn new<A: Allocator>(
        number_of_queue_entries: usize,
        page_size: usize,
        allocator: &A,
    ) -> Result<Self, Error> {
        Ok(Self {
            commands: Dma::allocate(number_of_queue_entries, page_size, allocator)?,
            head: 0,
            tail: 0,
            len: number_of_queue_entries,
        })
    }

    pub(crate) fn is_full(&self) -> bool {
        self.head == (self.tail + 1) % self.len
    }

    /// Places `entry` at the tail and returns the new tail, to be written to
    /// the submission doorbell. Fails when the queue is full.
    pub(crate) fn submit(&mut self, entry: NvmeCommand) -> Result<usize, Error> {
        if self.is_full() {
            return Err(Error::SubmissionQueueFull);
        }
        self.commands[self.tail] = entry;
        self.tail = (self.tail + 1) % self.len;
        Ok(self.tail)
    }

    pub(crate) fn get_addr(&self) -> usize {
        self.commands.physical_address() as usize
    }

    pub(crate) fn deallocate<A: Allocator>(self, allocator: &A) -> Result<(), Error> {
        self.commands.deallocate(allocator)
    }
}

impl CompletionQueue {
    pub(crate) fn new<A: Allocator>(
        number_of_queue_entries: usize,
        page_size: usize,
        doorbell: usize,
        allocator: &A,
    ) -> Result<Self, Error> {
        Ok(Self {
            entries: Dma::allocate(number_of_queue_entries, page_size, allocator)?,
            head: 0,
            phase: true,
            len: number_of_queue_entries,
            doorbell,
        })
    }

    /// Consumes the entry at the head if the controller has posted one.
    /// Returns the new head (the value for the completion doorbell) and the
    /// entry, or `None` if no new completion is pending.
    #[inline(always)]
    pub(crate) fn try_complete(&mut self) -> Option<(usize, CompletionQueueEntry)> {
        let entry = &self.entries[self.head];
        if ((entry.status & 1) == 1) != self.phase {
            return None;
        }
        let entry = *entry;
        self.head = (self.head + 1) % self.len;
        if self.head == 0 {
            self.phase = !self.phase;
        }
        Some((self.head, entry))
    }

    #[inline(always)]
    pub(crate) fn complete_spin(&mut self) -> (usize, CompletionQueueEntry) {
        loop {
            if let Some(val) = self.try_complete() {
                return val;
            }
            spin_loop();
        }
    }

    pub(crate) fn get_addr(&self) -> usize {
        self.entries.physical_address() as usize
    }

    pub(crate) fn deallocate<A: Allocator>(self, allocator: &A) -> Result<(), Error> {
        self.entries.deallocate(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::HeapAllocator;

    #[test]
    fn submission_tail_wraps_and_rejects_a_full_ring() {
        let allocator = HeapAllocator;
        let mut queue = SubmissionQueue::new(4, 4096, &allocator).unwrap();
        // A ring of n entries holds n - 1 commands.
        assert_eq!(queue.submit(NvmeCommand::default()).unwrap(), 1);
        assert_eq!(queue.submit(NvmeCommand::default()).unwrap(), 2);
        assert_eq!(queue.submit(NvmeCommand::default()).unwrap(), 3);
        assert!(queue.is_full());
        assert!(matches!(
            queue.submit(NvmeCommand::default()),
            Err(Error::SubmissionQueueFull)
        ));

        // The controller consumed everything; the tail wraps to 0.
        queue.head = 3;
        assert_eq!(queue.submit(NvmeCommand::default()).unwrap(), 0);
    }

    fn post(queue: &mut CompletionQueue, index: usize, command_id: u16, phase: bool) {
        queue.entries[index] = CompletionQueueEntry {
            command_id,
            status: phase as u16,
            ..Default::default()
        };
    }

    #[test]
    fn completion_respects_the_phase_tag() {
        let allocator = HeapAllocator;
        let mut queue = CompletionQueue::new(4, 4096, 0, &allocator).unwrap();
        // Freshly allocated (zeroed by the test allocator): phase 0, nothing posted.
        assert!(queue.try_complete().is_none());

        post(&mut queue, 0, 17, true);
        let (head, entry) = queue.try_complete().unwrap();
        assert_eq!(head, 1);
        assert_eq!({ entry.command_id }, 17);
        // Head entry still carries the stale phase.
        assert!(queue.try_complete().is_none());
    }

    #[test]
    fn phase_flips_when_the_head_wraps() {
        let allocator = HeapAllocator;
        let mut queue = CompletionQueue::new(2, 4096, 0, &allocator).unwrap();
        post(&mut queue, 0, 1, true);
        post(&mut queue, 1, 2, true);
        assert_eq!(queue.try_complete().unwrap().0, 1);
        // Wrap: head returns to 0 and the expected phase becomes 0.
        assert_eq!(queue.try_complete().unwrap().0, 0);

        // Second pass is posted with phase 0.
        post(&mut queue, 0, 3, false);
        let (head, entry) = queue.try_complete().unwrap();
        assert_eq!(head, 1);
        assert_eq!({ entry.command_id }, 3);
    }
}
