use crate::cmd::{FeatureIdentifier, IdentifyNamespace, NvmeCommand, Select};
use crate::dma::{Allocator, Dma};
use crate::error::Error;
#[cfg(feature = "std")]
use crate::pci;
use crate::queue_pairs::{AdminQueuePair, IoQueuePair, IoQueuePairId};
use crate::queues::{CompletionQueue, CompletionQueueEntry, SubmissionQueue, ADMIN_QUEUE_ENTRIES};
use ahash::RandomState;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::hint::spin_loop;
use hashbrown::HashMap;
use log::debug;

#[repr(C)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct NamespaceId(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct Namespace {
    pub id: NamespaceId,
    /// Number of logical blocks (NSZE).
    pub blocks: u64,
    /// Bytes per logical block, 0 for unsupported LBA formats.
    pub block_size: u64,
}

impl Namespace {
    pub fn size_in_bytes(&self) -> u64 {
        self.blocks * self.block_size
    }
}

#[derive(Debug)]
pub struct ControllerInformation {
    pub pci_vendor_id: u16,
    pub pci_subsystem_vendor_id: u16,
    pub serial_number: String,
    pub model_number: String,
    pub firmware_revision: String,
    pub minimum_memory_page_size: u64,
    pub maximum_memory_page_size: u64,
    pub memory_page_size: usize,
    pub maximum_number_of_io_queue_pairs: u16,
    pub maximum_queue_entries_supported: u32,
    pub maximum_transfer_size: usize,
    pub controller_id: u16,
    pub version: u32,
}

/// The fields of the capabilities register (CAP) the driver acts on.
#[derive(Debug, Clone, Copy)]
struct ControllerCapabilities {
    /// MQES, converted from its 0's based encoding.
    maximum_queue_entries_supported: u32,
    /// DSTRD
    doorbell_stride: u16,
    /// CSS bit 37: NVM command set
    nvm_command_set_supported: bool,
    /// MPSMIN, converted to bytes.
    minimum_memory_page_size: u64,
    /// MPSMAX, converted to bytes.
    maximum_memory_page_size: u64,
}

impl ControllerCapabilities {
    fn from_bits(cap: u64) -> Self {
        Self {
            maximum_queue_entries_supported: (cap & 0xFFFF) as u32 + 1,
            doorbell_stride: ((cap >> 32) & 0b1111) as u16,
            nvm_command_set_supported: ((cap >> 37) & 0b1) == 1,
            minimum_memory_page_size: 1u64 << (((cap >> 48) & 0b1111) + 12),
            maximum_memory_page_size: 1u64 << (((cap >> 52) & 0b1111) + 12),
        }
    }

    fn validate(&self, page_size: usize) -> Result<(), Error> {
        if self.maximum_queue_entries_supported == 1 {
            return Err(Error::MaximumQueueEntriesSupportedInvalidlyZero);
        }
        if !self.nvm_command_set_supported {
            return Err(Error::NvmCommandSetNotSupported);
        }
        if self.minimum_memory_page_size > self.maximum_memory_page_size {
            return Err(Error::MemoryPageSizeMinimumBiggerThanMaximum(
                self.minimum_memory_page_size,
                self.maximum_memory_page_size,
            ));
        }

        let ps_4_kibi_byte = 2usize.pow(12); // the lowest minimum page size
        let ps_128_mebi_byte = 2usize.pow(28); // the highest maximum page size
        if page_size < ps_4_kibi_byte {
            return Err(Error::PageSizeLessThanNvmeMinimum(page_size));
        }
        if page_size > ps_128_mebi_byte {
            return Err(Error::PageSizeMoreThanNvmeMaximum(page_size));
        }
        if (page_size as u64) < self.minimum_memory_page_size {
            return Err(Error::PageSizeLessThanControllerMinimum(
                page_size,
                self.minimum_memory_page_size,
            ));
        }
        if page_size as u64 > self.maximum_memory_page_size {
            return Err(Error::PageSizeMoreThanControllerMaximum(
                page_size,
                self.maximum_memory_page_size,
            ));
        }
        if page_size.count_ones() != 1 {
            return Err(Error::PageSizeNotAPowerOfTwo(page_size));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct NvmeDevice<A> {
    allocator: Arc<A>,
    address: *mut u8,
    length: usize,
    doorbell_stride: u16,
    admin_queue_pair: AdminQueuePair,
    io_queue_pair_ids: Vec<IoQueuePairId>,
    information: ControllerInformation,
    namespaces: HashMap<NamespaceId, Namespace, RandomState>,
    buffer: Dma<u8>,
}

unsafe impl<A> Send for NvmeDevice<A> {}
unsafe impl<A> Sync for NvmeDevice<A> {}

impl<A: Allocator> NvmeDevice<A> {
    /// Takes over the NVMe controller at `pci_address` from the kernel
    /// driver and brings it up.
    #[cfg(feature = "std")]
    pub fn from_pci_address(
        pci_address: &str,
        page_size: usize,
        allocator: A,
    ) -> Result<Self, Error> {
        if pci::read_class(pci_address)? != pci::NVME_CLASS_ID {
            return Err(Error::NotABlockDevice(pci_address.to_string()));
        }
        let (address, length) = pci::mmap_resource(pci_address)?;
        NvmeDevice::new(address, length, page_size, allocator)
    }

    /// Brings up the controller behind the BAR mapped at `address`:
    /// reset, admin queues, identify, namespace discovery.
    pub fn new(
        address: *mut u8,
        length: usize,
        page_size: usize,
        allocator: A,
    ) -> Result<Self, Error> {
        debug!("Get capabilities");
        let cap = ControllerCapabilities::from_bits(get_register_64(
            NvmeRegs64::CAP,
            address,
            length,
        )?);
        cap.validate(page_size)?;
        let doorbell_stride = cap.doorbell_stride;

        debug!("Disable controller");
        let mut cc = get_register_32(NvmeRegs32::CC, address, length)?;
        cc &= 0xFFFF_FFFE; // Set Enable (EN) to 0 to disable the controller.
        set_register_32(NvmeRegs32::CC, cc, address, length)?;

        // Wait for "not ready" signal
        loop {
            let csts = get_register_32(NvmeRegs32::CSTS, address, length)?;
            if csts & 1 == 1 {
                spin_loop();
            } else {
                break;
            }
        }

        debug!("Configure admin queues");
        let admin_sq = SubmissionQueue::new(ADMIN_QUEUE_ENTRIES, page_size, &allocator)?;
        let admin_cq = CompletionQueue::new(ADMIN_QUEUE_ENTRIES, page_size, 0, &allocator)?;
        set_register_64(NvmeRegs64::ASQ, admin_sq.get_addr() as u64, address, length)?;
        set_register_64(NvmeRegs64::ACQ, admin_cq.get_addr() as u64, address, length)?;
        let aqa =
            (ADMIN_QUEUE_ENTRIES as u32 - 1) << 16 | (ADMIN_QUEUE_ENTRIES as u32 - 1);
        set_register_32(NvmeRegs32::AQA, aqa, address, length)?;
        let mut admin_queue_pair = AdminQueuePair {
            submission: admin_sq,
            completion: admin_cq,
        };

        debug!("Set controller configuration");
        let enable = 0b1; // EN
        let io_command_set_selected = 0b000 << 4; // CSS: NVM command set
        let memory_page_size = ((page_size.ilog2() - 12) & 0b1111) << 7; // MPS
        let arbitration_mechanism_selected = 0b000 << 11; // AMS: round robin
        let shutdown_notification = 0b00 << 14; // SHN
        let io_submission_queue_entry_size = 6 << 16; // I/OSQES (2^6 = 64 B)
        let io_completion_queue_entry_size = 4 << 20; // I/OCQES (2^4 = 16 B)
        let cc = enable
            | io_command_set_selected
            | memory_page_size
            | arbitration_mechanism_selected
            | shutdown_notification
            | io_submission_queue_entry_size
            | io_completion_queue_entry_size;
        set_register_32(NvmeRegs32::CC, cc, address, length)?;

        debug!("Enable controller");
        // Wait for "ready" signal
        loop {
            let csts = get_register_32(NvmeRegs32::CSTS, address, length)?;
            if csts & 1 == 0 {
                spin_loop();
            } else {
                break;
            }
        }

        debug!("Allocate admin data buffer");
        let buffer = Dma::allocate(page_size, page_size, &allocator)?;

        debug!("Identify controller");
        admin_queue_pair.submit_and_complete(
            NvmeCommand::identify_controller,
            &buffer,
            address,
            doorbell_stride,
        )?;
        let pci_vendor_id = ((buffer[1] as u16) << 8) | buffer[0] as u16; // VID
        let pci_subsystem_vendor_id = ((buffer[3] as u16) << 8) | buffer[2] as u16; // SSVID
        let serial_number = read_ascii_string(&buffer[4..=23]); // SN
        let model_number = read_ascii_string(&buffer[24..=63]); // MN
        let firmware_revision = read_ascii_string(&buffer[64..=71]); // FR
        let maximum_data_transfer_size = buffer[77]; // MDTS
        let controller_id = ((buffer[79] as u16) << 8) | buffer[78] as u16; // CNTLID
        let version = ((buffer[83] as u32) << 24)
            | ((buffer[82] as u32) << 16)
            | ((buffer[81] as u32) << 8)
            | buffer[80] as u32; // VER
        let controller_type = buffer[111]; // CNTRLTYPE

        if controller_type != 1 {
            let type_name = match controller_type {
                0 => "not reported",
                2 => "discovery controller",
                3 => "administrative controller",
                _ => "unknown",
            };
            return Err(Error::ControllerTypeInvalid(type_name.to_string()));
        }
        let maximum_transfer_size =
            maximum_transfer_size(cap.minimum_memory_page_size, maximum_data_transfer_size);

        debug!("Get features");
        let completion_queue_entry = admin_queue_pair.submit_and_complete(
            |command_id, address| {
                NvmeCommand::get_features(
                    command_id,
                    address,
                    FeatureIdentifier::NumberOfQueues,
                    Select::Current,
                )
            },
            &buffer,
            address,
            doorbell_stride,
        )?;
        let dword_0 = { completion_queue_entry.command_specific };
        // Not adding one to these, despite them being 0's based values,
        // because the admin queue pair is excluded.
        let number_of_io_submission_queues_allocated = dword_0 as u16;
        let number_of_io_completion_queues_allocated = (dword_0 >> 16) as u16;
        debug!(
            "Number of io submission queues allocated: {number_of_io_submission_queues_allocated}"
        );
        debug!(
            "Number of io completion queues allocated: {number_of_io_completion_queues_allocated}"
        );
        let maximum_number_of_io_queue_pairs =
            number_of_io_submission_queues_allocated.min(number_of_io_completion_queues_allocated);

        let information = ControllerInformation {
            pci_vendor_id,
            pci_subsystem_vendor_id,
            serial_number,
            model_number,
            firmware_revision,
            minimum_memory_page_size: cap.minimum_memory_page_size,
            maximum_memory_page_size: cap.maximum_memory_page_size,
            memory_page_size: page_size,
            maximum_number_of_io_queue_pairs,
            maximum_queue_entries_supported: cap.maximum_queue_entries_supported,
            maximum_transfer_size,
            controller_id,
            version,
        };
        debug!("{information:?}");

        debug!("Identify active namespace IDs");
        admin_queue_pair.submit_and_complete(
            |c_id, address| NvmeCommand::identify_namespace_list(c_id, address, 0),
            &buffer,
            address,
            doorbell_stride,
        )?;
        let buffer_as_u32: &[u32] = unsafe {
            core::slice::from_raw_parts(buffer.virtual_address() as *const u32, buffer.size() / 4)
        };
        let namespace_ids = buffer_as_u32
            .iter()
            .copied()
            .take_while(|&id| id != 0)
            .collect::<Vec<u32>>();
        debug!("{namespace_ids:?}");

        debug!("Identify individual namespaces");
        let mut namespaces = HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0));
        for namespace_id in namespace_ids {
            admin_queue_pair.submit_and_complete(
                |c_id, address| NvmeCommand::identify_namespace(c_id, address, namespace_id),
                &buffer,
                address,
                doorbell_stride,
            )?;

            let namespace_data: IdentifyNamespace =
                unsafe { (*(buffer.virtual_address() as *const IdentifyNamespace)).clone() };

            let flba_index = (namespace_data.formatted_lba_size & 0xF) as usize;
            let lba_format = namespace_data.lba_formats_list[flba_index];
            let namespace = Namespace {
                id: NamespaceId(namespace_id),
                blocks: namespace_data.namespace_size,
                block_size: block_size_from_lba_format(lba_format),
            };
            debug!("{namespace:?}");
            namespaces.insert(NamespaceId(namespace_id), namespace);
        }

        Ok(Self {
            allocator: Arc::new(allocator),
            address,
            doorbell_stride,
            length,
            admin_queue_pair,
            io_queue_pair_ids: Vec::new(),
            buffer,
            information,
            namespaces,
        })
    }

    pub fn controller_information(&self) -> &ControllerInformation {
        &self.information
    }

    /// Active namespace IDs, sorted ascending.
    pub fn namespace_ids(&self) -> Vec<NamespaceId> {
        let mut ids: Vec<NamespaceId> = self.namespaces.keys().copied().collect();
        ids.sort_unstable_by_key(|id| id.0);
        ids
    }

    pub fn namespace(&self, id: &NamespaceId) -> Option<&Namespace> {
        self.namespaces.get(id)
    }

    /// Create a pair consisting of 1 submission and 1 completion queue.
    pub fn create_io_queue_pair(
        &mut self,
        namespace_id: &NamespaceId,
        number_of_queue_entries: u32,
    ) -> Result<IoQueuePair<A>, Error> {
        let namespace = *self
            .namespaces
            .get(namespace_id)
            .ok_or(Error::NamespaceDoesNotExist(*namespace_id))?;
        if namespace.block_size == 0 {
            return Err(Error::NamespaceBlockSizeIsZero);
        }
        if number_of_queue_entries < 2 {
            return Err(Error::NumberOfQueueEntriesLessThanTwo(
                number_of_queue_entries,
            ));
        }
        if number_of_queue_entries > self.information.maximum_queue_entries_supported {
            return Err(Error::NumberOfQueueEntriesMoreThanMaximum(
                number_of_queue_entries,
                self.information.maximum_queue_entries_supported,
            ));
        }

        // Simple way to avoid collisions while reusing some previously deleted keys.
        let mut index_option = None;
        for i in 1..=self.information.maximum_number_of_io_queue_pairs {
            if !self.io_queue_pair_ids.contains(&IoQueuePairId(i)) {
                index_option = Some(IoQueuePairId(i));
                break;
            }
        }
        let queue_id = index_option.ok_or(Error::MaximumNumberOfQueuesReached)?;

        debug!("Requesting I/O queue pair with ID {}", queue_id.0);

        let offset = 0x1000 + ((4 << self.doorbell_stride) * (2 * queue_id.0 + 1) as usize);
        if offset > self.length - 4 {
            return Err(Error::MemoryAccessOutOfBounds);
        }

        let completion_doorbell = self.address as usize + offset;
        let completion_queue = CompletionQueue::new(
            number_of_queue_entries as usize,
            self.information.memory_page_size,
            completion_doorbell,
            self.allocator.as_ref(),
        )?;
        self.submit_and_complete_admin(|c_id, _| {
            NvmeCommand::create_io_completion_queue(
                c_id,
                queue_id.0,
                completion_queue.get_addr(),
                (number_of_queue_entries - 1) as u16,
            )
        })?;

        let submission_queue = SubmissionQueue::new(
            number_of_queue_entries as usize,
            self.information.memory_page_size,
            self.allocator.as_ref(),
        )?;
        self.submit_and_complete_admin(|c_id, _| {
            NvmeCommand::create_io_submission_queue(
                c_id,
                queue_id.0,
                submission_queue.get_addr(),
                (number_of_queue_entries - 1) as u16,
                queue_id.0,
            )
        })?;

        let io_queue_pair = IoQueuePair {
            id: queue_id,
            submission: submission_queue,
            completion: completion_queue,
            page_size: self.information.memory_page_size,
            maximum_transfer_size: self.information.maximum_transfer_size,
            allocator: self.allocator.clone(),
            namespace,
            device_address: self.address as usize,
            doorbell_stride: self.doorbell_stride,
            prp_sets: HashMap::with_hasher(RandomState::with_seeds(0, 0, 0, 0)),
        };
        self.io_queue_pair_ids.push(queue_id);
        Ok(io_queue_pair)
    }

    /// Deletes the queues on the controller and releases their memory.
    pub fn delete_io_queue_pair(&mut self, queue_pair: IoQueuePair<A>) -> Result<(), Error> {
        debug!("Deleting I/O queue pair with ID {}", queue_pair.id.0);
        let index = self
            .io_queue_pair_ids
            .iter()
            .position(|id| id == &queue_pair.id)
            .ok_or(Error::IoQueuePairDoesNotExist(queue_pair.id))?;
        self.io_queue_pair_ids.remove(index);
        self.submit_and_complete_admin(|c_id, _| {
            NvmeCommand::delete_io_submission_queue(c_id, queue_pair.id.0)
        })?;
        self.submit_and_complete_admin(|c_id, _| {
            NvmeCommand::delete_io_completion_queue(c_id, queue_pair.id.0)
        })?;
        queue_pair.deallocate_queues()
    }

    /// Orderly shutdown: deletes the remaining I/O queue pairs, releases the
    /// driver's DMA memory and requests a normal controller shutdown.
    pub fn shutdown(mut self, io_queue_pairs: Vec<IoQueuePair<A>>) -> Result<(), Error> {
        for queue_pair in io_queue_pairs {
            self.delete_io_queue_pair(queue_pair)?;
        }

        debug!("Request normal shutdown");
        let mut cc = get_register_32(NvmeRegs32::CC, self.address, self.length)?;
        cc = (cc & !(0b11 << 14)) | (0b01 << 14); // SHN: normal shutdown
        set_register_32(NvmeRegs32::CC, cc, self.address, self.length)?;

        // Wait for CSTS.SHST to report "shutdown processing complete".
        loop {
            let csts = get_register_32(NvmeRegs32::CSTS, self.address, self.length)?;
            if (csts >> 2) & 0b11 == 0b10 {
                break;
            }
            spin_loop();
        }

        let allocator = self.allocator.clone();
        self.buffer.deallocate(allocator.as_ref())?;
        self.admin_queue_pair
            .submission
            .deallocate(allocator.as_ref())?;
        self.admin_queue_pair
            .completion
            .deallocate(allocator.as_ref())?;
        Ok(())
    }

    fn submit_and_complete_admin<F: FnOnce(u16, usize) -> NvmeCommand>(
        &mut self,
        cmd_init: F,
    ) -> Result<CompletionQueueEntry, Error> {
        self.admin_queue_pair.submit_and_complete(
            cmd_init,
            &self.buffer,
            self.address,
            self.doorbell_stride,
        )
    }
}

/// Reads a fixed ASCII field of an identify data structure, dropping the
/// trailing padding.
fn read_ascii_string(slice: &[u8]) -> String {
    let mut string = String::new();
    for &byte in slice {
        if byte == 0 {
            break;
        }
        string.push(byte as char);
    }
    string.trim().to_string()
}

/// Transfer limit in bytes from the identify controller data. MDTS counts
/// powers of two of the minimum memory page size; 0 means the controller
/// reports no limit.
fn maximum_transfer_size(minimum_memory_page_size: u64, maximum_data_transfer_size: u8) -> usize {
    if maximum_data_transfer_size == 0 {
        return usize::MAX;
    }
    minimum_memory_page_size as usize * (1usize << maximum_data_transfer_size)
}

/// Bytes per logical block from an LBAF entry; 0 when LBADS is outside the
/// supported 9..32 range.
fn block_size_from_lba_format(lba_format: u32) -> u64 {
    let lba_data_size = (lba_format >> 16) & 0xFF;
    if !(9..32).contains(&lba_data_size) {
        0
    } else {
        1 << lba_data_size
    }
}

/// Gets the value of the register at `address` + `register`.
/// Returns an error if `address` + `register` does not belong to mapped memory.
fn get_register_32(register: NvmeRegs32, address: *mut u8, length: usize) -> Result<u32, Error> {
    if register as usize > length - 4 {
        return Err(Error::MemoryAccessOutOfBounds);
    }
    let value =
        unsafe { core::ptr::read_volatile((address as usize + register as usize) as *mut u32) };
    Ok(value)
}

/// Gets the value of the register at `address` + `register`.
/// Returns an error if `address` + `register` does not belong to mapped memory.
fn get_register_64(register: NvmeRegs64, address: *mut u8, length: usize) -> Result<u64, Error> {
    if register as usize > length - 8 {
        return Err(Error::MemoryAccessOutOfBounds);
    }
    let value =
        unsafe { core::ptr::read_volatile((address as usize + register as usize) as *mut u64) };
    Ok(value)
}

/// Sets the register at `address` + `register` to `value`.
/// Returns an error if `address` + `register` does not belong to mapped memory.
fn set_register_32(
    register: NvmeRegs32,
    value: u32,
    address: *mut u8,
    length: usize,
) -> Result<(), Error> {
    if register as usize > length - 4 {
        return Err(Error::MemoryAccessOutOfBounds);
    }
    unsafe {
        core::ptr::write_volatile((address as usize + register as usize) as *mut u32, value);
    }
    Ok(())
}

/// Sets the register at `address` + `register` to `value`.
/// Returns an error if `address` + `register` does not belong to mapped memory.
fn set_register_64(
    register: NvmeRegs64,
    value: u64,
    address: *mut u8,
    length: usize,
) -> Result<(), Error> {
    if register as usize > length - 8 {
        return Err(Error::MemoryAccessOutOfBounds);
    }
    unsafe {
        core::ptr::write_volatile((address as usize + register as usize) as *mut u64, value);
    }
    Ok(())
}

#[allow(unused, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum NvmeRegs32 {
    VS = 0x8,      // Version
    INTMS = 0xC,   // Interrupt Mask Set
    INTMC = 0x10,  // Interrupt Mask Clear
    CC = 0x14,     // Controller Configuration
    CSTS = 0x1C,   // Controller Status
    NSSR = 0x20,   // NVM Subsystem Reset
    AQA = 0x24,    // Admin Queue Attributes
    CMBLOC = 0x38, // Controller Memory Buffer Location
    CMBSZ = 0x3C,  // Controller Memory Buffer Size
}

#[allow(unused, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum NvmeRegs64 {
    CAP = 0x0,  // Controller Capabilities
    ASQ = 0x28, // Admin Submission Queue Base Address
    ACQ = 0x30, // Admin Completion Queue Base Address
}

#[cfg(test)]
mod tests {
    use super::*;

    // MQES = 255, DSTRD = 0, CSS includes NVM, MPSMIN = 4 KiB, MPSMAX = 64 KiB
    const CAP: u64 = 0xFF | (1 << 37) | (4 << 52);

    #[test]
    fn capability_fields_are_decoded() {
        let cap = ControllerCapabilities::from_bits(CAP);
        assert_eq!(cap.maximum_queue_entries_supported, 256);
        assert_eq!(cap.doorbell_stride, 0);
        assert!(cap.nvm_command_set_supported);
        assert_eq!(cap.minimum_memory_page_size, 4096);
        assert_eq!(cap.maximum_memory_page_size, 65536);
    }

    #[test]
    fn page_size_is_validated_against_the_capabilities() {
        let cap = ControllerCapabilities::from_bits(CAP);
        assert!(cap.validate(4096).is_ok());
        assert!(matches!(
            cap.validate(2048),
            Err(Error::PageSizeLessThanNvmeMinimum(2048))
        ));
        assert!(matches!(
            cap.validate(1 << 20),
            Err(Error::PageSizeMoreThanControllerMaximum(_, 65536))
        ));
    }

    #[test]
    fn missing_nvm_command_set_is_rejected() {
        let cap = ControllerCapabilities::from_bits(CAP & !(1 << 37));
        assert!(matches!(
            cap.validate(4096),
            Err(Error::NvmCommandSetNotSupported)
        ));
    }

    #[test]
    fn zero_mqes_is_rejected() {
        let cap = ControllerCapabilities::from_bits(CAP & !0xFFFF);
        assert!(matches!(
            cap.validate(4096),
            Err(Error::MaximumQueueEntriesSupportedInvalidlyZero)
        ));
    }

    #[test]
    fn ascii_fields_are_trimmed() {
        assert_eq!(read_ascii_string(b"SAMSUNG MZVL2512    \0\0\0"), "SAMSUNG MZVL2512");
        assert_eq!(read_ascii_string(b"\0garbage after nul"), "");
    }

    #[test]
    fn block_size_follows_the_lba_data_size() {
        // LBADS lives in bits 23:16 of the LBAF entry.
        assert_eq!(block_size_from_lba_format(9 << 16), 512);
        assert_eq!(block_size_from_lba_format(12 << 16), 4096);
        assert_eq!(block_size_from_lba_format(8 << 16), 0);
        assert_eq!(block_size_from_lba_format(32 << 16), 0);
    }

    #[test]
    fn an_mdts_of_zero_means_no_transfer_limit() {
        assert_eq!(maximum_transfer_size(4096, 0), usize::MAX);
        assert_eq!(maximum_transfer_size(4096, 5), 4096 * 32);
        assert_eq!(maximum_transfer_size(4096, 1), 8192);
    }
}
