use crate::nvme::NamespaceId;
use crate::queue_pairs::IoQueuePairId;
use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

#[derive(Debug)]
pub enum Error {
    Allocate(Box<dyn core::error::Error>),
    Deallocate(Box<dyn core::error::Error>),
    TranslateVirtualToPhysical(Box<dyn core::error::Error>),
    Layout(core::alloc::LayoutError),
    NotABlockDevice(String),
    MaximumQueueEntriesSupportedInvalidlyZero,
    NvmCommandSetNotSupported,
    MemoryPageSizeMinimumBiggerThanMaximum(u64, u64),
    PageSizeLessThanNvmeMinimum(usize),
    PageSizeMoreThanNvmeMaximum(usize),
    PageSizeLessThanControllerMinimum(usize, u64),
    PageSizeMoreThanControllerMaximum(usize, u64),
    PageSizeNotAPowerOfTwo(usize),
    ControllerTypeInvalid(String),
    NamespaceDoesNotExist(NamespaceId),
    NamespaceBlockSizeIsZero,
    NoActiveNamespace,
    NumberOfElementsIsZero,
    NumberOfQueueEntriesLessThanTwo(u32),
    NumberOfQueueEntriesMoreThanMaximum(u32, u32),
    MaximumNumberOfQueuesReached,
    IoQueuePairDoesNotExist(IoQueuePairId),
    MemoryAccessOutOfBounds,
    Pci(Box<dyn core::error::Error>),
    VirtualAddressIsNotDwordAligned(usize),
    VirtualAddressIsNotPageAligned(usize),
    BufferLengthBiggerThanMaximumTransferSize(usize, usize),
    BufferLengthNotAMultipleOfNamespaceBlockSize(usize, u64),
    NumberOfBlocksMoreThanMaximum(u64, u64),
    CommandFailed(u16),
    CommandAlreadyInFlight(u16),
    SubmissionQueueFull,
    DataMismatch(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocate(error) => write!(f, "Allocation error: {error}."),
            Error::Deallocate(error) => write!(f, "Deallocation error: {error}."),
            Error::TranslateVirtualToPhysical(error) => write!(f, "Translation error: {error}."),
            Error::Layout(error) => write!(f, "{error}"),
            Error::NotABlockDevice(pci_address) => write!(
                f,
                "The device at PCI address {pci_address} is not a block device."
            ),
            Error::MaximumQueueEntriesSupportedInvalidlyZero => write!(
                f,
                "The value of \"Maximum Queue Entries Supported (MQES)\" in the
                capabilities register (CAP) is invalidly set to 0."
            ),
            Error::NvmCommandSetNotSupported => {
                write!(f, "The device does not support the NVM command set.")
            }
            Error::MemoryPageSizeMinimumBiggerThanMaximum(minimum, maximum) => write!(f,
                "The value of \"Memory Page Size Minimum (MPSMIN)\" ({minimum}) is bigger than \
                 the value of \"Memory Page Size Maximum (MPSMAX)\" ({maximum}) in the capabilities register (CAP)."
            ),
            Error::PageSizeLessThanNvmeMinimum(page_size) => write!(f,
                "The page size used ({page_size:X}) is less than \
                the lowest minimum page size of 4 KiB (2^12 B)."
            ),
            Error::PageSizeMoreThanNvmeMaximum(page_size) => write!(f,
                "The page size used ({page_size:X}) is more than \
                the highest maximum page size of 128 MiB (2^28 B)."
            ),
            Error::PageSizeLessThanControllerMinimum(page_size, minimum) => write!(f,
                "The page size used ({page_size:X}) is less than \
                the minimum memory page size of the controller ({minimum:X})."
            ),
            Error::PageSizeMoreThanControllerMaximum(page_size, maximum) => write!(f,
                "The page size used ({page_size:X}) is more than \
                the maximum memory page size of the controller ({maximum:X})."
            ),
            Error::PageSizeNotAPowerOfTwo(page_size) => write!(f,
                "The page size used ({page_size:X}) is not a power of two."
            ),
            Error::ControllerTypeInvalid(type_name) => write!(f,
                "The controller type is not \"I/O controller\" but instead \"{type_name}\"."
            ),
            Error::NamespaceDoesNotExist(id) => {
                write!(f, "The namespace with ID {} does not exist.", id.0)
            }
            Error::NamespaceBlockSizeIsZero => write!(
                f,
                "The namespace is formatted with an unsupported LBA format and has no \
                usable block size."
            ),
            Error::NoActiveNamespace => {
                write!(f, "No attached controller reports an active namespace.")
            }
            Error::NumberOfElementsIsZero => {
                write!(f, "A buffer of zero elements cannot be allocated.")
            }
            Error::NumberOfQueueEntriesLessThanTwo(entries) => write!(f,
                "The number of queue entries ({entries}) must not be smaller than 2."
            ),
            Error::NumberOfQueueEntriesMoreThanMaximum(entries, maximum) => write!(f,
                "The number of queue entries ({entries}) must not be bigger than \
                the maximum number of supported queue entries ({maximum})."
            ),
            Error::MaximumNumberOfQueuesReached => write!(f, "Maximum number of queues reached."),
            Error::IoQueuePairDoesNotExist(id) => {
                write!(f, "The I/O queue pair with ID {} does not exist.", id.0)
            }
            Error::MemoryAccessOutOfBounds => write!(f, "Memory access out of bounds."),
            Error::Pci(error) => write!(f, "{error}"),
            Error::VirtualAddressIsNotDwordAligned(address) => write!(f,
                "The virtual address {address:X} is not dword aligned."
            ),
            Error::VirtualAddressIsNotPageAligned(address) => write!(f,
                "The virtual address {address:X} is not page aligned."
            ),
            Error::BufferLengthBiggerThanMaximumTransferSize(buffer_length, maximum_transfer_size) => write!(f,
                "The buffer length ({buffer_length:X}) is bigger than the maximum transfer size ({maximum_transfer_size:X})."
            ),
            Error::BufferLengthNotAMultipleOfNamespaceBlockSize(buffer_length, block_size) => write!(f,
                "The buffer length ({buffer_length:X}) is not a multiple of the namespace block size ({block_size:X})."
            ),
            Error::NumberOfBlocksMoreThanMaximum(blocks, maximum) => write!(f,
                "The transfer spans {blocks} blocks, more than the {maximum} blocks a \
                single command can name."
            ),
            Error::CommandFailed(status) => write!(f,
                "The command failed with status code 0x{:X} and status code type 0x{:X}.",
                status & 0xFF,
                (status >> 8) & 0x7
            ),
            Error::CommandAlreadyInFlight(command_id) => write!(f,
                "A command with ID {command_id} is already in flight on this queue pair."
            ),
            Error::SubmissionQueueFull => write!(f, "The submission queue is full."),
            Error::DataMismatch(offset) => write!(f,
                "The data read back differs from the data written, first at byte offset {offset}."
            ),
        }
    }
}

impl core::error::Error for Error {}

impl From<core::alloc::LayoutError> for Error {
    fn from(error: core::alloc::LayoutError) -> Self {
        Error::Layout(error)
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use alloc::format;

    #[test]
    fn command_failure_splits_status_code_and_type() {
        // status code 0x81, status code type 0x2, as taken from bits 15:1 of the entry
        let message = format!("{}", Error::CommandFailed(0x0281));
        assert!(message.contains("0x81"));
        assert!(message.contains("0x2"));
    }

    #[test]
    fn buffer_length_errors_render_lengths_in_hex() {
        let message = format!(
            "{}",
            Error::BufferLengthNotAMultipleOfNamespaceBlockSize(0x1400, 0x200)
        );
        assert!(message.contains("1400"));
        assert!(message.contains("200"));
    }
}
