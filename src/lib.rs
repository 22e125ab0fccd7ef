//! A user-space PCIe NVMe driver.
//!
//! The controller is taken away from the kernel via sysfs, its BAR is mapped
//! into the process and all queues and data buffers live in DMA memory
//! provided by an [`Allocator`]. Completions are polled; there is no
//! interrupt handling.
#![no_std]

mod cmd;
mod dma;
mod error;
#[cfg(feature = "std")]
mod huge_pages;
mod nvme;
#[cfg(feature = "std")]
mod pci;
mod prp;
mod queue_pairs;
mod queues;

extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std;

pub use dma::{Allocator, Dma};
pub use error::Error;
#[cfg(feature = "std")]
pub use huge_pages::{HugePageAllocator, HUGE_PAGE_SIZE};
pub use nvme::{ControllerInformation, Namespace, NamespaceId, NvmeDevice};
pub use queue_pairs::{IoQueuePair, IoQueuePairId};

#[cfg(feature = "std")]
use alloc::string::String;
#[cfg(feature = "std")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use log::{info, warn};

/// Attaches to the NVMe controller at `pci_address`, backing all DMA memory
/// with huge pages.
#[cfg(feature = "std")]
pub fn new_pci_and_huge(pci_address: &str) -> Result<NvmeDevice<HugePageAllocator>, Error> {
    NvmeDevice::from_pci_address(pci_address, HUGE_PAGE_SIZE, HugePageAllocator)
}

/// Probes the PCI bus for NVMe controllers and attaches to every one of
/// them, returning each device together with its PCI address.
///
/// A controller that fails to attach is logged and skipped; only a failure
/// to scan the bus itself is an error.
#[cfg(feature = "std")]
pub fn probe() -> Result<Vec<(String, NvmeDevice<HugePageAllocator>)>, Error> {
    let mut devices = Vec::new();
    for pci_address in pci::enumerate()? {
        info!("Probed NVMe function at {pci_address}");
        match new_pci_and_huge(&pci_address) {
            Ok(device) => {
                let information = device.controller_information();
                info!(
                    "Attached to {pci_address}: {} (serial {})",
                    information.model_number, information.serial_number
                );
                devices.push((pci_address, device));
            }
            Err(error) => warn!("Skipping {pci_address}: {error}"),
        }
    }
    Ok(devices)
}

/// A heap-backed stand-in for device-visible memory: aligned allocations
/// with an identity virtual-to-physical translation. Queue, PRP and DMA
/// logic run against it without any hardware.
#[cfg(test)]
pub(crate) mod test_util {
    use crate::dma::Allocator;
    use alloc::boxed::Box;

    pub(crate) struct HeapAllocator;

    impl Allocator for HeapAllocator {
        fn allocate<T>(
            &self,
            layout: core::alloc::Layout,
        ) -> Result<*mut [T], Box<dyn core::error::Error>> {
            let pointer = unsafe { alloc::alloc::alloc_zeroed(layout) };
            if pointer.is_null() {
                return Err("heap allocation failed".into());
            }
            Ok(core::ptr::slice_from_raw_parts_mut(pointer, layout.size()) as *mut [T])
        }

        fn deallocate<T>(&self, _slice: *mut [T]) -> Result<(), Box<dyn core::error::Error>> {
            // Leaked on purpose: the original layout is gone, and test
            // allocations are small and short-lived.
            Ok(())
        }

        fn translate_virtual_to_physical<T>(
            &self,
            virtual_address: *const T,
        ) -> Result<*const T, Box<dyn core::error::Error>> {
            Ok(virtual_address)
        }
    }
}
