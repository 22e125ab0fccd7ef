//! Write/read round-trip exerciser.
//!
//! Probes the PCI bus for NVMe controllers, picks the first active namespace,
//! writes a patterned buffer at LBA 0, reads it back and verifies the two
//! buffers match byte for byte.
//!
//! CAREFUL: this overwrites the beginning of the first namespace found.

use log::info;
use whoosh::{Error, IoQueuePair, HugePageAllocator};

const PAGE_SIZE: usize = 4096;
const DATA_LENGTH: usize = PAGE_SIZE * 20;
const QUEUE_ENTRIES: u32 = 256;
const LOGICAL_BLOCK_ADDRESS: u64 = 0;

fn main() {
    env_logger::init();
    match run() {
        Ok(()) => println!("round trip verified: {DATA_LENGTH} bytes match"),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), Error> {
    let devices = whoosh::probe()?;

    for (pci_address, device) in &devices {
        let information = device.controller_information();
        println!(
            "{pci_address}: {} {} (firmware {})",
            information.model_number, information.serial_number, information.firmware_revision
        );
        for namespace_id in device.namespace_ids() {
            // probe() only returns namespaces the controller reports active
            let namespace = device.namespace(&namespace_id).ok_or(Error::NoActiveNamespace)?;
            let size = namespace.size_in_bytes();
            println!(
                "  Namespace ID: {} size: {:.2} GB, {:.2} GiB, block size {}, block count {}",
                namespace_id.0,
                size as f64 / 1000.0 / 1000.0 / 1000.0,
                size as f64 / 1024.0 / 1024.0 / 1024.0,
                namespace.block_size,
                namespace.blocks,
            );
        }
    }

    // First controller with an active namespace, first namespace on it.
    let (_, mut device) = devices
        .into_iter()
        .find(|(_, device)| !device.namespace_ids().is_empty())
        .ok_or(Error::NoActiveNamespace)?;
    let namespace_id = device.namespace_ids()[0];

    let mut queue_pair = device.create_io_queue_pair(&namespace_id, QUEUE_ENTRIES)?;

    let mut write_buffer = queue_pair.allocate_buffer::<u8>(DATA_LENGTH)?;
    let mut read_buffer = queue_pair.allocate_buffer::<u8>(DATA_LENGTH)?;
    fill_pattern(&mut write_buffer[..DATA_LENGTH]);

    queue_pair.submit_write(&write_buffer, LOGICAL_BLOCK_ADDRESS)?;
    poll_until_done(&mut queue_pair)?;
    info!("stage write success");

    queue_pair.submit_read(&mut read_buffer, LOGICAL_BLOCK_ADDRESS)?;
    poll_until_done(&mut queue_pair)?;
    info!("stage read success");

    verify(&write_buffer[..DATA_LENGTH], &read_buffer[..DATA_LENGTH])?;

    queue_pair.deallocate_buffer(write_buffer)?;
    queue_pair.deallocate_buffer(read_buffer)?;
    device.shutdown(vec![queue_pair])
}

/// The repeating fill of the write buffer: chunks of up to 3191 bytes, each
/// chunk filled with one letter derived from its start offset. The odd chunk
/// length keeps the pattern from lining up with block or page boundaries.
fn fill_pattern(buffer: &mut [u8]) {
    let mut offset = 0;
    while offset < buffer.len() {
        let length = 3191.min(buffer.len() - offset);
        buffer[offset..offset + length].fill(b'a' + (offset % 26) as u8);
        offset += length;
    }
}

fn poll_until_done(queue_pair: &mut IoQueuePair<HugePageAllocator>) -> Result<(), Error> {
    loop {
        if queue_pair.poll_completion()?.is_some() {
            return Ok(());
        }
        std::hint::spin_loop();
    }
}

fn verify(written: &[u8], read: &[u8]) -> Result<(), Error> {
    match written.iter().zip(read).position(|(a, b)| a != b) {
        None => Ok(()),
        Some(offset) => Err(Error::DataMismatch(offset)),
    }
}

#[cfg(test)]
mod tests {
    use super::{fill_pattern, verify};

    #[test]
    fn pattern_advances_per_chunk() {
        let mut buffer = [0u8; 8192];
        fill_pattern(&mut buffer);
        assert_eq!(buffer[0], b'a');
        assert_eq!(buffer[3190], b'a');
        // second chunk starts at 3191; 3191 % 26 == 19
        assert_eq!(buffer[3191], b'a' + 19);
        assert_eq!(buffer[6381], b'a' + 19);
        // third chunk starts at 6382; 6382 % 26 == 12
        assert_eq!(buffer[6382], b'a' + 12);
    }

    #[test]
    fn verify_reports_the_first_differing_offset() {
        let written = [1u8, 2, 3, 4];
        let mut read = written;
        assert!(verify(&written, &read).is_ok());
        read[2] = 9;
        assert!(matches!(
            verify(&written, &read),
            Err(super::Error::DataMismatch(2))
        ));
    }
}
