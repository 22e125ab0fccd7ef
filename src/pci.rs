use crate::error::Error;
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr;
use std::boxed::Box;
use std::format;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::prelude::AsRawFd;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

// write to the command register (offset 4) in the PCIe config space
const COMMAND_REGISTER_OFFSET: u64 = 4;
// bit 2: "bus master enable", see PCIe 3.0 specification section 7.5.1.1
const BUS_MASTER_ENABLE_BIT: u64 = 2;
// bit 10: "interrupt disable"
const INTERRUPT_DISABLE: u64 = 10;

// offset of the class code dword in the config space
const CLASS_REGISTER_OFFSET: u64 = 8;

/// Class 0x01 (mass storage), subclass 0x08 (NVMe).
pub(crate) const NVME_CLASS_ID: u32 = 0x0108;

fn pci_error(error: impl core::error::Error + 'static) -> Error {
    Error::Pci(Box::new(error))
}

/// PCI addresses of all NVMe-class functions on the system, sorted for a
/// stable probe order.
pub(crate) fn enumerate() -> Result<Vec<String>, Error> {
    let mut addresses = Vec::new();
    for entry in fs::read_dir("/sys/bus/pci/devices").map_err(pci_error)? {
        let entry = entry.map_err(pci_error)?;
        let address = entry.file_name().to_string_lossy().into_owned();
        // A function whose config space cannot be read is not usable anyway.
        let Ok(class) = read_class(&address) else {
            continue;
        };
        if class == NVME_CLASS_ID {
            addresses.push(address);
        }
    }
    addresses.sort();
    Ok(addresses)
}

/// Class and subclass of the function at `pci_address`.
pub(crate) fn read_class(pci_address: &str) -> Result<u32, Error> {
    let mut config_file = open_resource_readonly(pci_address, "config")?;
    let class = read_io32(&mut config_file, CLASS_REGISTER_OFFSET).map_err(pci_error)? >> 16;
    Ok(class)
}

/// Unbinds the kernel driver from the device at `pci_address`.
fn unbind_driver(pci_address: &str) -> Result<(), Error> {
    let path = format!("/sys/bus/pci/devices/{pci_address}/driver/unbind");

    match fs::OpenOptions::new().write(true).open(path) {
        Ok(mut f) => {
            write!(f, "{pci_address}").map_err(pci_error)?;
            Ok(())
        }
        // No driver bound, nothing to unbind.
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(pci_error(e)),
    }
}

/// Enables direct memory access for the device at `pci_address`.
fn enable_dma(pci_address: &str) -> Result<(), Error> {
    let path = format!("/sys/bus/pci/devices/{pci_address}/config");
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(pci_error)?;

    let mut command = read_io16(&mut file, COMMAND_REGISTER_OFFSET).map_err(pci_error)?;
    command |= 1 << BUS_MASTER_ENABLE_BIT;
    write_io16(&mut file, command, COMMAND_REGISTER_OFFSET).map_err(pci_error)?;

    Ok(())
}

/// Disable INTx interrupts for the device at `pci_address`.
fn disable_interrupts(pci_address: &str) -> Result<(), Error> {
    let path = format!("/sys/bus/pci/devices/{pci_address}/config");
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(pci_error)?;

    let mut command = read_io16(&mut file, COMMAND_REGISTER_OFFSET).map_err(pci_error)?;
    command |= 1 << INTERRUPT_DISABLE;
    write_io16(&mut file, command, COMMAND_REGISTER_OFFSET).map_err(pci_error)?;

    Ok(())
}

/// Mmaps the device's BAR 0 and returns a pointer to the mapped memory and
/// its length. Takes the device away from the kernel first.
pub(crate) fn mmap_resource(pci_address: &str) -> Result<(*mut u8, usize), Error> {
    let path = format!("/sys/bus/pci/devices/{pci_address}/resource0");

    unbind_driver(pci_address)?;
    enable_dma(pci_address)?;
    disable_interrupts(pci_address)?;

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(pci_error)?;
    let len = fs::metadata(&path).map_err(pci_error)?.len() as usize;

    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        ) as *mut u8
    };

    if ptr.is_null() || ptr as isize == -1 || len == 0 {
        Err(pci_error(io::Error::new(
            io::ErrorKind::Other,
            format!("mapping BAR 0 of {pci_address} failed"),
        )))
    } else {
        Ok((ptr, len))
    }
}

/// Opens a pci resource file at the given address in read-only mode.
fn open_resource_readonly(pci_address: &str, resource: &str) -> Result<File, Error> {
    let path = format!("/sys/bus/pci/devices/{pci_address}/{resource}");
    OpenOptions::new()
        .read(true)
        .write(false)
        .open(path)
        .map_err(pci_error)
}

/// Reads and returns an u16 at `offset` in `file`.
fn read_io16(file: &mut File, offset: u64) -> Result<u16, io::Error> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_u16::<NativeEndian>()
}

/// Reads and returns an u32 at `offset` in `file`.
fn read_io32(file: &mut File, offset: u64) -> Result<u32, io::Error> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_u32::<NativeEndian>()
}

/// Writes an u16 at `offset` in `file`.
fn write_io16(file: &mut File, value: u16, offset: u64) -> Result<(), io::Error> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_u16::<NativeEndian>(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, content: &[u8]) -> File {
        let path = std::env::temp_dir().join(name);
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn config_space_reads_use_native_endianness() {
        // Config space dump: vendor 0x8086, device 0x0953, command, status,
        // revision + class code dword (0x010802 << 8).
        let mut file = scratch_file(
            "whoosh-pci-config",
            &[0x86, 0x80, 0x53, 0x09, 0x06, 0x04, 0x10, 0x00, 0x00, 0x02, 0x08, 0x01],
        );
        assert_eq!(read_io16(&mut file, 0).unwrap(), u16::from_ne_bytes([0x86, 0x80]));
        let class_dword = read_io32(&mut file, 8).unwrap();
        assert_eq!(class_dword >> 16, u32::from(u16::from_ne_bytes([0x08, 0x01])));
    }

    #[test]
    fn command_register_writes_round_trip() {
        let mut file = scratch_file("whoosh-pci-command", &[0u8; 8]);
        write_io16(&mut file, 1 << BUS_MASTER_ENABLE_BIT, COMMAND_REGISTER_OFFSET).unwrap();
        let command = read_io16(&mut file, COMMAND_REGISTER_OFFSET).unwrap();
        assert_eq!(command, 1 << BUS_MASTER_ENABLE_BIT);
    }
}
