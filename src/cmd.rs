/// NVMe Spec 4.2
/// Submission queue entry
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub(crate) struct NvmeCommand {
    pub(crate) opcode: u8,
    /// Flags; FUSE (2 bits) | Reserved (4 bits) | PSDT (2 bits)
    pub(crate) flags: u8,
    pub(crate) command_id: u16,
    pub(crate) namespace_id: u32,
    pub(crate) _reserved: u64,
    pub(crate) metadata_pointer: u64,
    pub(crate) data_pointer: [u64; 2],
    /// Command dword 10
    pub(crate) cdw10: u32,
    /// Command dword 11
    pub(crate) cdw11: u32,
    /// Command dword 12
    pub(crate) cdw12: u32,
    /// Command dword 13
    pub(crate) cdw13: u32,
    /// Command dword 14
    pub(crate) cdw14: u32,
    /// Command dword 15
    pub(crate) cdw15: u32,
}

impl NvmeCommand {
    pub(crate) fn create_io_completion_queue(
        command_id: u16,
        queue_id: u16,
        data_pointer: usize,
        size: u16,
    ) -> Self {
        Self {
            opcode: 5,
            command_id,
            data_pointer: [data_pointer as u64, 0],
            cdw10: ((size as u32) << 16) | (queue_id as u32),
            cdw11: 1, // Physically Contiguous
            ..Default::default()
        }
    }

    pub(crate) fn create_io_submission_queue(
        command_id: u16,
        submission_queue_id: u16,
        data_pointer: usize,
        size: u16,
        completion_queue_id: u16,
    ) -> Self {
        Self {
            opcode: 1,
            command_id,
            data_pointer: [data_pointer as u64, 0],
            cdw10: ((size as u32) << 16) | (submission_queue_id as u32),
            cdw11: ((completion_queue_id as u32) << 16) | 1, /* Physically Contiguous */
            ..Default::default()
        }
    }

    pub(crate) fn delete_io_submission_queue(command_id: u16, queue_id: u16) -> Self {
        Self {
            opcode: 0,
            command_id,
            cdw10: queue_id as u32,
            ..Default::default()
        }
    }

    pub(crate) fn delete_io_completion_queue(command_id: u16, queue_id: u16) -> Self {
        Self {
            opcode: 4,
            command_id,
            cdw10: queue_id as u32,
            ..Default::default()
        }
    }

    pub(crate) fn identify_controller(command_id: u16, data_pointer: usize) -> Self {
        Self {
            opcode: 6,
            command_id,
            data_pointer: [data_pointer as u64, 0],
            cdw10: 1, // CNS: identify controller data structure
            ..Default::default()
        }
    }

    pub(crate) fn identify_namespace(
        command_id: u16,
        data_pointer: usize,
        namespace_id: u32,
    ) -> Self {
        Self {
            opcode: 6,
            command_id,
            namespace_id,
            data_pointer: [data_pointer as u64, 0],
            cdw10: 0, // CNS: identify namespace data structure
            ..Default::default()
        }
    }

    pub(crate) fn identify_namespace_list(command_id: u16, data_pointer: usize, base: u32) -> Self {
        Self {
            opcode: 6,
            command_id,
            namespace_id: base,
            data_pointer: [data_pointer as u64, 0],
            cdw10: 2, // CNS: active namespace ID list
            ..Default::default()
        }
    }

    pub(crate) fn get_features(
        command_id: u16,
        data_pointer: usize,
        feature_id: FeatureIdentifier,
        select: Select,
    ) -> Self {
        Self {
            opcode: 0xA,
            command_id,
            data_pointer: [data_pointer as u64, 0],
            cdw10: ((select as u32) << 11) | feature_id as u32,
            ..Default::default()
        }
    }

    pub(crate) fn io_read(
        command_id: u16,
        namespace_id: u32,
        logical_block_address: u64,
        number_of_blocks: u16,
        prp_1: u64,
        prp_2: u64,
    ) -> Self {
        Self {
            opcode: 2,
            command_id,
            namespace_id,
            data_pointer: [prp_1, prp_2],
            cdw10: logical_block_address as u32,
            cdw11: (logical_block_address >> 32) as u32,
            cdw12: number_of_blocks as u32, // NLB, 0's based
            ..Default::default()
        }
    }

    pub(crate) fn io_write(
        command_id: u16,
        namespace_id: u32,
        logical_block_address: u64,
        number_of_blocks: u16,
        prp_1: u64,
        prp_2: u64,
    ) -> Self {
        Self {
            opcode: 1,
            command_id,
            namespace_id,
            data_pointer: [prp_1, prp_2],
            cdw10: logical_block_address as u32,
            cdw11: (logical_block_address >> 32) as u32,
            cdw12: number_of_blocks as u32, // NLB, 0's based
            ..Default::default()
        }
    }
}

/// SEL
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Select {
    Current = 0b000,
    Default = 0b001,
    Saved = 0b010,
    SupportedCapabilites = 0b011,
}

/// FID
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum FeatureIdentifier {
    Arbitration = 0x1,
    PowerManagement = 0x2,
    TemperatureThreshold = 0x4,
    VolatileWriteCache = 0x6,
    NumberOfQueues = 0x7,
}

/// NVMe Spec, NVM command set, Identify Namespace data structure.
/// Only the fields up to the LBA format list are ever read; the rest keep
/// the layout at its on-wire 4096 bytes.
#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Debug, Clone)]
pub(crate) struct IdentifyNamespace {
    pub(crate) namespace_size: u64,                          // NSZE
    pub(crate) namespace_capacity: u64,                      // NCAP
    pub(crate) namespace_utilization: u64,                   // NUSE
    pub(crate) namespace_features: u8,                       // NSFEAT
    pub(crate) number_of_lba_formats: u8,                    // NLBAF
    pub(crate) formatted_lba_size: u8,                       // FLBAS
    pub(crate) metadata_capabilites: u8,                     // MC
    pub(crate) end_to_end_data_protection_capabilites: u8,   // DPC
    pub(crate) end_to_end_data_protection_type_settings: u8, // DPS
    pub(crate) namespace_multi_path_io_and_namespace_sharing_capabilites: u8, // NMIC
    pub(crate) reservation_capabilities: u8,                 // RESCAP
    pub(crate) format_progress_indicator: u8,                // FPI
    pub(crate) deallocate_logical_block_features: u8,        // DLFEAT
    pub(crate) namespace_atomic_write_unit_normal: u16,      // NAWUN
    pub(crate) namespace_atomic_write_unit_power_fail: u16,  // NAWUPF
    pub(crate) namespace_atomic_compare_and_write_unit: u16, // NACWU
    pub(crate) namespace_atomic_boundary_size_normal: u16,   // NABSN
    pub(crate) namespace_atomic_boundary_offset: u16,        // NABO
    pub(crate) namespace_atomic_boundary_size_power_fail: u16, // NABSPF
    pub(crate) namespace_optimal_io_boundary: u16,           // NOIOB
    pub(crate) nvm_capacity: u128,                           // NVMCAP
    pub(crate) namespace_preferred_write_granularity: u16,   // NPWG
    pub(crate) namespace_preferred_write_alignment: u16,     // NPWA
    pub(crate) namespace_preferred_deallocate_granularity: u16, // NPDG
    pub(crate) namespace_preferred_deallocate_alignment: u16, // NPDA
    pub(crate) namespace_optimal_write_size: u16,            // NOWS
    pub(crate) maximum_single_source_range_length: u16,      // MSSRL
    pub(crate) maximum_copy_length: u32,                     // MCL
    pub(crate) maximum_source_range_count: u8,               // MSRC
    pub(crate) _reserved_1: [u8; 11],                        // (reserved)
    pub(crate) ana_group_identifier: u32,                    // ANAGRPID
    pub(crate) _reserved_2: [u8; 3],                         // (reserved)
    pub(crate) namespace_attributes: u8,                     // NSATTR
    pub(crate) nvm_set_identifier: u16,                      // NVMSETID
    pub(crate) endurance_group_identifier: u16,              // ENDGID
    pub(crate) namespace_globally_unique_identifier: [u8; 16], // NGUID
    pub(crate) ieee_extended_unique_identifier: u64,         // EUI64
    pub(crate) lba_formats_list: [u32; 64],                  // LBAF0, LBAF1, ... LBAF63
    pub(crate) vendor_specific: [u8; 3712],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_queue_entry_is_64_bytes() {
        assert_eq!(core::mem::size_of::<NvmeCommand>(), 64);
    }

    #[test]
    fn identify_namespace_data_is_4096_bytes() {
        assert_eq!(core::mem::size_of::<IdentifyNamespace>(), 4096);
    }

    #[test]
    fn io_read_packs_the_logical_block_address_into_cdw10_and_cdw11() {
        let lba = 0x1_2345_6789_u64;
        let command = NvmeCommand::io_read(7, 1, lba, 159, 0x1000, 0x2000);
        assert_eq!(command.opcode, 2);
        assert_eq!({ command.command_id }, 7);
        assert_eq!({ command.namespace_id }, 1);
        assert_eq!({ command.cdw10 }, 0x2345_6789);
        assert_eq!({ command.cdw11 }, 0x1);
        assert_eq!({ command.cdw12 }, 159);
        assert_eq!({ command.data_pointer }, [0x1000, 0x2000]);
    }

    #[test]
    fn io_write_only_differs_from_io_read_in_the_opcode() {
        let read = NvmeCommand::io_read(3, 2, 64, 15, 0xA000, 0);
        let write = NvmeCommand::io_write(3, 2, 64, 15, 0xA000, 0);
        assert_eq!(read.opcode, 2);
        assert_eq!(write.opcode, 1);
        assert_eq!({ read.cdw10 }, { write.cdw10 });
        assert_eq!({ read.cdw12 }, { write.cdw12 });
    }

    #[test]
    fn create_io_queues_pack_size_and_ids() {
        let cq = NvmeCommand::create_io_completion_queue(0, 3, 0x4000, 255);
        assert_eq!(cq.opcode, 5);
        assert_eq!({ cq.cdw10 }, (255 << 16) | 3);
        assert_eq!({ cq.cdw11 }, 1);

        let sq = NvmeCommand::create_io_submission_queue(1, 3, 0x5000, 255, 3);
        assert_eq!(sq.opcode, 1);
        assert_eq!({ sq.cdw10 }, (255 << 16) | 3);
        assert_eq!({ sq.cdw11 }, (3 << 16) | 1);
    }

    #[test]
    fn identify_variants_select_the_cns() {
        assert_eq!({ NvmeCommand::identify_controller(0, 0).cdw10 }, 1);
        assert_eq!({ NvmeCommand::identify_namespace(0, 0, 1).cdw10 }, 0);
        assert_eq!({ NvmeCommand::identify_namespace_list(0, 0, 0).cdw10 }, 2);
    }

    #[test]
    fn get_features_packs_select_and_feature_id() {
        let command = NvmeCommand::get_features(
            0,
            0x6000,
            FeatureIdentifier::NumberOfQueues,
            Select::Current,
        );
        assert_eq!(command.opcode, 0xA);
        assert_eq!({ command.cdw10 }, 0x7);
    }
}
