use std::fmt;

use serde::{Deserialize, Serialize};

pub type FrontendId = u32;
pub type DemuxId = u32;
pub type FilterId = u32;

/// Result code returned by every control operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Unavailable,
    NotInitialized,
    InvalidState,
    InvalidArgument,
    OutOfMemory,
    UnknownError,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Unavailable => "UNAVAILABLE",
            Status::NotInitialized => "NOT_INITIALIZED",
            Status::InvalidState => "INVALID_STATE",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::OutOfMemory => "OUT_OF_MEMORY",
            Status::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(name)
    }
}

impl std::error::Error for Status {}

// Frontend

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontendAtscModulation {
    Undefined,
    Auto,
    Mod8Vsb,
    Mod16Vsb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendAtscSettings {
    pub frequency: u32,
    pub modulation: FrontendAtscModulation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendDvbtSettings {
    pub frequency: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontendSettings {
    Atsc(FrontendAtscSettings),
    Dvbt(FrontendDvbtSettings),
}

impl FrontendSettings {
    pub fn frequency(&self) -> u32 {
        match self {
            FrontendSettings::Atsc(s) => s.frequency,
            FrontendSettings::Dvbt(s) => s.frequency,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontendEventType {
    Locked,
    NoSignal,
    LostLock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontendScanType {
    Auto,
    Blind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrontendScanMessage {
    Locked(bool),
    End(bool),
    ProgressPercent(u8),
    Frequencies(Vec<u32>),
}

// Demux

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DemuxFilterType {
    Section,
    Pes,
    Ts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxSectionSettings {
    pub tpid: u16,
    /// Only sections with this table id are delivered; `None` passes all.
    pub table_id: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxPesSettings {
    pub tpid: u16,
    pub stream_id: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxTsSettings {
    pub tpid: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemuxFilterSettings {
    Section(DemuxSectionSettings),
    Pes(DemuxPesSettings),
    Ts(DemuxTsSettings),
}

impl DemuxFilterSettings {
    pub fn tpid(&self) -> u16 {
        match self {
            DemuxFilterSettings::Section(s) => s.tpid,
            DemuxFilterSettings::Pes(s) => s.tpid,
            DemuxFilterSettings::Ts(s) => s.tpid,
        }
    }

    pub fn filter_type(&self) -> DemuxFilterType {
        match self {
            DemuxFilterSettings::Section(_) => DemuxFilterType::Section,
            DemuxFilterSettings::Pes(_) => DemuxFilterType::Pes,
            DemuxFilterSettings::Ts(_) => DemuxFilterType::Ts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemuxDataFormat {
    Ts,
    Pes,
    Es,
    ShvTlv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxInputSettings {
    /// Bitmask of [`DemuxInputStatus`] values the service may report.
    pub status_mask: u8,
    pub low_threshold: u32,
    pub high_threshold: u32,
    pub data_format: DemuxDataFormat,
    pub packet_size: u8,
}

impl Default for DemuxInputSettings {
    fn default() -> Self {
        Self {
            status_mask: 0xf,
            low_threshold: 0x1000,
            high_threshold: 0x10_0000,
            data_format: DemuxDataFormat::Ts,
            packet_size: 188,
        }
    }
}

/// Fill level of the input queue as seen by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxInputStatus {
    SpaceEmpty,
    SpaceAlmostEmpty,
    SpaceAlmostFull,
    SpaceFull,
}

impl DemuxInputStatus {
    pub fn mask_bit(self) -> u8 {
        match self {
            DemuxInputStatus::SpaceEmpty => 1 << 0,
            DemuxInputStatus::SpaceAlmostEmpty => 1 << 1,
            DemuxInputStatus::SpaceAlmostFull => 1 << 2,
            DemuxInputStatus::SpaceFull => 1 << 3,
        }
    }

    /// Collapses the four levels into the feeder's keep-writing decision.
    pub fn allows_writing(self) -> bool {
        matches!(
            self,
            DemuxInputStatus::SpaceEmpty | DemuxInputStatus::SpaceAlmostEmpty
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxFilterStatus {
    DataReady,
    LowWater,
    HighWater,
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxOutputStatus {
    LowWater,
    HighWater,
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemuxFilterSectionEvent {
    pub table_id: u16,
    pub version: u16,
    pub section_num: u16,
    pub data_length: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemuxFilterPesEvent {
    pub stream_id: u8,
    pub data_length: u16,
    pub mpu_sequence_number: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemuxFilterTsEvent {
    pub tpid: u16,
    pub data_length: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterSubEvent {
    Section(DemuxFilterSectionEvent),
    Pes(DemuxFilterPesEvent),
    Ts(DemuxFilterTsEvent),
}

impl FilterSubEvent {
    /// Number of bytes the service wrote into the filter queue for this
    /// sub-event.
    pub fn data_length(&self) -> usize {
        match self {
            FilterSubEvent::Section(e) => e.data_length as usize,
            FilterSubEvent::Pes(e) => e.data_length as usize,
            FilterSubEvent::Ts(e) => e.data_length as usize,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemuxFilterEvent {
    pub filter_id: FilterId,
    pub events: Vec<FilterSubEvent>,
}
