//! Input streams and golden outputs for the built-in playback cases.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::hal::{DemuxFilterSettings, DemuxPesSettings, DemuxSectionSettings, DemuxTsSettings};
use crate::loopback::ts::{build_pes, build_section, null_packet, Packetizer};
use crate::session::FilterConf;

pub const SECTION_TPID: u16 = 0x0100;
pub const PES_TPID: u16 = 0x0101;
pub const TS_TPID: u16 = 0x0102;
pub const SECTION_TABLE_ID: u8 = 0x42;
pub const PES_STREAM_ID: u8 = 0xE0;

/// Leading null packets so the feed spans several chunks before any
/// filtered unit arrives.
const LEAD_IN_PACKETS: usize = 8;

/// H.264 access unit delimiter, SPS, PPS and x264 SEI: the payload every
/// built-in case expects to see come out of a filter.
pub const GOLDEN_PAYLOAD: &[u8] = &[
    0x00, 0x00, 0x00, 0x01, 0x09, 0xf0, 0x00, 0x00, 0x00, 0x01, 0x67, 0x42,
    0xc0, 0x1e, 0xdb, 0x01, 0x40, 0x16, 0xec, 0x04, 0x40, 0x00, 0x00, 0x03,
    0x00, 0x40, 0x00, 0x00, 0x0f, 0x03, 0xc5, 0x8b, 0xb8, 0x00, 0x00, 0x00,
    0x01, 0x68, 0xca, 0x8c, 0xb2, 0x00, 0x00, 0x01, 0x06, 0x05, 0xff, 0xff,
    0x70, 0xdc, 0x45, 0xe9, 0xbd, 0xe6, 0xd9, 0x48, 0xb7, 0x96, 0x2c, 0xd8,
    0x20, 0xd9, 0x23, 0xee, 0xef, 0x78, 0x32, 0x36, 0x34, 0x20, 0x2d, 0x20,
    0x63, 0x6f, 0x72, 0x65, 0x20, 0x31, 0x34, 0x32, 0x20, 0x2d, 0x20, 0x48,
    0x2e, 0x32, 0x36, 0x34, 0x2f, 0x4d, 0x50, 0x45, 0x47, 0x2d, 0x34, 0x20,
    0x41, 0x56, 0x43, 0x20, 0x63, 0x6f, 0x64, 0x65, 0x63, 0x20, 0x2d, 0x20,
    0x43, 0x6f, 0x70, 0x79, 0x6c, 0x65, 0x66, 0x74, 0x20, 0x32, 0x30, 0x30,
    0x33, 0x2d, 0x32, 0x30, 0x31, 0x34, 0x20, 0x2d, 0x20, 0x68, 0x74, 0x74,
    0x70, 0x3a, 0x2f, 0x2f, 0x77, 0x77, 0x77, 0x2e, 0x76, 0x69, 0x64, 0x65,
    0x6f, 0x6c, 0x61, 0x6e, 0x2e, 0x6f, 0x72, 0x67, 0x2f, 0x78, 0x32, 0x36,
    0x34, 0x2e, 0x68, 0x74, 0x6d, 0x6c, 0x20, 0x2d, 0x20, 0x6f, 0x70, 0x74,
    0x69, 0x6f, 0x6e, 0x73, 0x3a, 0x20, 0x63, 0x61, 0x62, 0x61, 0x63, 0x3d,
    0x30, 0x20, 0x72, 0x65, 0x66, 0x3d, 0x32, 0x20, 0x64, 0x65, 0x62, 0x6c,
    0x6f, 0x63, 0x6b, 0x3d, 0x31, 0x3a, 0x30, 0x3a, 0x30, 0x20, 0x61, 0x6e,
    0x61, 0x6c, 0x79, 0x73, 0x65, 0x3d, 0x30, 0x78, 0x31, 0x3a, 0x30, 0x78,
    0x31, 0x31, 0x31, 0x20, 0x6d, 0x65, 0x3d, 0x68, 0x65, 0x78, 0x20, 0x73,
    0x75, 0x62, 0x6d, 0x65, 0x3d, 0x37, 0x20, 0x70, 0x73, 0x79, 0x3d, 0x31,
    0x20, 0x70, 0x73, 0x79, 0x5f, 0x72, 0x64, 0x3d, 0x31, 0x2e, 0x30, 0x30,
    0x3a, 0x30, 0x2e, 0x30, 0x30, 0x20, 0x6d, 0x69, 0x78, 0x65, 0x64, 0x5f,
    0x72, 0x65, 0x66, 0x3d, 0x31, 0x20, 0x6d, 0x65, 0x5f, 0x72, 0x61, 0x6e,
    0x67, 0x65, 0x3d, 0x31, 0x36, 0x20, 0x63, 0x68, 0x72, 0x6f, 0x6d, 0x61,
    0x5f, 0x6d, 0x65, 0x3d, 0x31, 0x20, 0x74, 0x72, 0x65, 0x6c, 0x6c, 0x69,
    0x73, 0x3d, 0x31, 0x20, 0x38, 0x78, 0x38, 0x64, 0x63, 0x74, 0x3d, 0x30,
    0x20, 0x63, 0x71, 0x6d, 0x3d, 0x30, 0x20, 0x64, 0x65, 0x61, 0x64, 0x7a,
    0x6f, 0x6e, 0x65, 0x3d, 0x32, 0x31, 0x2c, 0x31, 0x31, 0x20, 0x66, 0x61,
    0x73, 0x74, 0x5f, 0x70, 0x73, 0x6b, 0x69, 0x70, 0x3d, 0x31, 0x20, 0x63,
    0x68, 0x72, 0x6f, 0x6d, 0x61, 0x5f, 0x71, 0x70, 0x5f, 0x6f, 0x66, 0x66,
    0x73, 0x65, 0x74, 0x3d, 0x2d, 0x32, 0x20, 0x74, 0x68, 0x72, 0x65, 0x61,
    0x64, 0x73, 0x3d, 0x36, 0x30, 0x20, 0x6c, 0x6f, 0x6f, 0x6b, 0x61, 0x68,
    0x65, 0x61, 0x64, 0x5f, 0x74, 0x68, 0x72, 0x65, 0x61, 0x64, 0x73, 0x3d,
    0x35, 0x20, 0x73, 0x6c, 0x69, 0x63, 0x65, 0x64, 0x5f, 0x74, 0x68, 0x72,
    0x65, 0x61, 0x64, 0x73, 0x3d, 0x30, 0x20, 0x6e, 0x72, 0x3d, 0x30, 0x20,
    0x64, 0x65, 0x63, 0x69, 0x6d, 0x61, 0x74, 0x65, 0x3d, 0x31, 0x20, 0x69,
    0x6e, 0x74, 0x65, 0x72, 0x6c, 0x61, 0x63, 0x65, 0x64, 0x3d, 0x30, 0x20,
    0x62, 0x6c, 0x75, 0x72, 0x61, 0x79, 0x5f, 0x63, 0x6f, 0x6d, 0x70, 0x61,
    0x74, 0x3d, 0x30, 0x20, 0x63, 0x6f, 0x6e, 0x73, 0x74, 0x72, 0x61, 0x69,
    0x6e, 0x65, 0x64, 0x5f, 0x69, 0x6e, 0x74, 0x72, 0x61, 0x3d, 0x30, 0x20,
    0x62, 0x66, 0x72, 0x61, 0x6d, 0x65, 0x73, 0x3d, 0x30, 0x20, 0x77, 0x65,
    0x69, 0x67, 0x68, 0x74, 0x70, 0x3d, 0x30, 0x20, 0x6b, 0x65, 0x79, 0x69,
    0x6e, 0x74, 0x3d, 0x32, 0x35, 0x30, 0x20, 0x6b, 0x65, 0x79, 0x69, 0x6e,
    0x74, 0x5f, 0x6d, 0x69, 0x6e, 0x3d, 0x32, 0x35, 0x20, 0x73, 0x63, 0x65,
    0x6e, 0x65,
];

/// A transport stream plus, per filter, the output it must produce.
#[derive(Clone, Debug)]
pub struct StreamFixture {
    pub stream: Vec<u8>,
    pub filters: Vec<FilterConf>,
    pub goldens: Vec<Vec<u8>>,
}

impl StreamFixture {
    /// One section filter receiving one section that carries
    /// [`GOLDEN_PAYLOAD`].
    pub fn single_section() -> Self {
        let section = build_section(SECTION_TABLE_ID, GOLDEN_PAYLOAD);
        let mut stream = lead_in();
        stream.extend(Packetizer::new(SECTION_TPID).section(&section));
        Self {
            stream,
            filters: vec![FilterConf {
                settings: DemuxFilterSettings::Section(DemuxSectionSettings {
                    tpid: SECTION_TPID,
                    table_id: Some(SECTION_TABLE_ID),
                }),
            }],
            goldens: vec![section],
        }
    }

    /// Section, PES and TS filters on three PIDs of one stream.
    pub fn multi_filter() -> Self {
        let section = build_section(SECTION_TABLE_ID, GOLDEN_PAYLOAD);
        let pes = build_pes(PES_STREAM_ID, GOLDEN_PAYLOAD);
        let ts_packet = Packetizer::new(TS_TPID).pes(&build_pes(0xC0, &GOLDEN_PAYLOAD[..64]));

        let mut stream = lead_in();
        stream.extend(Packetizer::new(SECTION_TPID).section(&section));
        stream.extend_from_slice(&null_packet());
        stream.extend(Packetizer::new(PES_TPID).pes(&pes));
        stream.extend_from_slice(&ts_packet);

        Self {
            stream,
            filters: vec![
                FilterConf {
                    settings: DemuxFilterSettings::Section(DemuxSectionSettings {
                        tpid: SECTION_TPID,
                        table_id: None,
                    }),
                },
                FilterConf {
                    settings: DemuxFilterSettings::Pes(DemuxPesSettings {
                        tpid: PES_TPID,
                        stream_id: Some(PES_STREAM_ID),
                    }),
                },
                FilterConf {
                    settings: DemuxFilterSettings::Ts(DemuxTsSettings { tpid: TS_TPID }),
                },
            ],
            goldens: vec![section, pes, ts_packet],
        }
    }
}

fn lead_in() -> Vec<u8> {
    (0..LEAD_IN_PACKETS).flat_map(|_| null_packet()).collect()
}

/// A file in the data directory, removed on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("tuner-vts-{}-{name}", std::process::id()));
        fs::write(&path, bytes)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::ts::TS_PACKET_SIZE;

    #[test]
    fn golden_payload_is_intact() {
        assert_eq!(GOLDEN_PAYLOAD.len(), 530);
        assert_eq!(&GOLDEN_PAYLOAD[..5], &[0x00, 0x00, 0x00, 0x01, 0x09]);
        assert!(GOLDEN_PAYLOAD.ends_with(b"scene"));
    }

    #[test]
    fn fixtures_are_packet_aligned() {
        for fixture in [StreamFixture::single_section(), StreamFixture::multi_filter()] {
            assert_eq!(fixture.stream.len() % TS_PACKET_SIZE, 0);
            assert_eq!(fixture.filters.len(), fixture.goldens.len());
        }
        let single = StreamFixture::single_section();
        assert_eq!(single.goldens[0].len(), GOLDEN_PAYLOAD.len() + 3);
    }

    #[test]
    fn scratch_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let file = ScratchFile::write(dir.path(), "input.ts", b"abc").unwrap();
            assert_eq!(fs::read(file.path()).unwrap(), b"abc");
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
