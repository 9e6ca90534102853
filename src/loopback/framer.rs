//! Reassembles filter units from transport packet payloads.
//!
//! Section filters emit whole sections (`3 + section_length` bytes), PES
//! filters emit whole PES packets (`6 + PES_packet_length` bytes, or up to
//! the next unit start when the length field is zero) and TS filters emit
//! each matching packet unchanged.

use log::trace;

use crate::hal::{
    DemuxFilterPesEvent, DemuxFilterSectionEvent, DemuxFilterSettings, DemuxFilterTsEvent,
    FilterSubEvent,
};
use crate::loopback::ts::{TsPacket, PES_START_CODE, SECTION_STUFFING};

#[derive(Debug)]
pub(crate) enum Framer {
    Section(SectionAssembler),
    Pes(PesAssembler),
    Ts,
}

impl Framer {
    pub(crate) fn for_settings(settings: &DemuxFilterSettings) -> Self {
        match settings {
            DemuxFilterSettings::Section(_) => Framer::Section(SectionAssembler::default()),
            DemuxFilterSettings::Pes(_) => Framer::Pes(PesAssembler::default()),
            DemuxFilterSettings::Ts(_) => Framer::Ts,
        }
    }

    /// Feeds one packet and returns every unit it completed.
    pub(crate) fn push(&mut self, packet: &TsPacket<'_>, raw: &[u8]) -> Vec<Vec<u8>> {
        let mut units = Vec::new();
        match self {
            Framer::Section(assembler) => {
                assembler.push(packet.payload_unit_start, packet.payload, &mut units)
            }
            Framer::Pes(assembler) => {
                assembler.push(packet.payload_unit_start, packet.payload, &mut units)
            }
            Framer::Ts => units.push(raw.to_vec()),
        }
        units
    }
}

#[derive(Debug, Default)]
pub(crate) struct SectionAssembler {
    buf: Vec<u8>,
    synced: bool,
}

impl SectionAssembler {
    fn push(&mut self, unit_start: bool, payload: &[u8], out: &mut Vec<Vec<u8>>) {
        if unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                return;
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                trace!("pointer field past payload end, resyncing");
                self.reset();
                return;
            }
            if self.synced {
                self.buf.extend_from_slice(&rest[..pointer]);
                self.drain(out);
            }
            self.buf.clear();
            self.synced = true;
            self.buf.extend_from_slice(&rest[pointer..]);
        } else if self.synced {
            self.buf.extend_from_slice(payload);
        } else {
            return;
        }
        self.drain(out);
    }

    fn drain(&mut self, out: &mut Vec<Vec<u8>>) {
        while let Some(&table_id) = self.buf.first() {
            if table_id == SECTION_STUFFING {
                self.reset();
                return;
            }
            if self.buf.len() < 3 {
                return;
            }
            let len = 3 + ((((self.buf[1] & 0x0f) as usize) << 8) | self.buf[2] as usize);
            if self.buf.len() < len {
                return;
            }
            out.push(self.buf.drain(..len).collect());
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.synced = false;
    }
}

#[derive(Debug, Default)]
pub(crate) struct PesAssembler {
    buf: Vec<u8>,
    synced: bool,
}

impl PesAssembler {
    fn push(&mut self, unit_start: bool, payload: &[u8], out: &mut Vec<Vec<u8>>) {
        if unit_start {
            // An unbounded packet ends where the next one starts.
            if self.synced && self.buf.len() >= 6 {
                out.push(std::mem::take(&mut self.buf));
            }
            self.buf.clear();
            self.synced = true;
        }
        if !self.synced {
            return;
        }
        self.buf.extend_from_slice(payload);
        if self.buf.len() < 6 {
            return;
        }
        if self.buf[..3] != PES_START_CODE {
            trace!("missing PES start code, resyncing");
            self.buf.clear();
            self.synced = false;
            return;
        }
        let declared = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
        if declared == 0 {
            return;
        }
        let total = 6 + declared;
        if self.buf.len() >= total {
            self.buf.truncate(total);
            out.push(std::mem::take(&mut self.buf));
            self.synced = false;
        }
    }
}

/// Largest unit whose length the filter event can carry.
pub(crate) fn max_unit_len(settings: &DemuxFilterSettings) -> usize {
    match settings {
        DemuxFilterSettings::Section(_) | DemuxFilterSettings::Pes(_) => u16::MAX as usize,
        DemuxFilterSettings::Ts(_) => u32::MAX as usize,
    }
}

/// Describes a completed unit the way the service reports it.
pub(crate) fn describe(settings: &DemuxFilterSettings, unit: &[u8]) -> Option<FilterSubEvent> {
    match settings {
        DemuxFilterSettings::Section(s) => {
            let table_id = unit[0];
            if s.table_id.is_some_and(|wanted| wanted != table_id) {
                return None;
            }
            let data_length = u16::try_from(unit.len()).ok()?;
            let long_form = unit[1] & 0x80 != 0 && unit.len() >= 8;
            Some(FilterSubEvent::Section(DemuxFilterSectionEvent {
                table_id: u16::from(table_id),
                version: if long_form { u16::from((unit[5] >> 1) & 0x1f) } else { 0 },
                section_num: if long_form { u16::from(unit[6]) } else { 0 },
                data_length,
            }))
        }
        DemuxFilterSettings::Pes(s) => {
            let stream_id = unit[3];
            if s.stream_id.is_some_and(|wanted| wanted != stream_id) {
                return None;
            }
            Some(FilterSubEvent::Pes(DemuxFilterPesEvent {
                stream_id,
                data_length: u16::try_from(unit.len()).ok()?,
                mpu_sequence_number: 0,
            }))
        }
        DemuxFilterSettings::Ts(s) => Some(FilterSubEvent::Ts(DemuxFilterTsEvent {
            tpid: s.tpid,
            data_length: unit.len() as u32,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DemuxPesSettings, DemuxSectionSettings, DemuxTsSettings};
    use crate::loopback::ts::{build_pes, build_section, parse_packet, Packetizer, TS_PACKET_SIZE};

    fn run(framer: &mut Framer, stream: &[u8]) -> Vec<Vec<u8>> {
        stream
            .chunks_exact(TS_PACKET_SIZE)
            .flat_map(|raw| {
                let packet = parse_packet(raw).unwrap();
                framer.push(&packet, raw)
            })
            .collect()
    }

    fn section_settings(table_id: Option<u8>) -> DemuxFilterSettings {
        DemuxFilterSettings::Section(DemuxSectionSettings {
            tpid: 0x100,
            table_id,
        })
    }

    #[test]
    fn section_spanning_packets_is_reassembled() {
        let section = build_section(0x42, &[0x5A; 500]);
        let mut packetizer = Packetizer::new(0x100);
        let stream = packetizer.section(&section);

        let mut framer = Framer::for_settings(&section_settings(None));
        assert_eq!(run(&mut framer, &stream), vec![section]);
    }

    #[test]
    fn consecutive_sections_each_emit_once() {
        let a = build_section(0x42, &[1; 10]);
        let b = build_section(0x43, &[2; 250]);
        let mut packetizer = Packetizer::new(0x100);
        let mut stream = packetizer.section(&a);
        stream.extend(packetizer.section(&b));

        let mut framer = Framer::for_settings(&section_settings(None));
        assert_eq!(run(&mut framer, &stream), vec![a, b]);
    }

    #[test]
    fn section_table_id_filter_drops_others() {
        let settings = section_settings(Some(0x42));
        assert!(describe(&settings, &build_section(0x43, &[0; 4])).is_none());
        let event = describe(&settings, &build_section(0x42, &[0; 4])).unwrap();
        assert_eq!(event.data_length(), 7);
    }

    #[test]
    fn bounded_pes_is_emitted_at_declared_length() {
        let pes = build_pes(0xE0, &[0x33; 400]);
        let mut packetizer = Packetizer::new(0x200);
        let stream = packetizer.pes(&pes);

        let settings = DemuxFilterSettings::Pes(DemuxPesSettings {
            tpid: 0x200,
            stream_id: None,
        });
        let mut framer = Framer::for_settings(&settings);
        let units = run(&mut framer, &stream);
        assert_eq!(units, vec![pes.clone()]);
        match describe(&settings, &units[0]).unwrap() {
            FilterSubEvent::Pes(event) => {
                assert_eq!(event.stream_id, 0xE0);
                assert_eq!(event.data_length as usize, pes.len());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ts_filter_passes_whole_packets() {
        let mut packetizer = Packetizer::new(0x300);
        let stream = packetizer.pes(&build_pes(0xC0, &[7; 300]));
        let mut framer = Framer::Ts;
        let units = run(&mut framer, &stream);
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|unit| unit.len() == TS_PACKET_SIZE));
        let settings = DemuxFilterSettings::Ts(DemuxTsSettings { tpid: 0x300 });
        assert_eq!(describe(&settings, &units[0]).unwrap().data_length(), TS_PACKET_SIZE);
    }

    #[test]
    fn continuation_without_unit_start_is_ignored() {
        let section = build_section(0x42, &[9; 300]);
        let mut packetizer = Packetizer::new(0x100);
        let stream = packetizer.section(&section);

        let mut framer = Framer::for_settings(&section_settings(None));
        assert!(run(&mut framer, &stream[TS_PACKET_SIZE..]).is_empty());
    }
}
