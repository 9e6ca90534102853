//! MPEG transport stream packets: parsing for the loopback demux and a
//! packetizer for building input fixtures.

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
pub const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - 4;

/// Table id reserved for stuffing; a section starting with it ends the
/// sections carried in the current payload.
pub const SECTION_STUFFING: u8 = 0xFF;
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TsPacket<'a> {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub continuity: u8,
    pub payload: &'a [u8],
}

/// Parses one transport packet. Returns `None` for packets that are not
/// 188 bytes, lose sync, or use the reserved adaptation field control.
pub fn parse_packet(packet: &[u8]) -> Option<TsPacket<'_>> {
    if packet.len() != TS_PACKET_SIZE || packet[0] != TS_SYNC_BYTE {
        return None;
    }
    let payload_unit_start = packet[1] & 0x40 != 0;
    let pid = (u16::from(packet[1] & 0x1f) << 8) | u16::from(packet[2]);
    let adaptation_control = (packet[3] >> 4) & 0x3;
    let continuity = packet[3] & 0x0f;
    let payload = match adaptation_control {
        0b01 => &packet[4..],
        0b10 => &packet[TS_PACKET_SIZE..],
        0b11 => {
            let start = 5 + packet[4] as usize;
            if start > TS_PACKET_SIZE {
                return None;
            }
            &packet[start..]
        }
        _ => return None,
    };
    Some(TsPacket {
        pid,
        payload_unit_start,
        continuity,
        payload,
    })
}

/// A packet on the null PID, ignored by every filter.
pub fn null_packet() -> [u8; TS_PACKET_SIZE] {
    let mut packet = [0xFF; TS_PACKET_SIZE];
    packet[..4].copy_from_slice(&[TS_SYNC_BYTE, 0x1F, 0xFF, 0x10]);
    packet
}

/// Builds a short-form section (no syntax header) around `body`.
pub fn build_section(table_id: u8, body: &[u8]) -> Vec<u8> {
    assert!(body.len() <= 0x0FFD, "section body too long");
    let len = body.len();
    let mut section = Vec::with_capacity(3 + len);
    section.push(table_id);
    section.push(0x30 | ((len >> 8) as u8 & 0x0f));
    section.push(len as u8);
    section.extend_from_slice(body);
    section
}

/// Builds a PES packet with an explicit length around `body`.
pub fn build_pes(stream_id: u8, body: &[u8]) -> Vec<u8> {
    assert!(body.len() <= u16::MAX as usize, "PES body too long");
    let mut pes = Vec::with_capacity(6 + body.len());
    pes.extend_from_slice(&PES_START_CODE);
    pes.push(stream_id);
    pes.extend_from_slice(&(body.len() as u16).to_be_bytes());
    pes.extend_from_slice(body);
    pes
}

/// Splits units into transport packets on one PID, padding the last packet
/// of each unit with adaptation-field stuffing.
#[derive(Debug)]
pub struct Packetizer {
    pid: u16,
    continuity: u8,
}

impl Packetizer {
    pub fn new(pid: u16) -> Self {
        Self { pid, continuity: 0 }
    }

    /// Packetizes a section, prefixed by a zero pointer field.
    pub fn section(&mut self, section: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(section.len() + 1);
        data.push(0);
        data.extend_from_slice(section);
        self.packetize(&data)
    }

    pub fn pes(&mut self, pes: &[u8]) -> Vec<u8> {
        self.packetize(pes)
    }

    fn packetize(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len().div_ceil(TS_PAYLOAD_SIZE) * TS_PACKET_SIZE);
        for (index, chunk) in data.chunks(TS_PAYLOAD_SIZE).enumerate() {
            let mut packet = [0u8; TS_PACKET_SIZE];
            packet[0] = TS_SYNC_BYTE;
            packet[1] = ((self.pid >> 8) as u8) & 0x1f;
            if index == 0 {
                packet[1] |= 0x40;
            }
            packet[2] = self.pid as u8;
            if chunk.len() == TS_PAYLOAD_SIZE {
                packet[3] = 0x10 | self.continuity;
                packet[4..].copy_from_slice(chunk);
            } else {
                let field_len = TS_PAYLOAD_SIZE - 1 - chunk.len();
                packet[3] = 0x30 | self.continuity;
                packet[4] = field_len as u8;
                if field_len > 0 {
                    packet[5] = 0x00;
                    packet[6..5 + field_len].fill(0xFF);
                }
                packet[5 + field_len..].copy_from_slice(chunk);
            }
            self.continuity = (self.continuity + 1) & 0x0f;
            out.extend_from_slice(&packet);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packetized_section_parses_back() {
        let section = build_section(0x42, &[0xAB; 300]);
        let mut packetizer = Packetizer::new(0x100);
        let stream = packetizer.section(&section);
        assert_eq!(stream.len(), 2 * TS_PACKET_SIZE);

        let first = parse_packet(&stream[..TS_PACKET_SIZE]).unwrap();
        assert_eq!(first.pid, 0x100);
        assert!(first.payload_unit_start);
        assert_eq!(first.payload.len(), TS_PAYLOAD_SIZE);
        assert_eq!(first.payload[0], 0, "pointer field");

        let second = parse_packet(&stream[TS_PACKET_SIZE..]).unwrap();
        assert!(!second.payload_unit_start);
        assert_eq!(second.continuity, 1);
        let carried = first.payload.len() - 1 + second.payload.len();
        assert_eq!(carried, section.len());
    }

    #[test]
    fn payload_of_exactly_one_byte_short_uses_empty_adaptation_field() {
        let mut packetizer = Packetizer::new(0x21);
        let stream = packetizer.pes(&[0x11; TS_PAYLOAD_SIZE - 1]);
        let packet = parse_packet(&stream).unwrap();
        assert_eq!(stream[4], 0);
        assert_eq!(packet.payload.len(), TS_PAYLOAD_SIZE - 1);
    }

    #[test]
    fn rejects_lost_sync() {
        let mut packet = [0u8; TS_PACKET_SIZE];
        packet[0] = 0x48;
        assert!(parse_packet(&packet).is_none());
        assert!(parse_packet(&[TS_SYNC_BYTE; 10]).is_none());
    }

    #[test]
    fn builders_encode_lengths() {
        let section = build_section(0x42, &[1, 2, 3]);
        assert_eq!(section, vec![0x42, 0x30, 0x03, 1, 2, 3]);
        let pes = build_pes(0xE0, &[9; 4]);
        assert_eq!(&pes[..6], &[0x00, 0x00, 0x01, 0xE0, 0x00, 0x04]);
    }
}
