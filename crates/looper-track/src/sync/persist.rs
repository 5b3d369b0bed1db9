//! On-storage format of a loop slot's sync file.
//!
//! ```text
//! position[track_count]   u64 LE, playback position of each track at save time
//! { source: u8, target: u8, time: u64 LE }   repeated until EOF
//! ```

use super::arena::SyncPoint;

const WORD_BYTES: usize = std::mem::size_of::<u64>();
const RECORD_BYTES: usize = 2 + WORD_BYTES;

pub(crate) fn encode<'a>(
    positions: &[usize],
    points: impl Iterator<Item = &'a SyncPoint>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(positions.len() * WORD_BYTES);
    for &position in positions {
        out.extend_from_slice(&(position as u64).to_le_bytes());
    }
    for point in points {
        out.push(point.source as u8);
        out.push(point.target as u8);
        out.extend_from_slice(&(point.time as u64).to_le_bytes());
    }
    out
}

#[derive(Debug, Default)]
pub(crate) struct Decoded {
    /// `None` when the header itself was cut short.
    pub positions: Option<Vec<usize>>,
    pub points: Vec<SyncPoint>,
    /// Trailing bytes did not form a whole record.
    pub truncated: bool,
}

/// Parse as much of `bytes` as forms whole fields. Track indices are reduced
/// modulo `track_count`; every loaded point is permanent.
pub(crate) fn decode(bytes: &[u8], track_count: usize) -> Decoded {
    let track_count = track_count.max(1);
    let header = track_count * WORD_BYTES;
    if bytes.len() < header {
        return Decoded {
            truncated: !bytes.is_empty(),
            ..Default::default()
        };
    }

    let positions = bytes[..header]
        .chunks_exact(WORD_BYTES)
        .map(read_word)
        .collect();

    let records = bytes[header..].chunks_exact(RECORD_BYTES);
    let truncated = !records.remainder().is_empty();
    let points = records
        .map(|r| SyncPoint {
            source: r[0] as usize % track_count,
            target: r[1] as usize % track_count,
            time: read_word(&r[2..]),
            provisional: false,
        })
        .collect();

    Decoded {
        positions: Some(positions),
        points,
        truncated,
    }
}

fn read_word(bytes: &[u8]) -> usize {
    let mut word = [0u8; WORD_BYTES];
    word.copy_from_slice(&bytes[..WORD_BYTES]);
    u64::from_le_bytes(word) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(source: usize, target: usize, time: usize) -> SyncPoint {
        SyncPoint {
            source,
            target,
            time,
            provisional: false,
        }
    }

    #[test]
    fn test_layout() {
        let points = [point(1, 0, 95)];
        let bytes = encode(&[3, 4], points.iter());
        assert_eq!(bytes.len(), 2 * 8 + 10);
        assert_eq!(&bytes[..8], &3u64.to_le_bytes());
        assert_eq!(bytes[16], 1);
        assert_eq!(bytes[17], 0);
        assert_eq!(&bytes[18..], &95u64.to_le_bytes());
    }

    #[test]
    fn test_decode_reduces_indices_and_marks_permanent() {
        let provisional = SyncPoint {
            provisional: true,
            ..point(5, 6, 12)
        };
        let bytes = encode(&[0, 0, 0, 0], [provisional].iter());
        let decoded = decode(&bytes, 4);
        assert_eq!(decoded.points, vec![point(1, 2, 12)]);
        assert!(!decoded.truncated);
    }

    #[test]
    fn test_truncated_record_keeps_earlier_points() {
        let points = [point(0, 1, 5), point(0, 1, 105)];
        let mut bytes = encode(&[7, 9], points.iter());
        bytes.truncate(bytes.len() - 3);

        let decoded = decode(&bytes, 2);
        assert_eq!(decoded.positions, Some(vec![7, 9]));
        assert_eq!(decoded.points, vec![point(0, 1, 5)]);
        assert!(decoded.truncated);
    }

    #[test]
    fn test_truncated_header() {
        let decoded = decode(&[1, 2, 3], 4);
        assert!(decoded.positions.is_none());
        assert!(decoded.points.is_empty());
        assert!(decoded.truncated);

        let empty = decode(&[], 4);
        assert!(empty.positions.is_none());
        assert!(!empty.truncated);
    }
}
