use byteorder::{BigEndian, ByteOrder};

/// A single 12-byte (timestamp, value) record.
///
/// `timestamp == 0` means "unwritten" when the point occupies the base slot
/// of an archive (offset 0 relative to the archive); anywhere else a zero
/// timestamp marks a stale slot that must be treated as null on read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: u32,
    pub value: f64,
}

pub const POINT_SIZE: usize = 12;

impl Point {
    pub fn new(timestamp: u32, value: f64) -> Self {
        Point { timestamp, value }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), POINT_SIZE);
        BigEndian::write_u32(&mut buf[0..4], self.timestamp);
        BigEndian::write_f64(&mut buf[4..12], self.value);
    }

    pub fn decode(buf: &[u8]) -> Point {
        debug_assert_eq!(buf.len(), POINT_SIZE);
        Point {
            timestamp: BigEndian::read_u32(&buf[0..4]),
            value: BigEndian::read_f64(&buf[4..12]),
        }
    }
}

/// Packs points into a contiguous big-endian byte buffer.
pub fn pack_points(points: &[Point]) -> Vec<u8> {
    let mut buf = vec![0u8; points.len() * POINT_SIZE];
    for (i, point) in points.iter().enumerate() {
        point.encode(&mut buf[i * POINT_SIZE..(i + 1) * POINT_SIZE]);
    }
    buf
}

/// Decodes a contiguous byte buffer into points. `bytes.len()` must be a
/// multiple of [`POINT_SIZE`]; callers that read directly off disk enforce
/// this by construction (archive reads always request whole points).
pub fn unpack_points(bytes: &[u8]) -> Vec<Point> {
    bytes.chunks_exact(POINT_SIZE).map(Point::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let p = Point::new(1_440_392_088, 3.5);
        let mut buf = [0u8; POINT_SIZE];
        p.encode(&mut buf);
        assert_eq!(Point::decode(&buf), p);
    }

    #[test]
    fn packs_and_unpacks_a_run() {
        let points = vec![Point::new(10, 1.0), Point::new(20, 2.0), Point::new(30, 3.0)];
        let bytes = pack_points(&points);
        assert_eq!(bytes.len(), points.len() * POINT_SIZE);
        assert_eq!(unpack_points(&bytes), points);
    }
}
