use bytes::Bytes;

use crate::error::EngineError;

/// The byte pattern every connection streams, treated as an endless
/// repetition of itself.
#[derive(Debug, Clone)]
pub struct Payload {
    data: Bytes,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Result<Self, EngineError> {
        let data = data.into();
        if data.is_empty() {
            return Err(EngineError::EmptyPayload);
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Largest slice a single write can take starting at `offset`.
    ///
    /// The slice always ends at the physical end of the pattern. An offset
    /// sitting on a lap boundary is rewound to zero, so the caller's cursor
    /// never exceeds the pattern length.
    pub fn largest_contiguous_chunk(&self, offset: &mut usize) -> &[u8] {
        let size = self.len();
        if *offset >= size {
            *offset %= size;
        }
        &self.data[*offset..]
    }
}

#[cfg(test)]
mod tests {
    use super::Payload;
    use crate::error::EngineError;

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            Payload::new(Vec::new()),
            Err(EngineError::EmptyPayload)
        ));
    }

    #[test]
    fn chunk_runs_to_physical_end() {
        let payload = Payload::new("abc").unwrap();

        let mut offset = 0;
        assert_eq!(payload.largest_contiguous_chunk(&mut offset), b"abc");
        assert_eq!(offset, 0);

        let mut offset = 1;
        assert_eq!(payload.largest_contiguous_chunk(&mut offset), b"bc");
        assert_eq!(offset, 1);

        let mut offset = 2;
        assert_eq!(payload.largest_contiguous_chunk(&mut offset), b"c");
        assert_eq!(offset, 2);
    }

    #[test]
    fn completed_lap_rewinds_to_start() {
        let payload = Payload::new("abc").unwrap();
        let mut offset = 3;
        assert_eq!(payload.largest_contiguous_chunk(&mut offset), b"abc");
        assert_eq!(offset, 0);
    }

    #[test]
    fn single_byte_writes_cycle_through_pattern() {
        let payload = Payload::new("abc").unwrap();
        let mut offset = 0;
        let mut seen = Vec::new();
        for _ in 0..7 {
            let chunk = payload.largest_contiguous_chunk(&mut offset);
            seen.push((offset, chunk[0]));
            offset += 1;
        }
        assert_eq!(
            seen,
            vec![
                (0, b'a'),
                (1, b'b'),
                (2, b'c'),
                (0, b'a'),
                (1, b'b'),
                (2, b'c'),
                (0, b'a'),
            ]
        );
    }

    #[test]
    fn chunks_stay_bounded_and_revisit_zero() {
        for len in 1..=16usize {
            let payload = Payload::new(vec![7u8; len]).unwrap();
            for start in 0..=len {
                let mut offset = start;
                let mut revisited = false;
                for _ in 0..=len {
                    let available = payload.largest_contiguous_chunk(&mut offset).len();
                    assert!(available >= 1 && available <= len);
                    assert!(offset < len);
                    if offset == 0 && start != 0 {
                        revisited = true;
                    }
                    offset += available;
                }
                assert!(start == 0 || revisited, "len={len} start={start}");
            }
        }
    }
}
