//! Length-prefixed big-endian wire format helpers, shared by `Communicator`
//! messages and `SharedHash` batch updates.
//!
//! Ported from `original_source/src/shared/BinarySerializer.{hh,cc}`.

pub struct BinarySerializer {
    buffer: Vec<u8>,
}

impl BinarySerializer {
    pub fn with_capacity(size: usize) -> Self {
        BinarySerializer {
            buffer: Vec::with_capacity(size),
        }
    }

    pub fn append_i64(&mut self, num: i64) {
        self.buffer.extend_from_slice(&num.to_be_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Append a byte string prefixed with its length, so a deserializer can
    /// tell where it ends without a separator.
    pub fn append_string(&mut self, s: &[u8]) {
        self.append_i64(s.len() as i64);
        self.append_bytes(s);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

pub struct BinaryDeserializer<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> BinaryDeserializer<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        BinaryDeserializer { source, position: 0 }
    }

    fn can_consume(&self, n: usize) -> bool {
        self.source.len() - self.position >= n
    }

    pub fn consume_i64(&mut self) -> Option<i64> {
        if !self.can_consume(8) {
            return None;
        }
        let bytes: [u8; 8] = self.source[self.position..self.position + 8]
            .try_into()
            .unwrap();
        self.position += 8;
        Some(i64::from_be_bytes(bytes))
    }

    pub fn consume_raw_bytes(&mut self, size: usize) -> Option<Vec<u8>> {
        if !self.can_consume(size) {
            return None;
        }
        let bytes = self.source[self.position..self.position + size].to_vec();
        self.position += size;
        Some(bytes)
    }

    pub fn consume_string(&mut self) -> Option<Vec<u8>> {
        let size = self.consume_i64()?;
        if size < 0 {
            return None;
        }
        self.consume_raw_bytes(size as usize)
    }

    pub fn bytes_left(&self) -> usize {
        self.source.len() - self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_fields() {
        let mut ser = BinarySerializer::with_capacity(64);
        ser.append_i64(42);
        ser.append_string(b"hello");
        ser.append_string(b"");
        let bytes = ser.into_bytes();

        let mut de = BinaryDeserializer::new(&bytes);
        assert_eq!(de.consume_i64(), Some(42));
        assert_eq!(de.consume_string(), Some(b"hello".to_vec()));
        assert_eq!(de.consume_string(), Some(Vec::new()));
        assert_eq!(de.bytes_left(), 0);
    }

    #[test]
    fn truncated_buffer_fails_to_consume() {
        let mut de = BinaryDeserializer::new(&[0, 0, 0]);
        assert_eq!(de.consume_i64(), None);
    }
}
