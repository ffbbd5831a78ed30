use std::io;

// Compact once the dead prefix grows past this.
const COMPACT_THRESHOLD: usize = 65536;

/// A buffered FIFO byte queue for non-blocking socket I/O. Data is appended
/// at the tail and consumed from the head.
pub struct Buffer {
    data: Vec<u8>,
    head: usize,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: Vec::new(),
            head: 0,
        }
    }

    /// The number of pending bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slice containing the pending data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Advances the head past consumed bytes.
    #[inline]
    pub fn move_head(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.head += count;
        if self.head >= COMPACT_THRESHOLD || self.head == self.data.len() {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }

    /// Appends bytes at the tail.
    #[inline]
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Reads once from the supplied reader into the buffer. Returns the
    /// number of bytes read; zero means the peer closed the stream.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; 65536];
        let read_count = reader.read(&mut chunk)?;
        self.data.extend_from_slice(&chunk[..read_count]);
        Ok(read_count)
    }

    /// Writes pending data to the supplied writer until it is drained or the
    /// writer would block, advancing the head past what was accepted.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.is_empty() {
            let count = writer.write(self.read_slice())?;
            if count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.move_head(count);
            written += count;
        }
        Ok(written)
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_consume() {
        let mut buffer = Buffer::new();
        assert!(buffer.is_empty());

        buffer.push(b"hello ");
        buffer.push(b"world");
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.read_slice(), b"hello world");

        buffer.move_head(6);
        assert_eq!(buffer.read_slice(), b"world");
        buffer.move_head(5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ingress_egress() {
        let mut buffer = Buffer::new();
        let mut source: &[u8] = b"0123456789";
        let read = buffer.ingress(&mut source).unwrap();
        assert_eq!(read, 10);

        let mut sink = Vec::new();
        let written = buffer.egress(&mut sink).unwrap();
        assert_eq!(written, 10);
        assert_eq!(sink, b"0123456789");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_compaction_resets_head() {
        let mut buffer = Buffer::new();
        buffer.push(&[0xaa; COMPACT_THRESHOLD + 16]);
        buffer.move_head(COMPACT_THRESHOLD);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.read_slice(), &[0xaa; 16][..]);
    }
}
