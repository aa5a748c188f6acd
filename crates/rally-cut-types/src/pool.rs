/// Recycles equally sized pixel buffers so long videos do not churn the allocator.
#[derive(Debug)]
pub struct BufferPool {
    buffer_len: usize,
    max_free: usize,
    free: Vec<Vec<u8>>,
}

impl BufferPool {
    pub fn new(buffer_len: usize, max_free: usize) -> Self {
        Self {
            buffer_len,
            max_free,
            free: Vec::new(),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Hands out a buffer of exactly `buffer_len` bytes.
    /// Contents of a recycled buffer are unspecified.
    pub fn acquire(&mut self) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buffer) => {
                buffer.resize(self.buffer_len, 0);
                buffer
            }
            None => vec![0; self.buffer_len],
        }
    }

    pub fn release(&mut self, buffer: Vec<u8>) {
        if buffer.capacity() >= self.buffer_len && self.free.len() < self.max_free {
            self.free.push(buffer);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
