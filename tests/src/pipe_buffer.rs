//! Pipe buffer semantics: bounded capacity, head reads, shift-down.

#[cfg(test)]
mod tests {
    const CAPACITY: usize = 4096;

    struct PipeModel {
        data: Vec<u8>,
    }

    impl PipeModel {
        fn new() -> Self {
            Self { data: Vec::new() }
        }

        fn write(&mut self, src: &[u8]) -> Result<usize, ()> {
            if src.len() > CAPACITY {
                // Whole-or-nothing: oversized writes are invalid, not split.
                return Err(());
            }
            if self.data.len() + src.len() > CAPACITY {
                // Would block in the kernel; the model just refuses.
                return Err(());
            }
            self.data.extend_from_slice(src);
            Ok(src.len())
        }

        fn read(&mut self, count: usize) -> Vec<u8> {
            let take = count.min(self.data.len());
            self.data.drain(..take).collect()
        }
    }

    #[test]
    fn reads_drain_from_the_head() {
        let mut pipe = PipeModel::new();
        pipe.write(b"abcde").unwrap();
        assert_eq!(pipe.read(3), b"abc");
        pipe.write(b"fg").unwrap();
        assert_eq!(pipe.read(4), b"defg");
    }

    #[test]
    fn short_read_when_less_is_buffered() {
        let mut pipe = PipeModel::new();
        pipe.write(b"xy").unwrap();
        assert_eq!(pipe.read(10), b"xy");
        assert!(pipe.read(1).is_empty());
    }

    #[test]
    fn capacity_is_a_hard_bound_per_write() {
        let mut pipe = PipeModel::new();
        assert!(pipe.write(&vec![0; CAPACITY + 1]).is_err());
        assert_eq!(pipe.write(&vec![0; CAPACITY]).unwrap(), CAPACITY);
        assert!(pipe.write(b"x").is_err());
        pipe.read(1);
        assert_eq!(pipe.write(b"x").unwrap(), 1);
    }
}
