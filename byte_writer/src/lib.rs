//! Little-endian emission buffer shared by the .bsp, .lit and .lux writers.
//!
//! Lump directories are written as zero padding first and patched back with
//! `replace_with_*` once the lump payloads have landed.

pub struct ByteWriter {
    pub data: Vec<u8>,
    offset: usize,
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            offset: 0,
        }
    }

    fn offset(&mut self, offset: usize) {
        self.offset += offset;
    }

    pub fn get_offset(&self) -> usize {
        self.offset
    }

    pub fn append_u8(&mut self, i: u8) {
        self.data.extend(i.to_le_bytes());
        self.offset(1);
    }

    pub fn append_i8(&mut self, i: i8) {
        self.data.extend(i.to_le_bytes());
        self.offset(1);
    }

    pub fn append_u16(&mut self, i: u16) {
        self.data.extend(i.to_le_bytes());
        self.offset(2);
    }

    pub fn append_i16(&mut self, i: i16) {
        self.data.extend(i.to_le_bytes());
        self.offset(2);
    }

    pub fn append_u32(&mut self, i: u32) {
        self.data.extend(i.to_le_bytes());
        self.offset(4);
    }

    pub fn append_i32(&mut self, i: i32) {
        self.data.extend(i.to_le_bytes());
        self.offset(4);
    }

    pub fn append_f32(&mut self, i: f32) {
        self.data.extend(i.to_le_bytes());
        self.offset(4);
    }

    pub fn append_u8_slice(&mut self, i: &[u8]) {
        self.data.extend_from_slice(i);
        self.offset(i.len());
    }

    pub fn append_u16_slice(&mut self, i: &[u16]) {
        for &v in i {
            self.append_u16(v);
        }
    }

    pub fn append_i16_slice(&mut self, i: &[i16]) {
        for &v in i {
            self.append_i16(v);
        }
    }

    pub fn append_i32_slice(&mut self, i: &[i32]) {
        for &v in i {
            self.append_i32(v);
        }
    }

    pub fn append_f32_slice(&mut self, i: &[f32]) {
        for &v in i {
            self.append_f32(v);
        }
    }

    /// The string is written as-is, no trailing null.
    pub fn append_string(&mut self, s: &str) {
        self.data.extend(s.as_bytes());
        self.offset(s.len())
    }

    /// Fixed-size name field, null-padded. `s` longer than `len` is truncated.
    pub fn append_fixed_string(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(len);
        self.append_u8_slice(&bytes[..n]);
        for _ in n..len {
            self.append_u8(0);
        }
    }

    /// Lumps are 4-byte aligned on disk.
    pub fn pad_to_4(&mut self) {
        while self.offset % 4 != 0 {
            self.append_u8(0);
        }
    }

    pub fn replace(&mut self, start: usize, length: usize, slice: &[u8]) {
        self.data[start..(length + start)].copy_from_slice(&slice[..length]);
    }

    pub fn replace_with_u32(&mut self, start: usize, val: u32) {
        let bytes = val.to_le_bytes();
        self.replace(start, 4, &bytes);
    }

    pub fn replace_with_i32(&mut self, start: usize, val: i32) {
        let bytes = val.to_le_bytes();
        self.replace(start, 4, &bytes);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn patch_back() {
        let mut w = ByteWriter::new();
        w.append_i32(0);
        w.append_u16(0xabcd);
        w.replace_with_i32(0, -1);

        assert_eq!(w.data, vec![0xff, 0xff, 0xff, 0xff, 0xcd, 0xab]);
        assert_eq!(w.get_offset(), 6);
    }

    #[test]
    fn pad() {
        let mut w = ByteWriter::new();
        w.append_u8(7);
        w.pad_to_4();
        assert_eq!(w.data.len(), 4);

        w.pad_to_4();
        assert_eq!(w.data.len(), 4);
    }

    #[test]
    fn fixed_string() {
        let mut w = ByteWriter::new();
        w.append_fixed_string("sky4", 16);
        assert_eq!(w.data.len(), 16);
        assert_eq!(&w.data[..5], b"sky4\0");
    }
}
