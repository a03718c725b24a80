//! # Memory View
//!
//! A `std::io` cursor over a fixed raw byte window, used to run the
//! serializers directly against pool-owned memory. Reads truncate at the
//! end of the window; writes that do not fit fail without partial effect.
//!
//! `SeekFrom::End(n)` resolves to `len + n`, the conventional meaning.
//! Resolved positions are clamped into `[0, len]`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ptr::NonNull;

pub struct MemoryView {
    buffer: NonNull<u8>,
    len: usize,
    position: usize,
}

impl MemoryView {
    /// Wraps `len` bytes starting at `buffer`.
    ///
    /// # Safety
    /// `buffer` must address `len` readable and writable bytes that remain
    /// valid (and unaliased by safe references) for the view's lifetime.
    pub unsafe fn new(buffer: NonNull<u8>, len: usize) -> Self {
        Self { buffer, len, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn remaining(&self) -> usize {
        self.len - self.position
    }
}

impl Read for MemoryView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.remaining());
        if count > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.buffer.as_ptr().add(self.position),
                    buf.as_mut_ptr(),
                    count,
                );
            }
            self.position += count;
        }
        Ok(count)
    }
}

impl Write for MemoryView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("insufficient space to write {} bytes", buf.len()),
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                buf.as_ptr(),
                self.buffer.as_ptr().add(self.position),
                buf.len(),
            );
        }
        self.position += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryView {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.len as i128 + delta as i128,
        };
        self.position = target.clamp(0, self.len as i128) as usize;
        Ok(self.position as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_over(data: &mut [u8]) -> MemoryView {
        unsafe { MemoryView::new(NonNull::new(data.as_mut_ptr()).unwrap(), data.len()) }
    }

    #[test]
    fn test_read_truncates_at_end() {
        let mut data = [1u8, 2, 3];
        let mut view = view_over(&mut data);
        let mut out = [0u8; 8];
        assert_eq!(view.read(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(view.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_write_rejects_overflow_without_partial_effect() {
        let mut data = [0u8; 4];
        let mut view = view_over(&mut data);
        view.write_all(&[9, 9]).unwrap();
        assert!(view.write_all(&[1, 2, 3]).is_err());
        assert_eq!(view.position(), 2);
        assert_eq!(data, [9, 9, 0, 0]);
    }

    #[test]
    fn test_seek_conventional_end_and_clamping() {
        let mut data = [0u8; 10];
        let mut view = view_over(&mut data);

        assert_eq!(view.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(view.seek(SeekFrom::Current(-2)).unwrap(), 5);
        assert_eq!(view.seek(SeekFrom::Start(4)).unwrap(), 4);

        // Out-of-range positions clamp to the window.
        assert_eq!(view.seek(SeekFrom::Current(-100)).unwrap(), 0);
        assert_eq!(view.seek(SeekFrom::End(100)).unwrap(), 10);
    }

    #[test]
    fn test_roundtrip_through_io_traits() {
        let mut data = [0u8; 6];
        {
            let mut view = view_over(&mut data);
            view.write_all(b"abc").unwrap();
            view.seek(SeekFrom::Start(0)).unwrap();
            let mut out = [0u8; 3];
            view.read_exact(&mut out).unwrap();
            assert_eq!(&out, b"abc");
        }
    }
}
