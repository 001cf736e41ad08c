//! Script file table.
//!
//! Maps the small file numbers scripts use (`#1`) to host-registered
//! line sinks. The implementations of the file statements (`Open`,
//! `Get`, `Put`, ...) are host special commands; the core only needs the
//! table itself, the file-number range check, and line output for
//! `Print #fd`.

use std::io::Write;

use crate::error::Error;

/// Highest permitted file number.
pub const MAX_FILES: usize = 100;

/// Open file slots of a world.
#[derive(Default)]
pub struct FileTable {
    slots: Vec<Option<Box<dyn Write>>>,
}

impl FileTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a script file number.
    pub fn check_file_number(fd: i32) -> Result<usize, Error> {
        usize::try_from(fd)
            .ok()
            .filter(|&fd| fd <= MAX_FILES)
            .ok_or_else(Error::range_error)
    }

    /// Attaches a sink to a file number.
    pub fn open(&mut self, fd: i32, sink: Box<dyn Write>) -> Result<(), Error> {
        let fd = Self::check_file_number(fd)?;
        if self.slots.len() <= fd {
            self.slots.resize_with(fd + 1, || None);
        }
        self.slots[fd] = Some(sink);
        Ok(())
    }

    /// Detaches the sink of a file number.
    pub fn close(&mut self, fd: i32) -> Result<(), Error> {
        let fd = Self::check_file_number(fd)?;
        match self.slots.get_mut(fd).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(Error::new(format!("File not open: #{fd}"))),
        }
    }

    /// Writes one line to an open file.
    pub fn write_line(&mut self, fd: i32, line: &str) -> Result<(), Error> {
        let fd = Self::check_file_number(fd)?;
        let sink = self
            .slots
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::new(format!("File not open: #{fd}")))?;
        writeln!(sink, "{line}").map_err(|e| Error::new(format!("Write error: {e}")))
    }
}

impl std::fmt::Debug for FileTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect();
        f.debug_struct("FileTable").field("open", &open).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    /// Test sink sharing its buffer with the test body.
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_open_write_close() {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let mut table = FileTable::new();
        table.open(3, Box::new(SharedSink(Rc::clone(&buffer)))).unwrap();
        table.write_line(3, "hello").unwrap();
        table.close(3).unwrap();
        assert!(table.write_line(3, "x").is_err());
        assert_eq!(*buffer.borrow(), b"hello\n");
    }

    #[test]
    fn test_file_number_range() {
        assert!(FileTable::check_file_number(-1).is_err());
        assert!(FileTable::check_file_number(0).is_ok());
        assert!(FileTable::check_file_number(100).is_ok());
        assert!(FileTable::check_file_number(101).is_err());
    }
}
