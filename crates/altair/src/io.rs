//! Output sinks.
//!
//! The interpreter core performs no ambient I/O of its own; everything a
//! script prints and every error the world logs goes through a
//! `PrintWriter` the host supplies. The default writes to the process
//! standard streams; tests install a collecting sink.

use std::{cell::RefCell, rc::Rc};

/// Sink for script output and interpreter diagnostics.
pub trait PrintWriter {
    /// One line produced by `Print`.
    fn print_line(&mut self, line: &str);

    /// One diagnostic line: logged errors, warnings, traces.
    fn trace_line(&mut self, line: &str);
}

/// Default sink: `Print` goes to stdout, diagnostics to stderr.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print_line(&mut self, line: &str) {
        println!("{line}");
    }

    fn trace_line(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

/// Sink that collects everything into shared buffers, for tests and
/// embedders that capture output.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    output: Rc<RefCell<Vec<String>>>,
    trace: Rc<RefCell<Vec<String>>>,
}

impl CollectStringPrint {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the collected `Print` lines.
    #[must_use]
    pub fn output(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.output)
    }

    /// Shared handle to the collected diagnostic lines.
    #[must_use]
    pub fn trace(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.trace)
    }
}

impl PrintWriter for CollectStringPrint {
    fn print_line(&mut self, line: &str) {
        self.output.borrow_mut().push(line.to_owned());
    }

    fn trace_line(&mut self, line: &str) {
        self.trace.borrow_mut().push(line.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector() {
        let mut sink = CollectStringPrint::new();
        let output = sink.output();
        sink.print_line("hello");
        sink.trace_line("oops");
        assert_eq!(*output.borrow(), ["hello"]);
        assert_eq!(*sink.trace().borrow(), ["oops"]);
    }
}
