//! Program output.
//!
//! The dump, the dry-run plan and the sync summary are output rather than
//! diagnostics. When the dump is written to stdout it owns that stream, and
//! the plan and summary move to stderr so the dump stays importable.

use std::fmt::Display;
use std::io::{self, Stderr, Stdout, Write};

use crate::error::Result;
use crate::export::DumpTarget;

pub struct Console<O, E> {
    out: O,
    err: E,
    dump_on_out: bool,
}

impl Console<Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Console<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            dump_on_out: false,
        }
    }

    /// Write the dump. Reports written afterwards avoid the stream it used.
    pub fn dump(&mut self, target: &DumpTarget<'_>, bytes: &[u8]) -> Result<()> {
        target.write_to(&mut self.out, bytes)?;
        self.dump_on_out |= target.is_stdout();
        self.out.flush()?;
        Ok(())
    }

    /// Write a plan or summary.
    pub fn report(&mut self, text: impl Display) -> io::Result<()> {
        let stream: &mut dyn Write = if self.dump_on_out {
            &mut self.err
        } else {
            &mut self.out
        };
        write!(stream, "{}", text)?;
        stream.flush()
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_uses_stdout_without_dump() {
        let mut console = Console::new(Vec::new(), Vec::new());
        console.report("Summary\n").unwrap();
        let (out, err) = console.into_inner();
        assert_eq!(out, b"Summary\n");
        assert!(err.is_empty());
    }

    #[test]
    fn test_report_moves_to_stderr_after_stdout_dump() {
        let mut console = Console::new(Vec::new(), Vec::new());
        console.dump(&DumpTarget::default(), b"[]\n").unwrap();
        console.report("Summary\n").unwrap();
        let (out, err) = console.into_inner();
        assert_eq!(out, b"[]\n");
        assert_eq!(err, b"Summary\n");
    }

    #[test]
    fn test_file_dump_leaves_stdout_for_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let mut console = Console::new(Vec::new(), Vec::new());
        console
            .dump(&DumpTarget { output: Some(&path), gzip: false }, b"[]\n")
            .unwrap();
        console.report("Summary\n").unwrap();
        let (out, err) = console.into_inner();
        assert_eq!(out, b"Summary\n");
        assert!(err.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"[]\n");
    }
}
