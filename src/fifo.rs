//! Message FIFOs (§6): each subsystem owns a full-duplex pipe pair. Every
//! outgoing line is `code:text\n`, `code` negative for failure, zero for
//! terminal success, positive for progress.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One line of the outgoing wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub code: i32,
    pub text: String,
}

impl StatusLine {
    pub fn progress(text: impl Into<String>) -> Self {
        StatusLine { code: 1, text: text.into() }
    }

    pub fn success(text: impl Into<String>) -> Self {
        StatusLine { code: 0, text: text.into() }
    }

    pub fn failure(code: i32, text: impl Into<String>) -> Self {
        debug_assert!(code < 0, "failure codes must be negative");
        StatusLine { code, text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        self.code <= 0
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.code, self.text)
    }
}

/// A named pipe pair: an incoming command fifo and an outgoing status
/// fifo. Created with `mkfifo` if missing (Unix only, per §6).
pub struct MessageFifo {
    in_path: PathBuf,
    out_path: PathBuf,
    out_file: Option<File>,
}

impl MessageFifo {
    /// Ensures both fifos exist at the given paths, creating them with
    /// `mkfifo` if needed.
    pub fn open(in_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let in_path = in_path.as_ref().to_path_buf();
        let out_path = out_path.as_ref().to_path_buf();

        #[cfg(unix)]
        {
            for path in [&in_path, &out_path] {
                if !path.exists() {
                    nix::unistd::mkfifo(path.as_path(), nix::sys::stat::Mode::from_bits_truncate(0o600))
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                }
            }
        }

        Ok(MessageFifo {
            in_path,
            out_path,
            out_file: None,
        })
    }

    /// Blocks until a command line is available on the incoming fifo, or
    /// returns `Ok(None)` at EOF (writer closed its end).
    pub fn read_command(&self) -> std::io::Result<Option<String>> {
        let file = File::open(&self.in_path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches('\n').to_string()))
    }

    /// Writes one status line, opening the outgoing fifo for write on
    /// first use and keeping it open across calls.
    pub fn write_status(&mut self, line: &StatusLine) -> std::io::Result<()> {
        if self.out_file.is_none() {
            self.out_file = Some(OpenOptions::new().write(true).open(&self.out_path)?);
        }
        let file = self.out_file.as_mut().expect("just opened above");
        writeln!(file, "{}", line)?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_formats_as_code_colon_text() {
        let line = StatusLine::failure(-1, "Error: HA hits negative limit");
        assert_eq!(line.to_string(), "-1:Error: HA hits negative limit");
        assert!(line.is_terminal());
    }

    #[test]
    fn progress_line_is_not_terminal() {
        let line = StatusLine::progress("slewing");
        assert_eq!(line.code, 1);
        assert!(!line.is_terminal());
    }

    #[test]
    fn success_line_is_terminal_with_code_zero() {
        let line = StatusLine::success("done");
        assert!(line.is_terminal());
        assert_eq!(line.to_string(), "0:done");
    }
}
