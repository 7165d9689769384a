//! Terminal plumbing for attached invocations: detach-key scanning, raw
//! mode, and window-size queries.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::error::{Result, StevedoreError};

pub const DEFAULT_DETACH_KEYS: &str = "ctrl-p,ctrl-q";

/// Parses a detach-key sequence: comma-separated `ctrl-<key>` or single
/// printable characters.
pub fn parse_detach_keys(flag: &str) -> Result<Vec<u8>> {
    let invalid = || StevedoreError::InvalidInput(format!("invalid detach keys: {flag}"));
    let mut keys = Vec::new();
    for part in flag.split(',') {
        if let Some(key) = part.strip_prefix("ctrl-") {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ 'a'..='z'), None) => keys.push(c as u8 & 0x1f),
                (Some(c @ ('@' | '[' | '\\' | ']' | '^' | '_')), None) => {
                    keys.push(c as u8 & 0x1f)
                }
                _ => return Err(invalid()),
            }
        } else {
            let mut chars = part.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() && !c.is_ascii_control() => {
                    keys.push(c as u8)
                }
                _ => return Err(invalid()),
            }
        }
    }
    if keys.is_empty() {
        return Err(invalid());
    }
    Ok(keys)
}

/// Incremental matcher for the detach sequence on the stdin stream.
#[derive(Debug)]
pub struct DetachScanner {
    sequence: Vec<u8>,
    matched: usize,
}

impl DetachScanner {
    pub fn new(sequence: Vec<u8>) -> Self {
        Self {
            sequence,
            matched: 0,
        }
    }

    /// Feeds one input byte. Returns `Detached` when the full sequence has
    /// been seen; otherwise returns the bytes to forward to the task
    /// (withheld prefix bytes are released when a partial match breaks).
    pub fn feed(&mut self, byte: u8) -> ScanOutcome {
        if byte == self.sequence[self.matched] {
            self.matched += 1;
            if self.matched == self.sequence.len() {
                self.matched = 0;
                return ScanOutcome::Detached;
            }
            return ScanOutcome::Forward(Vec::new());
        }
        let mut release: Vec<u8> = self.sequence[..self.matched].to_vec();
        self.matched = 0;
        // the breaking byte may itself start a new match
        if byte == self.sequence[0] {
            self.matched = 1;
        } else {
            release.push(byte);
        }
        ScanOutcome::Forward(release)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Forward(Vec<u8>),
    Detached,
}

/// Pumps `input` into `output` until EOF or the detach sequence appears.
/// Returns true when the user detached.
pub fn pump_stdin(
    input: &mut dyn Read,
    output: &mut dyn Write,
    scanner: &mut DetachScanner,
) -> io::Result<bool> {
    let mut buf = [0u8; 1024];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(false),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        for &byte in &buf[..n] {
            match scanner.feed(byte) {
                ScanOutcome::Detached => return Ok(true),
                ScanOutcome::Forward(bytes) => {
                    if !bytes.is_empty() {
                        output.write_all(&bytes)?;
                    }
                }
            }
        }
        output.flush()?;
    }
}

/// Puts the terminal on `fd` into raw mode, restoring the previous state
/// on drop.
pub struct RawModeGuard {
    fd: RawFd,
    saved: Termios,
}

impl RawModeGuard {
    pub fn new(fd: RawFd) -> Result<Self> {
        let saved = termios::tcgetattr(fd)?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        raw.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(fd, SetArg::TCSANOW, &raw)?;
        Ok(Self { fd, saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.fd, SetArg::TCSANOW, &self.saved);
    }
}

pub fn is_terminal(fd: RawFd) -> bool {
    nix::unistd::isatty(fd).unwrap_or(false)
}

/// Current window size of the terminal on `fd`.
pub fn window_size(fd: RawFd) -> Option<(u16, u16)> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // TIOCGWINSZ is infallible on ttys; anything else returns an error
    let ret = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 && ws.ws_col > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detach_keys() {
        assert_eq!(parse_detach_keys("ctrl-p,ctrl-q").unwrap(), vec![0x10, 0x11]);
        assert_eq!(parse_detach_keys("ctrl-a").unwrap(), vec![0x01]);
        assert_eq!(parse_detach_keys("x").unwrap(), vec![b'x']);
        assert!(parse_detach_keys("").is_err());
        assert!(parse_detach_keys("ctrl-").is_err());
        assert!(parse_detach_keys("ctrl-pq").is_err());
    }

    #[test]
    fn test_scanner_detects_sequence() {
        let mut scanner = DetachScanner::new(parse_detach_keys("ctrl-p,ctrl-q").unwrap());
        assert_eq!(scanner.feed(0x10), ScanOutcome::Forward(vec![]));
        assert_eq!(scanner.feed(0x11), ScanOutcome::Detached);
    }

    #[test]
    fn test_scanner_releases_partial_match() {
        let mut scanner = DetachScanner::new(parse_detach_keys("ctrl-p,ctrl-q").unwrap());
        assert_eq!(scanner.feed(0x10), ScanOutcome::Forward(vec![]));
        // broken match releases the withheld ctrl-p plus the new byte
        assert_eq!(scanner.feed(b'a'), ScanOutcome::Forward(vec![0x10, b'a']));
    }

    #[test]
    fn test_scanner_restart_on_break_byte() {
        let mut scanner = DetachScanner::new(parse_detach_keys("ctrl-p,ctrl-q").unwrap());
        assert_eq!(scanner.feed(0x10), ScanOutcome::Forward(vec![]));
        // a repeated ctrl-p releases the first one and starts over
        assert_eq!(scanner.feed(0x10), ScanOutcome::Forward(vec![0x10]));
        assert_eq!(scanner.feed(0x11), ScanOutcome::Detached);
    }

    #[test]
    fn test_pump_detach() {
        let mut scanner = DetachScanner::new(parse_detach_keys("ctrl-p,ctrl-q").unwrap());
        let mut input: &[u8] = &[b'h', b'i', 0x10, 0x11];
        let mut output = Vec::new();
        let detached = pump_stdin(&mut input, &mut output, &mut scanner).unwrap();
        assert!(detached);
        assert_eq!(output, b"hi");
    }

    #[test]
    fn test_pump_eof_without_detach() {
        let mut scanner = DetachScanner::new(parse_detach_keys("ctrl-p,ctrl-q").unwrap());
        let mut input: &[u8] = b"hello";
        let mut output = Vec::new();
        let detached = pump_stdin(&mut input, &mut output, &mut scanner).unwrap();
        assert!(!detached);
        assert_eq!(output, b"hello");
    }
}
