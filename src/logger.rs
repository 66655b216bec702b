//! Where the `slicestore` command writes what.
//!
//! Fetched bytes and `checksum` lines are the command's output and always go
//! to stdout, so they can be piped. The human-facing lines (what was fetched
//! from where, and why a command failed) go through a channel whose
//! [`Policy`] the caller picks. Library diagnostics are separate and go
//! through `tracing`.

use std::io::{Result, Write};

/// Destination of one channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Policy {
    Stdout,
    Stderr,
    Silent,
}

/// Both default to stderr, keeping stdout clean for object data.
pub struct Policies {
    /// `fetched t.npy from s3://bucket/run (verified)` after a fetch.
    pub status: Policy,
    /// `Failed to execute: ...` with the error and its causes.
    pub failure: Policy,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            status: Policy::Stderr,
            failure: Policy::Stderr,
        }
    }
}

/// A borrowed writer for one channel, resolved from its [`Policy`].
pub enum LogWriter<'a, OUT, ERR>
where
    OUT: Write,
    ERR: Write,
{
    Stdout(&'a mut OUT),
    Stderr(&'a mut ERR),
    Silent,
}
impl<'a, OUT, ERR> Write for LogWriter<'a, OUT, ERR>
where
    OUT: Write,
    ERR: Write,
{
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match self {
            Self::Stdout(w) => w.write(bytes),
            Self::Stderr(w) => w.write(bytes),
            Self::Silent => Ok(bytes.len()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::Stderr(w) => w.flush(),
            Self::Silent => Ok(()),
        }
    }
}

/// Generic over both streams so tests can capture them in `Vec<u8>`s.
pub struct Logger<'a, OUT, ERR>
where
    OUT: Write,
    ERR: Write,
{
    pub stdout: &'a mut OUT,
    pub stderr: &'a mut ERR,
    pub pol: Policies,
}

impl<'a, OUT, ERR> Logger<'a, OUT, ERR>
where
    OUT: Write,
    ERR: Write,
{
    pub fn new(stdout: &'a mut OUT, stderr: &'a mut ERR) -> Self {
        Self {
            stdout,
            stderr,
            pol: Policies::default(),
        }
    }

    fn lw_for(&mut self, pol: Policy) -> LogWriter<'_, OUT, ERR> {
        match pol {
            Policy::Stdout => LogWriter::Stdout(self.stdout),
            Policy::Stderr => LogWriter::Stderr(self.stderr),
            Policy::Silent => LogWriter::Silent,
        }
    }

    pub fn status(&mut self) -> LogWriter<'_, OUT, ERR> {
        self.lw_for(self.pol.status)
    }

    pub fn failure(&mut self) -> LogWriter<'_, OUT, ERR> {
        self.lw_for(self.pol.failure)
    }
}
