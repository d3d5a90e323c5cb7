use nix::sys::ptrace;
use nix::unistd::Pid;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Bytes moved by one `PTRACE_PEEKDATA`.
pub const WORD_SIZE: usize = std::mem::size_of::<libc::c_long>();

/// Address in a tracee's address space. Only a `WordReader` for the owning
/// pid can make sense of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemotePtr(pub u64);

impl fmt::Display for RemotePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Word-granular access to another address space.
pub trait WordReader {
    fn read_word(&self, addr: u64) -> nix::Result<[u8; WORD_SIZE]>;
}

/// Reads a stopped tracee's memory through ptrace.
pub struct PtraceWords {
    pid: Pid,
}

impl PtraceWords {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }
}

impl WordReader for PtraceWords {
    fn read_word(&self, addr: u64) -> nix::Result<[u8; WORD_SIZE]> {
        // The only place a peeked word becomes bytes.
        ptrace::read(self.pid, addr as ptrace::AddressType).map(|word| word.to_ne_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationCause {
    /// No terminator within the byte budget.
    Limit,
    /// A word could not be read.
    Unreadable,
}

impl fmt::Display for TruncationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TruncationCause::Limit => write!(f, "no terminator within limit"),
            TruncationCause::Unreadable => write!(f, "memory unreadable"),
        }
    }
}

/// A string read that stopped before its terminator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("string at {addr:#x} truncated: {cause}")]
pub struct Truncated {
    pub addr: u64,
    pub partial: String,
    pub cause: TruncationCause,
}

/// Copy a NUL-terminated string out of a tracee, one word at a time.
///
/// Peeks are aligned to word boundaries, so a string ending just before an
/// unmapped page is read in full. At most `max_bytes` bytes starting at
/// `addr` are inspected. A word that cannot be read ends the string early;
/// whatever was gathered up to that point is returned in the `Truncated`
/// error.
pub fn read_cstring<W>(words: &W, addr: u64, max_bytes: usize) -> Result<String, Truncated>
where
    W: WordReader + ?Sized,
{
    const ALIGN: u64 = WORD_SIZE as u64 - 1;

    let mut buf: Vec<u8> = Vec::with_capacity(max_bytes.min(4096));
    let mut at = Some(addr & !ALIGN);
    // Leading bytes of the first word that precede `addr`.
    let mut skip = (addr & ALIGN) as usize;

    while buf.len() < max_bytes {
        let word = match at.ok_or(nix::Error::EFAULT).and_then(|at| words.read_word(at)) {
            Ok(word) => word,
            Err(e) => {
                log::debug!("peek at {:#x}+{} failed: {}", addr, buf.len(), e);
                return Err(truncated(addr, buf, TruncationCause::Unreadable));
            }
        };

        let bytes = &word[skip..];
        let take = bytes.len().min(max_bytes - buf.len());
        if let Some(nul) = bytes[..take].iter().position(|b| *b == 0) {
            buf.extend_from_slice(&bytes[..nul]);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.extend_from_slice(&bytes[..take]);

        skip = 0;
        at = at.and_then(|a| a.checked_add(WORD_SIZE as u64));
    }

    Err(truncated(addr, buf, TruncationCause::Limit))
}

/// Read one native-endian machine word, e.g. the leading field of a struct.
pub fn read_u64<W>(words: &W, addr: u64) -> Option<u64>
where
    W: WordReader + ?Sized,
{
    words.read_word(addr).ok().map(u64::from_ne_bytes)
}

fn truncated(addr: u64, buf: Vec<u8>, cause: TruncationCause) -> Truncated {
    Truncated {
        addr,
        partial: String::from_utf8_lossy(&buf).into_owned(),
        cause,
    }
}

/// In-process stand-in for a tracee's address space.
#[cfg(test)]
pub(crate) struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

#[cfg(test)]
impl FakeMemory {
    pub(crate) fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Map `bytes` at `base`. Reads of words not fully inside a mapping fail.
    pub(crate) fn map(mut self, base: u64, bytes: &[u8]) -> Self {
        self.regions.push((base, bytes.to_vec()));
        self
    }
}

#[cfg(test)]
impl WordReader for FakeMemory {
    fn read_word(&self, addr: u64) -> nix::Result<[u8; WORD_SIZE]> {
        for (base, bytes) in &self.regions {
            let end = base + bytes.len() as u64;
            let fits = addr
                .checked_add(WORD_SIZE as u64)
                .is_some_and(|word_end| word_end <= end);
            if addr >= *base && fits {
                let start = (addr - base) as usize;
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(&bytes[start..start + WORD_SIZE]);
                return Ok(word);
            }
        }
        Err(nix::Error::EIO)
    }
}
