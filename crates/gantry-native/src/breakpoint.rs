//! Software breakpoints: an `int3` patched over the first byte of an
//! instruction.

pub const INT3: u8 = 0xCC;

/// Replace the lowest byte of `word`.
pub fn patch_byte(word: u64, byte: u8) -> u64 {
    (word & !0xff) | u64::from(byte)
}

pub fn low_byte(word: u64) -> u8 {
    (word & 0xff) as u8
}

#[derive(Debug, Clone)]
pub struct SoftwareBreakpoint {
    /// Runtime address.
    pub addr: u64,
    saved: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            saved: 0,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the original byte from `word` and return the word to write back.
    fn arm(&mut self, word: u64) -> u64 {
        self.saved = low_byte(word);
        self.enabled = true;
        patch_byte(word, INT3)
    }

    fn disarm(&mut self, word: u64) -> u64 {
        self.enabled = false;
        patch_byte(word, self.saved)
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod ptrace_ops {
    use nix::unistd::Pid;

    use super::SoftwareBreakpoint;
    use crate::error::NativeError;
    use crate::memory::{peek_word, poke_word};

    impl SoftwareBreakpoint {
        pub fn enable(&mut self, pid: Pid) -> Result<(), NativeError> {
            if self.is_enabled() {
                return Ok(());
            }
            let word = peek_word(pid, self.addr)?;
            let patched = self.arm(word);
            poke_word(pid, self.addr, patched)
        }

        pub fn disable(&mut self, pid: Pid) -> Result<(), NativeError> {
            if !self.is_enabled() {
                return Ok(());
            }
            let word = peek_word(pid, self.addr)?;
            let restored = self.disarm(word);
            poke_word(pid, self.addr, restored)
        }
    }
}
