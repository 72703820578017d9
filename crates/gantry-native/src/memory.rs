//! Access to the debuggee's address space.
//!
//! Bulk transfers go through `process_vm_readv`/`process_vm_writev`.
//! Code patches use ptrace word writes, which also reach read-only pages.

use std::io::{IoSlice, IoSliceMut};

use nix::libc::c_void;
use nix::sys::ptrace;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;

use crate::error::NativeError;

pub fn read_memory(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>, NativeError> {
    let mut buf = vec![0u8; len];
    if len == 0 {
        return Ok(buf);
    }
    let remote = [RemoteIoVec {
        base: addr as usize,
        len,
    }];
    let done = process_vm_readv(pid, &mut [IoSliceMut::new(&mut buf)], &remote)?;
    if done != len {
        return Err(NativeError::ShortTransfer {
            op: "read",
            addr,
            done,
            wanted: len,
        });
    }
    Ok(buf)
}

pub fn write_memory(pid: Pid, addr: u64, data: &[u8]) -> Result<(), NativeError> {
    if data.is_empty() {
        return Ok(());
    }
    let remote = [RemoteIoVec {
        base: addr as usize,
        len: data.len(),
    }];
    let done = process_vm_writev(pid, &[IoSlice::new(data)], &remote)?;
    if done != data.len() {
        return Err(NativeError::ShortTransfer {
            op: "write",
            addr,
            done,
            wanted: data.len(),
        });
    }
    Ok(())
}

pub fn peek_word(pid: Pid, addr: u64) -> Result<u64, NativeError> {
    Ok(ptrace::read(pid, addr as *mut c_void)? as u64)
}

pub fn poke_word(pid: Pid, addr: u64, word: u64) -> Result<(), NativeError> {
    // SAFETY: the tracee is stopped; `word` replaces exactly one machine word.
    unsafe { ptrace::write(pid, addr as *mut c_void, word as *mut c_void)? };
    Ok(())
}
