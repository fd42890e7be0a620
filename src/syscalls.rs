//! Host-backed system services.
//!
//! When the PC enters the trap window the interpreter calls one of these
//! routines. Arguments arrive in R1..R3; the primary result goes back to R1
//! (with the high half of 64-bit results in R2). Guest strings are
//! NUL-terminated pointers, buffers are (pointer, length) pairs validated
//! against RAM.
//!
//! Guest file descriptors 0..2 are the process standard streams and are
//! never closed; descriptors from OPEN map through a host file table.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cpu::NUM_REGS;
use crate::ram::{MemError, Ram};

/// Routine indices inside the trap window, one word per routine.
pub const TRAP_EXIT: u32 = 0;
pub const TRAP_PUTCHAR: u32 = 1;
pub const TRAP_GETCHAR: u32 = 2;
pub const TRAP_CLOSE: u32 = 3;
pub const TRAP_FSTAT: u32 = 4;
pub const TRAP_ISATTY: u32 = 5;
pub const TRAP_LINK: u32 = 6;
pub const TRAP_LSEEK: u32 = 7;
pub const TRAP_MKDIR: u32 = 8;
pub const TRAP_OPEN: u32 = 9;
pub const TRAP_READ: u32 = 10;
pub const TRAP_STAT: u32 = 11;
pub const TRAP_UNLINK: u32 = 12;
pub const TRAP_WRITE: u32 = 13;
pub const TRAP_GETTIMEMICROS: u32 = 14;

/// Number of recognized routines.
pub const TRAP_COUNT: u32 = 15;

/// First guest file descriptor handed out by OPEN.
const FIRST_GUEST_FD: u32 = 3;

const ERR: u32 = u32::MAX;

/// File metadata marshalled into the guest's 72-byte stat buffer.
#[derive(Debug, Default, Clone, Copy)]
struct StatBuf {
    dev: u16,
    ino: u16,
    mode: u32,
    nlink: u16,
    uid: u16,
    gid: u16,
    rdev: u16,
    size: u32,
    atime: (u64, u32),
    mtime: (u64, u32),
    ctime: (u64, u32),
    blksize: u32,
    blocks: u32,
}

#[cfg(not(unix))]
fn systime_parts(time: std::io::Result<SystemTime>) -> (u64, u32) {
    match time.ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
        Some(d) => (d.as_secs(), d.subsec_nanos()),
        None => (0, 0),
    }
}

#[cfg(unix)]
fn stat_from_metadata(meta: &std::fs::Metadata) -> StatBuf {
    use std::os::unix::fs::MetadataExt;
    StatBuf {
        dev: meta.dev() as u16,
        ino: meta.ino() as u16,
        mode: meta.mode(),
        nlink: meta.nlink() as u16,
        uid: meta.uid() as u16,
        gid: meta.gid() as u16,
        rdev: meta.rdev() as u16,
        size: meta.len() as u32,
        atime: (meta.atime() as u64, meta.atime_nsec() as u32),
        mtime: (meta.mtime() as u64, meta.mtime_nsec() as u32),
        ctime: (meta.ctime() as u64, meta.ctime_nsec() as u32),
        blksize: meta.blksize() as u32,
        blocks: meta.blocks() as u32,
    }
}

#[cfg(not(unix))]
fn stat_from_metadata(meta: &std::fs::Metadata) -> StatBuf {
    const S_IFREG: u32 = 0o100000;
    const S_IFDIR: u32 = 0o040000;
    let blksize = 512u32;
    StatBuf {
        mode: if meta.is_dir() { S_IFDIR | 0o755 } else { S_IFREG | 0o644 },
        nlink: 1,
        size: meta.len() as u32,
        atime: systime_parts(meta.accessed()),
        mtime: systime_parts(meta.modified()),
        ctime: systime_parts(meta.modified()),
        blksize,
        blocks: (meta.len() as u32).div_ceil(blksize),
        ..Default::default()
    }
}

/// Synthesized stat for the standard streams: a character device.
fn stat_for_stream() -> StatBuf {
    StatBuf {
        mode: 0o020666,
        nlink: 1,
        blksize: 1024,
        ..Default::default()
    }
}

/// The host service interface.
pub struct Syscalls {
    terminate: bool,
    exit_code: u32,
    files: HashMap<u32, File>,
    next_fd: u32,
}

impl Default for Syscalls {
    fn default() -> Self {
        Self::new()
    }
}

impl Syscalls {
    pub fn new() -> Self {
        Self {
            terminate: false,
            exit_code: 0,
            files: HashMap::new(),
            next_fd: FIRST_GUEST_FD,
        }
    }

    /// Reset the run state (open files stay open).
    pub fn clear(&mut self) {
        self.terminate = false;
        self.exit_code = 0;
    }

    /// True once the guest has called EXIT.
    pub fn terminate(&self) -> bool {
        self.terminate
    }

    /// Argument of the guest's exit() call.
    pub fn exit_code(&self) -> u32 {
        self.exit_code
    }

    /// Dispatch one trap routine. Out-of-range indices are ignored.
    ///
    /// Only guest-pointer dereferences can fail; host I/O errors turn into
    /// −1 results the guest sees in R1.
    pub fn call(
        &mut self,
        routine_no: u32,
        regs: &mut [u32; NUM_REGS],
        ram: &mut Ram,
    ) -> Result<(), MemError> {
        if routine_no >= TRAP_COUNT {
            log::warn!("ignoring unknown trap routine {routine_no}");
            return Ok(());
        }
        log::debug!(
            "trap {routine_no} args r1=0x{:08x} r2=0x{:08x} r3=0x{:08x}",
            regs[1],
            regs[2],
            regs[3]
        );
        match routine_no {
            TRAP_EXIT => {
                self.terminate = true;
                self.exit_code = regs[1];
            }
            TRAP_PUTCHAR => {
                let byte = [regs[1] as u8];
                let mut stdout = std::io::stdout().lock();
                regs[1] = match stdout.write_all(&byte).and_then(|()| stdout.flush()) {
                    Ok(()) => regs[1] & 0xFF,
                    Err(_) => ERR,
                };
            }
            TRAP_GETCHAR => {
                let mut byte = [0u8];
                regs[1] = match std::io::stdin().lock().read(&mut byte) {
                    Ok(1) => byte[0] as u32,
                    _ => ERR,
                };
            }
            TRAP_CLOSE => {
                // The standard streams stay open; closing them succeeds
                // without effect.
                regs[1] = if regs[1] < FIRST_GUEST_FD {
                    0
                } else if self.files.remove(&regs[1]).is_some() {
                    0
                } else {
                    ERR
                };
            }
            TRAP_FSTAT => {
                let fd = regs[1];
                let buf_addr = regs[2];
                let stat = if fd < FIRST_GUEST_FD {
                    Some(stat_for_stream())
                } else {
                    self.files
                        .get(&fd)
                        .and_then(|f| f.metadata().ok())
                        .map(|m| stat_from_metadata(&m))
                };
                regs[1] = match stat {
                    Some(stat) => {
                        Self::stat_to_ram(&stat, buf_addr, ram)?;
                        0
                    }
                    None => ERR,
                };
            }
            TRAP_ISATTY => {
                regs[1] = match regs[1] {
                    0 => std::io::stdin().is_terminal() as u32,
                    1 => std::io::stdout().is_terminal() as u32,
                    2 => std::io::stderr().is_terminal() as u32,
                    _ => 0,
                };
            }
            TRAP_LINK => {
                let old = ram.c_string(regs[1])?;
                let new = ram.c_string(regs[2])?;
                regs[1] = match std::fs::hard_link(&old, &new) {
                    Ok(()) => 0,
                    Err(_) => ERR,
                };
            }
            TRAP_LSEEK => {
                let offset = regs[2] as i32 as i64;
                let seek = match regs[3] {
                    0 => SeekFrom::Start(offset.max(0) as u64),
                    1 => SeekFrom::Current(offset),
                    _ => SeekFrom::End(offset),
                };
                regs[1] = match self.files.get_mut(&regs[1]) {
                    Some(file) => match file.seek(seek) {
                        Ok(pos) => pos as u32,
                        Err(_) => ERR,
                    },
                    None => ERR,
                };
            }
            TRAP_MKDIR => {
                let path = ram.c_string(regs[1])?;
                regs[1] = match std::fs::create_dir(&path) {
                    Ok(()) => 0,
                    Err(_) => ERR,
                };
            }
            TRAP_OPEN => {
                let path = ram.c_string(regs[1])?;
                regs[1] = self.open(&path, regs[2], regs[3]);
            }
            TRAP_READ => {
                if !ram.valid_range(regs[2], regs[3]) {
                    regs[1] = ERR;
                } else {
                    let fd = regs[1];
                    let buf = ram.bytes_mut(regs[2], regs[3])?;
                    regs[1] = match fd {
                        0 => match std::io::stdin().lock().read(buf) {
                            Ok(n) => n as u32,
                            Err(_) => ERR,
                        },
                        _ => match self.files.get_mut(&fd) {
                            Some(file) => match file.read(buf) {
                                Ok(n) => n as u32,
                                Err(_) => ERR,
                            },
                            None => ERR,
                        },
                    };
                }
            }
            TRAP_STAT => {
                let path = ram.c_string(regs[1])?;
                let buf_addr = regs[2];
                regs[1] = match std::fs::metadata(&path) {
                    Ok(meta) => {
                        Self::stat_to_ram(&stat_from_metadata(&meta), buf_addr, ram)?;
                        0
                    }
                    Err(_) => ERR,
                };
            }
            TRAP_UNLINK => {
                let path = ram.c_string(regs[1])?;
                regs[1] = match std::fs::remove_file(&path) {
                    Ok(()) => 0,
                    Err(_) => ERR,
                };
            }
            TRAP_WRITE => {
                if !ram.valid_range(regs[2], regs[3]) {
                    regs[1] = ERR;
                } else {
                    let fd = regs[1];
                    let buf = ram.bytes(regs[2], regs[3])?;
                    regs[1] = match fd {
                        1 => {
                            let mut stdout = std::io::stdout().lock();
                            match stdout.write_all(buf).and_then(|()| stdout.flush()) {
                                Ok(()) => buf.len() as u32,
                                Err(_) => ERR,
                            }
                        }
                        2 => {
                            let mut stderr = std::io::stderr().lock();
                            match stderr.write_all(buf) {
                                Ok(()) => buf.len() as u32,
                                Err(_) => ERR,
                            }
                        }
                        _ => match self.files.get_mut(&fd) {
                            Some(file) => match file.write(buf) {
                                Ok(n) => n as u32,
                                Err(_) => ERR,
                            },
                            None => ERR,
                        },
                    };
                }
            }
            TRAP_GETTIMEMICROS => {
                let micros = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_micros() as u64)
                    .unwrap_or(0);
                regs[1] = micros as u32;
                regs[2] = (micros >> 32) as u32;
            }
            _ => {}
        }
        Ok(())
    }

    /// Translate the guest open flags and open the host file.
    ///
    /// Flag layout: bits 1:0 select the access mode (0 read, 1 write,
    /// 2 read/write), bit 3 append, bit 9 create, bit 10 truncate.
    fn open(&mut self, path: &str, flags: u32, mode: u32) -> u32 {
        let mut options = OpenOptions::new();
        match flags & 3 {
            1 => {
                options.write(true);
            }
            2 => {
                options.read(true).write(true);
            }
            _ => {
                options.read(true);
            }
        }
        if flags & 0x0008 != 0 {
            options.append(true);
        }
        if flags & 0x0200 != 0 {
            options.create(true);
        }
        if flags & 0x0400 != 0 {
            options.truncate(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if flags & 0x0200 != 0 {
                options.mode(mode);
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        match options.open(path) {
            Ok(file) => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, file);
                fd
            }
            Err(e) => {
                log::debug!("open {path:?} failed: {e}");
                ERR
            }
        }
    }

    /// Marshal a stat buffer into guest memory (72 bytes).
    fn stat_to_ram(stat: &StatBuf, addr: u32, ram: &mut Ram) -> Result<(), MemError> {
        ram.store16(addr, stat.dev as u32)?;
        ram.store16(addr + 2, stat.ino as u32)?;
        ram.store32(addr + 4, stat.mode)?;
        ram.store16(addr + 8, stat.nlink as u32)?;
        ram.store16(addr + 10, stat.uid as u32)?;
        ram.store16(addr + 12, stat.gid as u32)?;
        ram.store16(addr + 14, stat.rdev as u32)?;
        ram.store32(addr + 16, stat.size)?;
        for (base, (sec, nsec)) in [
            (20, stat.atime),
            (32, stat.mtime),
            (44, stat.ctime),
        ] {
            ram.store32(addr + base, sec as u32)?;
            ram.store32(addr + base + 4, (sec >> 32) as u32)?;
            ram.store32(addr + base + 8, nsec)?;
        }
        ram.store32(addr + 56, stat.blksize)?;
        ram.store32(addr + 60, stat.blocks)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_regs() -> [u32; NUM_REGS] {
        [0; NUM_REGS]
    }

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vr32-sys-{name}-{}", std::process::id()))
    }

    fn put_string(ram: &mut Ram, addr: u32, s: &str) {
        for (i, b) in s.bytes().chain(std::iter::once(0)).enumerate() {
            ram.store8(addr + i as u32, b as u32).unwrap();
        }
    }

    #[test]
    fn test_exit_sets_code_and_terminates() {
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x1000);
        let mut regs = make_regs();
        regs[1] = 42;
        sys.call(TRAP_EXIT, &mut regs, &mut ram).unwrap();
        assert!(sys.terminate());
        assert_eq!(sys.exit_code(), 42);
    }

    #[test]
    fn test_unknown_routine_leaves_registers() {
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x1000);
        let mut regs = make_regs();
        regs[1] = 0x1234;
        sys.call(999, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 0x1234);
        assert!(!sys.terminate());
    }

    #[test]
    fn test_close_spares_standard_streams() {
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x1000);
        for fd in 0..3 {
            let mut regs = make_regs();
            regs[1] = fd;
            sys.call(TRAP_CLOSE, &mut regs, &mut ram).unwrap();
            assert_eq!(regs[1], 0);
        }
        // Closing an unknown descriptor fails.
        let mut regs = make_regs();
        regs[1] = 17;
        sys.call(TRAP_CLOSE, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], ERR);
    }

    #[test]
    fn test_open_write_read_roundtrip() {
        let path = temp_file("roundtrip");
        let path_str = path.to_str().unwrap().to_string();
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x10000);
        put_string(&mut ram, 0x100, &path_str);

        // open(path, WRONLY | CREATE | TRUNC, 0644).
        let mut regs = make_regs();
        regs[1] = 0x100;
        regs[2] = 1 | 0x200 | 0x400;
        regs[3] = 0o644;
        sys.call(TRAP_OPEN, &mut regs, &mut ram).unwrap();
        let fd = regs[1];
        assert!(fd >= 3);

        // write(fd, buf, 5).
        ram.bytes_mut(0x200, 5).unwrap().copy_from_slice(b"hello");
        let mut regs = make_regs();
        regs[1] = fd;
        regs[2] = 0x200;
        regs[3] = 5;
        sys.call(TRAP_WRITE, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 5);

        // close, reopen read-only, read back.
        let mut regs = make_regs();
        regs[1] = fd;
        sys.call(TRAP_CLOSE, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 0);

        let mut regs = make_regs();
        regs[1] = 0x100;
        regs[2] = 0;
        sys.call(TRAP_OPEN, &mut regs, &mut ram).unwrap();
        let fd = regs[1];
        assert!(fd >= 3);

        let mut regs = make_regs();
        regs[1] = fd;
        regs[2] = 0x300;
        regs[3] = 16;
        sys.call(TRAP_READ, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 5);
        assert_eq!(ram.bytes(0x300, 5).unwrap(), b"hello");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_lseek() {
        let path = temp_file("lseek");
        std::fs::write(&path, b"0123456789").unwrap();
        let path_str = path.to_str().unwrap().to_string();
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x10000);
        put_string(&mut ram, 0x100, &path_str);

        let mut regs = make_regs();
        regs[1] = 0x100;
        sys.call(TRAP_OPEN, &mut regs, &mut ram).unwrap();
        let fd = regs[1];

        // Seek to offset 4 from the start.
        let mut regs = make_regs();
        regs[1] = fd;
        regs[2] = 4;
        regs[3] = 0;
        sys.call(TRAP_LSEEK, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 4);

        // Seek -2 from the end.
        let mut regs = make_regs();
        regs[1] = fd;
        regs[2] = (-2i32) as u32;
        regs[3] = 2;
        sys.call(TRAP_LSEEK, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 8);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_with_bad_buffer_fails() {
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x1000);
        let mut regs = make_regs();
        regs[1] = 0;
        regs[2] = 0xFF0;
        regs[3] = 0x100; // Runs past the end of RAM.
        sys.call(TRAP_READ, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], ERR);
    }

    #[test]
    fn test_stat_layout() {
        let path = temp_file("stat");
        std::fs::write(&path, b"abcdef").unwrap();
        let path_str = path.to_str().unwrap().to_string();
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x10000);
        put_string(&mut ram, 0x100, &path_str);

        let mut regs = make_regs();
        regs[1] = 0x100;
        regs[2] = 0x400;
        sys.call(TRAP_STAT, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 0);
        // Size at offset 16.
        assert_eq!(ram.load32(0x410).unwrap(), 6);
        // Mode at offset 4 marks a regular file.
        assert_eq!(ram.load32(0x404).unwrap() & 0o170000, 0o100000);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_gettimemicros_is_monotonic_enough() {
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x1000);
        let mut regs = make_regs();
        sys.call(TRAP_GETTIMEMICROS, &mut regs, &mut ram).unwrap();
        let t0 = regs[1] as u64 | (regs[2] as u64) << 32;
        // Some time after 2020-01-01 in microseconds.
        assert!(t0 > 1_577_836_800_000_000);
    }

    #[test]
    fn test_unlink_and_mkdir() {
        let dir = temp_file("dir");
        let dir_str = dir.to_str().unwrap().to_string();
        let mut sys = Syscalls::new();
        let mut ram = Ram::new(0x10000);
        put_string(&mut ram, 0x100, &dir_str);

        let mut regs = make_regs();
        regs[1] = 0x100;
        regs[2] = 0o755;
        sys.call(TRAP_MKDIR, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], 0);
        assert!(dir.is_dir());
        std::fs::remove_dir(&dir).ok();

        // Unlinking a missing file fails with -1.
        let mut regs = make_regs();
        regs[1] = 0x100;
        sys.call(TRAP_UNLINK, &mut regs, &mut ram).unwrap();
        assert_eq!(regs[1], ERR);
    }
}
