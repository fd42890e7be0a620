//! Program loading.
//!
//! Executables are ELF32 images; anything without an ELF magic is loaded as
//! a raw binary at the configured start address. Only the minimum of ELF is
//! understood: allocatable sections are copied (PROGBITS, INIT_ARRAY,
//! FINI_ARRAY) or zeroed (NOBITS), and the first PROGBITS section is taken
//! as the text segment whose address becomes the entry point.

use std::path::Path;

use goblin::elf::section_header::{
    SHF_ALLOC, SHT_FINI_ARRAY, SHT_INIT_ARRAY, SHT_NOBITS, SHT_PROGBITS,
};
use goblin::elf::Elf;
use thiserror::Error;

use crate::ram::{MemError, Ram};

/// ELF identification magic.
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Errors surfaced while loading a program image.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("unable to read program file: {0}")]
    Io(#[from] std::io::Error),

    /// The ELF image is malformed.
    #[error("malformed ELF image: {0}")]
    Elf(#[from] goblin::error::Error),

    /// A section falls outside guest RAM.
    #[error("program does not fit in RAM: {0}")]
    Mem(#[from] MemError),

    /// A section's file range is out of bounds.
    #[error("section data out of file bounds")]
    Truncated,

    /// The program arguments overflow the reserved area.
    #[error("too many and too long program arguments")]
    ArgsTooLong,
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy)]
pub struct LoadInfo {
    /// Execution entry address (the text segment).
    pub entry: u32,
    /// Highest guest address touched by any section.
    pub max_address: u32,
}

/// Load an executable into RAM.
///
/// ELF32 images load at their linked addresses; raw binaries load at
/// `fallback_addr`, which also becomes the entry point.
pub fn load_program(path: &Path, ram: &mut Ram, fallback_addr: u32) -> Result<LoadInfo, LoadError> {
    let data = std::fs::read(path)?;

    if data.starts_with(&ELF_MAGIC) {
        let info = load_elf(&data, ram)?;
        log::info!(
            "loaded ELF32 executable {} into RAM @ 0x{:08x}",
            path.display(),
            info.entry
        );
        Ok(info)
    } else {
        load_binary(&data, ram, fallback_addr)?;
        log::info!(
            "loaded {} bytes from {} into RAM @ 0x{:08x}",
            data.len(),
            path.display(),
            fallback_addr
        );
        Ok(LoadInfo {
            entry: fallback_addr,
            max_address: fallback_addr + data.len() as u32,
        })
    }
}

fn load_elf(data: &[u8], ram: &mut Ram) -> Result<LoadInfo, LoadError> {
    let elf = Elf::parse(data)?;

    let mut entry = 0u32;
    let mut max_address = 0u32;

    for section in &elf.section_headers {
        if section.sh_flags as u32 & SHF_ALLOC == 0 {
            continue;
        }
        let addr = section.sh_addr as u32;
        let size = section.sh_size as u32;

        // The first allocatable PROGBITS section is the text segment.
        if section.sh_type == SHT_PROGBITS && entry == 0 {
            entry = addr;
        }
        max_address = max_address.max(addr.wrapping_add(size));

        match section.sh_type {
            SHT_PROGBITS | SHT_INIT_ARRAY | SHT_FINI_ARRAY => {
                let start = section.sh_offset as usize;
                let end = start + size as usize;
                let bytes = data.get(start..end).ok_or(LoadError::Truncated)?;
                ram.bytes_mut(addr, size)?.copy_from_slice(bytes);
            }
            SHT_NOBITS => {
                ram.bytes_mut(addr, size)?.fill(0);
            }
            _ => {}
        }
    }

    Ok(LoadInfo { entry, max_address })
}

fn load_binary(data: &[u8], ram: &mut Ram, addr: u32) -> Result<(), LoadError> {
    ram.bytes_mut(addr, data.len() as u32)?.copy_from_slice(data);
    Ok(())
}

/// Base of the guest argument area.
pub const ARGS_BASE: u32 = 0xFFF0_0000;

/// End of the guest argument area (exclusive).
pub const ARGS_END: u32 = 0xFFFF_0000;

/// Write the program argument vector into the reserved area:
/// `argc: u32`, then `argc` string pointers, then the NUL-terminated
/// strings themselves.
///
/// Skipped with a warning when RAM does not reach the argument area.
pub fn write_arg_vector(ram: &mut Ram, args: &[String]) -> Result<(), LoadError> {
    if !ram.valid_range(ARGS_BASE, 8) {
        log::warn!("RAM does not cover the argument area; argc/argv not set");
        return Ok(());
    }

    ram.store32(ARGS_BASE, args.len() as u32)?;
    let mut ptr_addr = ARGS_BASE + 4;
    let mut str_addr = ptr_addr + 4 * args.len() as u32;
    for arg in args {
        ram.store32(ptr_addr, str_addr)?;
        ptr_addr += 4;

        for byte in arg.bytes().chain(std::iter::once(0)) {
            if str_addr >= ARGS_END {
                return Err(LoadError::ArgsTooLong);
            }
            ram.store8(str_addr, byte as u32)?;
            str_addr += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vr32-load-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_raw_binary_loads_at_fallback() {
        let path = temp_file("raw");
        std::fs::write(&path, [0x01, 0x02, 0x03, 0x04, 0x05]).unwrap();

        let mut ram = Ram::new(0x1000);
        let info = load_program(&path, &mut ram, 0x200).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(info.entry, 0x200);
        assert_eq!(info.max_address, 0x205);
        assert_eq!(ram.load8(0x200).unwrap(), 0x01);
        assert_eq!(ram.load8(0x204).unwrap(), 0x05);
    }

    #[test]
    fn test_raw_binary_too_big_for_ram() {
        let path = temp_file("big");
        std::fs::write(&path, vec![0u8; 0x100]).unwrap();

        let mut ram = Ram::new(0x80);
        let err = load_program(&path, &mut ram, 0).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, LoadError::Mem(_)));
    }

    #[test]
    fn test_missing_file() {
        let mut ram = Ram::new(0x1000);
        let err = load_program(Path::new("/nonexistent/prog"), &mut ram, 0).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_arg_vector_layout() {
        // RAM reaching past the argument area (lazily committed).
        let mut ram = Ram::new(0x1_0000_0000);
        let args = vec!["prog".to_string(), "-x".to_string()];
        write_arg_vector(&mut ram, &args).unwrap();

        assert_eq!(ram.load32(ARGS_BASE).unwrap(), 2);
        let p0 = ram.load32(ARGS_BASE + 4).unwrap();
        let p1 = ram.load32(ARGS_BASE + 8).unwrap();
        assert_eq!(p0, ARGS_BASE + 12);
        assert_eq!(ram.c_string(p0).unwrap(), "prog");
        assert_eq!(ram.c_string(p1).unwrap(), "-x");
    }

    #[test]
    fn test_arg_vector_skipped_on_small_ram() {
        let mut ram = Ram::new(0x1000);
        write_arg_vector(&mut ram, &["prog".to_string()]).unwrap();
    }

    #[test]
    fn test_truncated_elf_is_an_error() {
        let path = temp_file("truncated");
        // Valid magic, garbage beyond.
        std::fs::write(&path, b"\x7fELF\x01\x01\x01").unwrap();

        let mut ram = Ram::new(0x1000);
        let err = load_program(&path, &mut ram, 0).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, LoadError::Elf(_)));
    }
}
