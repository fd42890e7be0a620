//! Buffered binary execution trace.
//!
//! Each executed lane emits one 20-byte little-endian record:
//!
//! | Offset | Field | Notes |
//! |---|---|---|
//! | 0 | flags | bit 0 record valid, bits 1/2/3 source A/B/C valid |
//! | 4 | pc | fetch address |
//! | 8 | src_a | zero when invalid |
//! | 12 | src_b | zero when invalid |
//! | 16 | src_c | zero when invalid |
//!
//! Records are buffered and flushed to the file every 128 records and when
//! the writer is dropped. Write errors are logged once and further output is
//! dropped; tracing never aborts a simulation.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

/// Number of buffered records between flushes.
const FLUSH_INTERVAL: usize = 128;

/// Size of one record in bytes.
const RECORD_SIZE: usize = 20;

/// One trace record, captured after the register-read stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceRecord {
    pub valid: bool,
    pub src_a_valid: bool,
    pub src_b_valid: bool,
    pub src_c_valid: bool,
    pub pc: u32,
    pub src_a: u32,
    pub src_b: u32,
    pub src_c: u32,
}

/// Buffered trace sink writing to a file.
pub struct TraceWriter {
    file: File,
    buf: Vec<u8>,
    failed: bool,
}

impl TraceWriter {
    /// Create (truncate) the trace file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            buf: Vec::with_capacity(FLUSH_INTERVAL * RECORD_SIZE),
            failed: false,
        })
    }

    /// Append one record, flushing when the buffer is full.
    pub fn append(&mut self, record: &TraceRecord) {
        if !record.valid {
            return;
        }
        let flags = record.valid as u32
            | (record.src_a_valid as u32) << 1
            | (record.src_b_valid as u32) << 2
            | (record.src_c_valid as u32) << 3;

        // Writing into a Vec cannot fail.
        let buf = &mut self.buf;
        let _ = buf.write_u32::<LittleEndian>(flags);
        let _ = buf.write_u32::<LittleEndian>(record.pc);
        let _ = buf.write_u32::<LittleEndian>(if record.src_a_valid { record.src_a } else { 0 });
        let _ = buf.write_u32::<LittleEndian>(if record.src_b_valid { record.src_b } else { 0 });
        let _ = buf.write_u32::<LittleEndian>(if record.src_c_valid { record.src_c } else { 0 });

        if self.buf.len() >= FLUSH_INTERVAL * RECORD_SIZE {
            self.flush();
        }
    }

    /// Flush buffered records to the file.
    pub fn flush(&mut self) {
        if self.buf.is_empty() || self.failed {
            self.buf.clear();
            return;
        }
        let result = self
            .file
            .write_all(&self.buf)
            .and_then(|()| self.file.flush());
        if let Err(e) = result {
            log::warn!("trace write failed, disabling trace output: {e}");
            self.failed = true;
        }
        self.buf.clear();
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        self.flush();
    }
}
