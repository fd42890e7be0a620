//! Simulation configuration.
//!
//! A plain record built by the command-line front end and passed by
//! reference to the components that need it. There is no process-wide
//! configuration state.

use std::path::PathBuf;

/// Default guest RAM size: the full 32-bit address space, so the argument
/// area and the MMIO band are always addressable. Host pages are only
/// committed when touched.
pub const DEFAULT_RAM_SIZE: u64 = 0x1_0000_0000;

/// Default program (ROM) load address for raw binaries.
pub const DEFAULT_LOAD_ADDR: u32 = 0x0000_0200;

/// Display-related options. The simulator core only publishes into the MMIO
/// band; these values are kept for command-line compatibility and for
/// embedders that attach a display.
#[derive(Debug, Clone)]
pub struct GfxConfig {
    pub enabled: bool,
    pub addr: u32,
    pub pal_addr: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub fullscreen: bool,
    pub no_scale: bool,
    pub auto_close: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: 0x4000_0000,
            pal_addr: 0x4000_8000,
            width: 320,
            height: 180,
            depth: 8,
            fullscreen: false,
            no_scale: false,
            auto_close: true,
        }
    }
}

/// Complete simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Print load information and run statistics.
    pub verbose: bool,
    /// Guest RAM size in bytes.
    pub ram_size: u64,
    /// Load/start address for raw binary programs.
    pub load_addr: u32,
    /// Maximum number of cycles to simulate (−1 = unlimited).
    pub max_cycles: i64,
    /// Binary execution trace output.
    pub trace_file: Option<PathBuf>,
    /// Perf symbol table input.
    pub perf_syms_file: Option<PathBuf>,
    /// Display options.
    pub gfx: GfxConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            ram_size: DEFAULT_RAM_SIZE,
            load_addr: DEFAULT_LOAD_ADDR,
            max_cycles: -1,
            trace_file: None,
            perf_syms_file: None,
            gfx: GfxConfig::default(),
        }
    }
}
