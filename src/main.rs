//! vr32sim: command-line front end for the VR32 simulator.
//!
//! Loads an ELF32 executable or raw binary into guest RAM, seeds the
//! argument vector and the MMIO band, runs the CPU to completion and exits
//! with the guest program's exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use vr32_sim::config::{GfxConfig, SimConfig, DEFAULT_LOAD_ADDR, DEFAULT_RAM_SIZE};
use vr32_sim::cpu::{trace::TraceWriter, Cpu};
use vr32_sim::loader;
use vr32_sim::mmio;
use vr32_sim::perf::PerfSymbols;
use vr32_sim::ram::Ram;

/// Parse a number with C-style base prefixes (0x hex, 0b binary, 0o or a
/// leading 0 octal, decimal otherwise).
fn parse_num(s: &str) -> Result<u64, String> {
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let value = parse_num(s)?;
    u32::try_from(value).map_err(|_| format!("value {s:?} does not fit in 32 bits"))
}

fn parse_i64(s: &str) -> Result<i64, String> {
    if let Some(rest) = s.strip_prefix('-') {
        Ok(-(parse_num(rest)? as i64))
    } else {
        Ok(parse_num(s)? as i64)
    }
}

/// A VR32 CPU simulator.
///
/// The program can either be an ELF32 executable file or a raw binary file
/// (e.g. produced by objcopy -O binary). Additional arguments are passed to
/// the simulated program.
#[derive(Debug, Parser)]
#[command(name = "vr32sim", version, about, max_term_width = 100)]
struct Args {
    /// Program file to simulate.
    program: PathBuf,

    /// Arguments passed to the simulated program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program_args: Vec<String>,

    /// Print stats.
    #[arg(short, long)]
    verbose: bool,

    /// Enable graphics.
    #[arg(short, long)]
    gfx: bool,

    /// Set framebuffer address.
    #[arg(long, value_name = "ADDR", value_parser = parse_u32)]
    gfx_addr: Option<u32>,

    /// Set palette address.
    #[arg(long, value_name = "ADDR", value_parser = parse_u32)]
    gfx_palette: Option<u32>,

    /// Set framebuffer width.
    #[arg(long, value_name = "WIDTH", value_parser = parse_u32)]
    gfx_width: Option<u32>,

    /// Set framebuffer height.
    #[arg(long, value_name = "HEIGHT", value_parser = parse_u32)]
    gfx_height: Option<u32>,

    /// Set framebuffer depth.
    #[arg(long, value_name = "DEPTH", value_parser = parse_u32)]
    gfx_depth: Option<u32>,

    /// Use fullscreen video mode.
    #[arg(short, long)]
    fullscreen: bool,

    /// Don't scale window size.
    #[arg(long)]
    no_scale: bool,

    /// Don't auto-close window on exit().
    #[arg(long)]
    no_auto_close: bool,

    /// Enable debug trace.
    #[arg(short, long, value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Set the RAM size (in bytes).
    #[arg(short = 'R', long, value_name = "N", value_parser = parse_num, default_value_t = DEFAULT_RAM_SIZE)]
    ram_size: u64,

    /// Set the program (ROM) start address.
    #[arg(short = 'A', long = "addr", value_name = "ADDR", value_parser = parse_u32, default_value_t = DEFAULT_LOAD_ADDR)]
    addr: u32,

    /// Maximum number of CPU cycles to simulate.
    #[arg(short, long, value_name = "CYCLES", value_parser = parse_i64, default_value_t = -1)]
    cycles: i64,

    /// Do perf counting using symbols in FILE.
    #[arg(short = 'P', long, value_name = "FILE")]
    perf_syms: Option<PathBuf>,
}

impl Args {
    fn to_config(&self) -> SimConfig {
        let gfx_defaults = GfxConfig::default();
        SimConfig {
            // A perf report implies verbose output.
            verbose: self.verbose || self.perf_syms.is_some(),
            ram_size: self.ram_size,
            load_addr: self.addr,
            max_cycles: self.cycles,
            trace_file: self.trace.clone(),
            perf_syms_file: self.perf_syms.clone(),
            gfx: GfxConfig {
                enabled: self.gfx,
                addr: self.gfx_addr.unwrap_or(gfx_defaults.addr),
                pal_addr: self.gfx_palette.unwrap_or(gfx_defaults.pal_addr),
                width: self.gfx_width.unwrap_or(gfx_defaults.width),
                height: self.gfx_height.unwrap_or(gfx_defaults.height),
                depth: self.gfx_depth.unwrap_or(gfx_defaults.depth),
                fullscreen: self.fullscreen,
                no_scale: self.no_scale,
                auto_close: !self.no_auto_close,
            },
        }
    }
}

fn run(args: &Args, config: &SimConfig) -> anyhow::Result<u32> {
    let mut ram = Ram::new(config.ram_size);

    // Guest argc/argv: program name first, then the remaining arguments.
    let mut guest_args = vec![args.program.display().to_string()];
    guest_args.extend(args.program_args.iter().cloned());
    loader::write_arg_vector(&mut ram, &guest_args)?;

    let mut perf = PerfSymbols::new();
    if let Some(path) = &config.perf_syms_file {
        perf.load(path)
            .with_context(|| format!("unable to load perf symbols from {}", path.display()))?;
    }

    let info = loader::load_program(&args.program, &mut ram, config.load_addr)?;

    mmio::populate(&mut ram)?;

    if config.gfx.enabled {
        log::warn!("graphics output is not compiled in; running headless");
    }

    let trace = match &config.trace_file {
        Some(path) => Some(
            TraceWriter::create(path)
                .with_context(|| format!("unable to create trace file {}", path.display()))?,
        ),
        None => None,
    };

    let mut cpu = Cpu::new(ram, perf, trace);

    if config.verbose {
        println!("------------------------------------------------------------------------");
    }

    let exit_code = cpu
        .run(info.entry, config.max_cycles)
        .map_err(anyhow::Error::new)?;

    if config.verbose {
        println!("------------------------------------------------------------------------");
        println!("Exit code: {exit_code}");
        cpu.dump_stats();
        if cpu.perf().has_symbols() {
            println!();
            cpu.perf().print();
        }
    }

    Ok(exit_code)
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    let config = args.to_config();

    match run(&args, &config) {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_num_bases() {
        assert_eq!(parse_num("42").unwrap(), 42);
        assert_eq!(parse_num("0x200").unwrap(), 0x200);
        assert_eq!(parse_num("0X200").unwrap(), 0x200);
        assert_eq!(parse_num("0b1010").unwrap(), 10);
        assert_eq!(parse_num("0o17").unwrap(), 15);
        assert_eq!(parse_num("017").unwrap(), 15);
        assert_eq!(parse_num("0").unwrap(), 0);
        assert!(parse_num("0xZZ").is_err());
        assert!(parse_num("").is_err());
    }

    #[test]
    fn test_parse_i64_sign() {
        assert_eq!(parse_i64("-1").unwrap(), -1);
        assert_eq!(parse_i64("0x10").unwrap(), 16);
    }

    #[test]
    fn test_args_to_config() {
        let args = Args::parse_from([
            "vr32sim",
            "-v",
            "--ram-size",
            "0x10000",
            "--addr",
            "0x400",
            "--cycles",
            "100",
            "prog.elf",
            "--guest-flag",
        ]);
        let config = args.to_config();
        assert!(config.verbose);
        assert_eq!(config.ram_size, 0x10000);
        assert_eq!(config.load_addr, 0x400);
        assert_eq!(config.max_cycles, 100);
        assert_eq!(args.program_args, vec!["--guest-flag".to_string()]);
    }
}
