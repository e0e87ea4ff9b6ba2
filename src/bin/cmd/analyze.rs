use std::path::Path;

use clap::Args;
use syswalk::{AnalysisConfig, Result, analyze_binary, syscalls};

#[derive(Args)]
pub struct Cmd {
    /// Path to the binary to analyse.
    #[arg(short, long)]
    pub filepath: String,

    /// Maximum number of instructions to check before a syscall
    /// instruction to find its id.
    #[arg(long, default_value_t = 20)]
    pub max_backtrack_insns: usize,

    /// Skip data found in code and try to decode the next instruction
    /// (may lead to errors).
    #[arg(long)]
    pub skip_data: bool,

    /// Emit a machine-readable usage table instead of the name listing.
    #[arg(long)]
    pub csv: bool,
}

impl Cmd {
    pub fn execute(&self) -> Result<()> {
        let config = AnalysisConfig {
            max_backtrack_insns: self.max_backtrack_insns,
            skip_data: self.skip_data,
        };
        let result = analyze_binary(Path::new(&self.filepath), &config)?;

        if self.csv {
            println!("# syscall, used");
            for row in result.usage() {
                println!("{},{}", row.number, if row.used { "Y" } else { "N" });
            }
        } else {
            for &number in &result.syscalls {
                println!("{} : {number}", syscalls::name(number).unwrap_or("?"));
            }
            println!("Total number of syscalls: {}", result.syscalls.len());
        }

        Ok(())
    }
}
