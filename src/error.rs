use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("elf parse error: {0}")]
    Parsing(#[from] goblin::error::Error),

    #[error("{}: not a 64-bit x86-64 ELF binary", .0.display())]
    InvalidBinary(PathBuf),

    #[error("{}: missing section {section}", path.display())]
    MissingSection { path: PathBuf, section: String },
}

pub type Result<T> = std::result::Result<T, Error>;
