use std::fmt;
use std::io;

#[derive(Debug)]
pub enum AcpuError {
    Io(io::Error),
    Reader(String),
    Config(String),
    Init(String),
    InvalidInput(String),
    QueueOverflow,
}

impl fmt::Display for AcpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcpuError::Io(e) => write!(f, "I/O Error: {}", e),
            AcpuError::Reader(s) => write!(f, "Reader Error: {}", s),
            AcpuError::Config(s) => write!(f, "Config Error: {}", s),
            AcpuError::Init(s) => write!(f, "Init Error: {}", s),
            AcpuError::InvalidInput(s) => write!(f, "Invalid Input: {}", s),
            AcpuError::QueueOverflow => write!(f, "Work duration queue overflowed"),
        }
    }
}

impl From<io::Error> for AcpuError {
    fn from(err: io::Error) -> Self {
        AcpuError::Io(err)
    }
}
