use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial port error: {0}")]
    Serial(String),
    #[error("device read timeout")]
    Timeout,
    #[error("no sample received yet on analog channel {0}")]
    NoData(u8),
    #[error("serial link lost")]
    LinkLost,
    #[error("invalid pin {0}: firmata analog messages address pins 0..=15")]
    InvalidPin(u8),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
