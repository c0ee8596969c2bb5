use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("port I/O error: {0}")]
    PortIo(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0} exhausted")]
    Exhausted(&'static str),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("unknown {what}: {id}")]
    Unknown { what: &'static str, id: String },

    #[error("cannot {op} while {state}")]
    BadState { op: &'static str, state: &'static str },

    #[error("unsupported {0}")]
    Unsupported(&'static str),

    #[error("key shape mismatch: table expects {expected} bytes, gathered {actual}")]
    KeyShapeMismatch { expected: usize, actual: usize },

    #[error("{space} access out of bounds: {offset}+{length} exceeds {bound}")]
    OutOfBounds {
        space: &'static str,
        offset: usize,
        length: usize,
        bound: usize,
    },

    #[error("unbound field id {0}")]
    Unbound(u32),

    #[error("pipeline loop: dispatch depth exceeded {0}")]
    PipelineLoop(u8),

    #[error("application fault: status {0}")]
    AppFault(i32),
}

pub type Result<T> = std::result::Result<T, Error>;
