//! Error construction helpers.
//!
//! The core never defines its own `Error` type; like the tools in
//! `whitebox-tools-app`, every fallible entry point returns
//! `std::io::Result<T>` and fallible internals build a `std::io::Error`
//! with a descriptive `ErrorKind`. These helpers just name the `ErrorKind`
//! each error bucket maps to, so call sites read as
//! `return Err(config_error("..."))` instead of repeating
//! `Error::new(ErrorKind::InvalidInput, ...)` everywhere.

use std::io::{Error, ErrorKind};

/// Config / schema errors: unknown encodings, missing fields, shape
/// mismatches. Fatal at init.
pub fn config_error<S: Into<String>>(msg: S) -> Error {
    Error::new(ErrorKind::InvalidInput, msg.into())
}

/// Domain consistency errors: non-rectangular rasters, inconsistent masks.
pub fn domain_error<S: Into<String>>(msg: S) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}

/// Migration payload corruption: a received buffer whose length is not a
/// multiple of the per-particle tuple size. Indicates a protocol bug.
pub fn protocol_error<S: Into<String>>(msg: S) -> Error {
    Error::new(ErrorKind::Other, msg.into())
}

/// I/O failure during checkpoint or output; surfaced unchanged to the
/// driver, which aborts the worker group.
pub fn io_error<S: Into<String>>(msg: S) -> Error {
    Error::new(ErrorKind::Other, msg.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn config_error_kind() {
        assert_eq!(config_error("bad").kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn protocol_error_kind() {
        assert_eq!(protocol_error("bad").kind(), ErrorKind::Other);
    }
}
