// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments or configuration
    InvalidArgs(String),
    /// The component reported an error while streaming
    StreamError(String),
    /// The MFC engine library or one of its entry points is not available
    EngineUnavailable(String),
    /// The component stopped answering
    Timeout(String),
    /// General error from the mfcshim library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::StreamError(msg) => write!(f, "Stream error: {}", msg),
            CliError::EngineUnavailable(msg) => write!(f, "Engine unavailable: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::StreamError(_) => 3,
            CliError::EngineUnavailable(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map mfcshim::Error to CliError with appropriate exit codes
impl From<mfcshim::Error> for CliError {
    fn from(err: mfcshim::Error) -> Self {
        use mfcshim::Error;

        match err {
            Error::SymbolNotFound(sym) => {
                CliError::EngineUnavailable(format!("Symbol not found: {}", sym))
            }
            Error::LibraryNotLoaded(lib_err) => {
                CliError::EngineUnavailable(format!("Failed to load library: {}", lib_err))
            }

            Error::BadParameter(msg) => CliError::InvalidArgs(msg),

            // Failures raised while the engine runs
            err @ (Error::Hardware(_)
            | Error::HardwareInit(_)
            | Error::InsufficientResources(_)
            | Error::PortUnpopulated(_)) => CliError::StreamError(err.to_string()),

            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::TimedOut => {
                    CliError::Timeout(format!("Operation timed out: {}", io_err))
                }
                _ => CliError::General(format!("I/O error: {}", io_err)),
            },

            err => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidArgs("test".into()).code(), 2);
        assert_eq!(CliError::StreamError("test".into()).code(), 3);
        assert_eq!(CliError::EngineUnavailable("test".into()).code(), 4);
        assert_eq!(CliError::Timeout("test".into()).code(), 6);
        assert_eq!(CliError::General("test".into()).code(), 1);
        assert_eq!(
            CliError::General("test".into()).exit_code(),
            ExitCode::from(1)
        );
    }

    #[test]
    fn test_library_errors_map_to_engine_unavailable() {
        let err = CliError::from(mfcshim::Error::SymbolNotFound("SsbSipMfcDecOpen"));
        assert!(matches!(err, CliError::EngineUnavailable(_)));
        assert_eq!(format!("{}", err), "Engine unavailable: Symbol not found: SsbSipMfcDecOpen");
    }

    #[test]
    fn test_engine_failures_map_to_stream_error() {
        let err = CliError::from(mfcshim::Error::Hardware("exe failed".into()));
        assert!(matches!(err, CliError::StreamError(_)));
        let err = CliError::from(mfcshim::Error::SameState);
        assert!(matches!(err, CliError::General(_)));
    }
}
