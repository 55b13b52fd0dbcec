use thiserror::Error;

macro_rules! decode_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Decode {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Decode {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! relocation_error {
    ($msg:expr) => {
        crate::Error::Relocation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Relocation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this library can report.
///
/// None of these errors is fatal to the instrumented process. The profiler treats any error
/// raised while rewriting a method as a reason to leave that method untouched, so the host keeps
/// running the original body.
///
/// # Error Categories
///
/// ## Method body codec
/// - [`Error::Decode`] - Malformed header, opcode, branch target or exception clause
/// - [`Error::Encode`] - The rewritten body does not fit the binary format
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer
///
/// ## Rewriting
/// - [`Error::Relocation`] - A branch or exception boundary references an instruction that is gone
///
/// ## Collaborators
/// - [`Error::Trampoline`] - The cuckoo helper pair could not be built
/// - [`Error::HostApi`] - A host, point source or injector call failed
/// - [`Error::Config`] - A configuration value could not be parsed
///
/// # Examples
///
/// ```rust
/// use cilcover::{Error, il::MethodDecoder};
///
/// match MethodDecoder::decode(&[0x4B, 0x00]) {
///     Ok(method) => println!("{} instructions", method.len()),
///     Err(Error::Decode { message, .. }) => eprintln!("bad body: {message}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body could not be decoded.
    ///
    /// Raised for an unknown header format, an unknown opcode, a truncated operand, a branch
    /// that does not land on an instruction boundary, or a declared code size that does not
    /// match the bytes consumed. Carries the source location where it was detected.
    #[error("Decode - {file}:{line}: {message}")]
    Decode {
        /// Description of what was malformed
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The method could not be encoded.
    ///
    /// Raised when the code size or the exception section exceeds what the header fields can
    /// address even after every branch was widened, or when a destination buffer is too small.
    #[error("Encode - {0}")]
    Encode(String),

    /// A branch or exception-handler boundary references an instruction that is not part of
    /// the method sequence anymore.
    #[error("Relocation - {file}:{line}: {message}")]
    Relocation {
        /// Description of the dangling reference
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The trust-boundary trampoline pair could not be constructed.
    ///
    /// Only affects the cuckoo dispatch mode; direct dispatch never raises this.
    #[error("Trampoline - {0}")]
    Trampoline(String),

    /// A collaborator call (host, point source, type injector, metadata) failed.
    #[error("HostApi - {0}")]
    HostApi(String),

    /// A configuration value could not be interpreted.
    #[error("Config - {key}: {message}")]
    Config {
        /// The configuration key that was rejected
        key: &'static str,
        /// Why the value was rejected
        message: String,
    },

    /// An out of bound access was attempted while reading or writing a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,
}
