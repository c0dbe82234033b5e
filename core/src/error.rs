//! Error types for device negotiation and streaming

use crate::engine::PlaybackState;

/// Driver-level failure codes.
///
/// Mirrors the negative errno values a PCM driver reports. The named variants
/// are the ones the engine reacts to; anything else travels as [`DriverError::Code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Resource temporarily unavailable, try again (`-EAGAIN`)
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// The device ring buffer ran dry (`-EPIPE`)
    #[error("buffer underrun")]
    Underrun,

    /// The device was suspended by the system (`-ESTRPIPE`)
    #[error("stream suspended")]
    Suspended,

    /// No such device (`-ENODEV`)
    #[error("no such device")]
    NoDevice,

    /// Device already claimed (`-EBUSY`)
    #[error("device or resource busy")]
    Busy,

    /// Value outside the device capabilities (`-EINVAL`)
    #[error("invalid argument")]
    InvalidArgument,

    /// Operation not allowed in the current stream state (`-EBADFD`)
    #[error("stream in bad state")]
    BadState,

    /// Any other negative driver code
    #[error("driver error code {0}")]
    Code(i32),
}

const EAGAIN: i32 = 11;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EPIPE: i32 = 32;
const EBADFD: i32 = 77;
const ESTRPIPE: i32 = 86;

impl DriverError {
    /// Negative errno value for this error.
    pub fn code(self) -> i32 {
        match self {
            DriverError::WouldBlock => -EAGAIN,
            DriverError::Underrun => -EPIPE,
            DriverError::Suspended => -ESTRPIPE,
            DriverError::NoDevice => -ENODEV,
            DriverError::Busy => -EBUSY,
            DriverError::InvalidArgument => -EINVAL,
            DriverError::BadState => -EBADFD,
            DriverError::Code(code) => code,
        }
    }

    /// Classify a negative driver return value.
    pub fn from_code(code: i32) -> Self {
        match -code {
            EAGAIN => DriverError::WouldBlock,
            EPIPE => DriverError::Underrun,
            ESTRPIPE => DriverError::Suspended,
            ENODEV => DriverError::NoDevice,
            EBUSY => DriverError::Busy,
            EINVAL => DriverError::InvalidArgument,
            EBADFD => DriverError::BadState,
            _ => DriverError::Code(code),
        }
    }
}

/// Errors surfaced by the playback core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SoundyError {
    /// A negotiation or configuration step was rejected
    #[error("configuration rejected ({step}): {source} [{code}]", code = .source.code())]
    Configuration {
        /// Step that failed, e.g. "set channels"
        step: &'static str,
        /// Underlying driver code
        source: DriverError,
    },

    /// Device could not be opened or recovered
    #[error("device '{device}' unavailable: {source}")]
    DeviceUnavailable {
        /// Device identifier
        device: String,
        /// Underlying driver code
        source: DriverError,
    },

    /// `start` on an engine that is already starting or running
    #[error("playback already started")]
    AlreadyStarted,

    /// Lifecycle call not valid in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// Requested operation
        operation: &'static str,
        /// State observed at the time of the call
        state: PlaybackState,
    },

    /// `start` without a registered generator
    #[error("no generator registered")]
    NoGenerator,

    /// Unrecoverable write-path error
    #[error("stream fault during {during}: {source} [{code}]", code = .source.code())]
    StreamFault {
        /// Operation that faulted
        during: &'static str,
        /// Underlying driver code
        source: DriverError,
    },

    /// The real-time thread panicked; the device went down with it
    #[error("audio thread panicked")]
    WorkerPanicked,

    /// The real-time thread could not be spawned
    #[error("failed to spawn audio thread: {0}")]
    Spawn(String),

    /// Config file could not be read, parsed or written
    #[error("config file error: {0}")]
    ConfigFile(String),
}

impl SoundyError {
    pub(crate) fn configuration(step: &'static str, source: DriverError) -> Self {
        SoundyError::Configuration { step, source }
    }

    pub(crate) fn fault(during: &'static str, source: DriverError) -> Self {
        SoundyError::StreamFault { during, source }
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, SoundyError>;
