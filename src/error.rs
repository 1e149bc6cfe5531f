use std::io;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("address roster is empty")]
    EmptyRoster,
    #[error("payload must contain at least one byte")]
    EmptyPayload,
    #[error("could not create control channel: {0}")]
    ControlChannel(#[source] io::Error),
    #[error("could not create reactor: {0}")]
    Poll(#[source] io::Error),
    #[error("could not spawn worker {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("worker {index} panicked")]
    WorkerPanicked { index: usize },
}

/// A dial failure the worker cannot absorb.
#[derive(thiserror::Error, Debug)]
pub enum DialError {
    #[error("socket table is full: {0}")]
    DescriptorsExhausted(#[source] io::Error),
}

impl DialError {
    /// Hands retryable socket creation errors back, escalates the rest.
    pub(crate) fn classify(err: io::Error) -> Result<io::Error, DialError> {
        match err.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) => Err(DialError::DescriptorsExhausted(err)),
            _ => Ok(err),
        }
    }
}
