//! Protocol errors

/// Errors that can occur starting or talking to the daemon
#[derive(Debug)]
pub enum ProtocolError {
    /// Failed to start the daemon
    StartFailed(String),
    /// An interface could not be bound
    Interface(String),
    /// Socket setup or send failure
    Socket(String),
    /// Local IPC failure
    Ipc(String),
    /// IO error
    Io(String),
    /// The daemon is not running
    NotRunning,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::StartFailed(e) => write!(f, "failed to start daemon: {}", e),
            ProtocolError::Interface(e) => write!(f, "interface error: {}", e),
            ProtocolError::Socket(e) => write!(f, "socket error: {}", e),
            ProtocolError::Ipc(e) => write!(f, "ipc error: {}", e),
            ProtocolError::Io(e) => write!(f, "io error: {}", e),
            ProtocolError::NotRunning => write!(f, "daemon is not running"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::NotRunning;
        assert_eq!(err.to_string(), "daemon is not running");

        let err = ProtocolError::Interface("eth9 not found".to_string());
        assert_eq!(err.to_string(), "interface error: eth9 not found");

        let err = ProtocolError::StartFailed("no interfaces".to_string());
        assert_eq!(err.to_string(), "failed to start daemon: no interfaces");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ProtocolError = io.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_error_trait_object() {
        let err: Box<dyn std::error::Error> = Box::new(ProtocolError::NotRunning);
        assert!(!err.to_string().is_empty());
    }
}
