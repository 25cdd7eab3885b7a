//! Error types surfaced at the bridge boundary

use thiserror::Error;

/// Failure of an OCR request.
///
/// Every variant is converted into the `{"status": "error"}` response shape by the
/// bridge; none of them is fatal to the host process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The OCR engine could not be loaded (missing models, unsupported platform or
    /// language, runtime not loadable)
    #[error("OCR engine not available: {0}")]
    CollaboratorUnavailable(String),

    /// Image decoding or text recognition failed
    #[error("{0}")]
    RecognitionFailure(String),

    /// The request itself was unusable (empty buffer, empty bounding box, ...)
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl BridgeError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::CollaboratorUnavailable(_) => "collaborator_unavailable",
            BridgeError::RecognitionFailure(_) => "recognition_failure",
            BridgeError::MalformedInput(_) => "malformed_input",
        }
    }

    /// Wrap an engine error, keeping the whole context chain in the message
    pub fn recognition(err: anyhow::Error) -> Self {
        BridgeError::RecognitionFailure(format!("{err:#}"))
    }

    /// Wrap an engine loading error, keeping the whole context chain in the message
    pub fn unavailable(err: anyhow::Error) -> Self {
        BridgeError::CollaboratorUnavailable(format!("{err:#}"))
    }
}

/// Failure to dispatch a bridge command
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid arguments for '{command}': {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BridgeError::CollaboratorUnavailable("x".into()).kind(),
            "collaborator_unavailable"
        );
        assert_eq!(BridgeError::RecognitionFailure("x".into()).kind(), "recognition_failure");
        assert_eq!(BridgeError::MalformedInput("x".into()).kind(), "malformed_input");
    }

    #[test]
    fn test_unavailable_message_names_dependency() {
        let err = BridgeError::CollaboratorUnavailable("det.onnx missing".into());
        assert_eq!(err.to_string(), "OCR engine not available: det.onnx missing");
    }

    #[test]
    fn test_recognition_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("tensor shape mismatch"));
        let err = inner.context("Recognition inference failed").unwrap_err();

        let bridged = BridgeError::recognition(err);
        assert_eq!(
            bridged.to_string(),
            "Recognition inference failed: tensor shape mismatch"
        );
    }

    #[test]
    fn test_invoke_error_display() {
        let err = InvokeError::InvalidArguments {
            command: "greet",
            reason: "expected a string".into(),
        };
        assert_eq!(err.to_string(), "invalid arguments for 'greet': expected a string");
        assert_eq!(
            InvokeError::UnknownCommand("nope".into()).to_string(),
            "unknown command 'nope'"
        );
    }
}
