use crate::http::method::Method;

/// Why a byte stream failed to parse as a request.
///
/// Any of these means the message is not well formed; the server answers
/// `400 Bad Request` and closes the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("unrecognized method")]
    UnknownMethod,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("header line without a colon")]
    MalformedHeader,
    #[error("{0} request without Content-Length")]
    MissingContentLength(Method),
    #[error("Content-Length is not a decimal number")]
    InvalidContentLength,
}
