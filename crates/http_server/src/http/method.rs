use std::fmt::Display;
use std::str::FromStr;

/// An HTTP request method.
///
/// Only the methods the server routes are represented; an unrecognized
/// token on the request line fails the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether a request with this method carries a framed body.
    /// Other methods complete at the header terminator regardless of any
    /// `Content-Length` header; trailing bytes belong to the next request.
    pub fn expects_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMethodError;

impl Display for UnknownMethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("unknown HTTP method")
    }
}

impl std::error::Error for UnknownMethodError {}

impl FromStr for Method {
    type Err = UnknownMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            _ => return Err(UnknownMethodError),
        })
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
