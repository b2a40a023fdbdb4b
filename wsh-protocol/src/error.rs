/// The error-kind taxonomy from the spec. These are not a Rust `Error` type
/// that gets propagated by `?`; they are the vocabulary used to format the
/// `error` string carried on a terminal [`crate::RpcMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoRoute,
    Unauthenticated,
    Timeout,
    Canceled,
    Decode,
    HandlerPanic,
}

pub const EC_TIME_PREFIX: &str = "EC-TIME";

impl ErrorKind {
    /// Render the canonical error string carried in `RpcMessage.error`.
    pub fn format(self, detail: &str) -> String {
        match self {
            ErrorKind::NoRoute => format!("no route for \"{detail}\""),
            ErrorKind::Unauthenticated => "unauthenticated".to_string(),
            ErrorKind::Timeout => format!("{EC_TIME_PREFIX}: {detail}"),
            ErrorKind::Canceled => "canceled".to_string(),
            ErrorKind::Decode => format!("decode error: {detail}"),
            ErrorKind::HandlerPanic => format!("handler panicked: {detail}"),
        }
    }
}

pub fn timeout_error() -> String {
    ErrorKind::Timeout.format("timeout waiting for response")
}

pub fn no_route_error(route: &str) -> String {
    ErrorKind::NoRoute.format(route)
}

pub fn is_timeout_error(error: &str) -> bool {
    error.starts_with(EC_TIME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_timeout_like_the_spec_literal() {
        assert_eq!(
            timeout_error(),
            "EC-TIME: timeout waiting for response"
        );
        assert!(is_timeout_error(&timeout_error()));
    }

    #[test]
    fn formats_no_route_like_the_spec_scenario() {
        assert_eq!(
            no_route_error("conn:missing"),
            "no route for \"conn:missing\""
        );
    }
}
