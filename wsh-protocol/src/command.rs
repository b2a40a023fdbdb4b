use serde::Deserialize;
use serde::Serialize;

/// Whether a registered method returns one value or a stream of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// `(T, Result<T, E>)`-shaped method: exactly one response frame.
    Call,
    /// Method returns a stream of `Result<T, E>`: many `cont=true` frames
    /// followed by one `cont=false` frame.
    ResponseStream,
}

/// A static record describing one registered server method, built once at
/// startup by enumerating the server's `*Command` methods.
#[derive(Debug, Clone)]
pub struct CommandDeclaration {
    pub command: &'static str,
    pub command_type: CommandType,
    pub method_name: &'static str,
}

impl CommandDeclaration {
    pub const fn call(command: &'static str, method_name: &'static str) -> Self {
        Self {
            command,
            command_type: CommandType::Call,
            method_name,
        }
    }

    pub const fn response_stream(command: &'static str, method_name: &'static str) -> Self {
        Self {
            command,
            command_type: CommandType::ResponseStream,
            method_name,
        }
    }
}
