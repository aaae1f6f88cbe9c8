use std::fmt;

use bytes::Bytes;

use crate::resp::Value;

/// The closed command vocabulary. A variant is only ever constructed with a
/// full argument set; arity is checked in [`Command::from_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Hello(String),
    Client(String),
    Get(Bytes),
    Set { key: Bytes, value: Bytes },
    Del(Bytes),
}

#[derive(Debug, PartialEq)]
pub enum CommandError {
    NotAnArray,
    EmptyRequest,
    NotAString { index: usize },
    WrongArity { command: &'static str, expected: usize, actual: usize },
    Unknown(String),
}

impl Command {
    /// Parses a decoded wire value into a command.
    ///
    /// Requests are arrays of strings whose first element names the command.
    /// Token matching is ASCII case-insensitive, so `SET` and `set` are the
    /// same command.
    pub fn from_value(value: Value) -> Result<Command, CommandError> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(CommandError::NotAnArray),
        };
        if items.is_empty() {
            return Err(CommandError::EmptyRequest);
        }

        let token = items[0]
            .as_bytes()
            .ok_or(CommandError::NotAString { index: 0 })?;
        let token = String::from_utf8_lossy(&token).into_owned();

        let arg = |index: usize| -> Result<Bytes, CommandError> {
            items[index]
                .as_bytes()
                .ok_or(CommandError::NotAString { index })
        };
        let text = |index: usize| -> Result<String, CommandError> {
            arg(index).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        };
        let expect = |command: &'static str, expected: usize| -> Result<(), CommandError> {
            if items.len() == expected {
                Ok(())
            } else {
                Err(CommandError::WrongArity {
                    command,
                    expected,
                    actual: items.len(),
                })
            }
        };

        match token.to_ascii_lowercase().as_str() {
            "hello" => {
                expect("hello", 2)?;
                Ok(Command::Hello(text(1)?))
            }
            "client" => {
                expect("client", 2)?;
                Ok(Command::Client(text(1)?))
            }
            "get" => {
                expect("get", 2)?;
                Ok(Command::Get(arg(1)?))
            }
            "set" => {
                expect("set", 3)?;
                Ok(Command::Set {
                    key: arg(1)?,
                    value: arg(2)?,
                })
            }
            "del" => {
                expect("del", 2)?;
                Ok(Command::Del(arg(1)?))
            }
            _ => Err(CommandError::Unknown(token)),
        }
    }

    /// Command name as it appears on the wire, for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Hello(_) => "hello",
            Command::Client(_) => "client",
            Command::Get(_) => "get",
            Command::Set { .. } => "set",
            Command::Del(_) => "del",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotAnArray => write!(f, "request is not an array"),
            CommandError::EmptyRequest => write!(f, "request array is empty"),
            CommandError::NotAString { index } => {
                write!(f, "request element {index} is not a string")
            }
            CommandError::WrongArity {
                command,
                expected,
                actual,
            } => write!(f, "{command} expects {expected} elements, got {actual}"),
            CommandError::Unknown(token) => write!(f, "unknown command '{token}'"),
        }
    }
}

impl std::error::Error for CommandError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(parts: &[&str]) -> Value {
        Value::Array(
            parts
                .iter()
                .map(|part| Value::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn parses_the_full_vocabulary() {
        assert_eq!(
            Command::from_value(request(&["set", "foo", "bar"])),
            Ok(Command::Set {
                key: Bytes::from_static(b"foo"),
                value: Bytes::from_static(b"bar"),
            })
        );
        assert_eq!(
            Command::from_value(request(&["get", "foo"])),
            Ok(Command::Get(Bytes::from_static(b"foo")))
        );
        assert_eq!(
            Command::from_value(request(&["del", "foo"])),
            Ok(Command::Del(Bytes::from_static(b"foo")))
        );
        assert_eq!(
            Command::from_value(request(&["hello", "3"])),
            Ok(Command::Hello("3".to_string()))
        );
        assert_eq!(
            Command::from_value(request(&["client", "setinfo"])),
            Ok(Command::Client("setinfo".to_string()))
        );
    }

    #[test]
    fn token_matching_ignores_case() {
        assert_eq!(
            Command::from_value(request(&["SET", "foo", "bar"])),
            Ok(Command::Set {
                key: Bytes::from_static(b"foo"),
                value: Bytes::from_static(b"bar"),
            })
        );
        assert_eq!(
            Command::from_value(request(&["GeT", "foo"])),
            Ok(Command::Get(Bytes::from_static(b"foo")))
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert_eq!(
            Command::from_value(request(&["get"])),
            Err(CommandError::WrongArity {
                command: "get",
                expected: 2,
                actual: 1,
            })
        );
        assert_eq!(
            Command::from_value(request(&["set", "foo"])),
            Err(CommandError::WrongArity {
                command: "set",
                expected: 3,
                actual: 2,
            })
        );
        assert_eq!(
            Command::from_value(request(&["del", "a", "b"])),
            Err(CommandError::WrongArity {
                command: "del",
                expected: 2,
                actual: 3,
            })
        );
    }

    #[test]
    fn unknown_token_is_rejected_with_the_token() {
        assert_eq!(
            Command::from_value(request(&["ping"])),
            Err(CommandError::Unknown("ping".to_string()))
        );
    }

    #[test]
    fn non_array_requests_are_rejected() {
        assert_eq!(
            Command::from_value(Value::Simple("set".to_string())),
            Err(CommandError::NotAnArray)
        );
        assert_eq!(
            Command::from_value(Value::Array(Vec::new())),
            Err(CommandError::EmptyRequest)
        );
        assert_eq!(
            Command::from_value(Value::Array(vec![Value::Integer(1)])),
            Err(CommandError::NotAString { index: 0 })
        );
    }
}
