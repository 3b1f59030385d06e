//! CLI utilities for docsql.
//!
//! A command line names an operation followed by its JSON arguments and optional flags:
//!
//! ```text
//! > insert {"name": "ann", "age": 30}
//! > find {"age": {"$gte": 18}} {"name": 1} --limit 10
//! > update-many {"age": {"$lt": 18}} {"$set": {"minor": true}} --count
//! > .exit
//! ```
//!
//! # Example
//! ```rust
//! use docsql::{Command, cli::Operation};
//!
//! let cmd: Command = "count {\"ok\": true}".try_into().unwrap();
//! assert!(matches!(cmd, Command::Operation { operation: Operation::Count { .. }, .. }));
//! ```
use std::io::{self, BufRead, Write};

use serde_json::{Deserializer, Value};
use thiserror::Error;

use crate::{
    document::{Document, from_value},
    engine::Connector,
    error::StorageError,
    evaluator::Evaluator,
    storage::{DocumentStorage, Options, Reply},
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("failed to read command: {0}")]
    Io(#[from] io::Error),
}

/// Document operation together with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Count {
        criteria: Document,
    },
    InsertOne {
        document: Document,
    },
    InsertMany {
        documents: Vec<Document>,
    },
    FindOne {
        criteria: Document,
        projection: Document,
    },
    FindMany {
        criteria: Document,
        projection: Document,
    },
    UpdateOne {
        criteria: Document,
        update: Document,
    },
    UpdateMany {
        criteria: Document,
        update: Document,
    },
    ReplaceOne {
        criteria: Document,
        replacement: Document,
    },
    DeleteOne {
        criteria: Document,
    },
    DeleteMany {
        criteria: Document,
    },
}

impl Operation {
    pub fn run<C: Connector, E: Evaluator>(
        &self,
        storage: &DocumentStorage<C, E>,
        options: &Options,
    ) -> Result<Reply, StorageError> {
        match self {
            Operation::Count { criteria } => storage.count(criteria, options),
            Operation::InsertOne { document } => storage.insert_one(document, options),
            Operation::InsertMany { documents } => storage.insert_many(documents, options),
            Operation::FindOne {
                criteria,
                projection,
            } => storage.find_one(criteria, projection, options),
            Operation::FindMany {
                criteria,
                projection,
            } => storage.find_many(criteria, projection, options),
            Operation::UpdateOne { criteria, update } => {
                storage.update_one(criteria, update, options)
            }
            Operation::UpdateMany { criteria, update } => {
                storage.update_many(criteria, update, options)
            }
            Operation::ReplaceOne {
                criteria,
                replacement,
            } => storage.replace_one(criteria, replacement, options),
            Operation::DeleteOne { criteria } => storage.delete_one(criteria, options),
            Operation::DeleteMany { criteria } => storage.delete_many(criteria, options),
        }
    }
}

/// Possible commands from a user.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Drop the backing table, `.drop`
    Drop,
    /// `.flush`
    Flush,
    Operation {
        operation: Operation,
        options: Options,
    },
}

fn invalid(command: &str, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Splits trailing `--count` and `--limit N` flags off `args`.
fn split_flags<'a>(command: &str, mut args: &'a str) -> Result<(&'a str, Options), CommandError> {
    let mut options = Options::default();
    loop {
        args = args.trim_end();
        let (head, last) = args.rsplit_once(char::is_whitespace).unwrap_or(("", args));

        if last == "--count" {
            options.return_documents = false;
            args = head;
            continue;
        }

        let (rest, flag) = head
            .trim_end()
            .rsplit_once(char::is_whitespace)
            .unwrap_or(("", head.trim_end()));
        if flag == "--limit" {
            options.limit = last.parse().map_err(|_| {
                invalid(command, "--limit requires a non-negative integer. Example: --limit 10")
            })?;
            args = rest;
            continue;
        }

        return Ok((args, options));
    }
}

/// Parses whitespace-separated JSON values.
fn json_arguments(command: &str, args: &str) -> Result<Vec<Value>, CommandError> {
    Deserializer::from_str(args)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(command, format!("arguments must be JSON values: {e}")))
}

fn object(command: &str, value: Option<Value>) -> Result<Document, CommandError> {
    match value {
        None => Ok(Document::new()),
        Some(value) => from_value(value).ok_or_else(|| invalid(command, "expected a JSON object")),
    }
}

fn required(command: &str, value: Option<Value>, example: &str) -> Result<Document, CommandError> {
    match value {
        None => Err(invalid(command, format!("missing argument. Example: {example}"))),
        value => object(command, value),
    }
}

fn operation(name: &str, args: &str) -> Result<Operation, CommandError> {
    let values = json_arguments(name, args)?;
    let expected = match name {
        "count" | "delete" | "delete-many" | "insert" | "insert-many" => 1,
        _ => 2,
    };
    if values.len() > expected {
        return Err(invalid(
            name,
            format!("takes at most {expected} JSON arguments, got {}", values.len()),
        ));
    }

    let mut values = values.into_iter();
    let first = values.next();
    let second = values.next();

    let operation = match name {
        "count" => Operation::Count {
            criteria: object(name, first)?,
        },
        "insert" => Operation::InsertOne {
            document: required(name, first, "insert {\"name\": \"ann\"}")?,
        },
        "insert-many" => {
            let Some(Value::Array(items)) = first else {
                return Err(invalid(
                    name,
                    "requires an array of objects. Example: insert-many [{\"a\": 1}, {\"a\": 2}]",
                ));
            };
            let documents = items
                .into_iter()
                .map(|item| object(name, Some(item)))
                .collect::<Result<Vec<_>, _>>()?;
            Operation::InsertMany { documents }
        }
        "find-one" => Operation::FindOne {
            criteria: object(name, first)?,
            projection: object(name, second)?,
        },
        "find" => Operation::FindMany {
            criteria: object(name, first)?,
            projection: object(name, second)?,
        },
        "update" | "update-many" => {
            let example = format!("{name} {{\"a\": 1}} {{\"$set\": {{\"b\": 2}}}}");
            let criteria = required(name, first, &example)?;
            let update = required(name, second, &example)?;
            if name == "update" {
                Operation::UpdateOne { criteria, update }
            } else {
                Operation::UpdateMany { criteria, update }
            }
        }
        "replace" => {
            let example = "replace {\"a\": 1} {\"a\": 2}";
            Operation::ReplaceOne {
                criteria: required(name, first, example)?,
                replacement: required(name, second, example)?,
            }
        }
        "delete" => Operation::DeleteOne {
            criteria: object(name, first)?,
        },
        "delete-many" => Operation::DeleteMany {
            criteria: object(name, first)?,
        },
        _ => return Err(CommandError::UnrecognizedCommand(name.to_string())),
    };
    Ok(operation)
}

impl TryInto<Command> for &str {
    type Error = CommandError;

    fn try_into(self) -> Result<Command, Self::Error> {
        match self.trim() {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            ".drop" => Ok(Command::Drop),
            ".flush" => Ok(Command::Flush),
            s if s.starts_with('.') => Err(CommandError::UnrecognizedCommand(s.to_string())),
            s => {
                let (name, args) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
                let (args, options) = split_flags(name, args)?;
                Ok(Command::Operation {
                    operation: operation(name, args)?,
                    options,
                })
            }
        }
    }
}

/// Prompts the user for a command and parses it.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    s.as_str().try_into()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn parse(s: &str) -> Command {
        s.try_into().unwrap()
    }

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_exits_on_end_of_input() {
        let mut output = Vec::new();
        assert_eq!(prompt(&b""[..], &mut output).unwrap(), Command::Exit);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).map_err(|e| e.to_string()).unwrap();
    }

    #[test]
    fn command_from_string() {
        let inputs = vec![
            (".exit", Command::Exit),
            (".drop", Command::Drop),
            (" .flush ", Command::Flush),
            (
                "count",
                Command::Operation {
                    operation: Operation::Count {
                        criteria: Document::new(),
                    },
                    options: Options::default(),
                },
            ),
            (
                "insert {\"a\": [1, 2]}",
                Command::Operation {
                    operation: Operation::InsertOne {
                        document: doc(json!({"a": [1, 2]})),
                    },
                    options: Options::default(),
                },
            ),
            (
                "find {\"a\": 1} {\"b\": 0} --limit 5 --count",
                Command::Operation {
                    operation: Operation::FindMany {
                        criteria: doc(json!({"a": 1})),
                        projection: doc(json!({"b": 0})),
                    },
                    options: Options::counts().with_limit(5),
                },
            ),
            (
                "update-many {} {\"$inc\": {\"n\": 1}}",
                Command::Operation {
                    operation: Operation::UpdateMany {
                        criteria: Document::new(),
                        update: doc(json!({"$inc": {"n": 1}})),
                    },
                    options: Options::default(),
                },
            ),
        ];

        for (cmd, expected) in inputs {
            assert_eq!(parse(cmd), expected, "{cmd}");
        }
    }

    #[test]
    fn insert_many_takes_an_array() {
        let Command::Operation {
            operation: Operation::InsertMany { documents },
            ..
        } = parse("insert-many [{\"a\": 1}, {}]")
        else {
            panic!("expected insert-many");
        };
        assert_eq!(documents, vec![doc(json!({"a": 1})), Document::new()]);
    }

    #[test]
    fn invalid_arguments() {
        let cases = vec![
            "insert",
            "insert [1]",
            "insert-many {\"a\": 1}",
            "update {\"a\": 1}",
            "find {\"a\": 1} {} {}",
            "find {\"a\": ",
            "find --limit x",
        ];

        for case in cases {
            let err = <&str as TryInto<Command>>::try_into(case).unwrap_err();
            assert!(
                matches!(err, CommandError::InvalidCommandArguments { .. }),
                "{case}: {err}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn unknown_operation() {
        parse("upsert {}");
    }

    #[test]
    #[should_panic(expected = "Empty")]
    fn empty_line() {
        parse("   ");
    }
}
