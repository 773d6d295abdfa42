//! Errors raised while assembling a [`TimewarpConfig`](crate::TimewarpConfig)

use std::fmt::Write;
use std::path::PathBuf;

use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file is absent.
    #[error("timewarp config file {} does not exist", .0.display())]
    MissingFile(PathBuf),

    /// The layers merged but some value is out of bounds.
    #[error("timewarp config rejected:\n{}", describe_rejections(.0))]
    Rejected(#[source] ValidationErrors),

    /// A layer could not be read or does not match the config schema.
    #[error("could not read timewarp config: {0}")]
    Unreadable(#[source] Box<figment::Error>),
}

/// One line per offending setting, as `section.key: reason`, sorted by key.
fn describe_rejections(errors: &ValidationErrors) -> String {
    let mut lines = Vec::new();
    collect_rejections("", errors, &mut lines);
    lines.sort();

    let mut output = String::new();
    for line in lines {
        let _ = writeln!(output, "  {line}");
    }
    output
}

fn collect_rejections(prefix: &str, errors: &ValidationErrors, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Struct(nested) => collect_rejections(&path, nested, lines),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_rejections(&format!("{path}[{index}]"), nested, lines);
                }
            }
            ValidationErrorsKind::Field(failures) => {
                for failure in failures {
                    let mut reason = match &failure.message {
                        Some(message) => message.to_string(),
                        None => failure.code.to_string(),
                    };
                    if let (Some(min), Some(max)) =
                        (failure.params.get("min"), failure.params.get("max"))
                    {
                        let _ = write!(reason, " (allowed {min}..={max})");
                    }
                    lines.push(format!("{path}: {reason}"));
                }
            }
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Rejected(errors)
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Unreadable(Box::new(error))
    }
}
