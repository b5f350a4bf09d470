//! Parsing of `--define` and `--input` arguments.
//!
//! Values use the same notation the CLI prints: `2.5` is a scalar,
//! `1,2,3` a vector and `#7` an id. In batch mode one argument may hold a
//! value per instance, separated by `/`; the last one repeats.

use vexpr::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("expected NAME=VALUE, found '{0}'")]
    MissingEquals(String),

    #[error("missing name in '{0}'")]
    EmptyName(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("invalid id '{0}'")]
    InvalidId(String),

    #[error("value has {0} components, at most 4 are allowed")]
    TooManyComponents(usize),
}

/// Values for one input, one per batch instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub values: Vec<Value>,
}

impl Assignment {
    /// The value for `instance`; the last value covers the rest of the batch.
    pub fn value_for(&self, instance: usize) -> Value {
        self.values
            .get(instance)
            .or(self.values.last())
            .copied()
            .unwrap_or_default()
    }
}

fn split(arg: &str) -> Result<(&str, &str), ArgError> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| ArgError::MissingEquals(arg.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ArgError::EmptyName(arg.to_string()));
    }
    Ok((name, value.trim()))
}

pub fn parse_define(arg: &str) -> Result<(String, String), ArgError> {
    let (key, value) = split(arg)?;
    Ok((key.to_string(), value.to_string()))
}

pub fn parse_assignment(arg: &str) -> Result<Assignment, ArgError> {
    let (name, values) = split(arg)?;
    let values = values
        .split('/')
        .map(parse_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Assignment {
        name: name.to_string(),
        values,
    })
}

fn parse_value(text: &str) -> Result<Value, ArgError> {
    let text = text.trim();
    if let Some(id) = text.strip_prefix('#') {
        return id
            .parse::<u32>()
            .map(Value::id)
            .map_err(|_| ArgError::InvalidId(text.to_string()));
    }
    let text = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    let components = text
        .split(',')
        .map(|c| {
            c.trim()
                .parse::<f32>()
                .map_err(|_| ArgError::InvalidNumber(c.trim().to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if components.len() > 4 {
        return Err(ArgError::TooManyComponents(components.len()));
    }
    Ok(Value::vector(&components))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_vectors_and_ids() {
        assert_eq!(parse_value("2.5"), Ok(Value::scalar(2.5)));
        assert_eq!(parse_value("1, 2,3"), Ok(Value::vector(&[1.0, 2.0, 3.0])));
        assert_eq!(parse_value("(1,2)"), Ok(Value::vector(&[1.0, 2.0])));
        assert_eq!(parse_value("#42"), Ok(Value::id(42)));
        assert_eq!(
            parse_value("1,2,3,4,5"),
            Err(ArgError::TooManyComponents(5))
        );
        assert_eq!(parse_value("#x"), Err(ArgError::InvalidId("#x".into())));
    }

    #[test]
    fn batch_values_repeat_the_last_one() {
        let assignment = parse_assignment("x = 1/2").unwrap();
        assert_eq!(assignment.name, "x");
        assert_eq!(assignment.value_for(0), Value::scalar(1.0));
        assert_eq!(assignment.value_for(1), Value::scalar(2.0));
        assert_eq!(assignment.value_for(7), Value::scalar(2.0));
    }

    #[test]
    fn defines_need_a_key() {
        assert_eq!(
            parse_define("stack_size=32"),
            Ok(("stack_size".to_string(), "32".to_string()))
        );
        assert_eq!(parse_define("=3"), Err(ArgError::EmptyName("=3".into())));
        assert_eq!(
            parse_define("stack_size"),
            Err(ArgError::MissingEquals("stack_size".into()))
        );
    }
}
