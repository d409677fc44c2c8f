//! The strict action grammar.
//!
//! Keywords are case-insensitive, payloads case-sensitive. Parsing then
//! re-serializing yields a canonical form equal modulo whitespace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// One executor-proposed action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Click element by snapshot id.
    Click { id: u64 },
    /// Focus element by id, then type text.
    Type { id: u64, text: String },
    /// Keyboard press (Enter, Escape, Tab, single characters).
    Press { key: String },
    /// Viewport-coordinate click (vision fallback).
    ClickXy { x: f64, y: f64 },
    /// Click rectangle center (vision fallback).
    ClickRect { x: f64, y: f64, w: f64, h: f64 },
    /// Terminal success token.
    Finish,
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Finish)
    }

    /// Vision actions address raw coordinates instead of snapshot ids.
    pub fn is_vision(&self) -> bool {
        matches!(self, Action::ClickXy { .. } | Action::ClickRect { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Click { id } => write!(f, "CLICK({id})"),
            Action::Type { id, text } => write!(f, "TYPE({id},{})", quote(text)),
            Action::Press { key } => write!(f, "PRESS({})", quote(key)),
            Action::ClickXy { x, y } => {
                write!(f, "CLICK_XY({},{})", format_num(*x), format_num(*y))
            }
            Action::ClickRect { x, y, w, h } => write!(
                f,
                "CLICK_RECT({},{},{},{})",
                format_num(*x),
                format_num(*y),
                format_num(*w),
                format_num(*h)
            ),
            Action::Finish => write!(f, "FINISH()"),
        }
    }
}

fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn format_num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e12 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Parse one action string. The whole input must be a single action.
pub fn parse_action(input: &str) -> Result<Action, AgentError> {
    let trimmed = input.trim();
    let open = trimmed
        .find('(')
        .ok_or_else(|| AgentError::parse(input, "missing '('"))?;
    if !trimmed.ends_with(')') {
        return Err(AgentError::parse(input, "missing trailing ')'"));
    }
    let keyword = trimmed[..open].trim().to_ascii_uppercase();
    let body = &trimmed[open + 1..trimmed.len() - 1];
    let args = split_args(body).map_err(|reason| AgentError::parse(input, reason))?;

    match keyword.as_str() {
        "CLICK" => {
            let [id] = expect_args::<1>(input, &args)?;
            Ok(Action::Click {
                id: parse_id(input, &id)?,
            })
        }
        "TYPE" => {
            let [id, text] = expect_args::<2>(input, &args)?;
            Ok(Action::Type {
                id: parse_id(input, &id)?,
                text: parse_string(input, &text)?,
            })
        }
        "PRESS" => {
            let [key] = expect_args::<1>(input, &args)?;
            Ok(Action::Press {
                key: parse_string(input, &key)?,
            })
        }
        "CLICK_XY" => {
            let [x, y] = expect_args::<2>(input, &args)?;
            Ok(Action::ClickXy {
                x: parse_num(input, &x)?,
                y: parse_num(input, &y)?,
            })
        }
        "CLICK_RECT" => {
            let [x, y, w, h] = expect_args::<4>(input, &args)?;
            Ok(Action::ClickRect {
                x: parse_num(input, &x)?,
                y: parse_num(input, &y)?,
                w: parse_num(input, &w)?,
                h: parse_num(input, &h)?,
            })
        }
        "FINISH" => {
            if !args.is_empty() {
                return Err(AgentError::parse(input, "FINISH takes no arguments"));
            }
            Ok(Action::Finish)
        }
        other => Err(AgentError::parse(input, format!("unknown keyword '{other}'"))),
    }
}

#[derive(Clone, Debug)]
enum Arg {
    Bare(String),
    Quoted(String),
}

fn expect_args<const N: usize>(input: &str, args: &[Arg]) -> Result<[Arg; N], AgentError> {
    if args.len() != N {
        return Err(AgentError::parse(
            input,
            format!("expected {N} argument(s), got {}", args.len()),
        ));
    }
    let mut iter = args.iter().cloned();
    Ok(std::array::from_fn(|_| iter.next().expect("length checked")))
}

fn parse_id(input: &str, arg: &Arg) -> Result<u64, AgentError> {
    match arg {
        Arg::Bare(raw) => raw
            .parse::<u64>()
            .map_err(|_| AgentError::parse(input, format!("'{raw}' is not an element id"))),
        Arg::Quoted(_) => Err(AgentError::parse(input, "element id must be unquoted")),
    }
}

fn parse_num(input: &str, arg: &Arg) -> Result<f64, AgentError> {
    match arg {
        Arg::Bare(raw) => raw
            .parse::<f64>()
            .map_err(|_| AgentError::parse(input, format!("'{raw}' is not a number"))),
        Arg::Quoted(_) => Err(AgentError::parse(input, "coordinates must be unquoted")),
    }
}

fn parse_string(input: &str, arg: &Arg) -> Result<String, AgentError> {
    match arg {
        Arg::Quoted(text) => Ok(text.clone()),
        Arg::Bare(_) => Err(AgentError::parse(input, "expected a quoted string")),
    }
}

/// Split comma-separated arguments, honoring double quotes with
/// backslash escapes.
fn split_args(body: &str) -> Result<Vec<Arg>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut saw_quote = false;
    let mut escaped = false;
    let mut chars = body.chars();

    loop {
        let Some(ch) = chars.next() else { break };
        if in_quote {
            if escaped {
                let resolved = match ch {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                };
                current.push(resolved);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quote = false;
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '"' => {
                in_quote = true;
                saw_quote = true;
            }
            ',' => {
                push_arg(&mut args, &mut current, &mut saw_quote)?;
            }
            other => current.push(other),
        }
    }
    if in_quote {
        return Err("unterminated string".to_string());
    }
    if !current.trim().is_empty() || saw_quote {
        push_arg(&mut args, &mut current, &mut saw_quote)?;
    }
    Ok(args)
}

fn push_arg(args: &mut Vec<Arg>, current: &mut String, saw_quote: &mut bool) -> Result<(), String> {
    if *saw_quote {
        args.push(Arg::Quoted(std::mem::take(current)));
        *saw_quote = false;
        return Ok(());
    }
    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err("empty argument".to_string());
    }
    args.push(Arg::Bare(trimmed.to_string()));
    current.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_form() {
        assert_eq!(parse_action("CLICK(3)").unwrap(), Action::Click { id: 3 });
        assert_eq!(
            parse_action("TYPE(7,\"hello world\")").unwrap(),
            Action::Type {
                id: 7,
                text: "hello world".into()
            }
        );
        assert_eq!(
            parse_action("PRESS(\"Enter\")").unwrap(),
            Action::Press {
                key: "Enter".into()
            }
        );
        assert_eq!(
            parse_action("CLICK_XY(10.5,20)").unwrap(),
            Action::ClickXy { x: 10.5, y: 20.0 }
        );
        assert_eq!(
            parse_action("CLICK_RECT(1,2,3,4)").unwrap(),
            Action::ClickRect {
                x: 1.0,
                y: 2.0,
                w: 3.0,
                h: 4.0
            }
        );
        assert_eq!(parse_action("FINISH()").unwrap(), Action::Finish);
    }

    #[test]
    fn keywords_are_case_insensitive_payloads_are_not() {
        assert_eq!(
            parse_action("click(3)").unwrap(),
            parse_action("CLICK(3)").unwrap()
        );
        let action = parse_action("type(1,\"CaseSensitive\")").unwrap();
        assert_eq!(
            action,
            Action::Type {
                id: 1,
                text: "CaseSensitive".into()
            }
        );
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert_eq!(
            parse_action("  CLICK( 42 )  ").unwrap(),
            Action::Click { id: 42 }
        );
        assert_eq!(
            parse_action("CLICK_XY( 10 , 20 )").unwrap(),
            Action::ClickXy { x: 10.0, y: 20.0 }
        );
    }

    #[test]
    fn quoted_strings_handle_escapes_and_commas() {
        let action = parse_action(r#"TYPE(2,"a, \"quoted\" value\nnext")"#).unwrap();
        assert_eq!(
            action,
            Action::Type {
                id: 2,
                text: "a, \"quoted\" value\nnext".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_action("").is_err());
        assert!(parse_action("DO_THING(1)").is_err());
        assert!(parse_action("CLICK(one)").is_err());
        assert!(parse_action("CLICK(1,2)").is_err());
        assert!(parse_action("TYPE(1,unquoted)").is_err());
        assert!(parse_action("FINISH(now)").is_err());
        assert!(parse_action("CLICK(1").is_err());
        assert!(parse_action(r#"TYPE(1,"open)"#).is_err());
    }

    #[test]
    fn round_trips_to_canonical_form() {
        for input in [
            "click( 3 )",
            "TYPE(7, \"hello\")",
            "press(\"Enter\")",
            "CLICK_XY( 10.5 , 20 )",
            "click_rect(1, 2, 3, 4)",
            "finish()",
        ] {
            let action = parse_action(input).unwrap();
            let canonical = action.to_string();
            assert_eq!(parse_action(&canonical).unwrap(), action);
            // canonical form is whitespace-free outside payloads
            assert_eq!(canonical, canonical.trim());
        }
        assert_eq!(parse_action("click(3)").unwrap().to_string(), "CLICK(3)");
        assert_eq!(
            parse_action("CLICK_XY(10.0, 20.0)").unwrap().to_string(),
            "CLICK_XY(10,20)"
        );
    }
}
