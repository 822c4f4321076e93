//! The textual type-expression grammar:
//! `Expr := Name | (Array|Map|Optional|OneOf|Ref|Link) '<' Expr (',' Expr)* '>'`.
//!
//! Parsing is tokenize, then validate the token-action sequence against a
//! transition table, then walk the tokens with an explicit stack to build
//! the (possibly several, for nested modifiers) raw records a single
//! expression expands into.

use std::collections::HashMap;

use bufferql_base::{err, Result};

const MODIFIER_NAMES: [&str; 6] = ["Array", "Map", "Optional", "OneOf", "Ref", "Link"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// A modifier name immediately followed by `<`, e.g. `Array<`.
    Open(String),
    /// A bare name: `[A-Za-z0-9_/]+` not followed by `<`.
    Name(String),
    Comma,
    Close,
}

/// The four transition-table actions, sentinel `,` bracketing the whole
/// sequence included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Open,
    Name,
    Comma,
    Close,
}

impl Token {
    fn action(&self) -> Action {
        match self {
            Token::Open(_) => Action::Open,
            Token::Name(_) => Action::Name,
            Token::Comma => Action::Comma,
            Token::Close => Action::Close,
        }
    }
}

fn valid_transition(from: Action, to: Action) -> bool {
    use Action::*;
    matches!(
        (from, to),
        (Open, Open)
            | (Open, Name)
            | (Name, Close)
            | (Name, Comma)
            | (Comma, Open)
            | (Comma, Name)
            | (Close, Close)
            | (Close, Comma)
    )
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/'
}

/// Scans `expr` into tokens, left to right, greedy on name characters.
/// A name immediately followed by `<` becomes `Open` only when the name
/// is one of the six modifier keywords; any other name directly
/// followed by `<` is a syntax error, since no other grammar production
/// can consume a bare `<`.
pub fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if is_name_char(c) {
            let start = i;
            while i < chars.len() && is_name_char(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            if i < chars.len() && chars[i] == '<' {
                if !MODIFIER_NAMES.contains(&name.as_str()) {
                    return Err(err(format!(
                        "Invalid schema expression: {expr} ('{name}' is not a modifier type)"
                    )));
                }
                i += 1;
                tokens.push(Token::Open(name));
            } else {
                tokens.push(Token::Name(name));
            }
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c == '>' {
            tokens.push(Token::Close);
            i += 1;
        } else {
            return Err(err(format!(
                "Invalid schema expression: {expr} (unexpected character '{c}')"
            )));
        }
    }
    Ok(tokens)
}

/// Transition-table validation plus angle-bracket depth tracking:
/// depth returns to 0 at the end, and a `,` is only legal at depth >= 1.
fn validate_expression(tokens: &[Token]) -> bool {
    let actions: Vec<Action> = std::iter::once(Action::Comma)
        .chain(tokens.iter().map(Token::action))
        .chain(std::iter::once(Action::Comma))
        .collect();
    for pair in actions.windows(2) {
        if !valid_transition(pair[0], pair[1]) {
            return false;
        }
    }

    let mut depth = 0i32;
    for action in tokens.iter().map(Token::action) {
        match action {
            Action::Open => depth += 1,
            Action::Close => depth -= 1,
            Action::Comma => {
                if depth < 1 {
                    return false;
                }
            }
            Action::Name => {}
        }
    }
    depth == 0
}

/// A single raw, uncompiled record produced by expanding one expression:
/// a type tag name (matching [`crate::types::TypeTag`] spelling) and the
/// child labels it references.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub type_name: String,
    pub children: Vec<String>,
}

/// Expands `exp` (the expression bound to `label`) into a map from label
/// to raw record. A single bare name becomes an `Alias`; anything with
/// modifiers produces one record per nesting level, each nested record's
/// label built by appending `(Modifier)` to its parent's label.
pub fn parse_expression(label: &str, exp: &str) -> Result<HashMap<String, RawRecord>> {
    let tokens = tokenize(exp)?;
    if !validate_expression(&tokens) {
        return Err(err(format!("Invalid schema expression: {exp}")));
    }

    let mut parsed = HashMap::new();

    if tokens.len() == 1 {
        if let Token::Name(name) = &tokens[0] {
            parsed.insert(
                label.to_string(),
                RawRecord {
                    type_name: "Alias".to_string(),
                    children: vec![name.clone()],
                },
            );
            return Ok(parsed);
        }
    }

    struct StackEntry {
        label: String,
    }

    let mut stack: Vec<StackEntry> = Vec::new();
    let mut curr: Option<String> = None;
    let mut running_label = label.to_string();
    let mut outermost = true;

    for token in &tokens {
        match token {
            Token::Open(modifier) => {
                // The outermost modifier keeps the caller's bare label, so
                // e.g. a type defined as `Root: "Array<Int32>"` is always
                // reachable as `schema["Root"]`; only modifiers nested
                // inside it get a label built by appending `(Modifier)`.
                let new_label = if outermost {
                    outermost = false;
                    running_label.clone()
                } else {
                    running_label = format!("{running_label}({modifier})");
                    running_label.clone()
                };
                parsed.insert(
                    new_label.clone(),
                    RawRecord {
                        type_name: modifier.clone(),
                        children: Vec::new(),
                    },
                );
                if let Some(prev) = curr.take() {
                    stack.push(StackEntry { label: prev });
                }
                curr = Some(new_label);
            }
            Token::Name(name) => {
                if let Some(curr_label) = &curr {
                    parsed.get_mut(curr_label).unwrap().children.push(name.clone());
                }
            }
            Token::Close => {
                if let Some(top) = stack.pop() {
                    if let Some(curr_label) = &curr {
                        let finished = curr_label.clone();
                        parsed.get_mut(&top.label).unwrap().children.push(finished);
                    }
                    curr = Some(top.label);
                } else {
                    curr = None;
                }
            }
            Token::Comma => {}
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn single_name_is_alias() {
        let parsed = parse_expression("Pos", "Vector3").unwrap();
        assert_eq!(parsed.len(), 1);
        let record = &parsed["Pos"];
        assert_eq!(record.type_name, "Alias");
        assert_eq!(record.children, vec!["Vector3".to_string()]);
    }

    #[test]
    fn nested_modifiers_produce_one_record_per_level() {
        let parsed = parse_expression("Root", "Array<Map<Optional<Vector3>>>").unwrap();
        assert_eq!(parsed.len(), 3);
        let array = &parsed["Root"];
        assert_eq!(array.type_name, "Array");
        assert_eq!(array.children, vec!["Root(Map)".to_string()]);

        let map = &parsed["Root(Map)"];
        assert_eq!(map.type_name, "Map");
        assert_eq!(map.children, vec!["Root(Map)(Optional)".to_string()]);

        let optional = &parsed["Root(Map)(Optional)"];
        assert_eq!(optional.type_name, "Optional");
        assert_eq!(optional.children, vec!["Vector3".to_string()]);
    }

    #[test]
    fn multiple_children_of_a_modifier() {
        let parsed = parse_expression("U", "OneOf<Int32,Float32>").unwrap();
        let oneof = &parsed["U"];
        assert_eq!(oneof.type_name, "OneOf");
        assert_eq!(
            oneof.children,
            vec!["Int32".to_string(), "Float32".to_string()]
        );
    }

    #[test]
    fn unbalanced_brackets_are_rejected() {
        assert!(parse_expression("Bad", "Array<Int32").is_err());
        assert!(parse_expression("Bad", "Array<Int32>>").is_err());
    }

    #[test]
    fn comma_outside_modifier_is_rejected() {
        assert!(parse_expression("Bad", "Int32,Float32").is_err());
    }

    #[test]
    fn unknown_name_before_angle_bracket_is_rejected() {
        assert!(parse_expression("Bad", "Frobnicate<Int32>").is_err());
    }
}
