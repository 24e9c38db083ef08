//! Shell-like tokenizer turning one logical line into a [`ParsedCommand`].
//!
//! The parser is total: any input, including unmatched quotes and stray
//! escapes, produces a best-effort result. It holds no state between calls.

use serde_json::Value;

use remsh_protocol::ParsedCommand;

/// Tokenize one logical line.
///
/// Rules:
/// * a trailing `\G` (after right-trim) flags vertical output and is removed
///   from the token stream;
/// * tokens are split on runs of ASCII whitespace outside quotes;
/// * double quotes honour `\"`, `\\`, `\n`, `\t`, `\r`; single quotes are
///   literal; an unclosed quote extends to end of input;
/// * the first token is the command; `--name=value` becomes a string option,
///   bare `--name` and `-x` become boolean options, everything else is a
///   positional argument in input order.
pub fn parse(input: &str) -> ParsedCommand {
    if input.trim().is_empty() {
        return ParsedCommand::default();
    }

    let mut parsed = ParsedCommand {
        raw: input.to_string(),
        ..Default::default()
    };

    let mut body = input.trim_end();
    if let Some(stripped) = body.strip_suffix("\\G") {
        parsed.vertical = true;
        body = stripped;
    }

    let mut tokens = tokenize(body).into_iter();
    if let Some(head) = tokens.next() {
        parsed.command = head;
    }
    for token in tokens {
        classify(token, &mut parsed);
    }
    parsed
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_ascii_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        None | Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('"') => current.push('"'),
                            Some('\\') => current.push('\\'),
                            Some('n') => current.push('\n'),
                            Some('t') => current.push('\t'),
                            Some('r') => current.push('\r'),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => current.push('\\'),
                        },
                        Some(other) => current.push(other),
                    }
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        None | Some('\'') => break,
                        Some(other) => current.push(other),
                    }
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn classify(token: String, parsed: &mut ParsedCommand) {
    if let Some(rest) = token.strip_prefix("--") {
        if rest.is_empty() {
            parsed.arguments.push(token);
            return;
        }
        match rest.split_once('=') {
            Some(("", _)) => parsed.arguments.push(token),
            Some((name, value)) => {
                parsed
                    .options
                    .insert(name.to_string(), Value::String(value.to_string()));
            }
            None => {
                parsed.options.insert(rest.to_string(), Value::Bool(true));
            }
        }
        return;
    }

    if let Some(rest) = token.strip_prefix('-') {
        if rest.is_empty() {
            parsed.arguments.push(token);
            return;
        }
        match rest.split_once('=') {
            Some(("", _)) => parsed.arguments.push(token),
            Some((name, value)) => {
                parsed
                    .options
                    .insert(name.to_string(), Value::String(value.to_string()));
            }
            None => {
                parsed.options.insert(rest.to_string(), Value::Bool(true));
            }
        }
        return;
    }

    parsed.arguments.push(token);
}
