//! Argument string splitting.
//!
//! Callers hand the runner one pre-assembled string. On Windows it goes to the
//! child verbatim; elsewhere it has to become an argv, which is what
//! [`split_arguments`] does. No shell expansion happens here.

/// Split `input` into arguments.
///
/// - Unquoted whitespace separates arguments.
/// - Double quotes group text (including whitespace) into one argument and
///   are removed.
/// - `\"` and `\\` produce a literal `"` and `\`; any other backslash is kept.
/// - Single quotes are ordinary characters.
pub fn split_arguments(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                in_token = true;
                match chars.peek() {
                    Some(&next) if next == '"' || next == '\\' => {
                        current.push(next);
                        chars.next();
                    }
                    _ => current.push('\\'),
                }
            }
            '"' => {
                in_token = true;
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        args.push(current);
    }

    args
}
