/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with a caller-supplied variable lookup.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            match (closed, lookup(&var_name)) {
                (true, Some(val)) if !var_name.is_empty() => result.push_str(&val),
                (true, _) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                    result.push('}');
                },
                // Unterminated: emit literal.
                (false, _) => {
                    result.push_str("${");
                    result.push_str(&var_name);
                },
            }
        } else {
            result.push(ch);
        }
    }

    result
}
