/// Split a tmux command-argument string into tokens.
///
/// Single and double quotes group whitespace. A backslash escapes the next
/// character (quotes and spaces included) and is itself dropped. An
/// unterminated quote is not an error: the remainder becomes the last token.
///
/// Both the blocked-subcommand check and session-name extraction go through
/// this function, so they always agree on what a command means.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_token = true;
                }
            }
            '\'' | '"' if quote.is_none() => {
                quote = Some(c);
                in_token = true;
            }
            c if quote == Some(c) => {
                quote = None;
            }
            c if c.is_whitespace() && quote.is_none() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}

/// Split a token stream into the individual tmux commands it contains.
///
/// Tokens are the argv tmux receives, and the split follows tmux's own rule:
/// an argument ending in `;` ends the current command and the `;` is dropped,
/// unless it is preceded by a backslash, in which case the argument keeps a
/// literal `;`. A bare `;` token is just a separator.
pub fn split_commands(tokens: &[String]) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    let mut current = Vec::new();

    for token in tokens {
        let Some(head) = token.strip_suffix(';') else {
            current.push(token.clone());
            continue;
        };
        if let Some(literal) = head.strip_suffix('\\') {
            current.push(format!("{};", literal));
            continue;
        }
        if !head.is_empty() {
            current.push(head.to_string());
        }
        if !current.is_empty() {
            commands.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        commands.push(current);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_argument_and_escaped_separator() {
        let tokens = tokenize(r"new-session -d -s cea-a \; send-keys -t cea-a 'echo hi' Enter");
        assert_eq!(
            tokens,
            vec![
                "new-session",
                "-d",
                "-s",
                "cea-a",
                ";",
                "send-keys",
                "-t",
                "cea-a",
                "echo hi",
                "Enter"
            ]
        );
    }

    #[test]
    fn test_double_quotes_keep_single_quotes() {
        let tokens = tokenize(r#"send-keys -t cea-x "it's done" Enter"#);
        assert_eq!(tokens[3], "it's done");
    }

    #[test]
    fn test_escaped_space_and_quote() {
        assert_eq!(tokenize(r"a\ b c\'d"), vec!["a b", "c'd"]);
    }

    #[test]
    fn test_unterminated_quote_takes_remainder() {
        assert_eq!(
            tokenize("send-keys 'echo hello   world"),
            vec!["send-keys", "echo hello   world"]
        );
    }

    #[test]
    fn test_whitespace_runs_and_empty_quotes() {
        assert_eq!(tokenize("  a \t  b  "), vec!["a", "b"]);
        assert_eq!(tokenize("a '' b"), vec!["a", "", "b"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_split_commands() {
        let tokens = tokenize(r"new -s cea-a \; kill-session -t cea-b \;");
        let parts = split_commands(&tokens);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1][0], "kill-session");
    }

    #[test]
    fn test_trailing_semicolon_on_argument_separates() {
        // `Enter\;` reaches tmux as the single argument `Enter;`.
        let tokens = tokenize(r"send-keys -t cea-x Enter\; capturep -p -t cea-x");
        assert_eq!(tokens[3], "Enter;");
        let parts = split_commands(&tokens);
        assert_eq!(
            parts,
            vec![
                vec!["send-keys", "-t", "cea-x", "Enter"],
                vec!["capturep", "-p", "-t", "cea-x"],
            ]
        );
    }

    #[test]
    fn test_escaped_trailing_semicolon_stays_literal() {
        // `echo\\;` reaches tmux as `echo\;`, which tmux keeps as `echo;`.
        let tokens = tokenize(r"send-keys -t cea-x echo\\; Enter");
        assert_eq!(tokens[3], r"echo\;");
        let parts = split_commands(&tokens);
        assert_eq!(parts, vec![vec!["send-keys", "-t", "cea-x", "echo;", "Enter"]]);
    }

    #[test]
    fn test_quoted_semicolon_is_still_a_separator() {
        let parts = split_commands(&tokenize("new -d -s 'cea-a;' kill-server"));
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], vec!["new", "-d", "-s", "cea-a"]);
        assert_eq!(parts[1], vec!["kill-server"]);
    }
}
