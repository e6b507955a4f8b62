/// Global flags that never take a value.
const GLOBAL_FLAGS: &str = "2CDhlNuvV";

/// Global options that consume a value (`-L sock` or `-Lsock`).
const GLOBAL_VALUE_OPTIONS: &str = "cfLST";

/// What a single tmux command does to the session table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// `new-session` with the resolved session name, if one was given.
    Create(Option<String>),
    /// `kill-session`. `all_but` is set for `kill-session -a`.
    Kill { target: Option<String>, all_but: bool },
    /// `kill-server`
    KillAll,
    /// Anything else.
    Other,
}

impl Lifecycle {
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Lifecycle::Other)
    }
}

/// Index of the subcommand token, skipping global options.
///
/// Returns `None` when the command line is ambiguous: unknown global option,
/// value option without its value, or nothing after the options.
fn locate(tokens: &[String]) -> Option<usize> {
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i].as_str();
        if tok == "--" {
            return (i + 1 < tokens.len()).then_some(i + 1);
        }
        if !tok.starts_with('-') || tok.len() == 1 {
            return Some(i);
        }

        let mut consumes_next = false;
        for (pos, c) in tok.char_indices().skip(1) {
            if GLOBAL_VALUE_OPTIONS.contains(c) {
                // Value is either attached (`-Lsock`) or the next token.
                consumes_next = pos + c.len_utf8() == tok.len();
                break;
            }
            if !GLOBAL_FLAGS.contains(c) {
                return None;
            }
        }

        i += if consumes_next { 2 } else { 1 };
    }
    None
}

/// The effective subcommand of a tokenised tmux command line, found by
/// walking past tmux's global options.
///
/// Returns an empty string when the subcommand cannot be determined; callers
/// treat that as "unknown", never as a failure.
pub fn subcommand(tokens: &[String]) -> &str {
    locate(tokens).map(|i| tokens[i].as_str()).unwrap_or("")
}

/// Map tmux aliases onto their canonical command names.
pub fn canonical(name: &str) -> &str {
    match name {
        "new" => "new-session",
        "kill-ses" => "kill-session",
        "capturep" => "capture-pane",
        "pipep" => "pipe-pane",
        "saveb" => "save-buffer",
        "showb" => "show-buffer",
        "send" => "send-keys",
        "has" => "has-session",
        "ls" => "list-sessions",
        other => other,
    }
}

/// Strip a window/pane suffix from a target, leaving the session name.
///
/// `cea-x:0.1` becomes `cea-x`; a leading `=` (exact-match marker) is dropped.
pub fn normalize_session_name(target: &str) -> String {
    let target = target.strip_prefix('=').unwrap_or(target);
    let end = target.find(|c: char| c == ':' || c == '.').unwrap_or(target.len());
    target[..end].to_string()
}

/// Parse flag clusters after a subcommand. `value_flags` lists the letters
/// that take a value. Parsing stops at the first positional argument.
fn parse_flags(args: &[String], value_flags: &str) -> Vec<(char, Option<String>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let tok = args[i].as_str();
        if tok == "--" || !tok.starts_with('-') || tok.len() == 1 {
            break;
        }
        let mut consumed_next = false;
        for (pos, c) in tok.char_indices().skip(1) {
            if value_flags.contains(c) {
                let rest = &tok[pos + c.len_utf8()..];
                let value = if rest.is_empty() {
                    consumed_next = true;
                    args.get(i + 1).cloned()
                } else {
                    Some(rest.to_string())
                };
                out.push((c, value));
                break;
            }
            out.push((c, None));
        }
        i += if consumed_next { 2 } else { 1 };
    }
    out
}

fn flag_value(flags: &[(char, Option<String>)], flag: char) -> Option<String> {
    flags
        .iter()
        .rev()
        .find(|(c, _)| *c == flag)
        .and_then(|(_, v)| v.clone())
}

/// Classify one tmux command (no `;` separators) by its session effect.
pub fn lifecycle(tokens: &[String]) -> Lifecycle {
    let Some(idx) = locate(tokens) else {
        return Lifecycle::Other;
    };
    let args = &tokens[idx + 1..];

    match canonical(tokens[idx].as_str()) {
        "new-session" => {
            let flags = parse_flags(args, "cefFnstxy");
            Lifecycle::Create(flag_value(&flags, 's').map(|s| normalize_session_name(&s)))
        }
        "kill-session" => {
            let flags = parse_flags(args, "t");
            Lifecycle::Kill {
                target: flag_value(&flags, 't').map(|t| normalize_session_name(&t)),
                all_but: flags.iter().any(|(c, _)| *c == 'a'),
            }
        }
        "kill-server" => Lifecycle::KillAll,
        _ => Lifecycle::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::tokenize;

    fn toks(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_skips_value_consuming_global_option() {
        assert_eq!(subcommand(&toks(&["-L", "sock", "new-session", "-d"])), "new-session");
        assert_eq!(subcommand(&toks(&["-Lsock", "-2", "ls"])), "ls");
        assert_eq!(subcommand(&toks(&["-uS", "/tmp/s", "kill-server"])), "kill-server");
    }

    #[test]
    fn test_double_dash_forces_subcommand() {
        assert_eq!(subcommand(&toks(&["--", "kill-session"])), "kill-session");
        assert_eq!(subcommand(&toks(&["-v", "--", "-weird"])), "-weird");
    }

    #[test]
    fn test_ambiguous_returns_empty() {
        assert_eq!(subcommand(&[]), "");
        assert_eq!(subcommand(&toks(&["-L"])), "");
        assert_eq!(subcommand(&toks(&["-Z", "new-session"])), "");
        assert_eq!(subcommand(&toks(&["--"])), "");
    }

    #[test]
    fn test_normalize_session_name() {
        assert_eq!(normalize_session_name("cea-x:0.1"), "cea-x");
        assert_eq!(normalize_session_name("cea-x.2"), "cea-x");
        assert_eq!(normalize_session_name("=cea-x"), "cea-x");
        assert_eq!(normalize_session_name("cea-x"), "cea-x");
    }

    #[test]
    fn test_lifecycle_create() {
        let t = tokenize("new-session -d -c /srv/s -s cea-build:1 bash");
        assert_eq!(lifecycle(&t), Lifecycle::Create(Some("cea-build".into())));

        let t = tokenize("-L sock new -ds cea-web");
        assert_eq!(lifecycle(&t), Lifecycle::Create(Some("cea-web".into())));

        assert_eq!(lifecycle(&tokenize("new-session -d")), Lifecycle::Create(None));
    }

    #[test]
    fn test_lifecycle_kill() {
        let t = tokenize("kill-session -t cea-x:0.1");
        assert_eq!(
            lifecycle(&t),
            Lifecycle::Kill {
                target: Some("cea-x".into()),
                all_but: false
            }
        );
        let t = tokenize("kill-session -a -t cea-keep");
        assert_eq!(
            lifecycle(&t),
            Lifecycle::Kill {
                target: Some("cea-keep".into()),
                all_but: true
            }
        );
        assert_eq!(lifecycle(&tokenize("kill-server")), Lifecycle::KillAll);
        assert_eq!(lifecycle(&tokenize("send-keys -t cea-x ls")), Lifecycle::Other);
    }
}
