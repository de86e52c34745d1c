//! Building `sh` command lines that run inside containers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Escape single quotes for use inside a single-quoted shell argument.
fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// Quote a string for safe use as a shell argument.
///
/// Returns the string unchanged if it contains only safe characters
/// (alphanumeric, `-`, `_`, `.`, `/`). Otherwise wraps it in single quotes
/// with internal single quotes escaped. Empty strings return `''`.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", escape_single_quotes(s))
    }
}

/// Quote each argument and join them with spaces.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A command that feeds `script` to `sh` over stdin without needing the
/// script file inside the container.
///
/// The script travels base64-encoded so its bytes never meet the outer
/// shell's parser.
pub fn piped_script_command<S: AsRef<str>>(script: &[u8], args: &[S]) -> String {
    let encoded = STANDARD.encode(script);
    let mut command = format!("printf '%s' {} | base64 -d | sh -s --", encoded);
    if !args.is_empty() {
        command.push(' ');
        command.push_str(&shell_join(args));
    }
    command
}
