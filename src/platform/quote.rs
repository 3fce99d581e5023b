//! Word quoting for the POSIX shell and PowerShell.
//!
//! Tokens made only of "safe" characters are left bare. This matters for
//! PowerShell, where a quoted `'-Channel'` is a positional string and not a
//! parameter name.

fn is_safe(c: char, extra: &[char]) -> bool {
    c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c) || extra.contains(&c)
}

/// Quote `token` for `sh`, using single quotes when needed.
pub fn quote_posix(token: &str) -> String {
    if !token.is_empty() && token.chars().all(|c| is_safe(c, &[])) {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', r"'\''"))
}

/// Quote `token` for PowerShell, using single quotes when needed.
pub fn quote_powershell(token: &str) -> String {
    if !token.is_empty() && token.chars().all(|c| is_safe(c, &['\\'])) {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "''"))
}
