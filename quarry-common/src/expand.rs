//! Environment-variable expansion for configuration files.

/// Replace every literal `${VAR}` in `input` with the value of the `VAR`
/// environment variable. Unset variables expand to the empty string, with a
/// warning, so a missing secret shows up in the logs instead of silently
/// producing a half-formed value downstream.
///
/// Only the braced form is recognized; a bare `$VAR` passes through verbatim.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        tracing::warn!(variable = name, "Undefined variable in config, expanding to empty string");
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference, keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
