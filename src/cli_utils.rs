/// CLI output helpers
use std::io::IsTerminal;

/// `[annot]` prefix, bright cyan when stderr is a terminal
pub fn annot_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[annot]\x1b[0m"
    } else {
        "[annot]"
    }
}
