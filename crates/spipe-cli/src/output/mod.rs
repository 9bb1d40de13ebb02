//! Diagnostics on stderr
//!
//! stdout belongs to the pipeline, so everything here goes to stderr. Color
//! is only used when stderr is a terminal.

use std::io::{IsTerminal, Write};

use crate::cli::USAGE;

/// Program name used as the prefix of every diagnostic
pub const PROGRAM: &str = "socketpipe";

/// Print an error message
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    if stderr.is_terminal() {
        let _ = crossterm::execute!(
            stderr,
            SetForegroundColor(Color::Red),
            Print(format!("{}: ", PROGRAM)),
            ResetColor,
            Print(msg),
            Print("\n")
        );
    } else {
        let _ = writeln!(stderr, "{}: {}", PROGRAM, msg);
    }
}

/// Print a usage error followed by the synopsis
pub fn print_usage(msg: &str) {
    print_error(msg);
    let _ = writeln!(std::io::stderr(), "{}", USAGE);
}
