//! Turning an argument vector back into a shell command line.
//!
//! The child is always started as `/bin/sh -c <line>`. Each argument is quoted
//! on its own and the results are joined with single spaces, so the shell sees
//! exactly the argument vector it was given: an argument containing `|` or `>`
//! stays a literal argument, while a command such as `sh -c 'a | b'` still
//! reaches its inner shell untouched.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// The shell every supervised command runs under.
pub const SHELL: &str = "/bin/sh";

/// Quotes every argument individually and joins them into one command line.
pub fn command_line<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| escape(Cow::Borrowed(arg.as_ref())).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
