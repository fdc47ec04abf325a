//! Console label prompt.

use dialoguer::Input;
use rollcall_core::LabelPrompt;
use std::io::{BufRead, IsTerminal};

const PROMPT: &str = "New face detected. Enter name";

/// Asks on the terminal; falls back to plain line reads when stdin is piped.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl LabelPrompt for ConsolePrompt {
    fn ask(&mut self) -> std::io::Result<String> {
        if std::io::stdin().is_terminal() {
            Input::<String>::new()
                .with_prompt(PROMPT)
                .allow_empty(true)
                .interact_text()
                .map_err(std::io::Error::other)
        } else {
            eprint!("{PROMPT}: ");
            read_label(std::io::stdin().lock())
        }
    }
}

/// Read one line. End of input is an error so a closed pipe cannot spin the loop.
fn read_label(mut input: impl BufRead) -> std::io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stdin closed while waiting for a name",
        ));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_label_returns_raw_line() {
        let label = read_label(&b"  Alice \nBob\n"[..]).unwrap();
        assert_eq!(label, "  Alice \n");
    }

    #[test]
    fn test_read_label_empty_line_is_not_eof() {
        assert_eq!(read_label(&b"\n"[..]).unwrap(), "\n");
    }

    #[test]
    fn test_read_label_eof_is_error() {
        let err = read_label(&b""[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
