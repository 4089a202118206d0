//! Terminal input: a dedicated reader thread feeding lines to async code.

use std::{
    io::{self, BufRead},
    thread,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lines typed by the user, line endings already removed.
pub type InputLines = mpsc::UnboundedReceiver<String>;

/// Start the blocking stdin reader.
///
/// The thread stops at end of input or once the receiver is dropped; the
/// channel closing is how async consumers observe end of input.
pub fn spawn_stdin_reader() -> io::Result<InputLines> {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("parley-input".to_owned())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "failed reading terminal input");
                        break;
                    }
                };
                if line_tx.send(strip_line_ending(&line).to_owned()).is_err() {
                    break;
                }
            }
            debug!("terminal input closed");
        })?;
    Ok(line_rx)
}

/// Remove trailing CR/LF characters only; other whitespace is kept.
pub fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
