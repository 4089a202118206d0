//! Interactive numbered menu that turns typed commands into session actions.

use std::io::{self, Write};

use session_core::{Action, ContactId, SessionHandle, ShutdownCause};
use tracing::{debug, info};

use crate::input::InputLines;

pub const MENU: &str = "\
Choose an option:
  1 - Show contacts
  2 - Refresh contacts from the server
  3 - Choose who to talk to
  4 - Send a message
  5 - Quit
  help - Show this menu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    ShowContacts,
    RefreshRoster,
    SetCorrespondent,
    SendMessage,
    Quit,
    Help,
}

/// Map one input line to a command; anything else is `None` and ignored.
pub fn parse_command(line: &str) -> Option<MenuCommand> {
    match line.trim() {
        "1" => Some(MenuCommand::ShowContacts),
        "2" => Some(MenuCommand::RefreshRoster),
        "3" => Some(MenuCommand::SetCorrespondent),
        "4" => Some(MenuCommand::SendMessage),
        "5" => Some(MenuCommand::Quit),
        "help" => Some(MenuCommand::Help),
        _ => None,
    }
}

/// Why the input loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuExit {
    /// The user chose quit; a shutdown was enqueued.
    Quit,
    /// Input ended; a shutdown was enqueued on the user's behalf.
    EndOfInput,
    /// The session ended first and stopped accepting actions.
    SessionClosed,
}

/// Read commands until the user quits, input ends, or the session closes.
pub async fn run_menu<W: Write>(
    lines: &mut InputLines,
    out: &mut W,
    handle: &SessionHandle,
) -> io::Result<MenuExit> {
    writeln!(out, "{MENU}")?;
    out.flush()?;

    let roster_timeout_secs = handle.config().roster_timeout.as_secs();
    loop {
        let Some(line) = lines.recv().await else {
            return Ok(request_shutdown(handle, MenuExit::EndOfInput));
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        debug!(command = ?command, "menu command");

        let action = match command {
            MenuCommand::ShowContacts => Action::ListContacts,
            MenuCommand::RefreshRoster => {
                writeln!(
                    out,
                    "Refreshing contacts; other commands wait until the server answers (up to {roster_timeout_secs}s)."
                )?;
                Action::RefreshRoster
            }
            MenuCommand::SetCorrespondent => {
                writeln!(out, "Enter the contact's address: ")?;
                out.flush()?;
                let Some(target) = lines.recv().await else {
                    return Ok(request_shutdown(handle, MenuExit::EndOfInput));
                };
                Action::SetCorrespondent {
                    target: ContactId::from(target),
                }
            }
            MenuCommand::SendMessage => {
                writeln!(out, "Enter your message: ")?;
                out.flush()?;
                let Some(body) = lines.recv().await else {
                    return Ok(request_shutdown(handle, MenuExit::EndOfInput));
                };
                Action::SendChat { body }
            }
            MenuCommand::Quit => return Ok(request_shutdown(handle, MenuExit::Quit)),
            MenuCommand::Help => {
                writeln!(out, "{MENU}")?;
                out.flush()?;
                continue;
            }
        };

        if handle.send(action).is_err() {
            return Ok(MenuExit::SessionClosed);
        }
    }
}

fn request_shutdown(handle: &SessionHandle, exit: MenuExit) -> MenuExit {
    info!(exit = ?exit, "leaving input loop");
    match handle.send(Action::Shutdown {
        cause: ShutdownCause::UserRequested,
    }) {
        Ok(()) => exit,
        Err(_) => MenuExit::SessionClosed,
    }
}
