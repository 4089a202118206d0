//! Startup credential prompts.

use std::{
    fmt,
    io::{self, Write},
};

use thiserror::Error;

use crate::input::{InputLines, strip_line_ending};

const SEPARATOR: &str = "---------------------";

/// Login details read at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub password: String,
    pub server_host: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .field("server_host", &self.server_host)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("input ended before the {0} was entered")]
    MissingInput(&'static str),
    #[error("failed writing prompt: {0}")]
    Prompt(#[from] io::Error),
}

/// Prompt for identity, password and server host, one line each.
///
/// The password is read as plain text; the terminal does not mask it.
pub async fn read_credentials<W: Write>(
    lines: &mut InputLines,
    out: &mut W,
) -> Result<Credentials, CredentialsError> {
    writeln!(out, "Hello, please input your credentials")?;
    let identity = prompt(lines, out, "Enter your user: ", "user").await?;
    let password = prompt(lines, out, "Enter your password: ", "password").await?;
    let server_host = prompt(lines, out, "Enter the server's host: ", "server host").await?;
    writeln!(out, "Attempting to contact host...")?;
    out.flush()?;

    Ok(Credentials {
        identity,
        password,
        server_host,
    })
}

async fn prompt<W: Write>(
    lines: &mut InputLines,
    out: &mut W,
    label: &str,
    field: &'static str,
) -> Result<String, CredentialsError> {
    writeln!(out, "{label}")?;
    out.flush()?;
    let line = lines
        .recv()
        .await
        .ok_or(CredentialsError::MissingInput(field))?;
    writeln!(out, "{SEPARATOR}")?;
    Ok(strip_line_ending(&line).to_owned())
}
