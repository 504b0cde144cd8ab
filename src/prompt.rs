use std::io::{self, BufRead, IsTerminal};

use crate::error::MountError;

/// Environment variable read before prompting.
pub const PASSWORD_ENV: &str = "DAVHOME_PASSWORD";

/// Remote password for `username`: `$DAVHOME_PASSWORD`, a hidden prompt on a
/// terminal, or the first line of piped stdin.
pub fn read_password(username: &str) -> Result<String, MountError> {
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(pw) => pw,
        Err(_) if io::stdin().is_terminal() => {
            rpassword::prompt_password(format!("Password for {username}: "))
                .map_err(|e| MountError::io("Failed to read password", e))?
        }
        Err(_) => first_line(io::stdin().lock())?,
    };
    non_empty(password)
}

fn first_line(mut reader: impl BufRead) -> Result<String, MountError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| MountError::io("Failed to read password from stdin", e))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn non_empty(password: String) -> Result<String, MountError> {
    if password.is_empty() {
        return Err(MountError::Config("Password cannot be empty".to_string()));
    }
    Ok(password)
}
