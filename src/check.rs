use crate::context::Context;
use crate::exit_codes;
use crate::progress;
use crate::prompt;
use crate::remote::CredentialCheck;

/// `davhome check <user>`: PROPFIND the user's WebDAV root with their password.
pub fn run_check(ctx: &Context, username: &str) -> i32 {
    let result = ctx.probe().and_then(|probe| {
        let password = prompt::read_password(username)?;
        progress::step(&format!("Checking credentials for {username}..."));
        probe.verify(username, &password)
    });
    match result {
        Ok(()) => {
            println!("Credentials for {username} accepted");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            exit_codes::for_error(&e)
        }
    }
}
