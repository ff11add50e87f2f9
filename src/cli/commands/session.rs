use clap::{Arg, Command};

pub const CMD_LOGIN: &str = "login";
pub const CMD_VERIFY: &str = "verify-2fa";
pub const CMD_WHOAMI: &str = "whoami";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_REQUEST: &str = "request";

pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_CODE: &str = "code";
pub const ARG_CHALLENGE: &str = "challenge";
pub const ARG_METHOD: &str = "method";
pub const ARG_PATH: &str = "path";
pub const ARG_DATA: &str = "data";

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(login())
        .subcommand(verify())
        .subcommand(Command::new(CMD_WHOAMI).about("Show the signed-in user"))
        .subcommand(Command::new(CMD_LOGOUT).about("Sign out and clear the stored session"))
        .subcommand(request())
}

fn login() -> Command {
    Command::new(CMD_LOGIN)
        .about("Sign in with email and password")
        .arg(
            Arg::new(ARG_EMAIL)
                .short('e')
                .long(ARG_EMAIL)
                .help("Account email")
                .env("TICKETDESK_EMAIL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .short('p')
                .long(ARG_PASSWORD)
                .help("Account password")
                .env("TICKETDESK_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

fn verify() -> Command {
    Command::new(CMD_VERIFY)
        .about("Complete a sign-in that requires a one-time code")
        .arg(
            Arg::new(ARG_CODE)
                .short('c')
                .long(ARG_CODE)
                .help("One-time code from the authenticator app")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CHALLENGE)
                .long(ARG_CHALLENGE)
                .help("Challenge reference printed by `login` (default: the pending one)")
                .env("TICKETDESK_2FA_CHALLENGE")
                .hide_env_values(true),
        )
}

fn request() -> Command {
    Command::new(CMD_REQUEST)
        .about("Send an authenticated request and print the JSON response")
        .arg(
            Arg::new(ARG_METHOD)
                .help("HTTP method")
                .required(true)
                .value_parser(["GET", "POST", "PUT", "PATCH", "DELETE"])
                .ignore_case(true),
        )
        .arg(
            Arg::new(ARG_PATH)
                .help("Path relative to the API base URL, e.g. /tickets")
                .required(true),
        )
        .arg(
            Arg::new(ARG_DATA)
                .short('d')
                .long(ARG_DATA)
                .help("JSON request body"),
        )
}
