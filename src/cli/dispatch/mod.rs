//! Maps parsed CLI matches to an [`Action`].

use crate::cli::{
    actions::{
        session::{LoginArgs, RequestArgs, VerifyArgs},
        Action,
    },
    commands::{api, session as cmd},
    globals::GlobalArgs,
};
use crate::session::SecondFactorChallenge;
use anyhow::{anyhow, Context, Result};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::Value;

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = GlobalArgs::new(api::Options::parse(matches)?);

    let (name, sub) = matches
        .subcommand()
        .context("missing subcommand")?;

    let required = |arg: &str| -> Result<String> {
        sub.get_one::<String>(arg)
            .cloned()
            .with_context(|| format!("missing required argument: {arg}"))
    };

    match name {
        cmd::CMD_LOGIN => Ok(Action::Login(LoginArgs {
            globals,
            email: required(cmd::ARG_EMAIL)?,
            password: SecretString::from(required(cmd::ARG_PASSWORD)?),
        })),
        cmd::CMD_VERIFY => Ok(Action::VerifySecondFactor(VerifyArgs {
            globals,
            code: required(cmd::ARG_CODE)?.trim().to_string(),
            challenge: sub
                .get_one::<String>(cmd::ARG_CHALLENGE)
                .map(|reference| SecondFactorChallenge::new(reference.trim())),
        })),
        cmd::CMD_WHOAMI => Ok(Action::WhoAmI(globals)),
        cmd::CMD_LOGOUT => Ok(Action::Logout(globals)),
        cmd::CMD_REQUEST => {
            let method = required(cmd::ARG_METHOD)?;
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method: {method}"))?;
            let body = sub
                .get_one::<String>(cmd::ARG_DATA)
                .map(|data| serde_json::from_str::<Value>(data))
                .transpose()
                .context("--data must be valid JSON")?;
            Ok(Action::Request(RequestArgs {
                globals,
                method,
                path: required(cmd::ARG_PATH)?,
                body,
            }))
        }
        other => Err(anyhow!("unknown subcommand: {other}")),
    }
}
