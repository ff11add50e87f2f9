use crate::cli::actions::{session, Action};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Login(args) => session::login(args).await,
        Action::VerifySecondFactor(args) => session::verify(args).await,
        Action::WhoAmI(globals) => session::whoami(&globals).await,
        Action::Logout(globals) => session::logout(&globals).await,
        Action::Request(args) => session::request(args).await,
    }
}
