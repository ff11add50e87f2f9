pub mod session;

// The match over `Action` lives in `run` so this module stays a plain list of
// what the binary can do.
mod run;

use crate::cli::globals::GlobalArgs;

#[derive(Debug)]
pub enum Action {
    Login(session::LoginArgs),
    VerifySecondFactor(session::VerifyArgs),
    WhoAmI(GlobalArgs),
    Logout(GlobalArgs),
    Request(session::RequestArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
