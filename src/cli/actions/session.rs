use crate::cli::globals::{GlobalArgs, PENDING_CHALLENGE_SLOT};
use crate::session::{
    ApiRequest, AuthState, LoginOutcome, SecondFactorChallenge, SessionSlot, SessionUser,
};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

#[derive(Debug)]
pub struct LoginArgs {
    pub globals: GlobalArgs,
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug)]
pub struct VerifyArgs {
    pub globals: GlobalArgs,
    pub code: String,
    pub challenge: Option<SecondFactorChallenge>,
}

#[derive(Debug)]
pub struct RequestArgs {
    pub globals: GlobalArgs,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

fn describe(user: &SessionUser) -> String {
    if user.name.is_empty() {
        format!("{} ({})", user.email, user.role)
    } else {
        format!("{} <{}> ({})", user.name, user.email, user.role)
    }
}

/// # Errors
/// Returns an error if the credentials are rejected or the API is unreachable.
pub async fn login(args: LoginArgs) -> Result<()> {
    let facade = args.globals.open_session()?;
    let slot = args.globals.slot();
    let outcome = facade.login(&args.email, &args.password).await;
    facade.teardown();

    match outcome.context("login failed")? {
        LoginOutcome::Established(user) => {
            slot.remove(PENDING_CHALLENGE_SLOT);
            println!("Signed in as {}", describe(&user));
        }
        LoginOutcome::SecondFactorRequired { challenge } => {
            slot.write(PENDING_CHALLENGE_SLOT, challenge.expose());
            debug!("pending challenge stored in {}", slot.dir().display());
            println!("Second factor required. Run `ticketdesk verify-2fa --code <CODE>` to finish signing in.");
        }
    }
    Ok(())
}

/// # Errors
/// Returns an error if no challenge is pending or the code is rejected.
pub async fn verify(args: VerifyArgs) -> Result<()> {
    let slot = args.globals.slot();
    let challenge = args
        .challenge
        .or_else(|| slot.read(PENDING_CHALLENGE_SLOT).map(SecondFactorChallenge::new))
        .ok_or_else(|| anyhow!("no pending second-factor challenge; run `ticketdesk login` first"))?;

    let facade = args.globals.open_session()?;
    let result = facade.verify_second_factor(&args.code, &challenge).await;
    facade.teardown();

    let user = result.context("second-factor verification failed")?;
    slot.remove(PENDING_CHALLENGE_SLOT);
    println!("Signed in as {}", describe(&user));
    Ok(())
}

/// # Errors
/// Returns an error if there is no valid session.
pub async fn whoami(globals: &GlobalArgs) -> Result<()> {
    let facade = globals.open_session()?;
    let state = facade.rehydrate().await;
    facade.teardown();

    match state {
        AuthState::Authenticated(user) => {
            println!("{}", describe(&user));
            Ok(())
        }
        AuthState::Anonymous | AuthState::Loading => bail!("not signed in"),
    }
}

/// Always clears the local session, even if the server cannot be reached.
///
/// # Errors
/// Returns an error only if the session cannot be opened.
pub async fn logout(globals: &GlobalArgs) -> Result<()> {
    let facade = globals.open_session()?;
    facade.logout().await;
    facade.teardown();
    globals.slot().remove(PENDING_CHALLENGE_SLOT);
    println!("Signed out");
    Ok(())
}

/// # Errors
/// Returns an error if the request fails after refresh handling.
pub async fn request(args: RequestArgs) -> Result<()> {
    let facade = args.globals.open_session()?;
    let mut request = ApiRequest::new(args.method, args.path);
    if let Some(body) = args.body {
        request = request.json(body);
    }
    let result = facade.request(request).await;
    facade.teardown();

    let response = result.context("request failed")?;
    if !response.body.is_null() {
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }
    Ok(())
}
