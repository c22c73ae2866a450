//! Command handlers.

use super::SessionApp;
use session_auth::{AuthError, Identity};
use tracing::{info, warn};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn print_identity(identity: &Identity) {
    println!("Logged in as {} ({})", identity.display_name, identity.user_id);
    if let Some(email) = &identity.email {
        println!("  Email:   {}", email);
    }
    if !identity.roles.is_empty() {
        println!("  Roles:   {}", identity.roles.join(", "));
    }
    println!("  Expires: {}", identity.expires_at.to_rfc3339());
}

/// Map session-ending failures to the one message users need.
fn report(error: AuthError) -> Box<dyn std::error::Error> {
    if error.requires_login() {
        println!("Your session has ended. Please log in again.");
    }
    Box::new(error)
}

pub async fn status(app: &SessionApp) -> CommandResult {
    match app.supervisor.bootstrap().await.map_err(report)? {
        Some(identity) => {
            print_identity(&identity);
            if app.supervisor.is_admin() {
                println!("  Admin:   yes");
            }
        }
        None => println!("Not logged in"),
    }
    println!("  Session: {}", app.paths.credentials_file().display());
    Ok(())
}

pub async fn login(app: &SessionApp, email: &str, password: &str) -> CommandResult {
    let identity = app.supervisor.login(email, password).await?;
    print_identity(&identity);
    Ok(())
}

pub async fn register(app: &SessionApp, name: &str, email: &str, password: &str) -> CommandResult {
    let identity = app.supervisor.register(name, email, password).await?;
    println!("Account created");
    print_identity(&identity);
    Ok(())
}

pub async fn logout(app: &SessionApp) -> CommandResult {
    app.supervisor.logout().await?;
    println!("Logged out");
    Ok(())
}

pub async fn refresh(app: &SessionApp) -> CommandResult {
    app.supervisor
        .coordinator()
        .force_refresh()
        .await
        .map_err(report)?;

    if let Some(credential) = app.supervisor.coordinator().current_credential()? {
        println!("Access token refreshed, expires {}", credential.expires_at.to_rfc3339());
    }
    Ok(())
}

pub async fn get(app: &SessionApp, path: &str) -> CommandResult {
    let response = app.client.get(path).await.map_err(report)?;

    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }

    if !response.is_success() {
        return Err(format!("request failed with status {}", response.status).into());
    }
    Ok(())
}

pub async fn watch(app: &SessionApp, template_id: &str) -> CommandResult {
    // Restores the identity so an expired session is refreshed up front.
    if app.supervisor.bootstrap().await?.is_none() {
        println!("Not logged in; watching anonymously");
    }

    let realtime = app.realtime()?;
    realtime.on_receive_comment(|comment| {
        println!("[new]     {} ({}): {}", comment.user.name, comment.id, comment.content);
    });
    realtime.on_update_comment(|comment| {
        println!("[edited]  {} ({}): {}", comment.user.name, comment.id, comment.content);
    });
    realtime.on_delete_comment(|id| println!("[deleted] {}", id));
    realtime.on_update_likes(|update| {
        println!("[likes]   {} on {}", update.count, update.template_id);
    });

    realtime.join(template_id).await?;
    realtime.ensure_connected().await?;
    info!(template_id, "Watching template");
    println!("Watching template {} (Ctrl-C to stop)", template_id);

    let mut states = realtime.subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow();
                println!("Connection: {:?}", state);
                if state == realtime_hub::ConnectionState::Disconnected {
                    warn!("Realtime connection abandoned");
                    break;
                }
            }
        }
    }

    realtime.stop().await;
    Ok(())
}
