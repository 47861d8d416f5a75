use crate::database::{DatabaseManager, DatabaseManagerImpl};
use crate::Config;
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand)]
pub enum UserAction {
    /// Create a local account that OAuth identities and passkeys can be attached to
    Add {
        #[arg(long, help = "Unique account name")]
        username: String,
        #[arg(long, help = "Allow the account to bind provider identities")]
        admin: bool,
    },
    /// Grant admin rights to an existing account
    Promote {
        #[arg(long)]
        username: String,
    },
}

pub async fn handle_user_command(
    action: UserAction,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let db_manager = DatabaseManagerImpl::new_from_config(&config.database).await?;
    if config.database.migration_on_startup {
        db_manager.migrate().await?;
    }
    let users = db_manager.users();

    match action {
        UserAction::Add { username, admin } => {
            let username = username.trim();
            if username.is_empty() {
                return Err("username must not be empty".into());
            }
            if users.find_by_username(username).await?.is_some() {
                return Err(format!("user '{}' already exists", username).into());
            }

            let user = users.create(username, admin).await?;
            info!(user_id = user.id, admin, "user created");
            println!("Created user '{}' with id {}", user.username, user.id);
        }
        UserAction::Promote { username } => {
            let user = users
                .find_by_username(&username)
                .await?
                .ok_or_else(|| format!("user '{}' not found", username))?;

            users.set_admin(user.id, true).await?;
            info!(user_id = user.id, "user promoted to admin");
            println!("User '{}' is now an admin", user.username);
        }
    }

    Ok(())
}
