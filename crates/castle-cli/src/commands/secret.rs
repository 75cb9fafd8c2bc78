//! `castle secret` — manage `~/.castle/secrets/`.

use std::io::Read;

use anyhow::{Result, bail};
use clap::Subcommand;

use castle_core::secrets;

use crate::commands::castle_home;

/// Secret store actions.
#[derive(Subcommand)]
pub enum SecretAction {
    /// List secret names.
    List,
    /// Print a secret value.
    Get {
        /// Secret name.
        name: String,
    },
    /// Set a secret value (reads stdin when no value is given).
    Set {
        /// Secret name.
        name: String,
        /// The value; omit to read from stdin.
        value: Option<String>,
    },
    /// Delete a secret.
    Rm {
        /// Secret name.
        name: String,
    },
}

pub fn run(action: &SecretAction) -> Result<()> {
    let home = castle_home()?;
    let secrets_dir = home.secrets_dir();

    match action {
        SecretAction::List => {
            for name in secrets::list_secrets(&secrets_dir) {
                println!("{name}");
            }
            Ok(())
        },
        SecretAction::Get { name } => match secrets::read_secret(&secrets_dir, name) {
            Some(value) => {
                println!("{value}");
                Ok(())
            },
            None => bail!("secret '{name}' not found"),
        },
        SecretAction::Set { name, value } => {
            let value = match value {
                Some(value) => value.clone(),
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                },
            };
            secrets::write_secret(&secrets_dir, name, &value)?;
            println!("secret '{name}' set");
            Ok(())
        },
        SecretAction::Rm { name } => {
            secrets::delete_secret(&secrets_dir, name)?;
            println!("secret '{name}' removed");
            Ok(())
        },
    }
}
