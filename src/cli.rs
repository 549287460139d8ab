use clap::{Parser, Subcommand};

/// Gym access: identity and trainer-assignment service
#[derive(Parser)]
#[command(name = "gym-access", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to GYM_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage session tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Manage trainee assignments
    Trainee {
        #[command(subcommand)]
        command: TraineeCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create an account
    Add {
        #[arg(long)]
        username: String,
        #[arg(long, env = "GYM_NEW_USER_PASSWORD")]
        password: String,
        /// trainee or trainer
        #[arg(long, default_value = "trainee")]
        role: String,
    },
    /// Deactivate an account. Its tokens stay valid unless revoked.
    Deactivate {
        #[arg(long)]
        username: String,
        /// Also revoke every token of the account
        #[arg(long)]
        revoke_tokens: bool,
    },
    /// Reactivate an account
    Activate {
        #[arg(long)]
        username: String,
    },
    /// Set a new password and revoke every token of the account
    Passwd {
        #[arg(long)]
        username: String,
        #[arg(long, env = "GYM_NEW_USER_PASSWORD")]
        password: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a new access token for a user
    Issue {
        #[arg(long)]
        username: String,
    },
    /// List a user's valid tokens (masked)
    List {
        #[arg(long)]
        username: String,
    },
    /// Revoke every token of a user
    RevokeAll {
        #[arg(long)]
        username: String,
    },
}

#[derive(Subcommand)]
pub enum TraineeCommands {
    /// Replace a trainee's trainer list
    SetTrainers {
        #[arg(long)]
        trainee: String,
        /// Comma-separated trainer usernames; empty clears the list
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        trainers: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_passwd_parses() {
        let cli = Cli::try_parse_from([
            "gym-access",
            "user",
            "passwd",
            "--username",
            "anna",
            "--password",
            "n3w",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::User {
                command: UserCommands::Passwd { username, password },
            }) => {
                assert_eq!(username, "anna");
                assert_eq!(password, "n3w");
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn test_set_trainers_splits_on_commas() {
        let cli = Cli::try_parse_from([
            "gym-access",
            "trainee",
            "set-trainers",
            "--trainee",
            "tina",
            "--trainers",
            "a,b,a",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Trainee {
                command: TraineeCommands::SetTrainers { trainee, trainers },
            }) => {
                assert_eq!(trainee, "tina");
                assert_eq!(trainers, vec!["a", "b", "a"]);
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
