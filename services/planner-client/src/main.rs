//! Planner API client
//!
//! Command-line front end for the planner session lifecycle:
//! 1. Registers accounts and logs in (password or Google OAuth with account binding)
//! 2. Persists the identity and rotating refresh cookie between runs
//! 3. Sends authenticated requests, refreshing the credential on 401
//! 4. `run` keeps the background refresh timer alive until Ctrl-C

mod config;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use common::Secret;
use gateway::{ApiRequest, LogNavigator, OAuthOutcome, Registration, SessionManager};
use session::{FileStorage, OAuthCallback, SessionStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, resolve_password};

const USAGE: &str = "\
usage: planner-client [--config <path>] <command>

commands:
  send-code <email>
  check-username <username>
  register <username> <email> <code> [password] [invite_code]
  login <username> [password]
  oauth-url
  oauth-callback <callback-url>
  bind <bind_token> <username> [password]
  register-bind <bind_token> <username> <email> [password]
  whoami
  avatar
  get <path>
  logout
  run

Passwords fall back to PLANNER_PASSWORD when omitted.";

#[derive(Debug, PartialEq)]
enum Command {
    SendCode {
        email: String,
    },
    CheckUsername {
        username: String,
    },
    Register {
        username: String,
        email: String,
        captcha: String,
        password: Option<Secret<String>>,
        invite_code: Option<String>,
    },
    Login {
        username: String,
        password: Option<Secret<String>>,
    },
    OAuthUrl,
    OAuthCallback {
        url: String,
    },
    Bind {
        bind_token: String,
        username: String,
        password: Option<Secret<String>>,
    },
    RegisterBind {
        bind_token: String,
        username: String,
        email: String,
        password: Option<Secret<String>>,
    },
    WhoAmI,
    Avatar,
    Get {
        path: String,
    },
    Logout,
    Run,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize| args.get(i).cloned();
        let password = |i: usize| args.get(i).map(|p| Secret::from(p.as_str()));
        let required = |i: usize, name: &str| {
            args.get(i)
                .cloned()
                .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
        };

        let Some(command) = args.first() else {
            bail!("missing command\n\n{USAGE}");
        };
        let parsed = match command.as_str() {
            "send-code" => Command::SendCode {
                email: required(1, "email")?,
            },
            "check-username" => Command::CheckUsername {
                username: required(1, "username")?,
            },
            "register" => Command::Register {
                username: required(1, "username")?,
                email: required(2, "email")?,
                captcha: required(3, "code")?,
                password: password(4),
                invite_code: arg(5),
            },
            "login" => Command::Login {
                username: required(1, "username")?,
                password: password(2),
            },
            "oauth-url" => Command::OAuthUrl,
            "oauth-callback" => Command::OAuthCallback {
                url: required(1, "callback-url")?,
            },
            "bind" => Command::Bind {
                bind_token: required(1, "bind_token")?,
                username: required(2, "username")?,
                password: password(3),
            },
            "register-bind" => Command::RegisterBind {
                bind_token: required(1, "bind_token")?,
                username: required(2, "username")?,
                email: required(3, "email")?,
                password: password(4),
            },
            "whoami" => Command::WhoAmI,
            "avatar" => Command::Avatar,
            "get" => Command::Get {
                path: arg(1).unwrap_or_else(|| "/".to_string()),
            },
            "logout" => Command::Logout,
            "run" => Command::Run,
            other => bail!("unknown command: {other}\n\n{USAGE}"),
        };
        Ok(parsed)
    }
}

/// Pull `--config <path>` out of the argument list.
fn split_config_flag(args: &[String]) -> (Option<&str>, Vec<String>) {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(a) = iter.next() {
        if a == "--config" {
            config = iter.next().map(String::as_str);
        } else {
            rest.push(a.clone());
        }
    }
    (config, rest)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (cli_config_path, rest) = split_config_flag(&args);
    let command = Command::parse(&rest)?;

    let config_path = Config::resolve_path(cli_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        storage = %config.session.storage_path.display(),
        "configuration loaded"
    );

    let storage = FileStorage::open(config.session.storage_path.clone())
        .await
        .context("failed to open session storage")?;
    let store = Arc::new(SessionStore::new(Arc::new(storage)));
    let navigator = Arc::new(LogNavigator::new());
    let manager = SessionManager::new(
        config.gateway(),
        config.refresh_interval(),
        store,
        navigator.clone(),
    )?;

    execute(&manager, &navigator, command).await
}

async fn execute(manager: &SessionManager, navigator: &LogNavigator, command: Command) -> Result<()> {
    match command {
        Command::SendCode { email } => {
            manager.send_code(&email).await?;
            println!("verification code sent to {email}");
        }
        Command::CheckUsername { username } => {
            if manager.check_username(&username).await? {
                println!("{username} is available");
            } else {
                println!("{username} is taken");
            }
        }
        Command::Register {
            username,
            email,
            captcha,
            password,
            invite_code,
        } => {
            let password = resolve_password(password.as_ref().map(Secret::expose_str))?;
            let registration = Registration {
                username,
                email,
                password,
                captcha,
                invite_code,
            };
            manager.register(&registration).await?;
            println!(
                "registered {}; log in with: planner-client login {}",
                registration.username, registration.username
            );
        }
        Command::Login { username, password } => {
            let password = resolve_password(password.as_ref().map(Secret::expose_str))?;
            let identity = manager.login(&username, &password).await?;
            println!("logged in as {} (id {}, role {})", identity.username, identity.user_id, identity.role);
        }
        Command::OAuthUrl => {
            println!("{}", manager.google_auth_url().await?);
        }
        Command::OAuthCallback { url } => {
            let callback = OAuthCallback::from_url(&url)?;
            match manager.complete_oauth(callback).await? {
                OAuthOutcome::LoggedIn(identity) => {
                    println!("logged in as {} (id {})", identity.username, identity.user_id);
                }
                OAuthOutcome::BindRequired(profile) => {
                    println!(
                        "{} account {} is not linked yet; finish with:\n  \
                         planner-client bind {} <username> [password]\n  \
                         planner-client register-bind {} <username> <email> [password]",
                        profile.provider, profile.email, profile.bind_token, profile.bind_token
                    );
                }
            }
        }
        Command::Bind {
            bind_token,
            username,
            password,
        } => {
            let password = resolve_password(password.as_ref().map(Secret::expose_str))?;
            let identity = manager.bind_existing(&bind_token, &username, &password).await?;
            println!("linked and logged in as {}", identity.username);
        }
        Command::RegisterBind {
            bind_token,
            username,
            email,
            password,
        } => {
            let password = resolve_password(password.as_ref().map(Secret::expose_str))?;
            let identity = manager
                .register_with_bind(&bind_token, &username, &email, &password)
                .await?;
            println!("registered and logged in as {}", identity.username);
        }
        Command::WhoAmI => match manager.identity().await {
            Some(identity) => println!(
                "{} (id {}, role {})",
                identity.username, identity.user_id, identity.role
            ),
            None => println!("not logged in"),
        },
        Command::Avatar => {
            println!("{}", manager.avatar_url().await?);
        }
        Command::Get { path } => {
            let response = manager.gateway().send(ApiRequest::get(path)).await?;
            match response.json::<serde_json::Value>() {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.text()),
            }
        }
        Command::Logout => {
            manager.logout().await?;
            println!("logged out");
        }
        Command::Run => {
            if !manager.resume().await {
                bail!("no persisted session; log in first");
            }
            info!(
                interval_secs = manager.scheduler().interval().as_secs(),
                "session resumed, refreshing in the background"
            );
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    manager.scheduler().disarm();
                    info!("interrupted, stopping refresh timer");
                }
                _ = navigator.navigated() => {
                    manager.scheduler().disarm();
                    bail!("session ended; log in again");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_login_with_and_without_password() {
        assert_eq!(
            Command::parse(&args(&["login", "alice", "secret"])).unwrap(),
            Command::Login {
                username: "alice".into(),
                password: Some(Secret::from("secret")),
            }
        );
        assert_eq!(
            Command::parse(&args(&["login", "alice"])).unwrap(),
            Command::Login {
                username: "alice".into(),
                password: None,
            }
        );
    }

    #[test]
    fn parses_bind_commands() {
        assert_eq!(
            Command::parse(&args(&["bind", "bt_1", "alice"])).unwrap(),
            Command::Bind {
                bind_token: "bt_1".into(),
                username: "alice".into(),
                password: None,
            }
        );
        assert_eq!(
            Command::parse(&args(&["register-bind", "bt_1", "bob", "bob@example.com", "pw"]))
                .unwrap(),
            Command::RegisterBind {
                bind_token: "bt_1".into(),
                username: "bob".into(),
                email: "bob@example.com".into(),
                password: Some(Secret::from("pw")),
            }
        );
    }

    #[test]
    fn parses_registration_commands() {
        assert_eq!(
            Command::parse(&args(&["send-code", "bob@example.com"])).unwrap(),
            Command::SendCode {
                email: "bob@example.com".into()
            }
        );
        assert_eq!(
            Command::parse(&args(&["check-username", "bob"])).unwrap(),
            Command::CheckUsername {
                username: "bob".into()
            }
        );
        assert_eq!(
            Command::parse(&args(&["register", "bob", "bob@example.com", "123456"])).unwrap(),
            Command::Register {
                username: "bob".into(),
                email: "bob@example.com".into(),
                captcha: "123456".into(),
                password: None,
                invite_code: None,
            }
        );
        assert_eq!(
            Command::parse(&args(&[
                "register",
                "bob",
                "bob@example.com",
                "123456",
                "pw",
                "friends"
            ]))
            .unwrap(),
            Command::Register {
                username: "bob".into(),
                email: "bob@example.com".into(),
                captcha: "123456".into(),
                password: Some(Secret::from("pw")),
                invite_code: Some("friends".into()),
            }
        );

        let err = Command::parse(&args(&["register", "bob", "bob@example.com"])).unwrap_err();
        assert!(err.to_string().contains("missing <code>"), "got: {err}");
    }

    #[test]
    fn missing_arguments_are_reported() {
        let err = Command::parse(&args(&["register-bind", "bt_1", "bob"])).unwrap_err();
        assert!(err.to_string().contains("missing <email>"), "got: {err}");

        let err = Command::parse(&args(&[])).unwrap_err();
        assert!(err.to_string().contains("missing command"));

        let err = Command::parse(&args(&["frobnicate"])).unwrap_err();
        assert!(err.to_string().contains("unknown command: frobnicate"));
    }

    #[test]
    fn simple_commands_parse() {
        assert_eq!(Command::parse(&args(&["whoami"])).unwrap(), Command::WhoAmI);
        assert_eq!(Command::parse(&args(&["avatar"])).unwrap(), Command::Avatar);
        assert_eq!(Command::parse(&args(&["logout"])).unwrap(), Command::Logout);
        assert_eq!(Command::parse(&args(&["run"])).unwrap(), Command::Run);
        assert_eq!(Command::parse(&args(&["oauth-url"])).unwrap(), Command::OAuthUrl);
        assert_eq!(
            Command::parse(&args(&["get", "/plans"])).unwrap(),
            Command::Get {
                path: "/plans".into()
            }
        );
    }

    #[test]
    fn config_flag_is_extracted_anywhere() {
        let input = args(&["login", "--config", "/etc/planner.toml", "alice"]);
        let (config, rest) = split_config_flag(&input);
        assert_eq!(config, Some("/etc/planner.toml"));
        assert_eq!(rest, args(&["login", "alice"]));

        let input = args(&["whoami"]);
        let (config, rest) = split_config_flag(&input);
        assert_eq!(config, None);
        assert_eq!(rest, args(&["whoami"]));
    }

    #[tokio::test]
    async fn whoami_reads_persisted_identity_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("session.json")).await.unwrap();
        let store = Arc::new(SessionStore::new(Arc::new(storage)));
        store
            .set_identity(&session::Identity {
                user_id: 1,
                username: "alice".into(),
                role: "user".into(),
            })
            .await
            .unwrap();
        let navigator = Arc::new(LogNavigator::new());
        let manager = SessionManager::with_defaults(store, navigator.clone()).unwrap();

        execute(&manager, &navigator, Command::WhoAmI).await.unwrap();
        execute(&manager, &navigator, Command::Logout).await.unwrap();
        assert!(!manager.is_logged_in().await);
    }

    #[tokio::test]
    async fn run_without_session_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("session.json")).await.unwrap();
        let store = Arc::new(SessionStore::new(Arc::new(storage)));
        let navigator = Arc::new(LogNavigator::new());
        let manager = SessionManager::with_defaults(store, navigator.clone()).unwrap();

        let err = execute(&manager, &navigator, Command::Run).await.unwrap_err();
        assert!(err.to_string().contains("log in first"));
        assert!(!manager.scheduler().is_armed());
    }
}
