use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::feed::RetentionPolicy;
use crate::mail::decoders::{ContentPreference, DEFAULT_CHARSET};

pub const DEFAULT_TITLE: &str = "AtoMail feed";
pub const DEFAULT_MAILBOX: &str = "INBOX";
const DEFAULT_URI_BASE: &str = "http://example.com/";

/// Where messages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Pipe,
    Mbox,
    Maildir,
    Pop3,
    Pop3Ssl,
    Imap,
    ImapSsl,
    Nntp,
}

/// Settings that may come from the command line or the config file.
/// Command-line values win.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CliArgs {
    /// The feed file to update
    #[arg(value_name = "FILE")]
    pub feed_file: Option<PathBuf>,

    /// Where to read messages from
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,

    /// The URI of the target feed
    #[arg(short, long)]
    pub uri: Option<String>,

    /// The title of the target feed
    #[arg(short, long)]
    pub title: Option<String>,

    /// The maximum number of items in the feed (<= 0 for no limit)
    #[arg(long, allow_negative_numbers = true)]
    pub max_items: Option<i64>,

    /// The maximum age of feed items in minutes (<= 0 for no limit)
    #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
    pub max_time: Option<i64>,

    /// Strip mailing-list tags like [list] from subjects
    #[arg(short, long)]
    pub strip_subject: bool,

    /// The mailbox file or directory to read (mbox, maildir)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// The server to fetch messages from (pop3, imap, nntp)
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// The newsgroup to read (nntp)
    #[arg(long)]
    pub group: Option<String>,

    /// The IMAP mailbox to open
    #[arg(long)]
    pub mailbox: Option<String>,

    /// Network connect/read timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Charset for headers and bodies that declare none
    #[arg(long)]
    pub charset: Option<String>,

    /// Which body part to publish when both exist
    #[arg(long, value_enum)]
    pub prefer: Option<ContentPreference>,
}

/// Optional TOML defaults, e.g. `~/.config/atomail/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<Mode>,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub max_items: Option<i64>,
    pub max_time: Option<i64>,
    pub strip_subject: Option<bool>,
    pub file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub group: Option<String>,
    pub mailbox: Option<String>,
    pub timeout: Option<u64>,
    pub charset: Option<String>,
    pub prefer: Option<ContentPreference>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Filename missing")]
    MissingFeedFile,
    #[error("Host missing")]
    MissingHost,
    #[error("Username missing")]
    MissingUser,
    #[error("Password missing")]
    MissingPassword,
    #[error("Mailbox file or directory missing")]
    MissingMailboxPath,
    #[error("Group missing")]
    MissingGroup,
    #[error("invalid feed URI `{uri}`: {source}")]
    InvalidUri {
        uri: String,
        source: url::ParseError,
    },
    #[error("cannot read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// A validated message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Pipe,
    Mbox {
        path: PathBuf,
    },
    Maildir {
        path: PathBuf,
    },
    Pop3 {
        endpoint: Endpoint,
        credentials: Credentials,
        ssl: bool,
    },
    Imap {
        endpoint: Endpoint,
        credentials: Credentials,
        mailbox: String,
        ssl: bool,
    },
    Nntp {
        endpoint: Endpoint,
        group: String,
        credentials: Option<Credentials>,
    },
}

/// Everything one run needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub feed_path: PathBuf,
    pub uri: String,
    /// True when no URI was configured and one was derived from the file name.
    pub uri_defaulted: bool,
    pub title: String,
    pub retention: RetentionPolicy,
    pub strip_subject: bool,
    pub charset: String,
    pub prefer: ContentPreference,
    pub source: SourceConfig,
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("atomail"))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Read the config file. An explicit path must exist; the default path is
/// used only when present.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.is_file() => p,
            _ => return Ok(FileConfig::default()),
        },
    };
    let s = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::ParseFile { path, source })
}

impl Settings {
    /// Merge command line over file config and check that the selected
    /// mode has everything it needs. Touches no feed file.
    pub fn resolve(cli: CliArgs, file: FileConfig) -> Result<Settings, ConfigError> {
        let feed_path = cli.feed_file.ok_or(ConfigError::MissingFeedFile)?;
        let mode = cli.mode.or(file.mode).unwrap_or_default();

        let host = cli.host.or(file.host);
        let port = cli.port.or(file.port);
        let user = cli.user.or(file.user);
        let password = cli.password.or(file.password);
        let group = cli.group.or(file.group);
        let mailbox_path = cli.file.or(file.file);
        let timeout = cli.timeout.or(file.timeout).map(Duration::from_secs);

        let endpoint = || -> Result<Endpoint, ConfigError> {
            Ok(Endpoint {
                host: host.clone().ok_or(ConfigError::MissingHost)?,
                port,
                timeout,
            })
        };
        let credentials = || -> Result<Credentials, ConfigError> {
            Ok(Credentials {
                user: user.clone().ok_or(ConfigError::MissingUser)?,
                password: password.clone().ok_or(ConfigError::MissingPassword)?,
            })
        };

        let source = match mode {
            Mode::Pipe => SourceConfig::Pipe,
            Mode::Mbox => SourceConfig::Mbox {
                path: mailbox_path.clone().ok_or(ConfigError::MissingMailboxPath)?,
            },
            Mode::Maildir => SourceConfig::Maildir {
                path: mailbox_path.clone().ok_or(ConfigError::MissingMailboxPath)?,
            },
            Mode::Pop3 | Mode::Pop3Ssl => SourceConfig::Pop3 {
                endpoint: endpoint()?,
                credentials: credentials()?,
                ssl: mode == Mode::Pop3Ssl,
            },
            Mode::Imap | Mode::ImapSsl => SourceConfig::Imap {
                endpoint: endpoint()?,
                credentials: credentials()?,
                mailbox: cli
                    .mailbox
                    .or(file.mailbox)
                    .unwrap_or_else(|| DEFAULT_MAILBOX.to_string()),
                ssl: mode == Mode::ImapSsl,
            },
            Mode::Nntp => {
                let endpoint = endpoint()?;
                SourceConfig::Nntp {
                    endpoint,
                    group: group.clone().ok_or(ConfigError::MissingGroup)?,
                    credentials: user.clone().map(|user| Credentials {
                        user,
                        password: password.clone().unwrap_or_default(),
                    }),
                }
            }
        };

        let (uri, uri_defaulted) = match cli.uri.or(file.uri) {
            Some(uri) => (uri, false),
            None => (default_uri(&feed_path), true),
        };
        url::Url::parse(&uri).map_err(|source| ConfigError::InvalidUri {
            uri: uri.clone(),
            source,
        })?;

        Ok(Settings {
            feed_path,
            uri,
            uri_defaulted,
            title: cli
                .title
                .or(file.title)
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            retention: RetentionPolicy {
                max_items: cli.max_items.or(file.max_items).unwrap_or(10),
                max_age_minutes: cli.max_time.or(file.max_time).unwrap_or(-1),
            },
            strip_subject: cli.strip_subject || file.strip_subject.unwrap_or(false),
            charset: cli
                .charset
                .or(file.charset)
                .unwrap_or_else(|| DEFAULT_CHARSET.to_string()),
            prefer: cli.prefer.or(file.prefer).unwrap_or_default(),
            source,
        })
    }
}

fn default_uri(feed_path: &Path) -> String {
    let name = feed_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{DEFAULT_URI_BASE}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(mode: Mode) -> CliArgs {
        CliArgs {
            feed_file: Some(PathBuf::from("/srv/www/list.xml")),
            mode: Some(mode),
            ..Default::default()
        }
    }

    #[test]
    fn test_pipe_defaults() {
        let s = Settings::resolve(cli(Mode::Pipe), FileConfig::default()).unwrap();
        assert_eq!(s.source, SourceConfig::Pipe);
        assert_eq!(s.uri, "http://example.com/list.xml");
        assert!(s.uri_defaulted);
        assert_eq!(s.title, DEFAULT_TITLE);
        assert_eq!(s.retention, RetentionPolicy::default());
        assert_eq!(s.charset, DEFAULT_CHARSET);
        assert_eq!(s.prefer, ContentPreference::Text);
    }

    #[test]
    fn test_missing_feed_file() {
        let args = CliArgs::default();
        assert!(matches!(
            Settings::resolve(args, FileConfig::default()),
            Err(ConfigError::MissingFeedFile)
        ));
    }

    #[test]
    fn test_network_modes_need_host_and_credentials() {
        let err = Settings::resolve(cli(Mode::Pop3), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost));

        let mut args = cli(Mode::ImapSsl);
        args.host = Some("imap.example.com".into());
        let err = Settings::resolve(args.clone(), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingUser));

        args.user = Some("me".into());
        let err = Settings::resolve(args.clone(), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPassword));

        args.password = Some("secret".into());
        let s = Settings::resolve(args, FileConfig::default()).unwrap();
        match s.source {
            SourceConfig::Imap { mailbox, ssl, .. } => {
                assert_eq!(mailbox, DEFAULT_MAILBOX);
                assert!(ssl);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_mailbox_modes_need_file() {
        let err = Settings::resolve(cli(Mode::Maildir), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMailboxPath));
    }

    #[test]
    fn test_nntp_needs_group_but_not_credentials() {
        let mut args = cli(Mode::Nntp);
        args.host = Some("news.example.com".into());
        let err = Settings::resolve(args.clone(), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingGroup));

        args.group = Some("comp.lang.rust".into());
        let s = Settings::resolve(args, FileConfig::default()).unwrap();
        assert!(matches!(s.source, SourceConfig::Nntp { credentials: None, .. }));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            mode = "pop3-ssl"
            host = "pop.example.com"
            user = "me"
            password = "secret"
            title = "From file"
            max_items = 25
            prefer = "html"
            "#,
        )
        .unwrap();
        let mut args = CliArgs {
            feed_file: Some(PathBuf::from("feed.xml")),
            ..Default::default()
        };
        args.title = Some("From CLI".into());
        args.uri = Some("tag:example.com,2024:list".into());

        let s = Settings::resolve(args, file).unwrap();
        assert_eq!(s.title, "From CLI");
        assert_eq!(s.uri, "tag:example.com,2024:list");
        assert!(!s.uri_defaulted);
        assert_eq!(s.retention.max_items, 25);
        assert_eq!(s.prefer, ContentPreference::Html);
        assert!(matches!(s.source, SourceConfig::Pop3 { ssl: true, .. }));
    }

    #[test]
    fn test_rejects_relative_uri() {
        let mut args = cli(Mode::Pipe);
        args.uri = Some("not a uri".into());
        assert!(matches!(
            Settings::resolve(args, FileConfig::default()),
            Err(ConfigError::InvalidUri { .. })
        ));
    }
}
