/*
 * lilmail - conf.rs
 *
 * Copyright 2017 Manos Pitsidianakis
 *
 * This file is part of lilmail.
 *
 * lilmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lilmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lilmail. If not, see <http://www.gnu.org/licenses/>.
 */

//! Mail account configuration.
//!
//! An account is described in TOML:
//!
//! ```toml
//! name = "work"
//! identity = "alice@example.com"
//! server_hostname = "mail.example.com"
//! server_password = "hunter2"
//! server_port = 993
//! username_is_email = false
//! timeout = 30
//! ```
//!
//! [`AccountSettings`] holds the file as written. [`ImapServerConf`] is the
//! validated form a session is opened with.

use std::{path::Path, str::FromStr, time::Duration};

use indexmap::IndexMap;

use crate::{
    error::{Error, ErrorKind, Result, ResultIntoError},
    utils::logging::LogLevel,
};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AccountSettings {
    pub name: String,
    /// The account's e-mail address.
    pub identity: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Server settings: `server_hostname`, `server_port`, `server_password`
    /// or `server_password_command`, `server_username`, `username_is_email`,
    /// `use_tls`, `danger_accept_invalid_certs`, `timeout`,
    /// `fetch_channel_capacity`.
    #[serde(flatten)]
    pub extra: IndexMap<String, toml::Value>,
}

impl AccountSettings {
    /// Parse settings from TOML text. Errors name the offending key path.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let deserializer = toml::Deserializer::new(s);
        Ok(serde_path_to_error::deserialize(deserializer)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .chain_err_summary(|| format!("Could not read {}", path.display()))
            .chain_err_kind(ErrorKind::Configuration)?;
        Self::from_toml_str(&contents)
            .chain_err_summary(|| format!("Could not parse {}", path.display()))
    }

    /// Create the account's display name from fields
    /// [`AccountSettings::identity`] and [`AccountSettings::display_name`].
    pub fn make_display_name(&self) -> String {
        if let Some(d) = self.display_name.as_ref() {
            format!("{} <{}>", d, self.identity)
        } else {
            self.identity.to_string()
        }
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        self.extra.get(key).map(|v| match v {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Get the server password, either directly from the `server_password`
    /// settings value, or by running the `server_password_command` and reading
    /// the output.
    pub fn server_password(&self) -> Result<String> {
        if let Some(cmd) = self.extra_str("server_password_command") {
            let output = std::process::Command::new("sh")
                .args(["-c", &cmd])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .output()?;

            if output.status.success() {
                Ok(std::str::from_utf8(&output.stdout)?.trim_end().to_string())
            } else {
                Err(Error::new(format!(
                    "({}) server_password_command `{}` returned {}: {}",
                    self.name,
                    cmd,
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ))
                .set_kind(ErrorKind::Configuration))
            }
        } else if let Some(pass) = self.extra_str("server_password") {
            Ok(pass)
        } else {
            Err(Error::new(format!(
                "Configuration error ({}): connection requires either server_password or \
                 server_password_command",
                self.name
            ))
            .set_kind(ErrorKind::Configuration))
        }
    }
}

macro_rules! get_conf_val {
    ($s:ident[$var:literal]) => {
        $s.extra_str($var).ok_or_else(|| {
            Error::new(format!(
                "Configuration error ({}): IMAP connection requires the field `{}` set",
                $s.name.as_str(),
                $var
            ))
            .set_kind(ErrorKind::Configuration)
        })
    };
    ($s:ident[$var:literal], $default:expr) => {
        $s.extra_str($var)
            .map(|v| {
                <_>::from_str(&v).map_err(|e| {
                    Error::new(format!(
                        "Configuration error ({}): Invalid value for field `{}`: {}\n{}",
                        $s.name.as_str(),
                        $var,
                        v,
                        e
                    ))
                    .set_kind(ErrorKind::Configuration)
                })
            })
            .unwrap_or_else(|| Ok($default))
    };
}

pub const DEFAULT_PORT: u16 = 993;
pub const DEFAULT_TIMEOUT_SECS: u64 = 16;
pub const DEFAULT_FETCH_CHANNEL_CAPACITY: usize = 32;

/// Connection parameters of one IMAP session.
#[derive(Clone)]
pub struct ImapServerConf {
    pub server_hostname: String,
    pub server_username: String,
    pub server_password: String,
    pub server_port: u16,
    pub use_tls: bool,
    pub danger_accept_invalid_certs: bool,
    /// Bounds dialing, the TLS handshake and every socket read and write.
    pub timeout: Option<Duration>,
    /// How many raw messages may wait for the decoder during a fetch.
    pub fetch_channel_capacity: usize,
}

impl std::fmt::Debug for ImapServerConf {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(ImapServerConf))
            .field("server_hostname", &self.server_hostname)
            .field("server_username", &self.server_username)
            .field("server_password", &"<redacted>")
            .field("server_port", &self.server_port)
            .field("use_tls", &self.use_tls)
            .field(
                "danger_accept_invalid_certs",
                &self.danger_accept_invalid_certs,
            )
            .field("timeout", &self.timeout)
            .field("fetch_channel_capacity", &self.fetch_channel_capacity)
            .finish()
    }
}

impl ImapServerConf {
    /// Settings for a TLS session from a stored `(server, port, identity,
    /// secret)` tuple, with every other value at its default.
    pub fn new(server: &str, port: u16, identity: &str, secret: &str) -> Result<Self> {
        let ret = Self {
            server_hostname: server.to_string(),
            server_username: identity.to_string(),
            server_password: secret.to_string(),
            server_port: port,
            use_tls: true,
            danger_accept_invalid_certs: false,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            fetch_channel_capacity: DEFAULT_FETCH_CHANNEL_CAPACITY,
        };
        ret.validate()?;
        Ok(ret)
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.server_hostname.trim().is_empty() {
            "server hostname is empty"
        } else if self.server_port == 0 {
            "server port is 0"
        } else if self.server_username.trim().is_empty() {
            "login identity is empty"
        } else if self.server_password.is_empty() {
            "password is empty"
        } else if self.fetch_channel_capacity == 0 {
            "fetch_channel_capacity must be at least 1"
        } else {
            return Ok(());
        };
        Err(Error::new(format!("Configuration error: {}", problem))
            .set_kind(ErrorKind::Configuration))
    }
}

impl TryFrom<&AccountSettings> for ImapServerConf {
    type Error = Error;

    fn try_from(s: &AccountSettings) -> Result<Self> {
        let server_hostname = get_conf_val!(s["server_hostname"])?;
        let server_password = s.server_password()?;
        let username_is_email = get_conf_val!(s["username_is_email"], true)?;
        let server_username = match s.extra_str("server_username") {
            Some(u) => u,
            None => username_from_identity(&s.identity, username_is_email)?,
        };
        let server_port = get_conf_val!(s["server_port"], DEFAULT_PORT)?;
        let use_tls = get_conf_val!(s["use_tls"], true)?;
        let danger_accept_invalid_certs: bool =
            get_conf_val!(s["danger_accept_invalid_certs"], false)?;
        let timeout = get_conf_val!(s["timeout"], DEFAULT_TIMEOUT_SECS)?;
        let timeout = if timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(timeout))
        };
        let fetch_channel_capacity =
            get_conf_val!(s["fetch_channel_capacity"], DEFAULT_FETCH_CHANNEL_CAPACITY)?;
        let ret = Self {
            server_hostname,
            server_username,
            server_password,
            server_port,
            use_tls,
            danger_accept_invalid_certs,
            timeout,
            fetch_channel_capacity,
        };
        ret.validate()
            .chain_err_summary(|| format!("Account `{}` is misconfigured", s.name))?;
        Ok(ret)
    }
}

/// Derive the login name from an e-mail address: the address itself if the
/// server expects full addresses, its local part otherwise.
pub fn username_from_identity(identity: &str, username_is_email: bool) -> Result<String> {
    let identity = identity.trim();
    let invalid = || {
        Error::new(format!("Invalid e-mail address `{}`", identity))
            .set_kind(ErrorKind::Validation)
    };
    let (local, domain) = identity.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() {
        return Err(invalid());
    }
    Ok(if username_is_email {
        identity.to_string()
    } else {
        local.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = r#"
name = "work"
identity = "alice@example.com"
server_hostname = "mail.example.com"
server_password = "hunter2"
username_is_email = false
timeout = 0
"#;

    #[test]
    fn test_conf_from_account_settings() {
        let settings = AccountSettings::from_toml_str(ACCOUNT).unwrap();
        assert_eq!(settings.name, "work");
        assert_eq!(settings.make_display_name(), "alice@example.com");
        let conf = ImapServerConf::try_from(&settings).unwrap();
        assert_eq!(conf.server_hostname, "mail.example.com");
        assert_eq!(conf.server_username, "alice");
        assert_eq!(conf.server_port, DEFAULT_PORT);
        assert!(conf.use_tls);
        assert_eq!(conf.timeout, None);
        assert_eq!(conf.fetch_channel_capacity, DEFAULT_FETCH_CHANNEL_CAPACITY);
        assert!(!format!("{:?}", conf).contains("hunter2"));
    }

    #[test]
    fn test_conf_missing_and_invalid_fields() {
        let settings =
            AccountSettings::from_toml_str("name = \"a\"\nidentity = \"a@b.c\"\n").unwrap();
        let err = ImapServerConf::try_from(&settings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.to_string().contains("server_hostname"));

        let settings = AccountSettings::from_toml_str(
            "name = \"a\"\nidentity = \"a@b.c\"\nserver_hostname = \"h\"\nserver_password = \
             \"p\"\nserver_port = \"imap\"\n",
        )
        .unwrap();
        let err = ImapServerConf::try_from(&settings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.to_string().contains("server_port"));
    }

    #[test]
    fn test_conf_type_error() {
        let err = AccountSettings::from_toml_str("name = 5\nidentity = \"a@b.c\"\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.to_string().contains("invalid type"), "{}", err);
    }

    #[test]
    fn test_conf_from_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("account.toml");
        std::fs::write(&path, ACCOUNT).unwrap();
        let settings = AccountSettings::from_path(&path).unwrap();
        assert_eq!(settings.identity, "alice@example.com");
        assert!(AccountSettings::from_path(&tempdir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_conf_password_command() {
        let settings = AccountSettings::from_toml_str(
            "name = \"a\"\nidentity = \"a@b.c\"\nserver_password_command = \"echo s3cret\"\n",
        )
        .unwrap();
        assert_eq!(settings.server_password().unwrap(), "s3cret");
    }

    #[test]
    fn test_username_from_identity() {
        assert_eq!(
            username_from_identity("bob@example.com", true).unwrap(),
            "bob@example.com"
        );
        assert_eq!(username_from_identity(" bob@example.com ", false).unwrap(), "bob");
        assert_eq!(
            username_from_identity("bob", false).unwrap_err().kind,
            ErrorKind::Validation
        );
        assert!(username_from_identity("@example.com", false).is_err());
    }

    #[test]
    fn test_server_conf_new_validates() {
        assert!(ImapServerConf::new("imap.example.com", 993, "u", "p").is_ok());
        assert_eq!(
            ImapServerConf::new("", 993, "u", "p").unwrap_err().kind,
            ErrorKind::Configuration
        );
        assert!(ImapServerConf::new("h", 0, "u", "p").is_err());
        assert!(ImapServerConf::new("h", 993, "u", "").is_err());
    }
}
