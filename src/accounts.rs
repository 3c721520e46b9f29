//! Account registry loaded from a TOML file.
//!
//! ```toml
//! [[accounts]]
//! name = "prod"
//! account_id = "11111111-2222-3333-4444-555555555555"
//! ```

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use crate::model::Account;

/// Name given to the account synthesised from `SCW_DEFAULT_PROJECT_ID`.
pub const DEFAULT_ACCOUNT_NAME: &str = "default";

/// Errors raised while loading or selecting accounts.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AccountsError {
    /// Raised when file system operations fail.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file is not valid TOML or has the wrong shape.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser message.
        message: String,
    },
    /// Raised when an entry is empty or duplicated.
    #[error("invalid account entry in {path}: {message}")]
    InvalidEntry {
        /// Path holding the entry.
        path: Utf8PathBuf,
        /// What is wrong with it.
        message: String,
    },
    /// Raised when neither an accounts file nor a default project is set.
    #[error(
        "no accounts configured: set NOCTURNE_ACCOUNTS_FILE or SCW_DEFAULT_PROJECT_ID"
    )]
    NoAccounts,
    /// Raised when a selected name is not in the registry.
    #[error("unknown account '{name}'")]
    UnknownAccount {
        /// Name that was requested.
        name: String,
    },
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Which accounts a run should visit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccountSelection {
    /// Every registered account.
    All,
    /// Accounts with these names, in this order.
    Named(Vec<String>),
}

impl FromStr for AccountSelection {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        Ok(Self::Named(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

/// Accounts known to the scheduler, in file order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry {
    /// Builds a registry from already validated accounts.
    #[must_use]
    pub const fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    /// Resolves the registry from configuration: the accounts file when set,
    /// otherwise a single `default` account for `default_project_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError`] when the file cannot be read or is invalid,
    /// or when neither source is configured.
    pub fn resolve(
        accounts_file: Option<&Utf8Path>,
        default_project_id: Option<&str>,
    ) -> Result<Self, AccountsError> {
        if let Some(path) = accounts_file {
            return Self::load(path);
        }
        match default_project_id.map(str::trim) {
            Some(id) if !id.is_empty() => Ok(Self::new(vec![Account::new(DEFAULT_ACCOUNT_NAME, id)])),
            _ => Err(AccountsError::NoAccounts),
        }
    }

    /// Reads and validates an accounts file.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError`] when the file cannot be read or is invalid.
    pub fn load(path: &Utf8Path) -> Result<Self, AccountsError> {
        let contents = read_file(path)?;
        Self::parse(path, &contents)
    }

    /// Parses accounts from TOML `contents`; `path` is used in messages.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError`] for malformed TOML, empty fields, duplicate
    /// names or ids, or a file with no entries.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, AccountsError> {
        let file: AccountsFile = toml::from_str(contents).map_err(|err| AccountsError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let invalid = |message: String| AccountsError::InvalidEntry {
            path: path.to_path_buf(),
            message,
        };
        let mut names = BTreeSet::new();
        let mut ids = BTreeSet::new();
        let mut accounts = Vec::with_capacity(file.accounts.len());
        for entry in file.accounts {
            let account = Account::new(entry.name.trim(), entry.account_id.trim());
            if account.name.is_empty() {
                return Err(invalid(String::from("account name must not be empty")));
            }
            if account.account_id.is_empty() {
                return Err(invalid(format!(
                    "account '{}' has an empty account_id",
                    account.name
                )));
            }
            if !names.insert(account.name.clone()) {
                return Err(invalid(format!("duplicate account name '{}'", account.name)));
            }
            if !ids.insert(account.account_id.clone()) {
                return Err(invalid(format!(
                    "duplicate account_id '{}'",
                    account.account_id
                )));
            }
            accounts.push(account);
        }
        if accounts.is_empty() {
            return Err(invalid(String::from("no [[accounts]] entries")));
        }
        Ok(Self { accounts })
    }

    /// Registered accounts in file order.
    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Returns the accounts a run should visit.
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::UnknownAccount`] for names not in the
    /// registry.
    pub fn select(&self, selection: &AccountSelection) -> Result<Vec<Account>, AccountsError> {
        match selection {
            AccountSelection::All => Ok(self.accounts.clone()),
            AccountSelection::Named(names) => {
                let mut seen = BTreeSet::new();
                names
                    .iter()
                    .filter(|name| seen.insert(name.as_str()))
                    .map(|name| {
                        self.accounts
                            .iter()
                            .find(|account| account.name == *name)
                            .cloned()
                            .ok_or_else(|| AccountsError::UnknownAccount { name: name.clone() })
                    })
                    .collect()
            }
        }
    }
}

fn read_file(path: &Utf8Path) -> Result<String, AccountsError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| AccountsError::Io {
        path: path.to_path_buf(),
        message: String::from("accounts file path is missing a filename"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| AccountsError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    dir.read_to_string(file_name)
        .map_err(|err| AccountsError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}
