//! Per-user voting preferences and the source they are refreshed from.
//!
//! The pool's preferences database is an external collaborator; the daemon
//! consumes it through `VotingPrefsSource` and ships an HTTP JSON
//! implementation. Tests substitute an in-process fake.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One pool user's voting choices, keyed by their multisig address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVotingPrefs {
    pub user_id: i64,
    pub multisig_address: String,
    pub vote_bits: u16,
    pub vote_bits_version: u32,
}

/// The wallet's own voting configuration, captured once at startup and used
/// to fill in defaults and override stale per-user vote bits.
#[derive(Debug, Clone, Default)]
pub struct GlobalVotingConfig {
    pub vote_bits: u16,
    pub vote_version: u32,
    pub vote_bits_extended: String,
}

impl GlobalVotingConfig {
    /// Default preferences for a user with no stored choices.
    pub fn default_prefs(&self, multisig_address: &str) -> UserVotingPrefs {
        UserVotingPrefs {
            user_id: 0,
            multisig_address: multisig_address.to_string(),
            vote_bits: self.vote_bits,
            vote_bits_version: self.vote_version,
        }
    }

    /// Resolve the vote bits to use for `prefs`: the user's own when their
    /// version matches the network's, the wallet's otherwise.
    pub fn effective_vote_bits(&self, prefs: &UserVotingPrefs) -> u16 {
        if prefs.vote_bits_version == self.vote_version {
            prefs.vote_bits
        } else {
            self.vote_bits
        }
    }
}

/// Where the daemon fetches the full preferences map from.
#[async_trait]
pub trait VotingPrefsSource: Send + Sync {
    async fn fetch_voting_prefs(&self) -> Result<HashMap<String, UserVotingPrefs>>;
}

/// Preferences source backed by the pool's HTTPS endpoint, which serves the
/// user table as a JSON array.
pub struct HttpPrefsSource {
    http: reqwest::Client,
    url: String,
    user: Option<String>,
    pass: Option<String>,
}

impl HttpPrefsSource {
    pub fn new(
        http: reqwest::Client,
        url: String,
        user: Option<String>,
        pass: Option<String>,
    ) -> Self {
        Self {
            http,
            url,
            user,
            pass,
        }
    }
}

#[async_trait]
impl VotingPrefsSource for HttpPrefsSource {
    async fn fetch_voting_prefs(&self) -> Result<HashMap<String, UserVotingPrefs>> {
        let mut req = self.http.get(&self.url);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.pass.as_deref());
        }
        let users: Vec<UserVotingPrefs> = req
            .send()
            .await
            .context("preferences request failed")?
            .error_for_status()
            .context("preferences request rejected")?
            .json()
            .await
            .context("failed to parse preferences JSON")?;

        Ok(users
            .into_iter()
            .map(|u| (u.multisig_address.clone(), u))
            .collect())
    }
}
