// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chat-command surface.
//!
//! The bot transport is external; this module is the pure translation
//! layer it calls into. Commands cover user registration, magic-link
//! issuance, key management, and notification preferences - no domain
//! logic lives here beyond rendering.

use tracing::warn;

use berth_core::credentials::CredentialService;
use berth_core::scopes::{self, Scope};
use berth_core::store::users::NotifyPref;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChatCommand {
    /// `/start` - register (or refresh) the user.
    Start,
    /// `/key <scope>...` - issue a magic link for a key with the given
    /// scopes (defaults to every non-admin scope).
    IssueKey {
        /// Scopes the resulting key will carry.
        scopes: Vec<Scope>,
    },
    /// `/keys` - list the caller's keys.
    ListKeys,
    /// `/revoke <key_id>` - revoke one key.
    RevokeKey {
        /// Public key id.
        key_id: String,
    },
    /// `/notify <deployments|environments|recovery> <on|off>`.
    Notify {
        /// Which preference to flip.
        pref: NotifyPref,
        /// New value.
        enabled: bool,
    },
    /// `/help` or anything unrecognized.
    Help,
}

impl ChatCommand {
    /// Parse a raw chat message into a command.
    pub fn parse(text: &str) -> ChatCommand {
        let mut words = text.split_whitespace();
        match words.next() {
            Some("/start") => ChatCommand::Start,
            Some("/key") => {
                let scopes: Vec<Scope> = words.filter_map(|w| w.parse().ok()).collect();
                let scopes = if scopes.is_empty() {
                    vec![
                        Scope::EnvRead,
                        Scope::EnvWrite,
                        Scope::DeployRead,
                        Scope::DeployWrite,
                        Scope::LogsRead,
                    ]
                } else {
                    scopes
                };
                ChatCommand::IssueKey { scopes }
            }
            Some("/keys") => ChatCommand::ListKeys,
            Some("/revoke") => match words.next() {
                Some(key_id) => ChatCommand::RevokeKey {
                    key_id: key_id.to_string(),
                },
                None => ChatCommand::Help,
            },
            Some("/notify") => {
                let pref = match words.next() {
                    Some("deployments") => Some(NotifyPref::Deployments),
                    Some("environments") => Some(NotifyPref::Environments),
                    Some("recovery") => Some(NotifyPref::Recovery),
                    _ => None,
                };
                let enabled = match words.next() {
                    Some("on") => Some(true),
                    Some("off") => Some(false),
                    _ => None,
                };
                match (pref, enabled) {
                    (Some(pref), Some(enabled)) => ChatCommand::Notify { pref, enabled },
                    _ => ChatCommand::Help,
                }
            }
            _ => ChatCommand::Help,
        }
    }
}

/// Dispatcher from chat messages to credential-service calls.
#[derive(Clone)]
pub struct ChatDispatcher {
    creds: CredentialService,
    base_url: String,
}

impl ChatDispatcher {
    /// Build a dispatcher; `base_url` prefixes magic-link URLs.
    pub fn new(creds: CredentialService, base_url: String) -> Self {
        Self { creds, base_url }
    }

    /// Handle one inbound message and render the reply.
    pub async fn dispatch(&self, chat_id: i64, handle: Option<&str>, text: &str) -> String {
        let user = match self.creds.users().ensure(chat_id, handle).await {
            Ok(user) => user,
            Err(e) => {
                warn!(chat_id, error = %e, "Chat user registration failed");
                return "Something went wrong, try again later.".to_string();
            }
        };

        match ChatCommand::parse(text) {
            ChatCommand::Start => {
                "Welcome to berth. Use /key to get an API key, /keys to list them, \
                 /revoke <id> to revoke one, /notify to tune notifications."
                    .to_string()
            }
            ChatCommand::IssueKey { scopes } => {
                match self.creds.issue_magic_link(&user.user_id, &scopes).await {
                    Ok(link) => format!(
                        "Open this link within 15 minutes to receive your key \
                         (scopes: {}):\n{}/auth/verify?token={}",
                        scopes
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        self.base_url,
                        link.token
                    ),
                    Err(e) => {
                        warn!(error = %e, "Magic link issuance failed");
                        "Could not issue a key right now.".to_string()
                    }
                }
            }
            ChatCommand::ListKeys => match self.creds.keys().list_for_user(&user.user_id).await {
                Ok(keys) if keys.is_empty() => "You have no API keys yet; use /key.".to_string(),
                Ok(keys) => keys
                    .iter()
                    .map(|k| {
                        let state = if k.revoked_at.is_some() {
                            "revoked"
                        } else {
                            "active"
                        };
                        format!(
                            "{} [{}] scopes: {}",
                            k.key_id,
                            state,
                            scopes::parse_scopes(&k.scopes)
                                .iter()
                                .map(Scope::as_str)
                                .collect::<Vec<_>>()
                                .join(", ")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => {
                    warn!(error = %e, "Key listing failed");
                    "Could not list keys right now.".to_string()
                }
            },
            ChatCommand::RevokeKey { key_id } => {
                match self.creds.keys().revoke(&user.user_id, &key_id).await {
                    Ok(true) => format!("Key {key_id} revoked."),
                    Ok(false) => format!("No key {key_id} found."),
                    Err(e) => {
                        warn!(error = %e, "Key revocation failed");
                        "Could not revoke right now.".to_string()
                    }
                }
            }
            ChatCommand::Notify { pref, enabled } => {
                match self
                    .creds
                    .users()
                    .set_notify(&user.user_id, pref, enabled)
                    .await
                {
                    Ok(()) => format!(
                        "Notifications {}.",
                        if enabled { "enabled" } else { "disabled" }
                    ),
                    Err(e) => {
                        warn!(error = %e, "Preference update failed");
                        "Could not update preferences right now.".to_string()
                    }
                }
            }
            ChatCommand::Help => "Commands: /start, /key [scopes...], /keys, \
                 /revoke <key_id>, /notify <deployments|environments|recovery> <on|off>"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_command_with_scopes() {
        let cmd = ChatCommand::parse("/key env.read deploy.write");
        assert_eq!(
            cmd,
            ChatCommand::IssueKey {
                scopes: vec![Scope::EnvRead, Scope::DeployWrite]
            }
        );
    }

    #[test]
    fn bare_key_command_defaults_to_non_admin_scopes() {
        match ChatCommand::parse("/key") {
            ChatCommand::IssueKey { scopes } => {
                assert!(!scopes.contains(&Scope::Admin));
                assert_eq!(scopes.len(), 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_revoke_and_notify() {
        assert_eq!(
            ChatCommand::parse("/revoke abcdefghijklmnop"),
            ChatCommand::RevokeKey {
                key_id: "abcdefghijklmnop".into()
            }
        );
        assert_eq!(
            ChatCommand::parse("/notify deployments off"),
            ChatCommand::Notify {
                pref: NotifyPref::Deployments,
                enabled: false
            }
        );
        assert_eq!(ChatCommand::parse("/notify deployments maybe"), ChatCommand::Help);
        assert_eq!(ChatCommand::parse("/revoke"), ChatCommand::Help);
    }

    #[test]
    fn unknown_input_is_help() {
        assert_eq!(ChatCommand::parse("hello there"), ChatCommand::Help);
        assert_eq!(ChatCommand::parse(""), ChatCommand::Help);
    }
}
