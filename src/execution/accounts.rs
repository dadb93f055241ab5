//! Account registry
//!
//! Built once at startup from configuration and validated up front, so a bad
//! account entry fails the process before any cycle runs.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{AccountConfig, AgentConfig};
use crate::domain::{AccountId, AgentId};
use crate::error::RegistryError;

pub const MAX_ACCOUNTS: usize = 6;

/// Whose recommendation an account trades
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountRole {
    /// The council decision
    Council,
    /// One agent's own pitch
    Agent(AgentId),
}

impl FromStr for AccountRole {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("council") {
            return Ok(AccountRole::Council);
        }
        match raw.split_once(':') {
            Some((kind, agent)) if kind.eq_ignore_ascii_case("agent") && !agent.trim().is_empty() => {
                Ok(AccountRole::Agent(AgentId::new(agent.trim())))
            }
            _ => Err(format!("invalid account role '{}', expected council or agent:<id>", raw)),
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRole::Council => f.write_str("council"),
            AccountRole::Agent(id) => write!(f, "agent:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Alpaca,
    Paper,
}

impl FromStr for BrokerKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alpaca" => Ok(BrokerKind::Alpaca),
            "paper" => Ok(BrokerKind::Paper),
            other => Err(format!("unknown broker '{}'", other)),
        }
    }
}

/// API key pair, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    key_id: String,
    secret: String,
}

impl Credentials {
    pub fn new(key_id: String, secret: String) -> Self {
        Self { key_id, secret }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AccountSpec {
    pub id: AccountId,
    pub role: AccountRole,
    pub broker: BrokerKind,
    pub base_url: Option<Url>,
    pub credentials: Option<Credentials>,
    pub paper_equity: Decimal,
}

const DEFAULT_PAPER_EQUITY: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

/// Validated account table, in configuration order
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Vec<AccountSpec>,
}

impl AccountRegistry {
    /// Validate and build from configuration.
    ///
    /// With `dry_run` every account trades on the paper broker and no
    /// credentials are required.
    pub fn from_config(
        accounts: &[AccountConfig],
        agents: &[AgentConfig],
        dry_run: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RegistryError> {
        if accounts.len() > MAX_ACCOUNTS {
            return Err(RegistryError::TooManyAccounts {
                count: accounts.len(),
                max: MAX_ACCOUNTS,
            });
        }

        let agent_ids: HashSet<&str> = agents.iter().map(|a| a.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut council: Option<&str> = None;
        let mut specs = Vec::with_capacity(accounts.len());

        for account in accounts {
            let id = account.id.trim();
            if id.is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if !seen.insert(id) {
                return Err(RegistryError::DuplicateAccount(id.to_string()));
            }

            let role = AccountRole::from_str(&account.role).map_err(|reason| RegistryError::InvalidRole {
                account: id.to_string(),
                reason,
            })?;
            match &role {
                AccountRole::Council => {
                    if let Some(existing) = council {
                        return Err(RegistryError::DuplicateCouncil(format!("{}, {}", existing, id)));
                    }
                    council = Some(id);
                }
                AccountRole::Agent(agent) => {
                    if !agent_ids.contains(agent.as_str()) {
                        return Err(RegistryError::UnknownAgent {
                            account: id.to_string(),
                            agent: agent.to_string(),
                        });
                    }
                }
            }

            let configured = BrokerKind::from_str(&account.broker).map_err(|reason| RegistryError::UnknownBroker {
                account: id.to_string(),
                reason,
            })?;
            let broker = if dry_run { BrokerKind::Paper } else { configured };

            let base_url = account
                .base_url
                .as_deref()
                .map(Url::parse)
                .transpose()
                .map_err(|e| RegistryError::InvalidUrl {
                    account: id.to_string(),
                    reason: e.to_string(),
                })?;

            let credentials = match broker {
                BrokerKind::Paper => None,
                BrokerKind::Alpaca => Some(resolve_credentials(id, account, &env)?),
            };

            specs.push(AccountSpec {
                id: AccountId::new(id),
                role,
                broker,
                base_url,
                credentials,
                paper_equity: account.paper_equity.unwrap_or(DEFAULT_PAPER_EQUITY),
            });
        }

        Ok(Self { accounts: specs })
    }

    pub fn get(&self, id: &AccountId) -> Option<&AccountSpec> {
        self.accounts.iter().find(|a| &a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccountSpec> {
        self.accounts.iter()
    }

    pub fn ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

fn resolve_credentials(
    id: &str,
    account: &AccountConfig,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Credentials, RegistryError> {
    let key_env = account
        .key_env
        .clone()
        .unwrap_or_else(|| format!("COUNCIL_{}_KEY_ID", id.to_ascii_uppercase()));
    let secret_env = account
        .secret_env
        .clone()
        .unwrap_or_else(|| format!("COUNCIL_{}_SECRET", id.to_ascii_uppercase()));

    let lookup = |var: &str| {
        env(var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RegistryError::MissingCredential {
                account: id.to_string(),
                env_var: var.to_string(),
            })
    };

    Ok(Credentials::new(lookup(&key_env)?, lookup(&secret_env)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn agents() -> Vec<AgentConfig> {
        ["gpt", "claude"]
            .iter()
            .map(|id| AgentConfig {
                id: id.to_string(),
                model: format!("vendor/{}", id),
                temperature: 0.7,
            })
            .collect()
    }

    fn account(id: &str, role: &str) -> AccountConfig {
        AccountConfig {
            id: id.to_string(),
            role: role.to_string(),
            broker: "alpaca".to_string(),
            base_url: Some("https://paper-api.alpaca.markets".to_string()),
            key_env: None,
            secret_env: None,
            paper_equity: None,
        }
    }

    fn env_with(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("council".parse::<AccountRole>().unwrap(), AccountRole::Council);
        assert_eq!(
            "agent:gpt".parse::<AccountRole>().unwrap(),
            AccountRole::Agent(AgentId::from("gpt"))
        );
        assert!("agent:".parse::<AccountRole>().is_err());
        assert!("owner".parse::<AccountRole>().is_err());
    }

    #[test]
    fn test_registry_resolves_credentials() {
        let env = env_with(&[("COUNCIL_MAIN_KEY_ID", "k"), ("COUNCIL_MAIN_SECRET", "s")]);
        let registry = AccountRegistry::from_config(&[account("main", "council")], &agents(), false, env).unwrap();
        let spec = registry.get(&AccountId::from("main")).unwrap();
        assert_eq!(spec.broker, BrokerKind::Alpaca);
        assert_eq!(spec.credentials.as_ref().unwrap().key_id(), "k");
        assert!(format!("{:?}", spec.credentials).contains("<redacted>"));
    }

    #[test]
    fn test_missing_credentials_fail_startup() {
        let err = AccountRegistry::from_config(&[account("main", "council")], &agents(), false, env_with(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::MissingCredential {
                account: "main".into(),
                env_var: "COUNCIL_MAIN_KEY_ID".into()
            }
        );
    }

    #[test]
    fn test_dry_run_needs_no_credentials() {
        let registry =
            AccountRegistry::from_config(&[account("main", "council")], &agents(), true, env_with(&[])).unwrap();
        assert_eq!(registry.iter().next().unwrap().broker, BrokerKind::Paper);
        assert_eq!(registry.iter().next().unwrap().paper_equity, Decimal::from(100_000));
    }

    #[test]
    fn test_structural_validation() {
        let dup = [account("a", "council"), account("a", "agent:gpt")];
        assert!(matches!(
            AccountRegistry::from_config(&dup, &agents(), true, env_with(&[])),
            Err(RegistryError::DuplicateAccount(_))
        ));

        let unknown = [account("a", "agent:grok")];
        assert!(matches!(
            AccountRegistry::from_config(&unknown, &agents(), true, env_with(&[])),
            Err(RegistryError::UnknownAgent { .. })
        ));

        let two_councils = [account("a", "council"), account("b", "council")];
        assert!(matches!(
            AccountRegistry::from_config(&two_councils, &agents(), true, env_with(&[])),
            Err(RegistryError::DuplicateCouncil(_))
        ));

        let seven: Vec<_> = (0..7).map(|i| account(&format!("a{}", i), "agent:gpt")).collect();
        assert!(matches!(
            AccountRegistry::from_config(&seven, &agents(), true, env_with(&[])),
            Err(RegistryError::TooManyAccounts { count: 7, max: 6 })
        ));

        let mut bad_url = account("a", "council");
        bad_url.base_url = Some("not a url".into());
        assert!(matches!(
            AccountRegistry::from_config(&[bad_url], &agents(), true, env_with(&[])),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }
}
