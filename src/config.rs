use ethers::types::Address;
use eyre::{eyre, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

/// Chain id shared by the in-process Hardhat network and `localhost` nodes (Hardhat/Anvil).
pub const LOCAL_CHAIN_ID: u64 = 31337;

const LOCAL_RPC: &str = "http://127.0.0.1:8545";

/// Confirmations to wait for on live networks when the table does not say otherwise.
const LIVE_CONFIRMATIONS: u64 = 6;

/// Per-chain settings, keyed by chain id in [`HelperConfig::networks`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub name: String,
    #[serde(default)]
    pub eth_usd_price_feed: Option<String>,
    #[serde(default)]
    pub block_confirmations: Option<u64>,
    /// Name of an environment variable that holds the RPC URL.
    /// Keeps provider API keys out of committed config.
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub rpc: Option<String>,
}

/// Static network table: which networks are local development chains, and what
/// each live chain uses for its ETH/USD feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperConfig {
    pub development_chains: Vec<String>,
    pub networks: BTreeMap<u64, NetworkEntry>,
}

impl HelperConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };

        let raw = fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read network config {}: {e}", path.display()))?;
        let cfg: HelperConfig = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse network config {}: {e}", path.display()))?;

        if cfg.development_chains.is_empty() {
            tracing::warn!(
                path = %path.display(),
                "network config lists no development chains; every network will be treated as live"
            );
        }

        Ok(cfg)
    }

    pub fn builtin() -> Self {
        let live = |name: &str, feed: &str, env: &str| NetworkEntry {
            name: name.to_string(),
            eth_usd_price_feed: Some(feed.to_string()),
            block_confirmations: Some(LIVE_CONFIRMATIONS),
            rpc_env_var: Some(env.to_string()),
            rpc: None,
        };

        let mut networks = BTreeMap::new();
        networks.insert(
            LOCAL_CHAIN_ID,
            NetworkEntry {
                name: "localhost".to_string(),
                eth_usd_price_feed: None,
                block_confirmations: Some(1),
                rpc_env_var: None,
                rpc: Some(LOCAL_RPC.to_string()),
            },
        );
        networks.insert(
            1,
            live(
                "mainnet",
                "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419",
                "MAINNET_RPC_URL",
            ),
        );
        networks.insert(
            5,
            live(
                "goerli",
                "0xD4a33860578De61DBAbDc8BFdb98FD742fA7028e",
                "GOERLI_RPC_URL",
            ),
        );
        networks.insert(
            11155111,
            live(
                "sepolia",
                "0x694AA1769357215DE4FAC081bf1f309aDC325306",
                "SEPOLIA_RPC_URL",
            ),
        );
        networks.insert(
            137,
            live(
                "polygon",
                "0xF9680D99D6C9589e2a93a78A04A279e029205945",
                "POLYGON_RPC_URL",
            ),
        );

        Self {
            development_chains: vec!["hardhat".to_string(), "localhost".to_string()],
            networks,
        }
    }

    pub fn is_development(&self, network: &str) -> bool {
        self.development_chains.iter().any(|n| n == network)
    }

    /// Look up a network by name.
    ///
    /// Development networks that have no row of their own (e.g. `hardhat`) share the
    /// local chain's entry.
    pub fn network_by_name(&self, network: &str) -> Result<(u64, &NetworkEntry)> {
        if let Some((id, entry)) = self.networks.iter().find(|(_, e)| e.name == network) {
            return Ok((*id, entry));
        }

        if self.is_development(network) {
            if let Some(entry) = self.networks.get(&LOCAL_CHAIN_ID) {
                return Ok((LOCAL_CHAIN_ID, entry));
            }
        }

        let known: Vec<&str> = self.networks.values().map(|e| e.name.as_str()).collect();
        Err(eyre!(
            "unknown network '{network}'. known networks: {}",
            known.join(", ")
        ))
    }

    pub fn eth_usd_price_feed(&self, chain_id: u64) -> Result<Address> {
        let entry = self
            .networks
            .get(&chain_id)
            .ok_or_else(|| eyre!("no network config for chainId {chain_id}"))?;
        let feed = entry
            .eth_usd_price_feed
            .as_deref()
            .ok_or_else(|| {
                eyre!(
                    "network '{}' (chainId {chain_id}) has no ethUsdPriceFeed configured",
                    entry.name
                )
            })?;
        Address::from_str(feed).map_err(|e| {
            eyre!(
                "invalid ethUsdPriceFeed '{feed}' for network '{}': {e}",
                entry.name
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub network: String,
    pub chain_id: u64,
    pub development: bool,
    pub rpc_url: String,
    pub private_key_env: String,

    pub deployments_dir: PathBuf,
    pub artifacts_dir: PathBuf,

    /// Block confirmations to wait for after each deployment transaction.
    pub confirmations: usize,

    /// How long to wait for a deployment to reach `confirmations` before giving up.
    pub tx_timeout: Duration,
}

impl DeployConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli(
        helper: &HelperConfig,
        network: String,
        rpc_override: Option<String>,
        private_key_env: String,
        deployments_dir: PathBuf,
        artifacts_dir: PathBuf,
        confirmations: Option<u64>,
        tx_timeout_seconds: u64,
    ) -> Result<Self> {
        let (chain_id, entry) = helper.network_by_name(&network)?;
        let development = helper.is_development(&network);

        let rpc_url = rpc_override
            .or_else(|| {
                entry
                    .rpc_env_var
                    .as_ref()
                    .and_then(|k| std::env::var(k).ok())
                    .filter(|v| !v.trim().is_empty())
            })
            .or_else(|| entry.rpc.clone())
            .ok_or_else(|| match entry.rpc_env_var.as_deref() {
                Some(var) => eyre!(
                    "no rpc url for network '{network}'. pass --rpc-url or set {var}"
                ),
                None => eyre!("no rpc url for network '{network}'. pass --rpc-url"),
            })?;

        if tx_timeout_seconds == 0 {
            return Err(eyre!("tx timeout must be > 0"));
        }

        if rpc_url.contains("alchemy.com/v2/") || rpc_url.contains("infura.io/v3/") {
            tracing::warn!("RPC URL looks like it may contain an API key; consider setting it through the network's rpc env var instead of a flag.");
        }

        let confirmations = confirmations
            .or(entry.block_confirmations)
            .unwrap_or(1)
            .max(1);

        Ok(Self {
            network,
            chain_id,
            development,
            rpc_url,
            private_key_env,
            deployments_dir,
            artifacts_dir,
            confirmations: confirmations as usize,
            tx_timeout: Duration::from_secs(tx_timeout_seconds),
        })
    }
}
