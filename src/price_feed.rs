use crate::config::{DeployConfig, HelperConfig};
use crate::deployments::DeploymentRegistry;
use ethers::contract::abigen;
use ethers::providers::Middleware;
use ethers::types::Address;
use eyre::{eyre, Result};
use std::str::FromStr;
use std::sync::Arc;

/// Registry name of the local mock feed.
pub const MOCK_AGGREGATOR: &str = "MockV3Aggregator";

/// Mock feed constructor args: 8 decimals, initial answer 2000 USD.
pub const DECIMALS: u8 = 8;
pub const INITIAL_ANSWER: u64 = 200_000_000_000;

// Read-only view of a Chainlink aggregator, used to sanity-check the feed before
// baking its address into an immutable constructor argument.
abigen!(
    AggregatorV3,
    r#"[
        function decimals() view returns (uint8)
        function description() view returns (string)
        function latestRoundData() view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
    ]"#
);

/// Where the price feed comes from on the active network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// Previously deployed mock, read from the deployment registry.
    Mock,
    /// Static network table.
    Config,
}

pub fn resolve_price_feed(
    cfg: &DeployConfig,
    helper: &HelperConfig,
    registry: &DeploymentRegistry,
) -> Result<(Address, FeedSource)> {
    if cfg.development {
        let mock = registry.require(MOCK_AGGREGATOR)?;
        let address = Address::from_str(&mock.address).map_err(|e| {
            eyre!(
                "invalid {MOCK_AGGREGATOR} address '{}' in registry: {e}",
                mock.address
            )
        })?;
        return Ok((address, FeedSource::Mock));
    }

    let address = helper.eth_usd_price_feed(cfg.chain_id)?;
    Ok((address, FeedSource::Config))
}

/// Fails when nothing is deployed at `address`; everything else is informational.
pub async fn check_price_feed<M: Middleware + 'static>(
    client: Arc<M>,
    address: Address,
) -> Result<()> {
    let code = client
        .get_code(address, None)
        .await
        .map_err(|e| eyre!("failed to fetch code for price feed {address:?}: {e}"))?;
    if code.0.is_empty() {
        return Err(eyre!(
            "no contract code found at price feed {address:?}. Check the network config (or deploy mocks on a local chain)."
        ));
    }

    let feed = AggregatorV3::new(address, client);
    let decimals = match feed.decimals().call().await {
        Ok(d) => d,
        Err(err) => {
            tracing::warn!(feed = ?address, error = %err, "decimals() call failed; is this an aggregator?");
            return Ok(());
        }
    };

    let description = feed.description().call().await.unwrap_or_default();

    match feed.latest_round_data().call().await {
        Ok((round_id, answer, _started_at, updated_at, _answered_in_round)) => {
            tracing::info!(
                feed = ?address,
                description = %description,
                decimals,
                round_id = %round_id,
                answer = %answer,
                updated_at = %updated_at,
                "price feed reachable"
            );
        }
        Err(err) => {
            tracing::warn!(feed = ?address, error = %err, "latestRoundData() call failed");
        }
    }

    Ok(())
}
