mod artifacts;
mod assets;
mod config;
mod deployer;
mod deployments;
mod encoding;
mod etherscan;
mod price_feed;

use artifacts::Artifact;
use assets::SvgAssets;
use clap::{Args, Parser, Subcommand};
use config::{DeployConfig, HelperConfig};
use deployer::{deploy_contract, DeployRequest};
use deployments::DeploymentRegistry;
use ethers::abi::Token;
use ethers::middleware::NonceManagerMiddleware;
use ethers::prelude::{Http, LocalWallet, Provider, SignerMiddleware};
use ethers::providers::Middleware;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, U256};
use etherscan::{EtherscanClient, VerifyRequest};
use eyre::{eyre, Result};
use price_feed::{FeedSource, DECIMALS, INITIAL_ANSWER, MOCK_AGGREGATOR};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

type Client = NonceManagerMiddleware<SignerMiddleware<Provider<Http>, LocalWallet>>;

const DYNAMIC_SVG_NFT: &str = "DynamicSvgNft";

/// Account 0 of the default Hardhat/Anvil mnemonic. Only ever used on development chains.
const DEV_PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Parser, Debug)]
#[command(
    name = "dynamic-svg-deploy",
    version,
    about = "Deploy the DynamicSvgNft contract and verify it on Etherscan"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the MockV3Aggregator price feed (development chains only).
    Mocks(MocksArgs),

    /// Deploy DynamicSvgNft, then verify it on live networks.
    #[command(alias = "main", alias = "dynamicsvg")]
    DynamicSvg(DynamicSvgArgs),

    /// Deploy mocks (if needed) followed by DynamicSvgNft.
    All(DynamicSvgArgs),

    /// Verify an already recorded deployment.
    Verify(VerifyCmdArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Network name from the network config (e.g. hardhat, localhost, sepolia).
    #[arg(long, env = "DEPLOY_NETWORK", default_value = "hardhat")]
    network: String,

    /// JSON network config. Built-in table is used when omitted.
    #[arg(long)]
    network_config: Option<PathBuf>,

    /// Override the RPC URL. Otherwise uses the network's rpc env var or its default rpc.
    #[arg(long)]
    rpc_url: Option<String>,

    /// Environment variable that holds the deployer's private key.
    #[arg(long, default_value = "PRIVATE_KEY")]
    private_key_env: String,

    /// Deployment registry root (records land in <dir>/<network>/).
    #[arg(long, default_value = "deployments")]
    deployments: PathBuf,

    /// Hardhat artifacts directory.
    #[arg(long, default_value = "artifacts")]
    artifacts: PathBuf,

    /// Block confirmations to wait for. Defaults to the network config (1 on development chains).
    #[arg(long)]
    confirmations: Option<u64>,

    /// How many seconds to wait for a deployment to be confirmed.
    #[arg(long, default_value_t = 300)]
    tx_timeout_seconds: u64,

    /// Redeploy even when an identical deployment is already recorded.
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Etherscan API key. Verification is skipped when unset.
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    etherscan_api_key: Option<String>,

    /// Etherscan-compatible API endpoint.
    #[arg(long, env = "ETHERSCAN_API_URL", default_value = etherscan::DEFAULT_API_URL)]
    etherscan_url: String,

    /// Max seconds to wait for the explorer to finish verification.
    #[arg(long, default_value_t = 180)]
    verify_timeout_seconds: u64,
}

#[derive(Args, Debug)]
struct MocksArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DynamicSvgArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    verify: VerifyArgs,

    /// Image used while the price is below the token's threshold.
    #[arg(long, default_value = "images/dynamicNft/frown.svg")]
    low_svg: PathBuf,

    /// Image used at or above the threshold.
    #[arg(long, default_value = "images/dynamicNft/happy.svg")]
    high_svg: PathBuf,
}

#[derive(Args, Debug)]
struct VerifyCmdArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    verify: VerifyArgs,

    /// Registry name of the contract to verify.
    #[arg(long, default_value = DYNAMIC_SVG_NFT)]
    contract: String,
}

/// Everything a deploy step needs: resolved config, a connected signer, and the
/// locked registry for the active network.
struct Session {
    cfg: DeployConfig,
    helper: HelperConfig,
    client: Arc<Client>,
    deployer: Address,
    registry: DeploymentRegistry,
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout only carries the deployment summary
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Mocks(args) => {
            let session = connect(&args.common).await?;
            deploy_mocks(&session).await
        }
        Command::DynamicSvg(args) => {
            let session = connect(&args.common).await?;
            deploy_dynamic_svg(&session, &args).await
        }
        Command::All(args) => {
            let session = connect(&args.common).await?;
            deploy_mocks(&session).await?;
            deploy_dynamic_svg(&session, &args).await
        }
        Command::Verify(args) => cmd_verify(args).await,
    }
}

fn resolve_config(common: &CommonArgs) -> Result<(HelperConfig, DeployConfig)> {
    let helper = HelperConfig::load(common.network_config.as_deref())?;
    let cfg = DeployConfig::from_cli(
        &helper,
        common.network.clone(),
        common.rpc_url.clone(),
        common.private_key_env.clone(),
        common.deployments.clone(),
        common.artifacts.clone(),
        common.confirmations,
        common.tx_timeout_seconds,
    )?;
    Ok((helper, cfg))
}

fn http_provider(cfg: &DeployConfig) -> Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(cfg.rpc_url.as_str())
        .map_err(|e| eyre!("invalid RPC url for network '{}': {e}", cfg.network))?;
    Ok(provider.interval(Duration::from_millis(if cfg.development {
        200
    } else {
        2000
    })))
}

/// Never talk to a chain other than the one the network config names.
async fn ensure_chain_id<M: Middleware>(provider: &M, cfg: &DeployConfig) -> Result<()> {
    let remote_chain_id = provider
        .get_chainid()
        .await
        .map_err(|e| eyre!("failed to read chainId from RPC: {e}"))?
        .as_u64();
    if remote_chain_id != cfg.chain_id {
        return Err(eyre!(
            "RPC chainId mismatch: network '{}' expects {}, but RPC reports {}. Refusing to continue.",
            cfg.network,
            cfg.chain_id,
            remote_chain_id
        ));
    }
    Ok(())
}

/// Chain check and registry, without a signer.
async fn open_read_only<M: Middleware>(
    cfg: &DeployConfig,
    provider: &M,
) -> Result<DeploymentRegistry> {
    ensure_chain_id(provider, cfg).await?;
    DeploymentRegistry::open(
        &cfg.deployments_dir,
        &cfg.network,
        cfg.chain_id,
        cfg.development,
    )
}

async fn connect(common: &CommonArgs) -> Result<Session> {
    let (helper, cfg) = resolve_config(common)?;

    let wallet = load_wallet(&cfg)?;
    let deployer = wallet.address();

    let provider = http_provider(&cfg)?;
    ensure_chain_id(&provider, &cfg).await?;

    let signer = SignerMiddleware::new(provider, wallet);
    let client = Arc::new(NonceManagerMiddleware::new(signer, deployer));

    let registry = DeploymentRegistry::open(
        &cfg.deployments_dir,
        &cfg.network,
        cfg.chain_id,
        cfg.development,
    )?;

    tracing::info!(
        network = %cfg.network,
        chain_id = cfg.chain_id,
        development = cfg.development,
        deployer = ?deployer,
        confirmations = cfg.confirmations,
        registry = %registry.dir().display(),
        "deploy session ready"
    );

    Ok(Session {
        cfg,
        helper,
        client,
        deployer,
        registry,
        force: common.force,
    })
}

fn load_wallet(cfg: &DeployConfig) -> Result<LocalWallet> {
    let private_key = match std::env::var(&cfg.private_key_env) {
        Ok(k) if !k.trim().is_empty() => k,
        _ if cfg.development => {
            tracing::info!(
                env = %cfg.private_key_env,
                "private key env var not set; using the default development account"
            );
            DEV_PRIVATE_KEY.to_string()
        }
        _ => {
            return Err(eyre!(
                "missing private key env var '{}'. Set it (or put it in .env) before deploying to '{}'.",
                cfg.private_key_env,
                cfg.network
            ))
        }
    };

    let wallet = private_key
        .trim()
        .parse::<LocalWallet>()
        .map_err(|e| eyre!("invalid private key in {}: {e}", cfg.private_key_env))?
        .with_chain_id(cfg.chain_id);
    Ok(wallet)
}

async fn deploy_mocks(session: &Session) -> Result<()> {
    if !session.cfg.development {
        tracing::info!(network = %session.cfg.network, "live network detected, skipping mocks");
        return Ok(());
    }

    tracing::info!("local network detected! deploying mocks...");
    let artifact = Artifact::find(&session.cfg.artifacts_dir, MOCK_AGGREGATOR)?;
    let outcome = deploy_contract(
        session.client.clone(),
        &session.registry,
        DeployRequest {
            name: MOCK_AGGREGATOR,
            artifact: &artifact,
            args: vec![
                Token::Uint(U256::from(DECIMALS)),
                Token::Int(U256::from(INITIAL_ANSWER)),
            ],
            from: session.deployer,
            confirmations: session.cfg.confirmations,
            timeout: session.cfg.tx_timeout,
            force: session.force,
        },
    )
    .await?;

    tracing::info!(
        address = ?outcome.address,
        newly_deployed = outcome.newly_deployed,
        "mocks deployed"
    );
    println!(
        "{MOCK_AGGREGATOR}: {}",
        encoding::fmt_address(outcome.address)
    );
    Ok(())
}

async fn deploy_dynamic_svg(session: &Session, args: &DynamicSvgArgs) -> Result<()> {
    let (price_feed, source) =
        price_feed::resolve_price_feed(&session.cfg, &session.helper, &session.registry)?;
    tracing::info!(
        feed = ?price_feed,
        from_mock = source == FeedSource::Mock,
        "resolved ETH/USD price feed"
    );
    price_feed::check_price_feed(session.client.clone(), price_feed).await?;

    let svgs = SvgAssets::load(&args.low_svg, &args.high_svg)?;

    tracing::info!("----------------------------------------------------");
    let artifact = Artifact::find(&session.cfg.artifacts_dir, DYNAMIC_SVG_NFT)?;
    let outcome = deploy_contract(
        session.client.clone(),
        &session.registry,
        DeployRequest {
            name: DYNAMIC_SVG_NFT,
            artifact: &artifact,
            args: vec![
                Token::Address(price_feed),
                Token::String(svgs.low),
                Token::String(svgs.high),
            ],
            from: session.deployer,
            confirmations: session.cfg.confirmations,
            timeout: session.cfg.tx_timeout,
            force: session.force,
        },
    )
    .await?;

    match should_verify(&session.cfg, args.verify.etherscan_api_key.as_deref()) {
        Some(key) => {
            tracing::info!("Verifying...");
            verify_contract(
                &session.cfg,
                &args.verify,
                key,
                &artifact,
                outcome.address,
                &outcome.constructor_args,
            )
            .await?;
        }
        None if !session.cfg.development => {
            tracing::info!("no ETHERSCAN_API_KEY set; skipping verification")
        }
        None => {}
    }

    tracing::info!(
        address = ?outcome.address,
        newly_deployed = outcome.newly_deployed,
        "{DYNAMIC_SVG_NFT} ready"
    );
    println!(
        "{DYNAMIC_SVG_NFT}: {}",
        encoding::fmt_address(outcome.address)
    );
    Ok(())
}

/// Verification runs only on live networks and only with a non-blank API key.
fn should_verify<'a>(cfg: &DeployConfig, api_key: Option<&'a str>) -> Option<&'a str> {
    if cfg.development {
        return None;
    }
    api_key.filter(|k| !k.trim().is_empty())
}

async fn verify_contract(
    cfg: &DeployConfig,
    args: &VerifyArgs,
    api_key: &str,
    artifact: &Artifact,
    address: Address,
    constructor_args: &Bytes,
) -> Result<()> {
    let build_info = artifact.build_info()?;
    let client = EtherscanClient::new(
        args.etherscan_url.clone(),
        api_key.to_string(),
        cfg.chain_id,
    );

    let req = VerifyRequest {
        address,
        contract_name: artifact.qualified_name(),
        compiler_version: build_info.solc_long_version.clone(),
        source: &build_info.input,
        constructor_args,
    };
    client
        .verify(&req, Duration::from_secs(args.verify_timeout_seconds))
        .await
}

async fn cmd_verify(args: VerifyCmdArgs) -> Result<()> {
    let (_, cfg) = resolve_config(&args.common)?;
    if cfg.development {
        return Err(eyre!(
            "network '{}' is a development chain; there is no explorer to verify against",
            cfg.network
        ));
    }

    let api_key = should_verify(&cfg, args.verify.etherscan_api_key.as_deref()).ok_or_else(
        || eyre!("verification needs an API key: pass --etherscan-api-key or set ETHERSCAN_API_KEY"),
    )?;

    // read-only: no signer
    let provider = http_provider(&cfg)?;
    let registry = open_read_only(&cfg, &provider).await?;

    let record = registry.require(&args.contract)?;
    let address = Address::from_str(&record.address).map_err(|e| {
        eyre!(
            "invalid address '{}' recorded for '{}': {e}",
            record.address,
            args.contract
        )
    })?;
    let constructor_args = Bytes::from_str(&record.constructor_args).map_err(|e| {
        eyre!(
            "invalid constructorArgs recorded for '{}': {e}",
            args.contract
        )
    })?;

    let artifact = Artifact::find(&cfg.artifacts_dir, &args.contract)?;

    tracing::info!(contract = %args.contract, address = ?address, "Verifying...");
    verify_contract(
        &cfg,
        &args.verify,
        api_key,
        &artifact,
        address,
        &constructor_args,
    )
    .await
}
