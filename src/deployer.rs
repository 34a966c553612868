use crate::artifacts::Artifact;
use crate::deployments::{DeploymentRecord, DeploymentRegistry};
use crate::encoding::{self, DeployData};
use ethers::abi::Token;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U64};
use eyre::{eyre, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeployRequest<'a> {
    /// Registry name; also the contract name in the artifact.
    pub name: &'a str,
    pub artifact: &'a Artifact,
    pub args: Vec<Token>,
    pub from: Address,
    pub confirmations: usize,
    pub timeout: Duration,
    /// Redeploy even if an identical deployment is recorded.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub address: Address,
    /// False when an existing deployment was reused.
    pub newly_deployed: bool,
    pub constructor_args: Bytes,
}

/// Deploy `req.artifact` unless the registry already holds a live deployment of the
/// exact same bytecode and constructor args, in which case that one is returned.
pub async fn deploy_contract<M: Middleware + 'static>(
    client: Arc<M>,
    registry: &DeploymentRegistry,
    req: DeployRequest<'_>,
) -> Result<DeployOutcome> {
    let name = req.name;
    let deploy = encoding::deploy_data(&req.artifact.abi, &req.artifact.bytecode, &req.args)
        .map_err(|e| eyre!("failed to encode deployment of '{name}': {e}"))?;
    let deploy_data_hash = encoding::fmt_h256(deploy.hash);

    if !req.force {
        if let Some(existing) = registry.get(name)? {
            if let Some(address) =
                reusable_address(client.as_ref(), name, &existing, &deploy_data_hash).await?
            {
                tracing::info!(contract = name, address = ?address, "reusing \"{name}\" at {address:?}");
                return Ok(DeployOutcome {
                    address,
                    newly_deployed: false,
                    constructor_args: deploy.constructor_args,
                });
            }
        }
    }

    let DeployData {
        data,
        constructor_args,
        hash: _,
    } = deploy;

    let tx = Eip1559TransactionRequest::new().from(req.from).data(data);
    let pending = client
        .send_transaction(tx, None)
        .await
        .map_err(|e| eyre!("failed to send deployment of '{name}': {e}"))?;
    let tx_hash = pending.tx_hash();

    tracing::info!(
        contract = name,
        tx = ?tx_hash,
        confirmations = req.confirmations,
        "deploying \"{name}\""
    );

    let receipt = match tokio::time::timeout(req.timeout, pending.confirmations(req.confirmations))
        .await
    {
        Ok(Ok(Some(receipt))) => receipt,
        Ok(Ok(None)) => {
            return Err(eyre!(
                "deployment of '{name}' (tx {tx_hash:?}) was dropped from the mempool"
            ))
        }
        Ok(Err(err)) => {
            return Err(eyre!(
                "failed waiting for deployment of '{name}' (tx {tx_hash:?}): {err}"
            ))
        }
        Err(_) => {
            return Err(eyre!(
                "deployment of '{name}' (tx {tx_hash:?}) not confirmed after {}s; it may still be mined. Check the tx before rerunning.",
                req.timeout.as_secs()
            ))
        }
    };

    if receipt.status != Some(U64::from(1)) {
        return Err(eyre!(
            "deployment of '{name}' reverted (tx {tx_hash:?}, block {:?})",
            receipt.block_number
        ));
    }

    let address = receipt.contract_address.ok_or_else(|| {
        eyre!("receipt for deployment of '{name}' (tx {tx_hash:?}) has no contract address")
    })?;

    let abi = serde_json::to_value(&req.artifact.abi)
        .map_err(|e| eyre!("failed to serialize abi for '{name}': {e}"))?;

    let record = DeploymentRecord {
        address: encoding::fmt_address(address),
        transaction_hash: encoding::fmt_h256(tx_hash),
        block_number: receipt.block_number.map(|b| b.as_u64()),
        deployer: encoding::fmt_address(req.from),
        args: req.args.iter().map(encoding::fmt_token).collect(),
        constructor_args: encoding::fmt_bytes(&constructor_args),
        deploy_data_hash,
        abi,
    };
    registry.save(name, &record)?;

    tracing::info!(
        contract = name,
        address = ?address,
        block = record.block_number,
        gas_used = ?receipt.gas_used,
        "deployed \"{name}\" at {address:?}"
    );

    Ok(DeployOutcome {
        address,
        newly_deployed: true,
        constructor_args,
    })
}

/// The recorded address, if the record matches the payload about to be sent and
/// the chain still has code there.
async fn reusable_address<M: Middleware>(
    client: &M,
    name: &str,
    existing: &DeploymentRecord,
    deploy_data_hash: &str,
) -> Result<Option<Address>> {
    if !same_payload(existing, deploy_data_hash) {
        tracing::info!(
            contract = name,
            "bytecode or constructor args changed since the recorded deployment; redeploying"
        );
        return Ok(None);
    }

    let address = Address::from_str(&existing.address).map_err(|e| {
        eyre!(
            "invalid address '{}' recorded for '{name}': {e}",
            existing.address
        )
    })?;

    let code = client
        .get_code(address, None)
        .await
        .map_err(|e| eyre!("failed to fetch code for '{name}' at {address:?}: {e}"))?;
    if code.0.is_empty() {
        tracing::warn!(
            contract = name,
            address = ?address,
            "recorded deployment has no code on chain; redeploying"
        );
        return Ok(None);
    }

    Ok(Some(address))
}

fn same_payload(existing: &DeploymentRecord, deploy_data_hash: &str) -> bool {
    existing
        .deploy_data_hash
        .eq_ignore_ascii_case(deploy_data_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiParser;
    use ethers::providers::{MockProvider, Provider};
    use std::path::PathBuf;

    fn record(hash: &str) -> DeploymentRecord {
        DeploymentRecord {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            transaction_hash: format!("0x{}", "00".repeat(32)),
            block_number: None,
            deployer: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            args: Vec::new(),
            constructor_args: "0x".to_string(),
            deploy_data_hash: hash.to_string(),
            abi: serde_json::Value::Null,
        }
    }

    #[test]
    fn payload_match_ignores_hex_case() {
        let rec = record("0xABCDEF");
        assert!(same_payload(&rec, "0xabcdef"));
        assert!(!same_payload(&rec, "0xabcdee"));
    }

    const DEPLOYED: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dynamic-svg-deploy-deployer-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn artifact() -> Artifact {
        Artifact {
            contract_name: "MockV3Aggregator".to_string(),
            source_name: "contracts/test/MockV3Aggregator.sol".to_string(),
            abi: AbiParser::default()
                .parse(&["constructor(uint8 decimals, int256 initialAnswer)"])
                .unwrap(),
            bytecode: Bytes::from(vec![0x60, 0x80, 0x60, 0x40]),
            path: PathBuf::new(),
        }
    }

    fn args() -> Vec<Token> {
        vec![
            Token::Uint(8u64.into()),
            Token::Int(200_000_000_000u64.into()),
        ]
    }

    fn request(artifact: &Artifact, force: bool) -> DeployRequest<'_> {
        DeployRequest {
            name: "MockV3Aggregator",
            artifact,
            args: args(),
            from: Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap(),
            confirmations: 1,
            timeout: Duration::from_secs(5),
            force,
        }
    }

    /// Registry holding a record whose hash matches `artifact()` deployed with `args()`.
    fn registry_with_matching_record(tag: &str) -> DeploymentRegistry {
        let registry = DeploymentRegistry::open(scratch_dir(tag), "localhost", 31337, true).unwrap();
        let art = artifact();
        let deploy = encoding::deploy_data(&art.abi, &art.bytecode, &args()).unwrap();
        registry
            .save("MockV3Aggregator", &record(&encoding::fmt_h256(deploy.hash)))
            .unwrap();
        registry
    }

    fn chain_with_code(code: Bytes) -> Provider<MockProvider> {
        let (provider, mock) = Provider::mocked();
        mock.push::<Bytes, _>(code).unwrap();
        provider
    }

    #[tokio::test]
    async fn matching_record_with_code_is_reused() {
        let provider = chain_with_code(Bytes::from(vec![0x60, 0x80]));
        let rec = record("0xabc");
        let found = reusable_address(&provider, "MockV3Aggregator", &rec, "0xABC")
            .await
            .unwrap();
        assert_eq!(found, Some(Address::from_str(DEPLOYED).unwrap()));
    }

    #[tokio::test]
    async fn matching_record_without_code_is_redeployed() {
        let provider = chain_with_code(Bytes::default());
        let rec = record("0xabc");
        let found = reusable_address(&provider, "MockV3Aggregator", &rec, "0xabc")
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn changed_payload_is_redeployed_without_touching_the_chain() {
        // no queued response: any RPC call would fail
        let (provider, _mock) = Provider::mocked();
        let rec = record("0xabc");
        let found = reusable_address(&provider, "MockV3Aggregator", &rec, "0xabd")
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn deploy_returns_recorded_deployment_when_live() {
        let registry = registry_with_matching_record("reuse");
        let client = Arc::new(chain_with_code(Bytes::from(vec![0x60, 0x80])));
        let art = artifact();

        let out = deploy_contract(client, &registry, request(&art, false))
            .await
            .unwrap();
        assert!(!out.newly_deployed);
        assert_eq!(out.address, Address::from_str(DEPLOYED).unwrap());
        assert_eq!(out.constructor_args.to_vec(), ethers::abi::encode(&args()));
    }

    #[tokio::test]
    async fn force_skips_the_recorded_deployment() {
        let registry = registry_with_matching_record("force");
        // an empty mock fails every call, so reaching the send proves the lookup was skipped
        let (provider, _mock) = Provider::mocked();
        let art = artifact();

        let err = deploy_contract(Arc::new(provider), &registry, request(&art, true))
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("failed to send deployment"),
            "{err}"
        );
    }
}
