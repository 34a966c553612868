use eyre::{eyre, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

/// One deployed contract, as stored in `deployments/<network>/<Name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub address: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    pub deployer: String,

    /// Constructor arguments in human-readable form.
    #[serde(default)]
    pub args: Vec<String>,

    /// ABI-encoded constructor arguments (0x-prefixed), as expected by block explorers.
    pub constructor_args: String,

    /// keccak256 of creation bytecode ++ encoded args. Used to decide whether a
    /// redeploy is needed.
    pub deploy_data_hash: String,

    #[serde(default)]
    pub abi: serde_json::Value,
}

/// Per-network store of deployed contracts.
///
/// Holds an exclusive lock on `<dir>/.lock` for its whole lifetime so two deploy runs
/// against the same network cannot interleave writes.
#[derive(Debug)]
pub struct DeploymentRegistry {
    dir: PathBuf,
    network: String,
    _lock: File,
}

impl DeploymentRegistry {
    pub fn open(
        root: impl AsRef<Path>,
        network: &str,
        chain_id: u64,
        development: bool,
    ) -> Result<Self> {
        let dir = root.as_ref().join(network);
        fs::create_dir_all(&dir)
            .map_err(|e| eyre!("failed to create deployments directory {}: {e}", dir.display()))?;

        let lock_path = dir.join(".lock");
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
        lock.try_lock_exclusive().map_err(|e| {
            eyre!(
                "another deploy is already running for network '{network}' ({}): {e}",
                lock_path.display()
            )
        })?;

        let registry = Self {
            dir,
            network: network.to_string(),
            _lock: lock,
        };
        registry.check_chain_id(chain_id, development)?;
        Ok(registry)
    }

    fn check_chain_id(&self, chain_id: u64, development: bool) -> Result<()> {
        let path = self.dir.join(".chainId");

        if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
            let recorded: u64 = raw
                .trim()
                .parse()
                .map_err(|e| eyre!("invalid chain id in {}: {e}", path.display()))?;

            if recorded == chain_id {
                return Ok(());
            }

            if !development {
                return Err(eyre!(
                    "deployments for '{}' were recorded on chainId {recorded}, but the network is chainId {chain_id}. Refusing to mix them.",
                    self.network
                ));
            }

            // Local chains get reset all the time; old records are meaningless.
            tracing::warn!(
                network = %self.network,
                recorded,
                chain_id,
                "development chain id changed; discarding old deployment records"
            );
            self.clear_records()?;
        }

        fs::write(&path, chain_id.to_string())
            .map_err(|e| eyre!("failed to write {}: {e}", path.display()))
    }

    fn clear_records(&self) -> Result<()> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| eyre!("failed to list {}: {e}", self.dir.display()))?;
        for entry in entries {
            let path = entry
                .map_err(|e| eyre!("failed to list {}: {e}", self.dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)
                    .map_err(|e| eyre!("failed to remove {}: {e}", path.display()))?;
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn get(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| eyre!("failed to read deployment {}: {e}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse deployment {}: {e}", path.display()))?;
        Ok(Some(record))
    }

    /// Like [`get`](Self::get), but a missing record is an error.
    pub fn require(&self, name: &str) -> Result<DeploymentRecord> {
        self.get(name)?.ok_or_else(|| {
            eyre!(
                "no deployment named '{name}' on network '{}' (looked in {}). Deploy it first (e.g. run the `mocks` command).",
                self.network,
                self.dir.display()
            )
        })
    }

    pub fn save(&self, name: &str, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(name);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| eyre!("failed to serialize deployment '{name}': {e}"))?;

        // Write to a temp file then rename, so an interrupted run never leaves a
        // truncated record behind.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .map_err(|e| eyre!("failed to write temp file {}: {e}", tmp_path.display()))?;

        // On Windows, rename fails if the destination exists.
        if let Err(err) = fs::rename(&tmp_path, &path) {
            if cfg!(windows) {
                let _ = fs::remove_file(&path);
                fs::rename(&tmp_path, &path)
                    .map_err(|e| eyre!("failed to replace deployment {}: {e}", path.display()))?;
            } else {
                return Err(eyre!(
                    "failed to replace deployment {}: {err}",
                    path.display()
                ));
            }
        }
        Ok(())
    }
}
