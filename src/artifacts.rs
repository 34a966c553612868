use ethers::abi::Abi;
use ethers::types::Bytes;
use eyre::{eyre, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Compiled contract as written by `hardhat compile`
/// (`artifacts/contracts/<Source>.sol/<Name>.json`).
///
/// Only the fields the deployer needs; the rest is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,

    #[serde(skip)]
    pub path: PathBuf,
}

/// `artifacts/build-info/<hash>.json`: the exact compiler input, needed for source
/// verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub solc_long_version: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

impl Artifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read artifact {}: {e}", path.display()))?;
        let mut artifact: Artifact = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse artifact {}: {e}", path.display()))?;

        if artifact.bytecode.is_empty() {
            return Err(eyre!(
                "artifact {} has no bytecode; '{}' is abstract or an interface",
                path.display(),
                artifact.contract_name
            ));
        }

        artifact.path = path.to_path_buf();
        Ok(artifact)
    }

    /// Find the artifact for contract `name` anywhere under `root`.
    pub fn find(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let root = root.as_ref();
        let file_name = format!("{name}.json");

        let mut matches = Vec::new();
        collect_matches(root, &file_name, &mut matches)?;

        match matches.len() {
            0 => Err(eyre!(
                "no artifact for '{name}' under {}. Did you run `hardhat compile`?",
                root.display()
            )),
            1 => Self::load(&matches[0]),
            _ => {
                let found: Vec<String> = matches.iter().map(|p| p.display().to_string()).collect();
                Err(eyre!(
                    "multiple artifacts named '{name}' under {}: {}",
                    root.display(),
                    found.join(", ")
                ))
            }
        }
    }

    /// `<sourceName>:<contractName>`, the fully qualified name explorers expect.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    pub fn build_info(&self) -> Result<BuildInfo> {
        let dbg_path = self.path.with_extension("dbg.json");
        let raw = fs::read_to_string(&dbg_path)
            .map_err(|e| eyre!("failed to read debug file {}: {e}", dbg_path.display()))?;
        let dbg: DebugFile = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse debug file {}: {e}", dbg_path.display()))?;

        // `buildInfo` is relative to the directory holding the artifact.
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let info_path = dir.join(&dbg.build_info);
        let raw = fs::read_to_string(&info_path)
            .map_err(|e| eyre!("failed to read build info {}: {e}", info_path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse build info {}: {e}", info_path.display()))
    }
}

fn collect_matches(dir: &Path, file_name: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).map_err(|e| eyre!("failed to list {}: {e}", dir.display()))?;

    for entry in entries {
        let entry = entry.map_err(|e| eyre!("failed to list {}: {e}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "build-info") {
                continue;
            }
            collect_matches(&path, file_name, out)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            out.push(path);
        }
    }
    Ok(())
}
