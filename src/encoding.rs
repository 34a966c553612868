use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, H256, I256};
use ethers::utils::{keccak256, to_checksum};
use eyre::{eyre, Result};

pub fn fmt_address(addr: Address) -> String {
    to_checksum(&addr, None)
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

/// Human-readable rendering of a constructor argument for the deployment record.
pub fn fmt_token(token: &Token) -> String {
    match token {
        Token::Address(a) => fmt_address(*a),
        Token::Uint(u) => u.to_string(),
        Token::Int(i) => I256::from_raw(*i).to_string(),
        Token::Bool(b) => b.to_string(),
        Token::String(s) => s.clone(),
        Token::Bytes(b) | Token::FixedBytes(b) => fmt_bytes(b),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(fmt_token).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

/// Creation payload: bytecode followed by the ABI-encoded constructor args.
pub struct DeployData {
    pub data: Bytes,
    /// Encoded args alone (what explorers call "constructor arguments").
    pub constructor_args: Bytes,
    pub hash: H256,
}

pub fn deploy_data(abi: &Abi, bytecode: &Bytes, args: &[Token]) -> Result<DeployData> {
    let data = match abi.constructor() {
        Some(ctor) => ctor
            .encode_input(bytecode.to_vec(), args)
            .map_err(|e| eyre!("constructor args do not match the ABI: {e}"))?,
        None if args.is_empty() => bytecode.to_vec(),
        None => {
            return Err(eyre!(
                "contract has no constructor but {} args were given",
                args.len()
            ))
        }
    };

    let constructor_args = data[bytecode.len()..].to_vec();
    let hash = H256(keccak256(&data));
    Ok(DeployData {
        data: Bytes::from(data),
        constructor_args: Bytes::from(constructor_args),
        hash,
    })
}
