use crate::encoding;
use ethers::types::{Address, Bytes};
use eyre::{eyre, Result};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Etherscan's multichain endpoint; the chain is selected with `chainid`.
pub const DEFAULT_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Freshly deployed bytecode takes a while to show up in the explorer's index.
const SUBMIT_ATTEMPTS: u32 = 6;
const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(10);
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Block-explorer source verification client (Etherscan API, also served by most
/// Etherscan-family explorers).
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    url: String,
    api_key: String,
    chain_id: u64,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest<'a> {
    pub address: Address,
    /// `<sourceName>:<contractName>`.
    pub contract_name: String,
    /// Full solc version, e.g. `0.8.7+commit.e28d00a7`.
    pub compiler_version: String,
    /// Standard-JSON compiler input from the build info.
    pub source: &'a Value,
    pub constructor_args: &'a Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Submission {
    Queued(String),
    AlreadyVerified,
    /// The explorer has not indexed the contract yet; worth retrying.
    NotIndexed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VerifyStatus {
    Pending,
    Verified,
    Failed(String),
}

impl EtherscanClient {
    pub fn new(url: String, api_key: String, chain_id: u64) -> Self {
        Self {
            url,
            api_key,
            chain_id,
            http: reqwest::Client::new(),
        }
    }

    /// Submit `req` and wait for the explorer's verdict.
    ///
    /// A contract that is already verified counts as success.
    pub async fn verify(&self, req: &VerifyRequest<'_>, timeout: Duration) -> Result<()> {
        await_verification(self, req, &Pacing::live(timeout)).await
    }
}

/// Retry and poll cadence of a verification run.
#[derive(Debug, Clone)]
struct Pacing {
    submit_attempts: u32,
    submit_retry_delay: Duration,
    poll_interval: Duration,
    timeout: Duration,
}

impl Pacing {
    fn live(timeout: Duration) -> Self {
        Self {
            submit_attempts: SUBMIT_ATTEMPTS,
            submit_retry_delay: SUBMIT_RETRY_DELAY,
            poll_interval: STATUS_POLL_INTERVAL,
            timeout,
        }
    }
}

/// The two explorer calls a verification run is made of.
trait VerifierApi {
    async fn submit(&self, req: &VerifyRequest<'_>) -> Result<Submission>;
    async fn check_status(&self, guid: &str) -> Result<VerifyStatus>;
}

async fn await_verification<A: VerifierApi>(
    api: &A,
    req: &VerifyRequest<'_>,
    pacing: &Pacing,
) -> Result<()> {
    let start = Instant::now();

    let mut attempt = 0;
    let guid = loop {
        attempt += 1;
        match api.submit(req).await? {
            Submission::Queued(guid) => break guid,
            Submission::AlreadyVerified => {
                tracing::info!(address = ?req.address, "contract is already verified");
                return Ok(());
            }
            Submission::NotIndexed(msg) if attempt < pacing.submit_attempts => {
                tracing::info!(
                    attempt,
                    retry_in_s = pacing.submit_retry_delay.as_secs(),
                    reason = %msg,
                    "explorer has not indexed the contract yet; retrying"
                );
                tokio::time::sleep(pacing.submit_retry_delay).await;
            }
            Submission::NotIndexed(msg) => {
                return Err(eyre!(
                    "explorer still cannot find {:?} after {attempt} attempts: {msg}",
                    req.address
                ));
            }
        }
    };

    tracing::info!(guid = %guid, "verification submitted; waiting for result");

    loop {
        if start.elapsed() > pacing.timeout {
            return Err(eyre!(
                "timed out waiting for verification of {:?} after {:?} (guid {guid})",
                req.address,
                pacing.timeout
            ));
        }

        tokio::time::sleep(pacing.poll_interval).await;

        match api.check_status(&guid).await {
            Ok(VerifyStatus::Pending) => {}
            Ok(VerifyStatus::Verified) => {
                tracing::info!(address = ?req.address, "contract verified");
                return Ok(());
            }
            Ok(VerifyStatus::Failed(reason)) => {
                return Err(eyre!(
                    "verification of {:?} failed: {reason}",
                    req.address
                ));
            }
            Err(e) => {
                // explorers rate-limit aggressively; keep polling
                tracing::warn!(error = %e, "verification status poll error");
            }
        }
    }
}

impl VerifierApi for EtherscanClient {
    async fn submit(&self, req: &VerifyRequest<'_>) -> Result<Submission> {
        let source = serde_json::to_string(req.source)
            .map_err(|e| eyre!("failed to serialize compiler input: {e}"))?;
        let args = encoding::fmt_bytes(req.constructor_args);

        let form = [
            ("apikey", self.api_key.clone()),
            ("module", "contract".to_string()),
            ("action", "verifysourcecode".to_string()),
            ("contractaddress", encoding::fmt_address(req.address)),
            ("sourceCode", source),
            ("codeformat", "solidity-standard-json-input".to_string()),
            ("contractname", req.contract_name.clone()),
            ("compilerversion", format!("v{}", req.compiler_version)),
            // sic: the API really spells it this way
            (
                "constructorArguements",
                args.trim_start_matches("0x").to_string(),
            ),
        ];

        let resp = self
            .http
            .post(&self.url)
            .query(&[("chainid", self.chain_id)])
            .form(&form)
            .send()
            .await
            .map_err(|e| eyre!("POST {} failed: {e}", self.url))?;

        let body = decode(resp).await?;
        parse_submission(&body)
    }

    async fn check_status(&self, guid: &str) -> Result<VerifyStatus> {
        let chain_id = self.chain_id.to_string();
        let query = [
            ("chainid", chain_id.as_str()),
            ("apikey", self.api_key.as_str()),
            ("module", "contract"),
            ("action", "checkverifystatus"),
            ("guid", guid),
        ];

        let resp = self
            .http
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(|e| eyre!("GET {} failed: {e}", self.url))?;

        let body = decode(resp).await?;
        parse_status(&body)
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| eyre!("failed to read explorer response: {e}"))?;
    decode_body(status, &text)
}

fn decode_body(status: reqwest::StatusCode, text: &str) -> Result<Value> {
    if !status.is_success() {
        return Err(eyre!("HTTP {}: {}", status, text.trim()));
    }
    serde_json::from_str(text)
        .map_err(|e| eyre!("failed to decode explorer response ({e}): {}", text.trim()))
}

fn result_str(body: &Value) -> Result<&str> {
    body.get("result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| eyre!("unexpected explorer response (no string result): {body}"))
}

fn is_ok(body: &Value) -> bool {
    body.get("status").and_then(|s| s.as_str()) == Some("1")
}

fn parse_submission(body: &Value) -> Result<Submission> {
    let result = result_str(body)?;
    if is_ok(body) {
        return Ok(Submission::Queued(result.to_string()));
    }

    let lower = result.to_ascii_lowercase();
    if lower.contains("already verified") {
        return Ok(Submission::AlreadyVerified);
    }
    if lower.contains("unable to locate contractcode") {
        return Ok(Submission::NotIndexed(result.to_string()));
    }

    Err(eyre!("verification request rejected: {result}"))
}

fn parse_status(body: &Value) -> Result<VerifyStatus> {
    let result = result_str(body)?;
    let lower = result.to_ascii_lowercase();

    if lower.contains("pending in queue") {
        return Ok(VerifyStatus::Pending);
    }
    if lower.contains("already verified") || (is_ok(body) && lower.starts_with("pass")) {
        return Ok(VerifyStatus::Verified);
    }
    if lower.starts_with("fail") {
        return Ok(VerifyStatus::Failed(result.to_string()));
    }

    Err(eyre!("unexpected verification status: {result}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Explorer stand-in that replays canned answers in order.
    #[derive(Default)]
    struct Scripted {
        submissions: Mutex<VecDeque<Submission>>,
        statuses: Mutex<VecDeque<VerifyStatus>>,
        submit_calls: Mutex<u32>,
        status_calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(submissions: Vec<Submission>, statuses: Vec<VerifyStatus>) -> Self {
            Self {
                submissions: Mutex::new(submissions.into()),
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }
    }

    impl VerifierApi for Scripted {
        async fn submit(&self, _req: &VerifyRequest<'_>) -> Result<Submission> {
            *self.submit_calls.lock().unwrap() += 1;
            self.submissions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| eyre!("no scripted submission left"))
        }

        async fn check_status(&self, _guid: &str) -> Result<VerifyStatus> {
            *self.status_calls.lock().unwrap() += 1;
            // an exhausted script keeps the explorer busy
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(VerifyStatus::Pending))
        }
    }

    fn quick(timeout: Duration) -> Pacing {
        Pacing {
            submit_attempts: SUBMIT_ATTEMPTS,
            submit_retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            timeout,
        }
    }

    fn not_indexed() -> Submission {
        Submission::NotIndexed("Unable to locate ContractCode".to_string())
    }

    async fn run(api: &Scripted, pacing: Pacing) -> Result<()> {
        let source = json!({ "language": "Solidity" });
        let args = Bytes::default();
        let req = VerifyRequest {
            address: Address::repeat_byte(0x5f),
            contract_name: "contracts/DynamicSvgNft.sol:DynamicSvgNft".to_string(),
            compiler_version: "0.8.7+commit.e28d00a7".to_string(),
            source: &source,
            constructor_args: &args,
        };
        await_verification(api, &req, &pacing).await
    }

    #[tokio::test]
    async fn retries_until_indexed_then_polls_to_pass() {
        let api = Scripted::new(
            vec![not_indexed(), Submission::Queued("guid-1".to_string())],
            vec![VerifyStatus::Pending, VerifyStatus::Verified],
        );
        run(&api, quick(Duration::from_secs(5))).await.unwrap();
        assert_eq!(*api.submit_calls.lock().unwrap(), 2);
        assert_eq!(*api.status_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn gives_up_when_never_indexed() {
        let api = Scripted::new(
            (0..SUBMIT_ATTEMPTS + 2).map(|_| not_indexed()).collect(),
            Vec::new(),
        );
        let err = run(&api, quick(Duration::from_secs(5))).await.unwrap_err();
        assert!(err.to_string().contains(&format!("after {SUBMIT_ATTEMPTS} attempts")));
        assert_eq!(*api.submit_calls.lock().unwrap(), SUBMIT_ATTEMPTS);
        assert_eq!(*api.status_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn already_verified_skips_polling() {
        let api = Scripted::new(vec![Submission::AlreadyVerified], Vec::new());
        run(&api, quick(Duration::from_secs(5))).await.unwrap();
        assert_eq!(*api.status_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_verdict_is_an_error() {
        let api = Scripted::new(
            vec![Submission::Queued("guid-2".to_string())],
            vec![VerifyStatus::Failed("Fail - Unable to verify".to_string())],
        );
        let err = run(&api, quick(Duration::from_secs(5))).await.unwrap_err();
        assert!(err.to_string().contains("Fail - Unable to verify"));
    }

    #[tokio::test]
    async fn endless_pending_times_out() {
        let api = Scripted::new(vec![Submission::Queued("guid-3".to_string())], Vec::new());
        let err = run(&api, quick(Duration::from_millis(20))).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("guid-3"));
    }

    #[test]
    fn error_status_keeps_non_json_body() {
        let err = decode_body(
            reqwest::StatusCode::BAD_GATEWAY,
            "<html><body>502 Bad Gateway</body></html>\n",
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("502"));
        assert!(err.contains("Bad Gateway</body>"));
    }

    #[test]
    fn success_body_must_be_json() {
        let ok = decode_body(reqwest::StatusCode::OK, r#"{"status":"1","result":"x"}"#).unwrap();
        assert_eq!(ok["result"], "x");

        let err = decode_body(reqwest::StatusCode::OK, "Max rate limit reached")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Max rate limit reached"));
    }

    #[test]
    fn submission_returns_guid() {
        let body = json!({
            "status": "1",
            "message": "OK",
            "result": "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn"
        });
        assert_eq!(
            parse_submission(&body).unwrap(),
            Submission::Queued("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".to_string())
        );
    }

    #[test]
    fn submission_already_verified_is_success() {
        let body = json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Contract source code already verified"
        });
        assert_eq!(parse_submission(&body).unwrap(), Submission::AlreadyVerified);
    }

    #[test]
    fn submission_before_indexing_is_retryable() {
        let body = json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Unable to locate ContractCode at 0x5fbdb2315678afecb367f032d93f642f64180aa3"
        });
        assert!(matches!(
            parse_submission(&body).unwrap(),
            Submission::NotIndexed(_)
        ));
    }

    #[test]
    fn submission_with_bad_key_is_an_error() {
        let body = json!({ "status": "0", "message": "NOTOK", "result": "Invalid API Key" });
        let err = parse_submission(&body).unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[test]
    fn submission_rejects_unknown_shape() {
        assert!(parse_submission(&json!({ "foo": "bar" })).is_err());
    }

    #[test]
    fn status_variants() {
        let pending = json!({ "status": "0", "message": "NOTOK", "result": "Pending in queue" });
        assert_eq!(parse_status(&pending).unwrap(), VerifyStatus::Pending);

        let pass = json!({ "status": "1", "message": "OK", "result": "Pass - Verified" });
        assert_eq!(parse_status(&pass).unwrap(), VerifyStatus::Verified);

        let already = json!({ "status": "1", "message": "OK", "result": "Already Verified" });
        assert_eq!(parse_status(&already).unwrap(), VerifyStatus::Verified);

        let fail = json!({ "status": "0", "message": "NOTOK", "result": "Fail - Unable to verify" });
        assert_eq!(
            parse_status(&fail).unwrap(),
            VerifyStatus::Failed("Fail - Unable to verify".to_string())
        );
    }
}
