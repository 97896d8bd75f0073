// Bitcoin Core JSON-RPC client

use super::NodeRpc;
use crate::config::WalletConfig;
use crate::core::{Hash256, OutPoint, TxOutput};
use crate::error::{Result, WalletError};
use crate::storage::Utxo;
use crate::wallet::Address;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use zeroize::Zeroizing;

const SATS_PER_BTC: f64 = 100_000_000.0;
/// Upper confirmation bound passed to listunspent
const MAX_CONFIRMATIONS: u32 = 9_999_999;

/// RPC error codes for transactions the node refused to accept
const RPC_VERIFY_ERROR: i64 = -25;
const RPC_VERIFY_REJECTED: i64 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

/// Blocking JSON-RPC client for a Bitcoin Core node
pub struct RpcClient {
    url: String,
    user: String,
    password: Zeroizing<String>,
    client: reqwest::blocking::Client,
}

impl RpcClient {
    pub fn new(url: &str, user: &str, password: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| WalletError::Config(format!("cannot build RPC client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            user: user.to_string(),
            password: Zeroizing::new(password.to_string()),
            client,
        })
    }

    pub fn from_config(config: &WalletConfig) -> Result<Self> {
        Self::new(&config.rpc_url(), &config.rpc_user, &config.rpc_password)
    }

    /// Make an RPC call
    fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>, timeout: Duration) -> Result<T> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "btc-wallet",
            "method": method,
            "params": params,
        });

        debug!("RPC {} -> {}", method, self.url);
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(self.password.as_str()))
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| WalletError::NodeUnavailable(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| WalletError::NodeUnavailable(format!("{} response unreadable: {}", method, e)))?;
        decode_response(method, status.as_u16(), &text)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Turn a node reply into a result.
///
/// Bitcoin Core answers RPC errors with a non-2xx status and a JSON body,
/// so the body is read first and the status only matters when it is not
/// JSON.
fn decode_response<T: DeserializeOwned>(method: &str, status: u16, body: &str) -> Result<T> {
    let response: RpcResponse<T> = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) if (200..300).contains(&status) => {
            return Err(WalletError::NodeUnavailable(format!("{} returned malformed JSON: {}", method, e)));
        }
        Err(_) => return Err(WalletError::NodeUnavailable(format!("{} failed with HTTP {}", method, status))),
    };

    if let Some(error) = response.error {
        return Err(match error.code {
            RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED | RPC_VERIFY_ALREADY_IN_CHAIN => {
                WalletError::RejectedByNetwork(error.message)
            }
            code => WalletError::NodeUnavailable(format!("{} error {}: {}", method, code, error.message)),
        });
    }

    response
        .result
        .ok_or_else(|| WalletError::NodeUnavailable(format!("{} returned a null result", method)))
}

fn btc_to_sat(amount: f64) -> Result<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(WalletError::InvalidEncoding(format!("invalid amount {}", amount)));
    }
    Ok((amount * SATS_PER_BTC).round() as u64)
}

fn sat_to_btc(value: u64) -> f64 {
    value as f64 / SATS_PER_BTC
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnspentEntry {
    txid: String,
    vout: u32,
    script_pub_key: String,
    amount: f64,
    #[serde(default)]
    confirmations: u32,
}

impl UnspentEntry {
    fn into_utxo(self) -> Result<Utxo> {
        let script = hex::decode(&self.script_pub_key)
            .map_err(|e| WalletError::InvalidEncoding(format!("invalid scriptPubKey hex: {}", e)))?;
        Ok(Utxo::new(
            OutPoint::new(Hash256::from_hex(&self.txid)?, self.vout),
            TxOutput::new(btc_to_sat(self.amount)?, script),
            self.confirmations,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SignResult {
    hex: String,
    complete: bool,
    #[serde(default)]
    errors: Vec<Value>,
}

impl NodeRpc for RpcClient {
    fn list_unspent(&self, addresses: &[Address], min_confirmations: u32, timeout: Duration) -> Result<Vec<Utxo>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let addresses: Vec<String> = addresses.iter().map(Address::to_string).collect();
        let entries: Vec<UnspentEntry> = self.call(
            "listunspent",
            vec![json!(min_confirmations), json!(MAX_CONFIRMATIONS), json!(addresses)],
            timeout,
        )?;
        entries.into_iter().map(UnspentEntry::into_utxo).collect()
    }

    fn sign_raw_transaction_with_key(
        &self,
        unsigned_hex: &str,
        keys_wif: &[Zeroizing<String>],
        prevouts: &[Utxo],
        timeout: Duration,
    ) -> Result<String> {
        let keys: Vec<&str> = keys_wif.iter().map(|k| k.as_str()).collect();
        let prevtxs: Vec<Value> = prevouts
            .iter()
            .map(|utxo| {
                json!({
                    "txid": utxo.outpoint.txid.to_hex(),
                    "vout": utxo.outpoint.vout,
                    "scriptPubKey": hex::encode(&utxo.output.script_pubkey),
                    "amount": sat_to_btc(utxo.value()),
                })
            })
            .collect();

        let result: SignResult = self.call(
            "signrawtransactionwithkey",
            vec![json!(unsigned_hex), json!(keys), json!(prevtxs)],
            timeout,
        )?;
        if !result.complete {
            warn!("Node left the transaction incomplete: {:?}", result.errors);
        }
        Ok(result.hex)
    }

    fn send_raw_transaction(&self, signed_hex: &str, timeout: Duration) -> Result<Hash256> {
        let txid: String = self.call("sendrawtransaction", vec![json!(signed_hex)], timeout)?;
        Hash256::from_hex(&txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Network;
    use crate::wallet::AddressKind;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Answer one HTTP request with `status` and `body`, returning the
    /// request body that was received
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let reply = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request = vec![0u8; content_length];
            reader.read_exact(&mut request).unwrap();
            reader.get_mut().write_all(reply.as_bytes()).unwrap();
            String::from_utf8(request).unwrap()
        });
        (url, handle)
    }

    #[test]
    fn test_list_unspent_over_http() {
        let txid = "11".repeat(32);
        let body = format!(
            r#"{{"result":[{{"txid":"{}","vout":1,"address":"x","scriptPubKey":"0014{}","amount":0.0005,"confirmations":3}}],"error":null,"id":"btc-wallet"}}"#,
            txid,
            "22".repeat(20)
        );
        let (url, server) = serve_once("200 OK", &body);
        let client = RpcClient::new(&url, "user", "pass").unwrap();
        let address = Address::from_pubkey_hash([0x22; 20], Network::Regtest, AddressKind::P2wpkh);

        let utxos = client.list_unspent(&[address], 1, TIMEOUT).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value(), 50_000);
        assert_eq!(utxos[0].outpoint.vout, 1);
        assert_eq!(utxos[0].outpoint.txid.to_hex(), txid);
        assert_eq!(utxos[0].output.script_pubkey, address.script_pubkey());
        assert_eq!(utxos[0].confirmations, 3);

        let request: Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(request["method"], "listunspent");
        assert_eq!(request["params"][0], 1);
        assert_eq!(request["params"][2][0], address.to_string());
    }

    #[test]
    fn test_send_rejection_carries_reason() {
        let body = r#"{"result":null,"error":{"code":-26,"message":"min relay fee not met"},"id":"btc-wallet"}"#;
        let (url, server) = serve_once("500 Internal Server Error", body);
        let client = RpcClient::new(&url, "user", "pass").unwrap();

        let err = client.send_raw_transaction("00", TIMEOUT).unwrap_err();
        assert!(matches!(err, WalletError::RejectedByNetwork(ref r) if r == "min relay fee not met"));
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_node() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = RpcClient::new(&url, "user", "pass").unwrap();
        let err = client.send_raw_transaction("00", TIMEOUT).unwrap_err();
        assert!(matches!(err, WalletError::NodeUnavailable(_)));
    }

    #[test]
    fn test_decode_response() {
        let txid: String = decode_response("sendrawtransaction", 200, r#"{"result":"ab","error":null}"#).unwrap();
        assert_eq!(txid, "ab");

        let err = decode_response::<String>("getinfo", 401, "").unwrap_err();
        assert!(matches!(err, WalletError::NodeUnavailable(ref m) if m.contains("401")));

        let err = decode_response::<String>(
            "sendrawtransaction",
            500,
            r#"{"result":null,"error":{"code":-27,"message":"Transaction already in block chain"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::RejectedByNetwork(_)));

        let err = decode_response::<String>(
            "listunspent",
            500,
            r#"{"result":null,"error":{"code":-28,"message":"Loading block index..."}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::NodeUnavailable(_)));
    }

    #[test]
    fn test_amount_conversion() {
        assert_eq!(btc_to_sat(0.0005).unwrap(), 50_000);
        assert_eq!(btc_to_sat(21.0).unwrap(), 2_100_000_000);
        assert_eq!(btc_to_sat(0.1 + 0.2).unwrap(), 30_000_000);
        assert!(btc_to_sat(-1.0).is_err());
        assert_eq!(sat_to_btc(50_000), 0.0005);
    }
}
