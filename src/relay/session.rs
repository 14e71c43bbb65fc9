//! Relay session: the three-leg handshake that produces an authenticated,
//! owner-proved channel to one relay URL, and the command round trip that
//! rides on top of it.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::RelayConfig;
use crate::crypto::{self, Keys, KEY_LEN};
use crate::encoding::{from_base64_fixed, to_base64};
use crate::error::ZaxError;
use crate::relay::commands::{self, CommandResponse, RelayCommand};
use crate::transport::Transport;

fn text_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), "text/plain".to_string());
    headers.insert("Accept".to_string(), "text/plain".to_string());
    headers
}

fn split_lines(body: &str) -> Vec<String> {
    body.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect()
}

/// True iff the rightmost `d` bits of `a` (`a[0]` holding the lowest 8
/// bits, each successive byte the next higher 8) are all zero.
fn array_zero_bits(a: &[u8; 32], d: u8) -> bool {
    let full_bytes = (d / 8) as usize;
    let remaining = d % 8;
    if a[..full_bytes].iter().any(|&b| b != 0) {
        return false;
    }
    if remaining > 0 {
        let mask = (1u8 << remaining) - 1;
        if a[full_bytes] & mask != 0 {
            return false;
        }
    }
    true
}

/// Per-(mailbox, url) session state machine:
/// `Fresh → TokenAcquired → KeyAcquired → Proved → Expired`.
pub struct RelaySession {
    url: String,
    client_token: Option<[u8; 32]>,
    relay_token: Option<[u8; 32]>,
    session_keys: Option<Keys>,
    relay_public_key: Option<[u8; KEY_LEN]>,
    difficulty: u8,
    token_deadline: Option<Instant>,
    session_deadline: Option<Instant>,
    connected: bool,
}

impl RelaySession {
    pub fn new(url: impl Into<String>) -> Self {
        RelaySession {
            url: url.into(),
            client_token: None,
            relay_token: None,
            session_keys: None,
            relay_public_key: None,
            difficulty: 0,
            token_deadline: None,
            session_deadline: None,
            connected: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True only if `prove` has succeeded and neither deadline has passed.
    pub fn connected(&self) -> bool {
        self.connected && !self.expired()
    }

    fn expired(&self) -> bool {
        let now = Instant::now();
        match (self.token_deadline, self.session_deadline) {
            (Some(token), Some(session)) => now > token || now > session,
            _ => true,
        }
    }

    /// Discard all ephemerals and return to `Fresh`. Called on proof
    /// failure, or when a command observes HTTP 401.
    pub fn invalidate(&mut self) {
        self.client_token = None;
        self.relay_token = None;
        self.session_keys = None;
        self.relay_public_key = None;
        self.difficulty = 0;
        self.token_deadline = None;
        self.session_deadline = None;
        self.connected = false;
    }

    /// Run the full three-leg handshake.
    pub async fn connect(
        &mut self,
        transport: &dyn Transport,
        config: &RelayConfig,
        comm_key: &Keys,
    ) -> Result<(), ZaxError> {
        self.invalidate();
        if let Err(e) = self.start_session(transport, config).await {
            self.invalidate();
            return Err(e);
        }
        if let Err(e) = self.verify_session(transport, config).await {
            self.invalidate();
            return Err(e);
        }
        if let Err(e) = self.prove(transport, config, comm_key).await {
            self.invalidate();
            return Err(e);
        }
        Ok(())
    }

    async fn post(&self, transport: &dyn Transport, config: &RelayConfig, path: &str, body: String) -> Result<String, ZaxError> {
        let url = format!("{}{path}", self.url);
        tokio::time::timeout(config.ajax_timeout(), transport.request("POST", &url, &text_headers(), body))
            .await
            .map_err(|_| ZaxError::Timeout)?
    }

    async fn start_session(&mut self, transport: &dyn Transport, config: &RelayConfig) -> Result<(), ZaxError> {
        let client_token = crypto::random_bytes(config.relay_token_len);
        let client_token: [u8; 32] = client_token
            .try_into()
            .map_err(|_| ZaxError::invariant("relay_token_len must be 32"))?;

        let body = self.post(transport, config, "/start_session", to_base64(&client_token)).await?;
        let lines = split_lines(&body);
        if lines.len() != 2 {
            return Err(ZaxError::protocol(&self.url, None, "start_session: expected 2 response lines"));
        }

        let relay_token: [u8; 32] = from_base64_fixed(&lines[0])?;
        let difficulty: u8 = lines[1]
            .trim()
            .parse()
            .map_err(|_| ZaxError::protocol(&self.url, None, "start_session: non-integer difficulty"))?;

        self.client_token = Some(client_token);
        self.relay_token = Some(relay_token);
        self.difficulty = difficulty;
        self.token_deadline = Some(Instant::now() + config.token_timeout());
        tracing::debug!(url = %self.url, difficulty, "relay session token acquired");
        Ok(())
    }

    async fn verify_session(&mut self, transport: &dyn Transport, config: &RelayConfig) -> Result<(), ZaxError> {
        let client_token = self.client_token.ok_or_else(|| ZaxError::invariant("verify_session before start_session"))?;
        let relay_token = self.relay_token.ok_or_else(|| ZaxError::invariant("verify_session before start_session"))?;

        let mut handshake = Vec::with_capacity(64);
        handshake.extend_from_slice(&client_token);
        handshake.extend_from_slice(&relay_token);

        let session_handshake = if self.difficulty == 0 {
            crypto::h2(&handshake)
        } else {
            self.search_proof_of_work(&handshake).await?
        };

        let body = format!("{}\r\n{}", to_base64(&crypto::h2(&client_token)), to_base64(&session_handshake));
        let response = self.post(transport, config, "/verify_session", body).await?;
        let relay_public_key: [u8; KEY_LEN] = from_base64_fixed(response.trim())?;

        self.relay_public_key = Some(relay_public_key);
        tracing::debug!(url = %self.url, "relay session key acquired");
        Ok(())
    }

    /// Cooperatively search for a 32-byte nonce satisfying the requested
    /// difficulty. Yields back to the runtime every 4096 attempts so the
    /// search never blocks other tasks (or a caller's cancellation) for
    /// longer than one batch, and logs progress when `difficulty > 10`.
    async fn search_proof_of_work(&self, handshake: &[u8]) -> Result<[u8; 32], ZaxError> {
        let mut attempts: u64 = 0;
        loop {
            let candidate: [u8; 32] = crypto::random_bytes(32)
                .try_into()
                .map_err(|_| ZaxError::Timeout)?;

            let mut input = Vec::with_capacity(handshake.len() + 32);
            input.extend_from_slice(handshake);
            input.extend_from_slice(&candidate);

            if array_zero_bits(&crypto::h2(&input), self.difficulty) {
                return Ok(candidate);
            }

            attempts += 1;
            if attempts % 4096 == 0 {
                if self.difficulty > 10 {
                    tracing::debug!(url = %self.url, difficulty = self.difficulty, attempts, "proof-of-work search in progress");
                }
                tokio::task::yield_now().await;
            }
        }
    }

    async fn prove(&mut self, transport: &dyn Transport, config: &RelayConfig, comm_key: &Keys) -> Result<(), ZaxError> {
        let client_token = self.client_token.ok_or_else(|| ZaxError::invariant("prove before start_session"))?;
        let relay_token = self.relay_token.ok_or_else(|| ZaxError::invariant("prove before start_session"))?;
        let relay_public_key = self.relay_public_key.ok_or_else(|| ZaxError::invariant("prove before verify_session"))?;

        let session_keys = Keys::generate();

        let mut sig_input = Vec::with_capacity(32 + 32 + 32);
        sig_input.extend_from_slice(&session_keys.public_key());
        sig_input.extend_from_slice(&relay_token);
        sig_input.extend_from_slice(&client_token);
        let signature = crypto::h2(&sig_input);

        let inner_nonce = crypto::make_nonce(None);
        let inner_ctext = crypto::box_seal(&signature, &inner_nonce, &relay_public_key, comm_key);

        let payload = serde_json::json!({
            "pub_key": to_base64(&comm_key.public_key()),
            "nonce": to_base64(&inner_nonce),
            "ctext": to_base64(&inner_ctext),
        });
        let payload_bytes = serde_json::to_vec(&payload)
            .expect("proof payload is always serializable");

        let outer_nonce = crypto::make_nonce(None);
        let outer_ctext = crypto::box_seal(&payload_bytes, &outer_nonce, &relay_public_key, &session_keys);

        let body = [
            to_base64(&crypto::h2(&client_token)),
            to_base64(&session_keys.public_key()),
            to_base64(&outer_nonce),
            to_base64(&outer_ctext),
        ]
        .join("\r\n");

        let response = self.post(transport, config, "/prove", body).await?;
        let _message_count: i64 = response
            .trim()
            .parse()
            .map_err(|_| ZaxError::protocol(&self.url, None, "prove: non-integer response"))?;

        self.session_keys = Some(session_keys);
        self.session_deadline = Some(Instant::now() + config.session_timeout());
        self.connected = true;
        tracing::debug!(url = %self.url, "relay session proved");
        Ok(())
    }

    /// Issue one `/command` round trip. The caller is responsible for
    /// ensuring the session is connected and for the expiry/401 retry
    /// policy (§4.4.3, §4.5.6).
    pub async fn send_command(
        &self,
        transport: &dyn Transport,
        config: &RelayConfig,
        hpk: &str,
        cmd: RelayCommand,
        params: serde_json::Value,
        extra_line: Option<&[u8]>,
    ) -> Result<CommandResponse, ZaxError> {
        let relay_public_key = self.relay_public_key.ok_or_else(|| ZaxError::invariant("send_command on an unconnected session"))?;
        let session_keys = self.session_keys.as_ref().ok_or_else(|| ZaxError::invariant("send_command on an unconnected session"))?;

        let body = commands::build_request(cmd, params, hpk, &relay_public_key, session_keys, extra_line)?;
        let response = self.post(transport, config, "/command", body).await?;
        commands::parse_response(cmd, &response, &relay_public_key, session_keys)
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<RelaySession>();
}
