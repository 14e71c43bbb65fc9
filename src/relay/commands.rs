//! Command envelope: encode a `/command` request and decode its response
//! according to the per-command line-arity table.

use crate::crypto::{self, Keys, BOX_NONCE_LEN, KEY_LEN};
use crate::encoding::{from_base64, from_base64_fixed, to_base64};
use crate::error::ZaxError;

/// The recognized `/command` command set. `getEntropy` is deliberately
/// omitted: it has no server endpoint in the stable wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Count,
    Upload,
    Download,
    MessageStatus,
    Delete,
    StartFileUpload,
    UploadFileChunk,
    DownloadFileChunk,
    FileStatus,
    DeleteFile,
}

impl RelayCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayCommand::Count => "count",
            RelayCommand::Upload => "upload",
            RelayCommand::Download => "download",
            RelayCommand::MessageStatus => "messageStatus",
            RelayCommand::Delete => "delete",
            RelayCommand::StartFileUpload => "startFileUpload",
            RelayCommand::UploadFileChunk => "uploadFileChunk",
            RelayCommand::DownloadFileChunk => "downloadFileChunk",
            RelayCommand::FileStatus => "fileStatus",
            RelayCommand::DeleteFile => "deleteFile",
        }
    }

    /// Number of CRLF-separated lines in this command's response.
    fn response_line_count(self) -> usize {
        match self {
            RelayCommand::Upload | RelayCommand::MessageStatus | RelayCommand::Delete => 1,
            RelayCommand::DownloadFileChunk => 3,
            _ => 2,
        }
    }
}

/// A decoded `/command` response.
pub enum CommandResponse {
    /// The one-line, unencrypted response shared by `upload`, `delete`, and
    /// `messageStatus`.
    Raw(String),
    /// A session-box-decrypted JSON value (two-line responses).
    Json(serde_json::Value),
    /// `downloadFileChunk`: the symmetric chunk nonce recovered from the
    /// session-encrypted pair, plus the raw chunk ciphertext.
    FileChunk { nonce: [u8; BOX_NONCE_LEN], raw_ctext: Vec<u8> },
}

/// Build the CRLF-framed request body for `cmd` with JSON `params` merged
/// into `{"cmd": "<name>", ...params}`.
pub fn build_request(
    cmd: RelayCommand,
    mut params: serde_json::Value,
    hpk: &str,
    relay_public_key: &[u8; KEY_LEN],
    session_keys: &Keys,
    extra_line: Option<&[u8]>,
) -> Result<String, ZaxError> {
    let obj = params
        .as_object_mut()
        .ok_or_else(|| ZaxError::invariant("command params must be a JSON object"))?;
    obj.insert("cmd".to_string(), serde_json::Value::String(cmd.as_str().to_string()));

    let body = serde_json::to_vec(&params)
        .map_err(|e| ZaxError::protocol("", Some(cmd.as_str()), format!("failed to serialize command: {e}")))?;

    let nonce = crypto::make_nonce(None);
    let ctext = crypto::box_seal(&body, &nonce, relay_public_key, session_keys);

    let mut lines = vec![hpk.to_string(), to_base64(&nonce), to_base64(&ctext)];
    if let Some(extra) = extra_line {
        lines.push(to_base64(extra));
    }
    Ok(lines.join("\r\n"))
}

fn split_lines(body: &str) -> Vec<String> {
    body.split(['\n'])
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect()
}

/// Parse a relay response for `cmd`, decrypting the session-boxed lines
/// against `relay_public_key`/`session_keys` where the command requires it.
pub fn parse_response(
    cmd: RelayCommand,
    raw_body: &str,
    relay_public_key: &[u8; KEY_LEN],
    session_keys: &Keys,
) -> Result<CommandResponse, ZaxError> {
    let lines = split_lines(raw_body);
    let expected = cmd.response_line_count();
    if lines.len() != expected {
        return Err(ZaxError::protocol(
            "",
            Some(cmd.as_str()),
            format!("expected {expected} response line(s), got {}", lines.len()),
        ));
    }

    match cmd {
        RelayCommand::Upload | RelayCommand::MessageStatus | RelayCommand::Delete => {
            Ok(CommandResponse::Raw(lines[0].clone()))
        }
        RelayCommand::DownloadFileChunk => {
            let plaintext = open_session_pair(&lines[0], &lines[1], cmd, relay_public_key, session_keys)?;
            let nonce_b64: String = serde_json::from_slice(&plaintext)
                .map_err(|e| ZaxError::protocol("", Some(cmd.as_str()), format!("malformed chunk nonce: {e}")))?;
            let nonce = from_base64_fixed(&nonce_b64)?;
            let raw_ctext = from_base64(&lines[2])?;
            Ok(CommandResponse::FileChunk { nonce, raw_ctext })
        }
        _ => {
            let plaintext = open_session_pair(&lines[0], &lines[1], cmd, relay_public_key, session_keys)?;
            let value = serde_json::from_slice(&plaintext)
                .map_err(|e| ZaxError::protocol("", Some(cmd.as_str()), format!("malformed response body: {e}")))?;
            Ok(CommandResponse::Json(value))
        }
    }
}

fn open_session_pair(
    nonce_line: &str,
    ctext_line: &str,
    cmd: RelayCommand,
    relay_public_key: &[u8; KEY_LEN],
    session_keys: &Keys,
) -> Result<Vec<u8>, ZaxError> {
    let nonce: [u8; BOX_NONCE_LEN] = from_base64_fixed(nonce_line)?;
    let ctext = from_base64(ctext_line)?;
    crypto::box_open(&ctext, &nonce, relay_public_key, session_keys)
        .map_err(|_| ZaxError::crypto(format!("command response decrypt ({})", cmd.as_str())))
}
