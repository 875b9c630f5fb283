//! OAuth 1.0a request signing (HMAC-SHA1, RFC 5849) for the four key-file
//! secrets.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use sha1::Sha1;

use crate::config::Credentials;
use crate::tumblr::FetchError;

/// Everything but ALPHA / DIGIT / "-" / "." / "_" / "~" is escaped.
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE).to_string()
}

/// Build the `Authorization: OAuth ...` value for a request to `url`.
///
/// Query parameters already on `url` are part of the signature base string.
pub fn authorization_header(
    credentials: &Credentials,
    method: &str,
    url: &Url,
    nonce: &str,
    timestamp: i64,
) -> Result<String, FetchError> {
    let timestamp = timestamp.to_string();
    let oauth_params = [
        ("oauth_consumer_key", credentials.consumer_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", credentials.oauth_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
        .collect();
    params.sort();
    let normalized = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = url.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);
    let base_string = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url.as_str()),
        encode(&normalized)
    );

    let signing_key = format!(
        "{}&{}",
        encode(&credentials.consumer_secret),
        encode(&credentials.oauth_token_secret)
    );
    let signature = sign(signing_key.as_bytes(), base_string.as_bytes())
        .map_err(|e| FetchError::Format(format!("cannot sign request: {e}")))?;

    let fields = oauth_params
        .iter()
        .map(|(k, v)| (*k, *v))
        .chain(std::iter::once(("oauth_signature", signature.as_str())))
        .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {fields}"))
}

fn sign(key: &[u8], message: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)?;
    mac.update(message);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
