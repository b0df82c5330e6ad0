//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! Builds RFC 5849 style signatures and Authorization headers for the
//! Twitter API. Used for every signed request: the request-token leg
//! (no token yet), the access-token exchange, and authenticated calls.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// Percent-encode a string per OAuth spec (RFC 3986).
/// Only `A-Z a-z 0-9 - . _ ~` pass through unencoded; any deviation here
/// breaks every signed request.
pub fn percent_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Decode %XX sequences (and `+` as space) from a form-encoded value
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = &s[i + 1..i + 3];
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Compute the OAuth 1.0a signature for a request.
///
/// `params` must contain every oauth_* parameter plus any query/body
/// parameters that are part of the request. Deterministic for fixed
/// inputs, which makes golden-vector testing possible.
pub fn sign(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    consumer_secret: &str,
    token_secret: &str,
) -> String {
    // Encode, then sort lexicographically by encoded key (ties by value)
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string: String = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );

    let mut mac =
        HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base_string.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Generate an OAuth 1.0a Authorization header with a fixed nonce and
/// timestamp. The public entry point [`oauth_header`] supplies fresh ones.
///
/// * `token` - (oauth_token, token_secret) pair; `None` on the
///   request-token leg where no token exists yet
/// * `oauth_extra` - extra oauth_* protocol params that belong in both the
///   signature and the header (oauth_callback, oauth_verifier)
/// * `request_params` - query/body params that are signed but not placed
///   in the header
pub fn oauth_header_with(
    method: &str,
    url: &str,
    consumer_key: &str,
    consumer_secret: &str,
    token: Option<(&str, &str)>,
    oauth_extra: &[(&str, &str)],
    request_params: Option<&[(&str, &str)]>,
    nonce: &str,
    timestamp: &str,
) -> String {
    let mut oauth_params: Vec<(&str, &str)> = vec![
        ("oauth_consumer_key", consumer_key),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_version", "1.0"),
    ];
    if let Some((tok, _)) = token {
        oauth_params.push(("oauth_token", tok));
    }
    for (k, v) in oauth_extra {
        oauth_params.push((k, v));
    }

    // Signature covers oauth params plus any request params
    let mut sign_params = oauth_params.clone();
    if let Some(params) = request_params {
        for (k, v) in params {
            sign_params.push((k, v));
        }
    }

    let token_secret = token.map(|(_, s)| s).unwrap_or("");
    let signature = sign(method, url, &sign_params, consumer_secret, token_secret);

    // Header carries the oauth params plus the signature, sorted
    oauth_params.push(("oauth_signature", &signature));
    oauth_params.sort();

    let auth_string: String = oauth_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("OAuth {}", auth_string)
}

/// Generate an OAuth 1.0a Authorization header with a fresh nonce and the
/// current unix timestamp.
pub fn oauth_header(
    method: &str,
    url: &str,
    consumer_key: &str,
    consumer_secret: &str,
    token: Option<(&str, &str)>,
    oauth_extra: &[(&str, &str)],
    request_params: Option<&[(&str, &str)]>,
) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string();

    let nonce: String = (0..32)
        .map(|_| format!("{:x}", rand::random::<u8>()))
        .collect();

    oauth_header_with(
        method,
        url,
        consumer_key,
        consumer_secret,
        token,
        oauth_extra,
        request_params,
        &nonce,
        &timestamp,
    )
}

/// Parse a `key=value&key=value` form body (request-token and
/// access-token responses) into decoded pairs.
pub fn parse_form_body(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

/// Look up a single value in a parsed form body
pub fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Bound an API error body for error messages. Truncates on char
/// boundaries; platform error bodies are frequently non-ASCII.
pub fn truncate_error(s: &str) -> String {
    if s.chars().count() > 200 {
        s.chars().take(200).collect()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("hello"), "hello");
        assert_eq!(percent_encode("hello world"), "hello%20world");
        assert_eq!(percent_encode("a=b&c=d"), "a%3Db%26c%3Dd");
        // Unreserved set must pass through untouched
        assert_eq!(percent_encode("-._~"), "-._~");
        assert_eq!(percent_encode("Ladies + Gentlemen"), "Ladies%20%2B%20Gentlemen");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("a%3Db"), "a=b");
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("a+b"), "a b");
    }

    #[test]
    fn test_signature_golden_request_token() {
        // Precomputed reference for the request-token leg
        let sig = sign(
            "POST",
            "https://api.twitter.com/oauth/request_token",
            &[("oauth_callback", "https://example.com/cb")],
            "SECRET",
            "",
        );
        assert_eq!(sig, "jLAosZh+1lDAIcdPhxoJKODgvvs=");
    }

    #[test]
    fn test_signature_golden_twitter_doc_vector() {
        // The worked example from Twitter's "Creating a signature" docs
        let params = [
            ("status", "Hello Ladies + Gentlemen, a signed OAuth request!"),
            ("include_entities", "true"),
            ("oauth_consumer_key", "xvz1evFS4wEEPTGEFPHBog"),
            ("oauth_nonce", "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg"),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", "1318622958"),
            (
                "oauth_token",
                "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            ),
            ("oauth_version", "1.0"),
        ];
        let sig = sign(
            "POST",
            "https://api.twitter.com/1.1/statuses/update.json",
            &params,
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        );
        assert_eq!(sig, "hCtSmYh+iHYCEqBWrE7C7hYmtUk=");
    }

    #[test]
    fn test_signature_deterministic() {
        let params = [("oauth_callback", "https://example.com/cb")];
        let a = sign("POST", "https://api.twitter.com/oauth/request_token", &params, "s", "");
        let b = sign("POST", "https://api.twitter.com/oauth/request_token", &params, "s", "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_shape() {
        let header = oauth_header_with(
            "POST",
            "https://api.twitter.com/oauth/request_token",
            "ckey",
            "csecret",
            None,
            &[("oauth_callback", "https://example.com/cb")],
            None,
            "abc123",
            "1318622958",
        );
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_consumer_key=\"ckey\""));
        assert!(header.contains("oauth_callback=\"https%3A%2F%2Fexample.com%2Fcb\""));
        assert!(header.contains("oauth_signature=\""));
        // No token on the request-token leg
        assert!(!header.contains("oauth_token="));
        // Keys are sorted: callback before consumer_key before nonce
        let cb = header.find("oauth_callback").unwrap();
        let ck = header.find("oauth_consumer_key").unwrap();
        let nonce = header.find("oauth_nonce").unwrap();
        assert!(cb < ck && ck < nonce);
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let long = "x".repeat(500);
        assert_eq!(truncate_error(&long).len(), 200);
        assert_eq!(truncate_error("short"), "short");

        // Multibyte char straddling the cut point must not panic
        let mut body = "x".repeat(199);
        body.push_str("ééé");
        let truncated = truncate_error(&body);
        assert_eq!(truncated.chars().count(), 200);
        assert!(truncated.ends_with('é'));

        let emoji = "🦀".repeat(300);
        assert_eq!(truncate_error(&emoji).chars().count(), 200);
    }

    #[test]
    fn test_parse_form_body() {
        let pairs = parse_form_body("oauth_token=abc&oauth_token_secret=def&oauth_callback_confirmed=true");
        assert_eq!(form_value(&pairs, "oauth_token"), Some("abc"));
        assert_eq!(form_value(&pairs, "oauth_token_secret"), Some("def"));
        assert_eq!(form_value(&pairs, "oauth_callback_confirmed"), Some("true"));
        assert_eq!(form_value(&pairs, "missing"), None);

        let encoded = parse_form_body("k=a%20b");
        assert_eq!(form_value(&encoded, "k"), Some("a b"));
    }
}
