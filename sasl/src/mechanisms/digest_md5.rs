//! DIGEST-MD5 (RFC 2831), as still offered by some legacy XMPP servers.

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine;
use getrandom::getrandom;
use md5::{Digest, Md5};

use crate::{AuthMechanism, Credentials, Error};

enum State {
    Initial,
    WaitingFinalChallenge { expected_rspauth: String },
    Done,
}

pub struct DigestMd5 {
    username: String,
    password: String,
    state: State,
}

fn parse_fields(msg: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    let mut rest = msg;
    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(i) => i,
            None => break,
        };
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq + 1..];
        let value = if rest.starts_with('"') {
            let end = match rest[1..].find('"') {
                Some(i) => i + 1,
                None => break,
            };
            let value = rest[1..end].to_owned();
            rest = rest[end + 1..].trim_start_matches(',');
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].to_owned();
            rest = if end < rest.len() { &rest[end + 1..] } else { "" };
            value
        };
        out.insert(key, value);
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn md5_digest(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

impl DigestMd5 {
    pub fn new(creds: &Credentials) -> Result<DigestMd5, Error> {
        if creds.username.is_empty() {
            return Err(Error::NoCredentials);
        }
        Ok(DigestMd5 {
            username: creds.username.clone(),
            password: creds.password.clone(),
            state: State::Initial,
        })
    }

    fn compute(
        &self,
        realm: &str,
        nonce: &str,
        cnonce: &str,
        nc: &str,
        digest_uri: &str,
        qop: &str,
    ) -> ([u8; 16], [u8; 16]) {
        let a1 = {
            let inner = md5_digest(&[
                self.username.as_bytes(),
                b":",
                realm.as_bytes(),
                b":",
                self.password.as_bytes(),
            ]);
            md5_digest(&[&inner, b":", nonce.as_bytes(), b":", cnonce.as_bytes()])
        };
        let response_a2 = md5_digest(&[b"AUTHENTICATE:", digest_uri.as_bytes()]);
        let response = md5_digest(&[
            hex(&a1).as_bytes(),
            b":",
            nonce.as_bytes(),
            b":",
            nc.as_bytes(),
            b":",
            cnonce.as_bytes(),
            b":",
            qop.as_bytes(),
            b":",
            hex(&response_a2).as_bytes(),
        ]);
        let rspauth_a2 = md5_digest(&[b":", digest_uri.as_bytes()]);
        let rspauth = md5_digest(&[
            hex(&a1).as_bytes(),
            b":",
            nonce.as_bytes(),
            b":",
            nc.as_bytes(),
            b":",
            cnonce.as_bytes(),
            b":",
            qop.as_bytes(),
            b":",
            hex(&rspauth_a2).as_bytes(),
        ]);
        (response, rspauth)
    }
}

impl AuthMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Result<Vec<u8>, Error> {
        Ok(Vec::new())
    }

    fn handle_challenge(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        if let State::WaitingFinalChallenge { expected_rspauth } = &self.state {
            let expected_rspauth = expected_rspauth.clone();
            let final_challenge =
                std::str::from_utf8(data).map_err(|e| Error::InvalidReply(e.to_string()))?;
            let fields = parse_fields(final_challenge);
            let rspauth = fields
                .get("rspauth")
                .ok_or_else(|| Error::InvalidReply("missing rspauth".into()))?;
            if rspauth != &expected_rspauth {
                return Err(Error::NotAuthorized);
            }
            self.state = State::Done;
            return Ok(Vec::new());
        }

        let challenge =
            std::str::from_utf8(data).map_err(|e| Error::InvalidReply(e.to_string()))?;
        let fields = parse_fields(challenge);
        let realm = fields.get("realm").cloned().unwrap_or_default();
        let nonce = fields
            .get("nonce")
            .ok_or_else(|| Error::InvalidReply("missing nonce".into()))?
            .clone();
        let digest_uri = format!("xmpp/{}", realm);

        let mut raw_cnonce = [0u8; 16];
        getrandom(&mut raw_cnonce).map_err(|e| Error::InitFailed(e.to_string()))?;
        let cnonce = base64_std.encode(raw_cnonce);
        let nc = "00000001";
        let qop = "auth";

        let (response, rspauth) = self.compute(&realm, &nonce, &cnonce, nc, &digest_uri, qop);

        let mut message = format!(
            "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc={},qop={},digest-uri=\"{}\",response={}",
            self.username, realm, nonce, cnonce, nc, qop, digest_uri, hex(&response)
        );
        message.push_str(",charset=utf-8");

        self.state = State::WaitingFinalChallenge {
            expected_rspauth: hex(&rspauth),
        };
        Ok(message.into_bytes())
    }

    fn handle_success(&mut self, _data: &[u8]) -> Result<(), Error> {
        match self.state {
            State::Done => Ok(()),
            _ => Err(Error::InvalidReply("unexpected DIGEST-MD5 success".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_unquoted_fields() {
        let fields = parse_fields("realm=\"example.com\",nonce=\"abc123\",qop=auth");
        assert_eq!(fields.get("realm").map(String::as_str), Some("example.com"));
        assert_eq!(fields.get("nonce").map(String::as_str), Some("abc123"));
        assert_eq!(fields.get("qop").map(String::as_str), Some("auth"));
    }

    #[test]
    fn produces_a_response_field() {
        let mut mech = DigestMd5::new(&Credentials::new("romeo", "s3cr3t")).unwrap();
        mech.initial_response().unwrap();
        let challenge = b"realm=\"example.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",charset=utf-8,algorithm=md5-sess";
        let response = mech.handle_challenge(challenge).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("response="));
        assert!(text.contains("username=\"romeo\""));
    }

    #[test]
    fn second_challenge_carries_rspauth_and_completes() {
        let mut mech = DigestMd5::new(&Credentials::new("romeo", "s3cr3t")).unwrap();
        mech.initial_response().unwrap();
        let challenge = b"realm=\"example.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",charset=utf-8,algorithm=md5-sess";
        mech.handle_challenge(challenge).unwrap();

        let expected_rspauth = match &mech.state {
            State::WaitingFinalChallenge { expected_rspauth } => expected_rspauth.clone(),
            _ => panic!("expected to be waiting for the final challenge"),
        };
        let second_challenge = format!("rspauth={}", expected_rspauth);
        let response = mech.handle_challenge(second_challenge.as_bytes()).unwrap();
        assert!(response.is_empty());
        assert!(matches!(mech.state, State::Done));
        assert!(mech.handle_success(b"").is_ok());
    }

    #[test]
    fn second_challenge_with_wrong_rspauth_is_rejected() {
        let mut mech = DigestMd5::new(&Credentials::new("romeo", "s3cr3t")).unwrap();
        mech.initial_response().unwrap();
        let challenge = b"realm=\"example.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",charset=utf-8,algorithm=md5-sess";
        mech.handle_challenge(challenge).unwrap();

        let result = mech.handle_challenge(b"rspauth=deadbeef");
        assert!(matches!(result, Err(Error::NotAuthorized)));
    }
}
