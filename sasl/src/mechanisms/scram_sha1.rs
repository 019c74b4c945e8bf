//! SCRAM-SHA-1 (RFC 5802), without channel binding.

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine;
use getrandom::getrandom;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::{Digest, Sha1};

use crate::{AuthMechanism, Credentials, Error};

type HmacSha1 = Hmac<Sha1>;

enum State {
    Initial,
    WaitingServerFirst { client_first_bare: String },
    WaitingServerFinal { auth_message: String, salted_password: [u8; 20] },
    Done,
}

pub struct ScramSha1 {
    username: String,
    password: String,
    client_nonce: String,
    state: State,
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn random_nonce() -> Result<String, Error> {
    let mut raw = [0u8; 18];
    getrandom(&mut raw).map_err(|e| Error::InitFailed(e.to_string()))?;
    Ok(base64_std.encode(raw))
}

/// Splits a SCRAM message of the form `k1=v1,k2=v2,...` into its fields.
fn parse_fields(msg: &str) -> std::collections::HashMap<char, String> {
    msg.split(',')
        .filter_map(|kv| {
            let mut parts = kv.splitn(2, '=');
            let key = parts.next()?.chars().next()?;
            let value = parts.next()?.to_owned();
            Some((key, value))
        })
        .collect()
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn xor(a: &[u8; 20], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = a[i] ^ b[i];
    }
    out
}

impl ScramSha1 {
    pub fn new(creds: &Credentials) -> Result<ScramSha1, Error> {
        if creds.username.is_empty() {
            return Err(Error::NoCredentials);
        }
        Ok(ScramSha1 {
            username: creds.username.clone(),
            password: creds.password.clone(),
            client_nonce: random_nonce()?,
            state: State::Initial,
        })
    }
}

impl AuthMechanism for ScramSha1 {
    fn name(&self) -> &'static str {
        "SCRAM-SHA-1"
    }

    fn initial_response(&mut self) -> Result<Vec<u8>, Error> {
        let client_first_bare = format!("n={},r={}", escape_username(&self.username), self.client_nonce);
        let message = format!("n,,{}", client_first_bare);
        self.state = State::WaitingServerFirst { client_first_bare };
        Ok(message.into_bytes())
    }

    fn handle_challenge(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let client_first_bare = match &self.state {
            State::WaitingServerFirst { client_first_bare } => client_first_bare.clone(),
            _ => return Err(Error::InvalidReply("unexpected SCRAM challenge".into())),
        };
        let server_first =
            std::str::from_utf8(data).map_err(|e| Error::InvalidReply(e.to_string()))?;
        let fields = parse_fields(server_first);
        let server_nonce = fields
            .get(&'r')
            .ok_or_else(|| Error::InvalidReply("missing r= in server-first".into()))?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(Error::InvalidReply(
                "server nonce does not extend client nonce".into(),
            ));
        }
        let salt = fields
            .get(&'s')
            .ok_or_else(|| Error::InvalidReply("missing s= in server-first".into()))?;
        let salt = base64_std
            .decode(salt)
            .map_err(|e| Error::InvalidReply(e.to_string()))?;
        let iterations: u32 = fields
            .get(&'i')
            .ok_or_else(|| Error::InvalidReply("missing i= in server-first".into()))?
            .parse()
            .map_err(|_| Error::InvalidReply("i= is not a valid integer".into()))?;
        if iterations == 0 {
            return Err(Error::InvalidReply("iteration count must be positive".into()));
        }

        let mut salted_password = [0u8; 20];
        pbkdf2_hmac::<Sha1>(self.password.as_bytes(), &salt, iterations, &mut salted_password);

        let client_key = hmac(&salted_password, b"Client Key");
        let mut hasher = Sha1::new();
        hasher.update(client_key);
        let stored_key: [u8; 20] = hasher.finalize().into();

        let channel_binding = base64_std.encode("n,,");
        let client_final_without_proof = format!("c={},r={}", channel_binding, server_nonce);
        let auth_message = format!(
            "{},{},{}",
            client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof = xor(&client_key, &client_signature);
        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            base64_std.encode(proof)
        );

        self.state = State::WaitingServerFinal {
            auth_message,
            salted_password,
        };
        Ok(client_final.into_bytes())
    }

    fn handle_success(&mut self, data: &[u8]) -> Result<(), Error> {
        let (auth_message, salted_password) = match &self.state {
            State::WaitingServerFinal {
                auth_message,
                salted_password,
            } => (auth_message.clone(), *salted_password),
            _ => return Err(Error::InvalidReply("unexpected SCRAM success".into())),
        };
        let server_final =
            std::str::from_utf8(data).map_err(|e| Error::InvalidReply(e.to_string()))?;
        let fields = parse_fields(server_final);
        let v = fields
            .get(&'v')
            .ok_or_else(|| Error::InvalidReply("missing v= in server-final".into()))?;
        let server_signature_given = base64_std
            .decode(v)
            .map_err(|e| Error::InvalidReply(e.to_string()))?;

        let server_key = hmac(&salted_password, b"Server Key");
        let server_signature_expected = hmac(&server_key, auth_message.as_bytes());
        if server_signature_given != server_signature_expected {
            return Err(Error::NotAuthorized);
        }
        self.state = State::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters_in_username() {
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
    }

    #[test]
    fn rejects_server_nonce_not_extending_client_nonce() {
        let mut mech = ScramSha1::new(&Credentials::new("user", "pencil")).unwrap();
        mech.initial_response().unwrap();
        let challenge = b"r=completely-different,s=QSXCR+Q6sek8bf92,i=4096";
        let err = mech.handle_challenge(challenge).unwrap_err();
        assert!(matches!(err, Error::InvalidReply(_)));
    }
}
