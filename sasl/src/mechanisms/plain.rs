//! PLAIN (RFC 4616): authzid NUL authcid NUL password, sent in one shot.

use crate::{AuthMechanism, Credentials, Error};

pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    pub fn new(creds: &Credentials) -> Result<Plain, Error> {
        if creds.username.is_empty() {
            return Err(Error::NoCredentials);
        }
        Ok(Plain {
            username: creds.username.clone(),
            password: creds.password.clone(),
        })
    }
}

impl AuthMechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn is_plain(&self) -> bool {
        true
    }

    fn initial_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.username.len() * 2 + self.password.len() + 2);
        out.push(0);
        out.extend_from_slice(self.username.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        Ok(out)
    }

    fn handle_challenge(&mut self, _data: &[u8]) -> Result<Vec<u8>, Error> {
        Err(Error::InvalidReply("PLAIN does not expect a challenge".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_authzid_authcid_password() {
        let mut plain = Plain::new(&Credentials::new("romeo", "s3cr3t")).unwrap();
        let resp = plain.initial_response().unwrap();
        assert_eq!(resp, b"\0romeo\0s3cr3t");
    }
}
