//! Bearer-token verification.
//!
//! Token issuance is an external collaborator; the core only binds a
//! presented token to an account. The format is
//! `<account-id-hex>.<hex HMAC-SHA256(JWT_SECRET, account-id-hex)>`, checked
//! in constant time by the MAC verifier.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use petri_types::AccountId;

type HmacSha256 = Hmac<Sha256>;

/// Mint a token for an account; dev/test surface standing in for the issuer.
pub fn mint_token(secret: &str, account: AccountId) -> String {
    let id_hex = account.to_hex();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(id_hex.as_bytes());
    let tag = mac.finalize().into_bytes();
    format!("{id_hex}.{}", hex::encode(tag))
}

/// Verify a presented token and return the bound account.
pub fn verify_token(secret: &str, token: &str) -> Option<AccountId> {
    let (id_hex, tag_hex) = token.split_once('.')?;
    let account = AccountId::from_hex(id_hex)?;
    let tag = hex::decode(tag_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(id_hex.as_bytes());
    mac.verify_slice(&tag).ok()?;
    Some(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_verify() {
        let account = AccountId([9u8; 16]);
        let token = mint_token("secret", account);
        assert_eq!(verify_token("secret", &token), Some(account));
    }

    #[test]
    fn wrong_secret_rejected() {
        let account = AccountId([9u8; 16]);
        let token = mint_token("secret", account);
        assert_eq!(verify_token("other", &token), None);
    }

    #[test]
    fn tampered_tokens_rejected() {
        let account = AccountId([9u8; 16]);
        let token = mint_token("secret", account);
        let mut forged = token.clone();
        forged.replace_range(0..2, "ff");
        assert_eq!(verify_token("secret", &forged), None);

        assert_eq!(verify_token("secret", "garbage"), None);
        assert_eq!(verify_token("secret", "aa.bb"), None);
    }
}
