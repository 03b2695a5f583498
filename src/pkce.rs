use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Verifier/challenge pair for one OAuth round-trip.
///
/// The verifier stays in a cookie until the callback exchanges the code; only the
/// challenge leaves for the identity provider.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    #[must_use]
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// 64-character URL-safe verifier (48 random bytes, RFC 7636 allows 43-128).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut random_bytes = [0u8; 48];
    rand::rng().fill(&mut random_bytes[..]);
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// `BASE64URL(SHA256(verifier))`, sent with `code_challenge_method=s256`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length_and_alphabet() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {verifier}"
        );
    }

    #[test]
    fn test_pair_challenge_matches_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, generate_code_challenge(&pair.verifier));
        assert_eq!(pair.challenge.len(), 43);
    }

    #[test]
    fn test_pairs_are_unique() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        assert_eq!(
            generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
