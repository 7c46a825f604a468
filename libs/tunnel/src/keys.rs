use boringtun::x25519::{PublicKey, StaticSecret};

/// The edge's own Curve25519 static key pair, generated once on coordinator
/// startup and announced to peers in every `connect-response`.
#[derive(Clone)]
pub struct EdgeKeyPair {
    private: StaticSecret,
    public: PublicKey,
}

impl EdgeKeyPair {
    pub fn generate() -> Self {
        let private = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&private);

        Self { private, public }
    }

    pub fn private_key(&self) -> &StaticSecret {
        &self.private
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_hex_is_32_bytes() {
        let pair = EdgeKeyPair::generate();

        assert_eq!(pair.public_key_hex().len(), 64);
    }

    #[test]
    fn two_generated_pairs_differ() {
        let a = EdgeKeyPair::generate();
        let b = EdgeKeyPair::generate();

        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }
}
