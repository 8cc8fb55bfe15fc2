use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::protocol::{Direction, Role, SrtpSecrets};
use crate::srtp::{SrtpEndpointKeys, SrtpPolicy};

/// Key and salt for one direction, picked out of the negotiated secrets.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    #[zeroize(skip)]
    pub policy: SrtpPolicy,
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
    #[zeroize(skip)]
    pub role: Role,
    #[zeroize(skip)]
    pub direction: Direction,
}

impl SessionKeyMaterial {
    /// The initiator sends with initiator keys and receives with responder
    /// keys; the responder does the opposite.
    #[must_use]
    pub fn for_direction(secrets: &SrtpSecrets, direction: Direction) -> Self {
        let initiator_keys = matches!(
            (secrets.role, direction),
            (Role::Initiator, Direction::Sender) | (Role::Responder, Direction::Receiver)
        );
        let (key, salt) = if initiator_keys {
            (&secrets.key_initiator, &secrets.salt_initiator)
        } else {
            (&secrets.key_responder, &secrets.salt_responder)
        };
        Self {
            policy: secrets.policy(),
            key: key.clone(),
            salt: salt.clone(),
            role: secrets.role,
            direction,
        }
    }

    #[must_use]
    pub fn endpoint_keys(&self) -> SrtpEndpointKeys {
        SrtpEndpointKeys::new(&self.key, &self.salt)
    }
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyMaterial")
            .field("policy", &self.policy)
            .field("role", &self.role)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srtp::SrtpCipher;

    fn secrets(role: Role) -> SrtpSecrets {
        SrtpSecrets {
            cipher: SrtpCipher::AesCm128,
            auth_tag_len: 10,
            key_initiator: vec![1; 16],
            salt_initiator: vec![2; 14],
            key_responder: vec![3; 16],
            salt_responder: vec![4; 14],
            role,
        }
    }

    #[test]
    fn role_resolution_table() {
        let cases = [
            (Role::Initiator, Direction::Sender, 1u8, 2u8),
            (Role::Initiator, Direction::Receiver, 3, 4),
            (Role::Responder, Direction::Sender, 3, 4),
            (Role::Responder, Direction::Receiver, 1, 2),
        ];
        for (role, dir, key, salt) in cases {
            let m = SessionKeyMaterial::for_direction(&secrets(role), dir);
            assert_eq!(m.key, vec![key; 16], "{role:?}/{dir:?}");
            assert_eq!(m.salt, vec![salt; 14], "{role:?}/{dir:?}");
        }
    }
}
