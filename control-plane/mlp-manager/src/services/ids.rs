use rand::Rng;

/// Lowercase so ids are valid in container names and image tags.
const ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3',
    '4', '5', '6', '7', '8', '9',
];

pub fn resource_id() -> String {
    nanoid::nanoid!(16, &ID_ALPHABET)
}

/// 128 random bits as 32 lowercase hex digits.
pub fn hex_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn endpoint_path() -> String {
    format!("/api/predict/{}", hex_token())
}

pub fn api_key() -> String {
    format!("ml_{}", hex_token())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_values_have_expected_shape() {
        let id = resource_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| ID_ALPHABET.contains(&c)));

        let path = endpoint_path();
        let token = path.strip_prefix("/api/predict/").unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(api_key().starts_with("ml_"));
        assert_ne!(hex_token(), hex_token());
    }
}
