//! Fixed-width hex fields for the JSON-lines files

use serde::{de, Deserialize, Deserializer, Serializer};

/// Decode a hex string into exactly `N` bytes. Case-insensitive.
pub fn decode_array<const N: usize>(s: &str) -> anyhow::Result<[u8; N]> {
    let s = s.trim();
    if s.len() != N * 2 {
        return Err(anyhow::anyhow!(
            "expected {} hex digits, got {} in {:?}",
            N * 2,
            s.len(),
            s
        ));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|e| anyhow::anyhow!("invalid hex {:?}: {}", s, e))?;
    Ok(out)
}

pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode_upper(bytes))
}

pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    decode_array(&s).map_err(de::Error::custom)
}

/// Optional fixed-width fields; absent or null decodes to `None`
pub mod option {
    use super::*;

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<Option<[u8; N]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| decode_array(&s).map_err(de::Error::custom))
            .transpose()
    }
}

/// Variable-length byte strings
pub mod vec {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_array_accepts_either_case() {
        assert_eq!(decode_array::<3>("fea9B8").unwrap(), [0xFE, 0xA9, 0xB8]);
    }

    #[test]
    fn test_decode_array_rejects_wrong_width() {
        assert!(decode_array::<4>("260B12").is_err());
        assert!(decode_array::<2>("zz00").is_err());
    }
}
