//! Cache fingerprint sent with incremental property requests.
//!
//! The digest is a per-property codepoint sum reduced modulo [`MODULUS`]. It is cheap and
//! collides easily; the server only compares it against a digest it computes the same way.

use super::model::PropertyMap;

const SEPARATOR: char = ';';
const MODULUS: u64 = 10_000;

/// Fingerprint of the full property map: one `<hash>;` segment per property in map order.
pub fn fingerprint(properties: &PropertyMap) -> String {
    let mut result = String::new();
    for (id, values) in properties {
        result.push_str(&property_hash(id, values));
        result.push(SEPARATOR);
    }
    result
}

/// Hash of a single property id and its values.
pub fn property_hash<S: AsRef<str>>(id: &str, values: &[S]) -> String {
    let sum = values
        .iter()
        .fold(codepoint_sum(id), |acc, value| {
            acc.wrapping_add(codepoint_sum(value.as_ref()))
        });
    (sum % MODULUS).to_string()
}

fn codepoint_sum(input: &str) -> u64 {
    input.chars().map(|c| u64::from(u32::from(c))).sum()
}
