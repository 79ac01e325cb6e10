//! The identifier space.
//!
//! Identifiers are 20-byte strings, displayed as 27 characters over a
//! 64-character alphabet. Locations are variable-length strings over the
//! same alphabet addressing points in a per-collection prefix tree; `@`
//! denotes the root prefix.

use std::sync::LazyLock;

use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use rand::RngCore;

use crate::error::SpaceError;

/// Byte width of an identifier.
pub const ID_LEN: usize = 20;

/// Bit width of an identifier, the depth of every prefix trie.
pub const BITS: usize = ID_LEN * 8;

/// Character width of an encoded identifier.
pub const ENCODED_LEN: usize = 27;

/// The root prefix.
pub const ROOT: &str = "@";

/// Display alphabet, in value order.
pub const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

pub type Id = [u8; ID_LEN];

// The Go-style lenient decode: trailing bits of the final character are
// ignored, so substituted location prefixes always round-trip.
const CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::RequireNone)
    .with_decode_allow_trailing_bits(true);

static BASE: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    let alphabet = Alphabet::new(ALPHABET).expect("alphabet holds 64 unique characters");
    GeneralPurpose::new(&alphabet, CONFIG)
});

/// The location one level up: `""` above the root, `@` above single
/// characters, otherwise the location minus its last character.
pub fn parent(location: &str) -> &str {
    match location.len() {
        0 => "",
        _ if location == ROOT => "",
        1 => ROOT,
        n => &location[..n - 1],
    }
}

pub fn random_id() -> Id {
    let mut id = [0u8; ID_LEN];
    rand::rng().fill_bytes(&mut id);
    id
}

pub fn encode_id(id: &Id) -> String {
    BASE.encode(id)
}

/// Decode a display-form name back into an identifier.
pub fn decode_name(name: &str) -> Result<Id, SpaceError> {
    let bytes = BASE.decode(name).map_err(|err| SpaceError::InvalidName {
        raw: name.to_string(),
        reason: err.to_string(),
    })?;
    Id::try_from(bytes.as_slice()).map_err(|_| SpaceError::InvalidLength {
        raw: name.to_string(),
        got: bytes.len(),
        expected: ID_LEN,
    })
}

/// The identifier of a (collection, location) pair: the collection name with
/// its first `|location|` characters replaced by the location.
pub fn decode_location(collection: &str, location: &str) -> Result<Id, SpaceError> {
    let universe = if collection.is_empty() {
        location
    } else {
        collection
    };
    if location == ROOT {
        return decode_name(universe);
    }
    if location.len() > universe.len() {
        return Err(SpaceError::LocationOverflow {
            location: location.to_string(),
            collection: collection.to_string(),
        });
    }
    let key = format!("{location}{}", &universe[location.len()..]);
    decode_name(&key)
}

/// Whether a string is usable as a location: the root, or a non-empty
/// alphabet string no longer than an encoded identifier.
pub fn valid_location(location: &str) -> bool {
    if location == ROOT {
        return true;
    }
    !location.is_empty()
        && location.len() <= ENCODED_LEN
        && location.bytes().all(|b| ALPHABET.as_bytes().contains(&b))
}
