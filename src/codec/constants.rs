//! Literal bytes of the meta protocol: command verbs, flag tokens, response
//! header words and the status/mode enums built on top of them.

pub(crate) const CRLF: &[u8] = b"\r\n";

pub(crate) const VERSION_REQUEST: &[u8] = b"version";
pub(crate) const META_GET: &[u8] = b"mg ";
pub(crate) const META_SET: &[u8] = b"ms ";
pub(crate) const META_DELETE: &[u8] = b"md ";
pub(crate) const META_ARITHMETIC: &[u8] = b"ma ";

// Bare request flags, each carrying its trailing token separator.
pub(crate) const FETCH_VALUE: &[u8] = b"v ";
pub(crate) const BASE64_KEY: &[u8] = b"b ";
pub(crate) const FETCH_CAS: &[u8] = b"c ";
pub(crate) const FETCH_REMAINING_TTL: &[u8] = b"t ";
pub(crate) const FETCH_CLIENT_FLAGS: &[u8] = b"f ";
pub(crate) const FETCH_HIT_BEFORE: &[u8] = b"h ";
pub(crate) const FETCH_KEY: &[u8] = b"k ";
pub(crate) const FETCH_SIZE: &[u8] = b"s ";
pub(crate) const FETCH_LAST_ACCESS: &[u8] = b"l ";
pub(crate) const PREVENT_LRU_BUMP: &[u8] = b"u ";
pub(crate) const INVALIDATE: &[u8] = b"I ";
pub(crate) const REMOVE_VALUE: &[u8] = b"x ";

// Valued flag letters; the decimal argument follows with no separator.
pub(crate) const CAS_OVERRIDE: u8 = b'E';
pub(crate) const BLOCK_TTL: u8 = b'N';
pub(crate) const RECACHE_TTL: u8 = b'R';
pub(crate) const OPAQUE: u8 = b'O';
pub(crate) const COMPARE_CAS: u8 = b'C';
pub(crate) const INITIAL_VALUE: u8 = b'J';
pub(crate) const CLIENT_FLAGS: u8 = b'F';
pub(crate) const TTL: u8 = b'T';
pub(crate) const DELTA: u8 = b'D';
pub(crate) const SPACE: u8 = b' ';

pub(crate) const CACHE_MISS_HEADER: &[u8] = b"EN";
pub(crate) const HEADER: &[u8] = b"HD";
pub(crate) const VALUE_HEADER: &[u8] = b"VA";
pub(crate) const NOT_FOUND_HEADER: &[u8] = b"NF";
pub(crate) const EXISTS_HEADER: &[u8] = b"EX";
pub(crate) const NOT_STORED_HEADER: &[u8] = b"NS";
pub(crate) const ADD_MODE: &[u8] = b"ME ";
pub(crate) const APPEND_MODE: &[u8] = b"MA ";
pub(crate) const PREPEND_MODE: &[u8] = b"MP ";
pub(crate) const REPLACE_MODE: &[u8] = b"MR ";
pub(crate) const DECREMENT_MODE: &[u8] = b"MD ";
pub(crate) const NOOP_REQUEST: &[u8] = b"mn\r\n";

/// Recache state echoed back on `mg` responses via the bare `W`/`Z` tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecacheStatus {
    #[default]
    NotSet,
    Won,
    AlreadySent,
}

/// Canonical operation status decoded from a response header word. The
/// per-verb mapping differs, so each command has its own translation below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    /// The server returned a status word this client does not recognize.
    #[default]
    Invalid,
    CacheHit,
    CacheMiss,
    NotFound,
    NotStored,
    Exists,
    Stored,
    Deleted,
}

/// Storage mode for `ms`. The default is a plain set, which emits no mode
/// token at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetMode {
    #[default]
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

/// Direction for `ma`. Increment is the protocol default and emits no mode
/// token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArithmeticMode {
    #[default]
    Increment,
    Decrement,
}

/// Status of a meta get operation:
///
/// - `VA`, the item was found and a value block follows
/// - `HD`, the item was found but the request did not ask for the value
/// - `EN`, the item was not found
pub(crate) fn meta_get_status(word: &[u8]) -> Status {
    match word {
        w if w == CACHE_MISS_HEADER => Status::CacheMiss,
        w if w == HEADER || w == VALUE_HEADER => Status::CacheHit,
        _ => Status::Invalid,
    }
}

/// Status of a meta set operation:
///
/// - `HD`, stored
/// - `NS`, the data was not stored, but not because of an error
/// - `EX`, the item being stored with CAS semantics has been modified since
///   it was last fetched
/// - `NF`, the item being stored with CAS semantics did not exist
pub(crate) fn meta_set_status(word: &[u8]) -> Status {
    match word {
        w if w == HEADER => Status::Stored,
        w if w == NOT_STORED_HEADER => Status::NotStored,
        w if w == EXISTS_HEADER => Status::Exists,
        w if w == NOT_FOUND_HEADER => Status::NotFound,
        _ => Status::Invalid,
    }
}

/// Status of an arithmetic operation. `VA` and `HD` both indicate success,
/// the former carrying the new value.
pub(crate) fn meta_arithmetic_status(word: &[u8]) -> Status {
    match word {
        w if w == HEADER || w == VALUE_HEADER => Status::Stored,
        w if w == NOT_STORED_HEADER => Status::NotStored,
        w if w == EXISTS_HEADER => Status::Exists,
        w if w == NOT_FOUND_HEADER => Status::NotFound,
        _ => Status::Invalid,
    }
}

/// Status of a meta delete operation; `HD` indicates the item was deleted.
pub(crate) fn meta_delete_status(word: &[u8]) -> Status {
    match word {
        w if w == HEADER => Status::Deleted,
        w if w == EXISTS_HEADER => Status::Exists,
        w if w == NOT_FOUND_HEADER => Status::NotFound,
        w if w == NOT_STORED_HEADER => Status::NotStored,
        _ => Status::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_verb_status_mappings() {
        assert_eq!(meta_get_status(b"EN"), Status::CacheMiss);
        assert_eq!(meta_get_status(b"HD"), Status::CacheHit);
        assert_eq!(meta_get_status(b"VA"), Status::CacheHit);
        assert_eq!(meta_get_status(b"NF"), Status::Invalid);

        assert_eq!(meta_set_status(b"HD"), Status::Stored);
        assert_eq!(meta_set_status(b"NS"), Status::NotStored);
        assert_eq!(meta_set_status(b"EX"), Status::Exists);
        assert_eq!(meta_set_status(b"NF"), Status::NotFound);
        assert_eq!(meta_set_status(b"EN"), Status::Invalid);

        assert_eq!(meta_arithmetic_status(b"HD"), Status::Stored);
        assert_eq!(meta_arithmetic_status(b"VA"), Status::Stored);
        assert_eq!(meta_arithmetic_status(b"NS"), Status::NotStored);

        assert_eq!(meta_delete_status(b"HD"), Status::Deleted);
        assert_eq!(meta_delete_status(b"EX"), Status::Exists);
        assert_eq!(meta_delete_status(b"garbage"), Status::Invalid);
    }
}
